//! The `parley` command line chat client.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use parley::SessionBuilder;
use parley::config::{Args, load_dotenv};
use parley::console::{Command, OutputMode, parse_command};
use parley::core::{Message, TurnError, TurnOutcome};
use parley_openai_model::OpenAIProvider;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::select;
use tokio::signal;
use tokio::sync::mpsc::{self, UnboundedReceiver};

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    load_dotenv();
    let args = Args::parse();
    debug!("starting with {:?}", args.openai_config());

    let (message_tx, mut message_rx) = mpsc::unbounded_channel();
    let mut builder = SessionBuilder::with_model_provider(OpenAIProvider::new(
        args.openai_config(),
    ))
    .with_thread_id(&args.thread_id)
    .with_checkpointer(args.checkpointer())
    .with_max_rounds(args.max_rounds)
    .with_timeouts(args.model_timeout(), args.tool_timeout())
    .on_message(move |msg| {
        message_tx.send(msg.clone()).ok();
    });
    if let Some(prompt) = &args.system_prompt {
        builder = builder.with_system_prompt(prompt);
    }
    match args.search_tool() {
        Some(tool) => builder = builder.with_tool(tool),
        None => eprintln!(
            "{}",
            "Web search is disabled, set TAVILY_API_KEY to enable it."
                .yellow()
        ),
    }
    let session = builder.build();
    let mode = if args.stream {
        OutputMode::Stream
    } else {
        OutputMode::Final
    };

    match session.history().await {
        Ok(thread) if !thread.is_empty() => println!(
            "{}",
            format!(
                "Continuing thread {} ({} messages)",
                session.thread_id(),
                thread.len()
            )
            .dimmed()
        ),
        Ok(_) => {}
        Err(err) => {
            eprintln!("{}", format!("Error: {err}").bright_red());
            return ExitCode::FAILURE;
        }
    }

    // Finish whatever an earlier run left unanswered.
    drive_turn(session.resume(), &mut message_rx, mode).await;

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        print!("User: ");
        std::io::stdout().flush().ok();

        let line = select! {
            line = lines.next_line() => line,
            _ = signal::ctrl_c() => {
                println!("\nGoodbye!");
                return ExitCode::SUCCESS;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return ExitCode::SUCCESS,
            Err(err) => {
                error!("error reading input: {err}");
                return ExitCode::FAILURE;
            }
        };

        match parse_command(&line) {
            Command::Quit => {
                println!("Goodbye!");
                return ExitCode::SUCCESS;
            }
            Command::Skip => continue,
            Command::Message(text) => {
                let turn = async { session.send_message(text).await.map(Some) };
                drive_turn(turn, &mut message_rx, mode).await;
            }
        }
    }
}

/// Runs a turn to its end while showing a spinner, and prints its outcome.
///
/// Ctrl-C abandons the turn.
async fn drive_turn(
    turn: impl Future<Output = Result<Option<TurnOutcome>, TurnError>>,
    messages: &mut UnboundedReceiver<Message>,
    mode: OutputMode,
) {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {wide_msg}")
            .map(|style| style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"))
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Thinking...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    tokio::pin!(turn);
    let result = loop {
        select! {
            biased;

            Some(msg) = messages.recv() => {
                spinner.suspend(|| print_lines(mode.message_lines(&msg)));
            }
            result = &mut turn => break Some(result),
            _ = signal::ctrl_c() => break None,
        }
    };
    spinner.finish_and_clear();

    while let Ok(msg) = messages.try_recv() {
        print_lines(mode.message_lines(&msg));
    }

    match result {
        Some(Ok(Some(outcome))) => {
            print_lines(mode.outcome_lines(&outcome));
            debug!("turn finished after {} rounds", outcome.rounds);
        }
        Some(Ok(None)) => {}
        Some(Err(err)) => {
            eprintln!("{}", format!("Error: {err}").bright_red());
        }
        None => {
            println!("{}", "Interrupted.".yellow());
        }
    }
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}{}", BAR_CHAR.bright_cyan(), line.bright_white());
    }
}
