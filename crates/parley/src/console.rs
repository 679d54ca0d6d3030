//! Interpretation of console input and rendering of thread messages.

use parley_core::{Message, TurnOutcome};

/// What a line typed at the prompt asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// End the session.
    Quit,
    /// Nothing was typed.
    Skip,
    /// Send this text to the assistant.
    Message(&'a str),
}

/// Parses one line of input. `quit`, `exit` and `q` end the session, in any
/// case and with any surrounding whitespace.
pub fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Command::Skip;
    }
    if ["quit", "exit", "q"]
        .iter()
        .any(|cmd| line.eq_ignore_ascii_case(cmd))
    {
        return Command::Quit;
    }
    Command::Message(line)
}

/// How much of a turn is shown on the console.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Only the final answer, once the turn is over.
    Final,
    /// Every message as soon as it is persisted.
    Stream,
}

impl OutputMode {
    /// Returns the lines to show when `msg` has been persisted.
    pub fn message_lines(self, msg: &Message) -> Vec<String> {
        match self {
            OutputMode::Final => vec![],
            OutputMode::Stream => render_message(msg),
        }
    }

    /// Returns the lines to show once the turn is over. In streaming mode
    /// the answer has been shown with the message carrying it.
    pub fn outcome_lines(self, outcome: &TurnOutcome) -> Vec<String> {
        match self {
            OutputMode::Final => vec![format!("Assistant: {}", outcome.answer)],
            OutputMode::Stream => vec![],
        }
    }
}

/// Renders a message appended during a turn as the lines to show for it.
///
/// User messages render to nothing, since the user just typed them. An
/// assistant message renders its text, followed by one line per tool call.
pub fn render_message(msg: &Message) -> Vec<String> {
    match msg {
        Message::System(_) | Message::User(_) => vec![],
        Message::Assistant(msg) => {
            let mut lines = Vec::with_capacity(msg.tool_calls.len() + 1);
            if !msg.content.is_empty() {
                lines.push(format!("Assistant: {}", msg.content));
            }
            lines.extend(msg.tool_calls.iter().map(|call| {
                format!("Tool call: {}({})", call.name, call.arguments)
            }));
            lines
        }
        Message::Tool(result) => {
            let label = if result.is_error {
                "Tool error"
            } else {
                "Tool result"
            };
            vec![format!("{label}: {}", result.content)]
        }
    }
}
