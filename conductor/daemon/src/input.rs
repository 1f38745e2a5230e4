//! Console input parsing
//!
//! Lines starting with `/` are console commands; anything else is an
//! utterance for the conductor.

/// Help text printed for `/help`
pub const HELP: &str = "\
Commands:
  /help               show this help
  /export             write the transcript to the export directory
  /hear <transcript>  feed a transcript to the recognition loop
  /key <api-key>      replace the assistant service API key
  /quit               shut down
Anything else is sent to Lily.";

/// One line of console input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceInput {
    /// Text to submit as a user turn
    Utterance(String),
    /// Show the command list
    Help,
    /// Export the transcript
    Export,
    /// Inject a final recognition result
    Hear(String),
    /// Replace the API key used for remote queries
    Key(String),
    /// Shut down
    Quit,
    /// A `/command` that is not recognized
    Unknown(String),
    /// Nothing to do
    Empty,
}

impl SurfaceInput {
    /// Parse a raw console line
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }

        let Some(command) = line.strip_prefix('/') else {
            return Self::Utterance(line.to_string());
        };

        let (name, rest) = match command.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (command, ""),
        };

        match name.to_lowercase().as_str() {
            "help" | "?" => Self::Help,
            "export" => Self::Export,
            "quit" | "exit" => Self::Quit,
            "hear" if !rest.is_empty() => Self::Hear(rest.to_string()),
            "key" if !rest.is_empty() => Self::Key(rest.to_string()),
            _ => Self::Unknown(line.to_string()),
        }
    }
}
