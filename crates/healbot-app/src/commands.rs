//! Interactive command parsing.

use std::path::PathBuf;

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start a fresh session for a patient.
    New(String),
    /// Resume a patient's previous session.
    Load(String),
    /// Record a voice message, from an audio file when one is given.
    Record(Option<PathBuf>),
    Stop,
    Cancel,
    Save,
    Sessions,
    Forget,
    Close,
    Help,
    Quit,
    /// Anything that is not a command is a text message.
    Say(String),
    Empty,
    Unknown(String),
}

pub const HELP: &str = "\
Commands:
  /new <name>          start a new session
  /load <name>         resume your previous session
  /record [audio-file] record a voice message (from a file with --file-input)
  /stop                stop recording and send
  /cancel              stop recording and discard
  /save                archive the transcript on the server
  /sessions            list archived transcripts
  /forget              delete this session and start over
  /close               close the chat (sends an active recording)
  /quit                exit
Anything else is sent as a message.";

impl Command {
    pub fn parse(line: &str) -> Command {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        if !line.starts_with('/') {
            return Command::Say(line.to_string());
        }

        let (name, arg) = match line.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (line, ""),
        };
        match name {
            // A blank name still goes through so the orchestrator can prompt.
            "/new" => Command::New(arg.to_string()),
            "/load" => Command::Load(arg.to_string()),
            "/record" if arg.is_empty() => Command::Record(None),
            "/record" => Command::Record(Some(PathBuf::from(arg))),
            "/stop" => Command::Stop,
            "/cancel" => Command::Cancel,
            "/save" => Command::Save,
            "/sessions" => Command::Sessions,
            "/forget" => Command::Forget,
            "/close" => Command::Close,
            "/help" => Command::Help,
            "/quit" | "/exit" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}
