//! Input line parsing for the terminal front end

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// `/threads`
    Threads,
    /// `/new [title]`
    New(Option<String>),
    /// `/open <id>`
    Open(String),
    /// `/close`
    Close,
    /// `/quit`
    Quit,
    /// Anything that is not a command
    Send(String),
    Blank,
    /// A slash command we do not know, or one missing its argument
    Invalid(String),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Input::Blank;
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return Input::Send(line.trim_end_matches(['\r', '\n']).to_string());
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
            None => (command, None),
        };
        match (name, arg) {
            ("threads", _) => Input::Threads,
            ("new", title) => Input::New(title.map(ToString::to_string)),
            ("open", Some(id)) => Input::Open(id.to_string()),
            ("open", None) => Input::Invalid("usage: /open <id>".to_string()),
            ("close", _) => Input::Close,
            ("quit" | "exit", _) => Input::Quit,
            _ => Input::Invalid(format!("unknown command: /{name}")),
        }
    }
}

pub const HELP: &str = "commands: /threads, /new [title], /open <id>, /close, /quit";
