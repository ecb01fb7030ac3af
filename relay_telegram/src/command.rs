use teloxide::types::BotCommand;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    /// `/context <text>`
    Context(String),
    /// `/length <n>`; the argument is validated by the handler.
    Length(String),
    /// `/g <text>`
    Chat(String),
    /// `/h`
    History,
    Save(String),
    Load(String),
    Undo,
    Clear,
    Unknown(String),
}

const COMMANDS: [(&str, &str); 10] = [
    ("start", "Show the welcome message"),
    ("help", "List commands"),
    ("context", "Set the scenario: /context <text>"),
    ("length", "Set how many recent messages the model sees: /length <n>"),
    ("g", "Chat: /g <text>"),
    ("h", "Show recent history"),
    ("save", "Save a checkpoint: /save <name>"),
    ("load", "Load a checkpoint: /load <name>"),
    ("undo", "Undo the last exchange"),
    ("clear", "Clear history"),
];

impl Command {
    #[must_use]
    pub fn bot_commands() -> Vec<BotCommand> {
        COMMANDS
            .iter()
            .map(|(command, description)| BotCommand {
                command: (*command).to_string(),
                description: (*description).to_string(),
            })
            .collect()
    }

    /// Parse a slash command. Returns `None` for plain text.
    ///
    /// A `@botname` suffix on the command word is ignored, as is the case of
    /// the command word. Arguments keep their case and inner whitespace.
    #[must_use]
    pub fn parse_from_text(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;

        let (word, args) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(word, args)| (word, args.trim()));
        let name = word.split('@').next().unwrap_or(word).to_lowercase();
        let args = args.to_string();

        Some(match name.as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "context" => Self::Context(args),
            "length" => Self::Length(args),
            "g" => Self::Chat(args),
            "h" => Self::History,
            "save" => Self::Save(args),
            "load" => Self::Load(args),
            "undo" => Self::Undo,
            "clear" => Self::Clear,
            _ => Self::Unknown(name),
        })
    }

    /// Transient message shown while the command runs.
    #[must_use]
    pub const fn status_text(&self) -> Option<&'static str> {
        match self {
            Self::Context(_) => Some("Setting context..."),
            Self::Length(_) => Some("Setting context window size..."),
            Self::Chat(_) => Some("Typing..."),
            Self::History => Some("Fetching history..."),
            Self::Save(_) => Some("Saving checkpoint..."),
            Self::Load(_) => Some("Loading checkpoint..."),
            Self::Undo => Some("Undoing last message..."),
            Self::Clear => Some("Clearing history..."),
            Self::Start | Self::Help | Self::Unknown(_) => None,
        }
    }

    #[must_use]
    pub const fn help_text() -> &'static str {
        r"
Commands:
/context <text> - set the scenario
/length <n>     - how many recent messages the model sees (default 10)
/g <text>       - chat (plain messages work too)
/h              - show recent history
/save <name>    - save a checkpoint
/load <name>    - load a checkpoint
/undo           - undo the last exchange
/clear          - clear history
/help           - show this list
"
    }

    #[must_use]
    pub const fn welcome_text() -> &'static str {
        r"
Hello! Set a scene with /context, then just talk.

Checkpoints let you branch a story: /save a name, /load it later.
Send /help for the full command list.
"
    }
}
