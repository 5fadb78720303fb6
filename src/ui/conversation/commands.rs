use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a message with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Clear the conversation
    Clear,
    /// Set sampling temperature
    Temp,
    /// Set nucleus sampling probability
    TopP,
    /// Set the output token budget
    MaxTokens,
    /// Replace the system prompt
    System,
    /// Switch between the default, fallback or a named model
    Model,
    /// Show help
    Help,
    /// Exit the application
    Quit,
}

pub fn command_entries() -> Vec<CommandEntry> {
    SlashCommand::iter()
        .map(|command| CommandEntry {
            command,
            keyword: command.command(),
            description: command.description(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEntry {
    pub command: SlashCommand,
    pub keyword: &'static str,
    pub description: &'static str,
}

/// Which model `/model` should switch to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelTarget {
    Default,
    Fallback,
    Named(String),
}

impl ParsedCommand {
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    pub fn float_argument(&self) -> Option<f32> {
        self.argument()?.trim().parse().ok()
    }

    pub fn int_argument(&self) -> Option<u32> {
        self.argument()?.trim().parse().ok()
    }

    pub fn model_target(&self) -> Option<ModelTarget> {
        if self.command != SlashCommand::Model {
            return None;
        }

        let arg = self.argument()?.trim();
        match arg.to_lowercase().as_str() {
            "d" | "default" => Some(ModelTarget::Default),
            "f" | "fallback" => Some(ModelTarget::Fallback),
            _ => Some(ModelTarget::Named(arg.to_string())),
        }
    }
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::Clear => "clear the conversation",
            SlashCommand::Temp => "set temperature (0.0 - 1.5)",
            SlashCommand::TopP => "set top-p (0.0 - 1.0)",
            SlashCommand::MaxTokens => "set max new tokens (32 - 2048)",
            SlashCommand::System => "replace the system prompt",
            SlashCommand::Model => "switch model (default, fallback or a model id)",
            SlashCommand::Help => "show available commands",
            SlashCommand::Quit => "exit the application",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }

    /// Whether this command can be run while streaming is active.
    pub fn available_during_streaming(self) -> bool {
        match self {
            SlashCommand::Clear | SlashCommand::Help | SlashCommand::Quit => true,
            SlashCommand::Temp
            | SlashCommand::TopP
            | SlashCommand::MaxTokens
            | SlashCommand::System
            | SlashCommand::Model => false,
        }
    }
}

/// Return all built-in commands in a Vec paired with their command string.
pub fn built_in_slash_commands() -> Vec<(&'static str, SlashCommand)> {
    SlashCommand::iter().map(|c| (c.command(), c)).collect()
}

/// Parse a slash command from user input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let body = input.strip_prefix('/')?;
    let (head, rest) = match body.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (body.trim(), ""),
    };

    let command = SlashCommand::from_str(head)
        .ok()
        .or_else(|| match head.to_lowercase().as_str() {
            "q" | "exit" | "bye" => Some(SlashCommand::Quit),
            "reset" | "new" => Some(SlashCommand::Clear),
            "temperature" | "t" => Some(SlashCommand::Temp),
            "topp" | "p" => Some(SlashCommand::TopP),
            "max" | "tokens" => Some(SlashCommand::MaxTokens),
            "sys" | "prompt" => Some(SlashCommand::System),
            "m" => Some(SlashCommand::Model),
            "h" | "?" => Some(SlashCommand::Help),
            _ => None,
        })?;

    // The system prompt keeps its internal whitespace.
    let argument = if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    };

    Some(ParsedCommand { command, argument })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n\n");
    for (command_str, command) in built_in_slash_commands() {
        help.push_str(&format!("/{} - {}\n", command_str, command.description()));
    }

    help.push_str("\nAliases: /q for /quit, /reset for /clear, /t for /temp, /p for /top-p, /m for /model");
    help.push_str("\nEnter sends, Shift+Enter inserts a newline.");

    help
}
