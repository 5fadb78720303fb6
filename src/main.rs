use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;

use hfchat::config::Config;
use hfchat::ui::conversation::{ConversationManager, GeneratorFactory};
use hfchat::{
    format_prompt, logging, ChatError, Conversation, GenerationConfig, HfInferenceClient, MockGenerator,
    ResponseOrchestrator, ResponseState, TextGenerator,
};

#[derive(Parser)]
#[command(name = "hfchat")]
#[command(author, version, about = "Chat with hosted instruction-tuned models", long_about = None)]
struct Cli {
    /// Config file (default: ~/.hfchat/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model id to query instead of the configured default
    #[arg(short, long, global = true)]
    model: Option<String>,

    #[arg(long, global = true)]
    system_prompt: Option<String>,

    #[arg(long, global = true)]
    temperature: Option<f32>,

    #[arg(long, global = true)]
    top_p: Option<f32>,

    #[arg(long, global = true)]
    max_tokens: Option<u32>,

    /// Answer with an offline echo model
    #[arg(long, global = true)]
    mock: bool,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat (default)
    Chat,
    /// Send one message and stream the reply to stdout
    Ask { message: String },
    /// Print the prompt for alternating user/assistant messages, starting with user
    Prompt {
        #[arg(required = true)]
        messages: Vec<String>,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a config file with default values
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

impl Cli {
    fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Config::default_path(),
        }
    }

    fn load_config(&self) -> Result<Config> {
        Config::load_from(&self.config_path()?)
    }

    fn generation(&self, config: &Config) -> GenerationConfig {
        let mut settings = config.generation();
        if let Some(prompt) = &self.system_prompt {
            settings = settings.with_system_prompt(prompt.clone());
        }
        if let Some(temperature) = self.temperature {
            settings = settings.with_temperature(temperature);
        }
        if let Some(top_p) = self.top_p {
            settings = settings.with_top_p(top_p);
        }
        if let Some(max_tokens) = self.max_tokens {
            settings = settings.with_max_tokens(max_tokens);
        }
        settings
    }

    fn model(&self, config: &Config) -> String {
        self.model.clone().unwrap_or_else(|| config.default_model.clone())
    }

    fn generator_factory(&self, config: &Config) -> GeneratorFactory {
        if self.mock {
            return Arc::new(|_model: &str| {
                Ok::<_, ChatError>(Arc::new(MockGenerator::echo().with_delay(Duration::from_millis(60))) as Arc<dyn TextGenerator>)
            });
        }

        let config = config.clone();
        Arc::new(move |model: &str| {
            Ok::<_, ChatError>(Arc::new(HfInferenceClient::from_config(&config, model)?) as Arc<dyn TextGenerator>)
        })
    }
}

async fn chat(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;
    logging::init_file_logging(&Config::home_dir()?.join("hfchat.log"), cli.verbose)?;

    let settings = cli.generation(&config);
    let model = cli.model(&config);
    let factory = cli.generator_factory(&config);
    let manager = ConversationManager::new(config, settings, &model, factory)?;

    hfchat::ui::run(manager).await
}

async fn ask(cli: &Cli, message: &str) -> Result<()> {
    logging::init_stderr_logging(cli.verbose)?;
    let config = cli.load_config()?;
    let settings = cli.generation(&config);
    let generator = (cli.generator_factory(&config))(&cli.model(&config))?;

    let mut orchestrator = ResponseOrchestrator::new();
    let mut printer = ReplyPrinter::new(io::stdout());

    let state = orchestrator
        .respond(generator.as_ref(), message, &settings, |snapshot| {
            if let Some(reply) = snapshot.last_assistant() {
                printer.show(reply);
            }
        })
        .await?;
    printer.finish().context("Failed to write reply to stdout")?;

    match state {
        ResponseState::Failed => bail!("generation failed"),
        _ => Ok(()),
    }
}

/// Streams the growing reply to a writer, printing only what is new.
///
/// The first write error stops all further output and is reported by
/// [`ReplyPrinter::finish`].
struct ReplyPrinter<W: Write> {
    out: W,
    printed: String,
    error: Option<io::Error>,
}

impl<W: Write> ReplyPrinter<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            printed: String::new(),
            error: None,
        }
    }

    fn show(&mut self, reply: &str) {
        if self.error.is_some() {
            return;
        }
        // A failure replaces the partial reply rather than extending it.
        let delta = match reply.strip_prefix(self.printed.as_str()) {
            Some(delta) => delta.to_string(),
            None => format!("\n{reply}"),
        };
        if let Err(e) = self.write(delta.as_bytes()) {
            self.error = Some(e);
            return;
        }
        self.printed = reply.to_string();
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.out.flush()
    }

    fn finish(mut self) -> io::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.write(b"\n")
    }
}

fn print_prompt(cli: &Cli, messages: &[String]) -> Result<()> {
    let config = cli.load_config()?;
    let settings = cli.generation(&config);

    let mut conversation = Conversation::new();
    for (i, message) in messages.iter().enumerate() {
        if i % 2 == 0 {
            conversation.append_user(message.as_str());
        } else {
            conversation.append_assistant(message.as_str());
        }
    }

    println!("{}", format_prompt(&conversation, &settings.system_prompt));
    Ok(())
}

fn config_command(cli: &Cli, action: &ConfigAction) -> Result<()> {
    let path = cli.config_path()?;
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save_to(&path)?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            let mut config = cli.load_config()?;
            let credential = if config.get_api_key().is_some() { "set" } else { "not set" };
            if config.api_key.is_some() {
                config.api_key = Some("<redacted>".to_string());
            }
            let rendered = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("# {}\n{}", path.display(), rendered);
            println!("# credential ({}): {}", config.api_key_env, credential);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        None | Some(Commands::Chat) => chat(&cli).await,
        Some(Commands::Ask { message }) => ask(&cli, message).await,
        Some(Commands::Prompt { messages }) => print_prompt(&cli, messages),
        Some(Commands::Config { action }) => config_command(&cli, action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts `capacity` bytes, then fails like a closed pipe.
    struct ClosedAfter {
        written: Vec<u8>,
        capacity: usize,
    }

    impl Write for ClosedAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written.len() + buf.len() > self.capacity {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn printer_writes_only_new_text() {
        let mut printer = ReplyPrinter::new(Vec::new());
        printer.show("Hel");
        printer.show("Hello");
        printer.show("Hello");
        assert!(printer.error.is_none());
        assert_eq!(printer.out, b"Hello");
    }

    #[test]
    fn printer_restarts_line_when_reply_is_replaced() {
        let mut printer = ReplyPrinter::new(Vec::new());
        printer.show("part");
        printer.show("apology");
        assert_eq!(printer.out, b"part\napology");
    }

    #[test]
    fn printer_reports_first_write_error() {
        let mut printer = ReplyPrinter::new(ClosedAfter { written: Vec::new(), capacity: 3 });
        printer.show("Hel");
        printer.show("Hello");
        printer.show("Hello there");

        assert_eq!(printer.out.written, b"Hel");
        let err = printer.finish().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
