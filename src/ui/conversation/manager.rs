use crate::config::{Config, GenerationConfig};
use crate::error::{ChatError, Result};
use crate::llm::TextGenerator;
use crate::streaming::{ResponseOrchestrator, ResponseState, Snapshot};
use crate::ui::conversation::commands::{get_help_text, ModelTarget, ParsedCommand, SlashCommand};
use crate::ui::conversation::composer::ComposerResult;
use crate::ui::conversation::{ConversationComposer, ConversationHistory, SettingsPanel};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::StreamExt;
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    widgets::Widget,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Builds the generator for a model id
pub type GeneratorFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn TextGenerator>> + Send + Sync>;

/// Events forwarded from the generation task to the UI loop
#[derive(Debug)]
pub enum StreamEvent {
    Fragment(String),
    Finished,
    Failed(ChatError),
}

/// Actions that can be requested by the conversation manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationAction {
    None,
    Exit,
}

/// Manages the conversation flow and UI components
pub struct ConversationManager {
    orchestrator: ResponseOrchestrator,
    history: ConversationHistory,
    composer: ConversationComposer,
    settings: GenerationConfig,
    config: Config,
    factory: GeneratorFactory,
    generator: Arc<dyn TextGenerator>,
    stream_receiver: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    stream_task: Option<JoinHandle<()>>,
}

impl ConversationManager {
    pub fn new(config: Config, settings: GenerationConfig, model: &str, factory: GeneratorFactory) -> Result<Self> {
        let generator = factory(model)?;

        Ok(Self {
            orchestrator: ResponseOrchestrator::new(),
            history: ConversationHistory::new(model),
            composer: ConversationComposer::new("Type a message and press Enter"),
            settings,
            config,
            factory,
            generator,
            stream_receiver: None,
            stream_task: None,
        })
    }

    pub fn state(&self) -> ResponseState {
        self.orchestrator.state()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn settings(&self) -> &GenerationConfig {
        &self.settings
    }

    pub fn model(&self) -> &str {
        self.generator.model_id()
    }

    /// Handle user input and start streaming response
    pub fn handle_input(&mut self, input: String) {
        match self.orchestrator.submit(&input) {
            Ok(Some(snapshot)) => {
                self.apply(snapshot);
                self.start_stream();
            }
            Ok(None) => {}
            Err(e) => {
                // Hand the rejected text back so it can be sent once the reply lands.
                self.composer.set_content(input);
                self.history
                    .add_notice(format!("{e}; wait for it to finish or /clear to cancel"));
            }
        }
    }

    fn start_stream(&mut self) {
        let prompt = self.orchestrator.prompt(&self.settings.system_prompt);
        let generator = Arc::clone(&self.generator);
        let settings = self.settings.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        info!(model = generator.model_id(), "starting generation");
        let task = tokio::spawn(async move {
            let mut stream = match generator.stream_generate(&prompt, &settings).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(StreamEvent::Failed(e));
                    return;
                }
            };

            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(text) => StreamEvent::Fragment(text),
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Failed(e));
                        return;
                    }
                };
                if tx.send(event).is_err() {
                    // Receiver dropped by a reset.
                    return;
                }
            }
            let _ = tx.send(StreamEvent::Finished);
        });

        self.stream_receiver = Some(rx);
        self.stream_task = Some(task);
    }

    /// Drain streamed events (called from main loop). Returns whether anything changed.
    pub fn process_stream_events(&mut self) -> bool {
        let Some(stream_rx) = self.stream_receiver.as_mut() else {
            return false;
        };

        let mut snapshots = Vec::new();
        let mut done = false;
        loop {
            match stream_rx.try_recv() {
                Ok(StreamEvent::Fragment(text)) => snapshots.extend(self.orchestrator.on_fragment(&text)),
                Ok(StreamEvent::Finished) => {
                    snapshots.extend(self.orchestrator.on_complete());
                    done = true;
                    break;
                }
                Ok(StreamEvent::Failed(e)) => {
                    snapshots.extend(self.orchestrator.on_error(&e));
                    done = true;
                    break;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    warn!("generation task ended without a result");
                    let e = ChatError::provider("generation task ended unexpectedly");
                    snapshots.extend(self.orchestrator.on_error(&e));
                    done = true;
                    break;
                }
            }
        }

        if done {
            self.stream_receiver = None;
            self.stream_task = None;
        }

        let changed = !snapshots.is_empty();
        // Every snapshot is applied so the view passes through each state in order.
        for snapshot in snapshots {
            self.apply(snapshot);
        }
        changed
    }

    fn apply(&mut self, snapshot: Snapshot) {
        self.history.set_pairs(snapshot.pairs);
        self.history.set_streaming(self.orchestrator.state().is_in_flight());
    }

    /// Drop any in-flight generation and empty the conversation
    pub fn clear(&mut self) {
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
        self.stream_receiver = None;

        let snapshot = self.orchestrator.reset();
        self.history.clear();
        self.apply(snapshot);
        self.composer.clear();
    }

    /// Handle key input
    pub fn handle_key(&mut self, key: KeyEvent) -> ConversationAction {
        if key.kind != KeyEventKind::Press {
            return ConversationAction::None;
        }

        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return ConversationAction::Exit;
            }
            KeyCode::Char('l') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.clear();
                return ConversationAction::None;
            }
            KeyCode::PageUp => {
                self.history.scroll_up(5);
                return ConversationAction::None;
            }
            KeyCode::PageDown => {
                self.history.scroll_down(5);
                return ConversationAction::None;
            }
            _ => {}
        }

        match self.composer.handle_key(key) {
            ComposerResult::Submitted(input) => {
                self.handle_input(input);
                ConversationAction::None
            }
            ComposerResult::Command(command) => self.handle_slash_command(command),
            ComposerResult::None => ConversationAction::None,
        }
    }

    /// Handle slash commands
    fn handle_slash_command(&mut self, command: ParsedCommand) -> ConversationAction {
        if self.state().is_in_flight() && !command.command.available_during_streaming() {
            self.history.add_notice(format!(
                "/{} is unavailable while a response is streaming",
                command.command.command()
            ));
            return ConversationAction::None;
        }

        match command.command {
            SlashCommand::Clear => self.clear(),
            SlashCommand::Temp => match command.float_argument() {
                Some(value) => {
                    self.settings = self.settings.clone().with_temperature(value);
                    self.notice_setting("temperature", format!("{:.2}", self.settings.temperature));
                }
                None => self.history.add_notice("usage: /temp <0.0 - 1.5>"),
            },
            SlashCommand::TopP => match command.float_argument() {
                Some(value) => {
                    self.settings = self.settings.clone().with_top_p(value);
                    self.notice_setting("top-p", format!("{:.2}", self.settings.top_p));
                }
                None => self.history.add_notice("usage: /top-p <0.0 - 1.0>"),
            },
            SlashCommand::MaxTokens => match command.int_argument() {
                Some(value) => {
                    self.settings = self.settings.clone().with_max_tokens(value);
                    self.notice_setting("max tokens", self.settings.max_new_tokens.to_string());
                }
                None => self.history.add_notice("usage: /max-tokens <32 - 2048>"),
            },
            SlashCommand::System => {
                let prompt = command.argument().unwrap_or_default().to_string();
                self.settings = self.settings.clone().with_system_prompt(prompt);
                self.history.add_notice("system prompt updated");
                info!("system prompt updated");
            }
            SlashCommand::Model => match command.model_target() {
                Some(target) => self.switch_model(target),
                None => self.history.add_notice(format!(
                    "current model: {} (use /model default, /model fallback or /model <id>)",
                    self.model()
                )),
            },
            SlashCommand::Help => self.history.add_notice(get_help_text()),
            SlashCommand::Quit => return ConversationAction::Exit,
        }

        ConversationAction::None
    }

    fn notice_setting(&mut self, name: &str, value: String) {
        info!(setting = name, %value, "generation setting changed");
        self.history.add_notice(format!("{name} set to {value}"));
    }

    fn switch_model(&mut self, target: ModelTarget) {
        let model = match target {
            ModelTarget::Default => self.config.default_model.clone(),
            ModelTarget::Fallback => self.config.fallback_model.clone(),
            ModelTarget::Named(model) => model,
        };

        self.generator = match (self.factory)(&model) {
            Ok(generator) => generator,
            Err(e) => {
                warn!(%model, "could not switch model: {e}");
                self.history.add_notice(format!("could not switch to {model}: {e}"));
                return;
            }
        };
        self.history.set_model(model.clone());
        self.history.add_notice(format!("switched to {model}"));
        info!(%model, "model switched");
    }

    /// Render the conversation UI components
    pub fn render_conversation_ui(&mut self, area: Rect, buf: &mut Buffer) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(40), Constraint::Length(34)])
            .split(area);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(5),    // History area
                Constraint::Length(5), // Composer area
            ])
            .split(columns[0]);

        self.history.clone().render(rows[0], buf);
        self.composer.clone().render(rows[1], buf);

        SettingsPanel {
            settings: &self.settings,
            model: self.generator.model_id(),
            state: self.orchestrator.state(),
        }
        .render(columns[1], buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayPair;
    use crate::mock_llm::MockGenerator;
    use crate::ui::conversation::commands::parse_slash_command;

    fn manager_with(generator: MockGenerator) -> ConversationManager {
        let factory: GeneratorFactory = Arc::new(move |_model: &str| {
            Ok::<_, ChatError>(Arc::new(generator.clone()) as Arc<dyn TextGenerator>)
        });
        let config = Config::default();
        let settings = config.generation();
        let model = config.default_model.clone();
        ConversationManager::new(config, settings, &model, factory).unwrap()
    }

    async fn run_until_settled(manager: &mut ConversationManager) {
        for _ in 0..2000 {
            manager.process_stream_events();
            if manager.state().is_terminal() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        panic!("generation did not settle");
    }

    #[tokio::test]
    async fn streamed_reply_lands_in_history() {
        let mut manager = manager_with(MockGenerator::with_fragments(["Hel", "lo"]));
        manager.handle_input("hi".to_string());
        assert_eq!(manager.history().pairs(), &[DisplayPair::new("hi", "")]);

        run_until_settled(&mut manager).await;
        assert_eq!(manager.state(), ResponseState::Completed);
        assert_eq!(manager.history().pairs(), &[DisplayPair::new("hi", "Hello")]);
    }

    #[tokio::test]
    async fn failure_shows_apology() {
        let mut manager = manager_with(MockGenerator::failing_open("bad token"));
        manager.handle_input("hi".to_string());
        run_until_settled(&mut manager).await;

        assert_eq!(manager.state(), ResponseState::Failed);
        assert!(manager.history().pairs()[0].assistant.contains("bad token"));
    }

    #[tokio::test]
    async fn clear_cancels_in_flight_stream() {
        let slow = MockGenerator::with_fragments(["a", "b", "c"]).with_delay(std::time::Duration::from_millis(50));
        let mut manager = manager_with(slow);
        manager.handle_input("hi".to_string());
        manager.handle_slash_command(parse_slash_command("/clear").unwrap());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!manager.process_stream_events());
        assert_eq!(manager.state(), ResponseState::Idle);
        assert!(manager.history().pairs().is_empty());
    }

    #[tokio::test]
    async fn busy_submit_keeps_typed_text() {
        let slow = MockGenerator::with_fragments(["a", "b"]).with_delay(std::time::Duration::from_millis(50));
        let mut manager = manager_with(slow);
        manager.handle_input("first".to_string());

        for c in "second".chars() {
            manager.handle_key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
        }
        manager.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));

        assert_eq!(manager.state(), ResponseState::AwaitingFirstToken);
        assert_eq!(manager.composer.get_content(), "second");
        assert_eq!(manager.history().pairs(), &[DisplayPair::new("first", "")]);

        run_until_settled(&mut manager).await;
        manager.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
        assert_eq!(manager.history().pairs().last(), Some(&DisplayPair::new("second", "")));
    }

    #[tokio::test]
    async fn failed_model_switch_keeps_current_generator() {
        let factory: GeneratorFactory = Arc::new(|model: &str| -> Result<Arc<dyn TextGenerator>> {
            if model == "broken" {
                Err(ChatError::provider("no such model"))
            } else {
                Ok(Arc::new(MockGenerator::echo()) as Arc<dyn TextGenerator>)
            }
        });
        let config = Config::default();
        let mut manager =
            ConversationManager::new(config.clone(), config.generation(), "ok", factory).unwrap();

        manager.handle_slash_command(parse_slash_command("/model broken").unwrap());
        assert_eq!(manager.model(), "mock");
    }

    #[tokio::test]
    async fn settings_commands_are_clamped() {
        let mut manager = manager_with(MockGenerator::echo());
        manager.handle_slash_command(parse_slash_command("/temp 9").unwrap());
        manager.handle_slash_command(parse_slash_command("/max-tokens 100").unwrap());

        assert_eq!(manager.settings().temperature, 1.5);
        assert_eq!(manager.settings().max_new_tokens, 96);
    }

    #[tokio::test]
    async fn quit_command_requests_exit() {
        let mut manager = manager_with(MockGenerator::echo());
        let action = manager.handle_slash_command(parse_slash_command("/quit").unwrap());
        assert_eq!(action, ConversationAction::Exit);
    }
}
