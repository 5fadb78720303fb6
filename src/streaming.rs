use crate::config::GenerationConfig;
use crate::conversation::{Conversation, Role};
use crate::display::{project, DisplayPair};
use crate::error::{ChatError, Result};
use crate::llm::TextGenerator;
use crate::prompts::format_prompt;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Prefix of the assistant turn substituted for a failed generation.
pub const ERROR_APOLOGY: &str =
    "⚠️ The model could not be reached. Please verify your HF_TOKEN or try again later.";

/// Where the current request is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseState {
    #[default]
    Idle,
    AwaitingFirstToken,
    Streaming,
    Completed,
    Failed,
}

impl ResponseState {
    /// A generation call is open and may still deliver fragments
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ResponseState::AwaitingFirstToken | ResponseState::Streaming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResponseState::Completed | ResponseState::Failed)
    }
}

/// Everything the view needs after a state change
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub pairs: Vec<DisplayPair>,
    pub conversation: Conversation,
    /// Value for the input field; always cleared
    pub input: String,
}

impl Snapshot {
    fn capture(conversation: &Conversation) -> Self {
        Self {
            pairs: project(conversation),
            conversation: conversation.clone(),
            input: String::new(),
        }
    }

    /// Content of the trailing assistant turn, if the last turn is one
    pub fn last_assistant(&self) -> Option<&str> {
        self.conversation
            .last()
            .filter(|turn| turn.role() == Role::Assistant)
            .map(|turn| turn.content.as_str())
    }
}

/// Drives one conversation through submit, streaming and completion.
///
/// Each transition method returns the snapshot to render, or `None` when the
/// event does not apply in the current state (for example a fragment that
/// arrives after a reset).
#[derive(Debug, Clone, Default)]
pub struct ResponseOrchestrator {
    conversation: Conversation,
    state: ResponseState,
    fragments: usize,
}

impl ResponseOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from an existing history
    pub fn with_conversation(conversation: Conversation) -> Self {
        Self {
            conversation,
            ..Self::default()
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.conversation)
    }

    /// Prompt for the current history
    pub fn prompt(&self, system_prompt: &str) -> String {
        format_prompt(&self.conversation, system_prompt)
    }

    /// Record the user's message and wait for the model.
    ///
    /// Empty text is ignored. Submitting while a response is in flight is
    /// rejected with [`ChatError::Busy`].
    pub fn submit(&mut self, message: &str) -> Result<Option<Snapshot>> {
        if self.state.is_in_flight() {
            return Err(ChatError::Busy);
        }
        if message.is_empty() {
            return Ok(None);
        }

        self.conversation.append_user(message);
        self.state = ResponseState::AwaitingFirstToken;
        self.fragments = 0;
        info!(turns = self.conversation.len(), "user message submitted");
        Ok(Some(self.snapshot()))
    }

    /// Fold one streamed fragment into the assistant turn
    pub fn on_fragment(&mut self, text: &str) -> Option<Snapshot> {
        match self.state {
            ResponseState::AwaitingFirstToken => {
                self.conversation.append_assistant(text);
                self.state = ResponseState::Streaming;
            }
            ResponseState::Streaming => {
                let mut content = self
                    .conversation
                    .last()
                    .map(|turn| turn.content.clone())
                    .unwrap_or_default();
                content.push_str(text);
                if let Err(e) = self.conversation.replace_last_assistant(content) {
                    warn!("dropping fragment: {e}");
                    return None;
                }
            }
            _ => return None,
        }

        self.fragments += 1;
        debug!(fragments = self.fragments, "fragment received");
        Some(self.snapshot())
    }

    /// The stream ran out; commit the assistant turn
    pub fn on_complete(&mut self) -> Option<Snapshot> {
        match self.state {
            ResponseState::AwaitingFirstToken => self.conversation.append_assistant(""),
            ResponseState::Streaming => {}
            _ => return None,
        }

        self.state = ResponseState::Completed;
        info!(fragments = self.fragments, "response completed");
        Some(self.snapshot())
    }

    /// Replace whatever was streamed with an apology carrying `error`
    pub fn on_error(&mut self, error: &ChatError) -> Option<Snapshot> {
        if !self.state.is_in_flight() {
            return None;
        }

        if self.state == ResponseState::Streaming {
            self.conversation.remove_last_assistant();
        }
        self.conversation
            .append_assistant(format!("{ERROR_APOLOGY}\n\nDetails: {error}"));
        self.state = ResponseState::Failed;
        warn!(fragments = self.fragments, "response failed: {error}");
        Some(self.snapshot())
    }

    /// Clear the conversation and return to idle from any state
    pub fn reset(&mut self) -> Snapshot {
        self.conversation.reset();
        self.state = ResponseState::Idle;
        self.fragments = 0;
        info!("conversation reset");
        Snapshot::default()
    }

    /// Run a full request against `generator`, handing every snapshot to `emit`
    /// in the order it was produced.
    ///
    /// Returns the state the request ended in. Generation failures are not
    /// errors here; they end in [`ResponseState::Failed`].
    pub async fn respond<G, F>(
        &mut self,
        generator: &G,
        message: &str,
        settings: &GenerationConfig,
        mut emit: F,
    ) -> Result<ResponseState>
    where
        G: TextGenerator + ?Sized,
        F: FnMut(Snapshot),
    {
        let Some(snapshot) = self.submit(message)? else {
            return Ok(self.state);
        };
        emit(snapshot);

        let prompt = self.prompt(&settings.system_prompt);
        let mut stream = match generator.stream_generate(&prompt, settings).await {
            Ok(stream) => stream,
            Err(e) => {
                emit(self.on_error(&e).unwrap_or_else(|| self.snapshot()));
                return Ok(self.state);
            }
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(text) => {
                    if let Some(snapshot) = self.on_fragment(&text) {
                        emit(snapshot);
                    }
                }
                Err(e) => {
                    emit(self.on_error(&e).unwrap_or_else(|| self.snapshot()));
                    return Ok(self.state);
                }
            }
        }

        if let Some(snapshot) = self.on_complete() {
            emit(snapshot);
        }
        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;
    use crate::mock_llm::MockGenerator;

    #[test]
    fn empty_submit_is_ignored() {
        let mut orchestrator = ResponseOrchestrator::new();
        assert_eq!(orchestrator.submit("").unwrap(), None);
        assert_eq!(orchestrator.state(), ResponseState::Idle);
        assert!(orchestrator.conversation().is_empty());
    }

    #[test]
    fn submit_appends_user_turn_and_clears_input() {
        let mut orchestrator = ResponseOrchestrator::new();
        let snapshot = orchestrator.submit("hi").unwrap().unwrap();

        assert_eq!(orchestrator.state(), ResponseState::AwaitingFirstToken);
        assert_eq!(snapshot.pairs, vec![DisplayPair::new("hi", "")]);
        assert_eq!(snapshot.input, "");
        assert_eq!(snapshot.conversation.turns(), &[Turn::user("hi")]);
    }

    #[test]
    fn submit_while_in_flight_is_rejected() {
        let mut orchestrator = ResponseOrchestrator::new();
        orchestrator.submit("first").unwrap();
        assert!(orchestrator.submit("second").unwrap_err().is_busy());

        orchestrator.on_fragment("x");
        assert!(orchestrator.submit("second").unwrap_err().is_busy());
        assert_eq!(orchestrator.conversation().len(), 2);
    }

    #[test]
    fn fragments_fold_into_one_assistant_turn() {
        let mut orchestrator = ResponseOrchestrator::new();
        orchestrator.submit("hi").unwrap();

        let first = orchestrator.on_fragment("Hel").unwrap();
        assert_eq!(orchestrator.state(), ResponseState::Streaming);
        assert_eq!(first.last_assistant(), Some("Hel"));

        let second = orchestrator.on_fragment("lo").unwrap();
        assert_eq!(second.last_assistant(), Some("Hello"));

        let done = orchestrator.on_complete().unwrap();
        assert_eq!(orchestrator.state(), ResponseState::Completed);
        assert_eq!(done, second);
    }

    #[test]
    fn completion_without_fragments_commits_empty_reply() {
        let mut orchestrator = ResponseOrchestrator::new();
        orchestrator.submit("hi").unwrap();
        let done = orchestrator.on_complete().unwrap();

        assert_eq!(done.last_assistant(), Some(""));
        assert_eq!(done.pairs, vec![DisplayPair::new("hi", "")]);
    }

    #[test]
    fn error_before_first_fragment_appends_apology() {
        let mut orchestrator = ResponseOrchestrator::new();
        orchestrator.submit("hi").unwrap();

        let snapshot = orchestrator
            .on_error(&ChatError::Api { status: 401, message: "Invalid token".into() })
            .unwrap();
        let reply = snapshot.last_assistant().unwrap();

        assert_eq!(orchestrator.state(), ResponseState::Failed);
        assert!(reply.starts_with(ERROR_APOLOGY));
        assert!(reply.contains("Invalid token"));
    }

    #[test]
    fn error_mid_stream_replaces_partial_reply() {
        let mut orchestrator = ResponseOrchestrator::new();
        orchestrator.submit("hi").unwrap();
        orchestrator.on_fragment("partial");

        let snapshot = orchestrator.on_error(&ChatError::provider("stream cut")).unwrap();
        assert_eq!(snapshot.conversation.len(), 2);
        assert!(snapshot.last_assistant().unwrap().ends_with("Details: provider error: stream cut"));
    }

    #[test]
    fn events_outside_a_request_are_ignored() {
        let mut orchestrator = ResponseOrchestrator::new();
        assert_eq!(orchestrator.on_fragment("stray"), None);
        assert_eq!(orchestrator.on_complete(), None);
        assert_eq!(orchestrator.on_error(&ChatError::provider("late")), None);

        orchestrator.submit("hi").unwrap();
        orchestrator.reset();
        assert_eq!(orchestrator.on_fragment("stale"), None);
        assert!(orchestrator.conversation().is_empty());
    }

    #[test]
    fn reset_clears_from_any_state() {
        let mut orchestrator = ResponseOrchestrator::new();
        orchestrator.submit("hi").unwrap();
        orchestrator.on_fragment("hello");

        let snapshot = orchestrator.reset();
        assert_eq!(snapshot, Snapshot::default());
        assert!(snapshot.pairs.is_empty());
        assert_eq!(orchestrator.state(), ResponseState::Idle);
    }

    #[test]
    fn history_carries_into_next_request() {
        let mut orchestrator = ResponseOrchestrator::new();
        orchestrator.submit("hi").unwrap();
        orchestrator.on_fragment("hello");
        orchestrator.on_complete();

        orchestrator.submit("again").unwrap();
        let prompt = orchestrator.prompt("SYS");
        assert_eq!(
            prompt,
            "<s>[INST] <<SYS>>\nSYS\n<</SYS>>\n\nhi [/INST] hello </s><s>[INST] again [/INST]"
        );
    }

    #[tokio::test]
    async fn respond_emits_one_snapshot_per_fragment_plus_final() {
        let generator = MockGenerator::with_fragments(["Hel", "lo"]);
        let mut orchestrator = ResponseOrchestrator::new();
        let mut snapshots = Vec::new();

        let state = orchestrator
            .respond(&generator, "hi", &GenerationConfig::default(), |s| snapshots.push(s))
            .await
            .unwrap();

        assert_eq!(state, ResponseState::Completed);
        let replies: Vec<Option<&str>> = snapshots.iter().map(Snapshot::last_assistant).collect();
        assert_eq!(replies, vec![None, Some("Hel"), Some("Hello"), Some("Hello")]);
        assert_eq!(snapshots[3], snapshots[2]);
    }

    #[tokio::test]
    async fn respond_converts_open_failure_into_apology() {
        let generator = MockGenerator::failing_open("connection refused");
        let mut orchestrator = ResponseOrchestrator::new();
        let mut snapshots = Vec::new();

        let state = orchestrator
            .respond(&generator, "hi", &GenerationConfig::default(), |s| snapshots.push(s))
            .await
            .unwrap();

        assert_eq!(state, ResponseState::Failed);
        assert_eq!(snapshots.len(), 2);
        let reply = snapshots[1].last_assistant().unwrap();
        assert!(reply.contains(ERROR_APOLOGY));
        assert!(reply.contains("connection refused"));
    }

    #[tokio::test]
    async fn respond_recovers_after_failure() {
        let mut orchestrator = ResponseOrchestrator::new();
        let settings = GenerationConfig::default();

        orchestrator
            .respond(&MockGenerator::failing_after(["a"], "boom"), "one", &settings, |_| {})
            .await
            .unwrap();
        let state = orchestrator
            .respond(&MockGenerator::with_fragments(["fine"]), "two", &settings, |_| {})
            .await
            .unwrap();

        assert_eq!(state, ResponseState::Completed);
        let pairs = orchestrator.snapshot().pairs;
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1], DisplayPair::new("two", "fine"));
    }
}
