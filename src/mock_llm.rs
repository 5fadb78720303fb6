use crate::config::GenerationConfig;
use crate::error::{ChatError, Result};
use crate::llm::{FragmentStream, TextGenerator};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::Duration;

/// What a [`MockGenerator`] does once a call is opened.
#[derive(Debug, Clone)]
enum Script {
    /// Echo the last instruction segment of the prompt back, word by word
    Echo,
    /// Yield the given fragments, then optionally fail
    Fragments {
        fragments: Vec<String>,
        fail_with: Option<String>,
    },
    /// Refuse to open the call
    FailOpen(String),
}

/// Offline generator for tests and `--mock` runs.
#[derive(Debug, Clone)]
pub struct MockGenerator {
    script: Script,
    delay: Option<Duration>,
}

impl MockGenerator {
    pub fn echo() -> Self {
        Self {
            script: Script::Echo,
            delay: None,
        }
    }

    pub fn with_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Script::Fragments {
                fragments: fragments.into_iter().map(Into::into).collect(),
                fail_with: None,
            },
            delay: None,
        }
    }

    /// Yield `fragments`, then fail the stream with a provider error
    pub fn failing_after<I, S>(fragments: I, error: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Script::Fragments {
                fragments: fragments.into_iter().map(Into::into).collect(),
                fail_with: Some(error.into()),
            },
            delay: None,
        }
    }

    pub fn failing_open(error: impl Into<String>) -> Self {
        Self {
            script: Script::FailOpen(error.into()),
            delay: None,
        }
    }

    /// Pause between fragments to mimic network pacing
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Split text the way a tokenizer-fed stream tends to arrive: one word per
/// fragment, leading space kept.
fn word_fragments(text: &str) -> Vec<String> {
    text.split_whitespace()
        .enumerate()
        .map(|(i, word)| if i == 0 { word.to_string() } else { format!(" {word}") })
        .collect()
}

fn last_instruction(prompt: &str) -> &str {
    let segment = prompt.rsplit("[INST] ").next().unwrap_or_default();
    let segment = segment.rsplit("<</SYS>>\n\n").next().unwrap_or_default();
    segment.trim_end_matches(" [/INST]")
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn stream_generate(&self, prompt: &str, _settings: &GenerationConfig) -> Result<FragmentStream> {
        let (fragments, fail_with) = match &self.script {
            Script::FailOpen(error) => return Err(ChatError::provider(error.clone())),
            Script::Echo => (word_fragments(&format!("You said: {}", last_instruction(prompt))), None),
            Script::Fragments { fragments, fail_with } => (fragments.clone(), fail_with.clone()),
        };

        let items = fragments
            .into_iter()
            .map(Ok)
            .chain(fail_with.map(|e| Err(ChatError::provider(e))));
        let delay = self.delay;

        Ok(futures::stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed())
    }

    fn model_id(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Conversation;
    use crate::prompts::format_prompt;

    #[tokio::test]
    async fn echo_repeats_latest_user_turn() {
        let mut conversation = Conversation::new();
        conversation.append_user("first");
        conversation.append_assistant("ok");
        conversation.append_user("second question");
        let prompt = format_prompt(&conversation, "SYS");

        let stream = MockGenerator::echo()
            .stream_generate(&prompt, &GenerationConfig::default())
            .await
            .unwrap();
        let text: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(text.concat(), "You said: second question");
    }

    #[tokio::test]
    async fn echo_strips_directive_from_first_turn() {
        let mut conversation = Conversation::new();
        conversation.append_user("hi");
        let prompt = format_prompt(&conversation, "SYS");

        let stream = MockGenerator::echo()
            .stream_generate(&prompt, &GenerationConfig::default())
            .await
            .unwrap();
        let text: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(text, vec!["You", " said:", " hi"]);
    }

    #[tokio::test]
    async fn failing_after_yields_then_errors() {
        let stream = MockGenerator::failing_after(["a", "b"], "lost connection")
            .stream_generate("", &GenerationConfig::default())
            .await
            .unwrap();
        let items: Vec<Result<String>> = stream.collect().await;
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[2], Err(ChatError::Provider(msg)) if msg == "lost connection"));
    }

    #[tokio::test]
    async fn failing_open_never_returns_stream() {
        let result = MockGenerator::failing_open("401 Unauthorized")
            .stream_generate("", &GenerationConfig::default())
            .await;
        assert!(result.is_err());
    }
}
