use crate::config::{Config, GenerationConfig};
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use tokio::time::Duration;
use tracing::{debug, warn};

/// Lazily produced pieces of generated text, in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// A streaming text-generation backend.
///
/// Implementors own transport and wire-format details; callers only see a
/// prompt going in and fragments coming out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Open a generation call. Errors here are call-open failures; errors
    /// yielded by the returned stream are mid-stream failures.
    async fn stream_generate(&self, prompt: &str, settings: &GenerationConfig) -> Result<FragmentStream>;

    fn model_id(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: GenerateParameters,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct GenerateParameters {
    max_new_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    repetition_penalty: f32,
    do_sample: bool,
    return_full_text: bool,
}

impl GenerateParameters {
    /// The endpoint rejects a zero temperature and a top-p outside (0, 1),
    /// so those are expressed by leaving the field out.
    fn from_settings(settings: &GenerationConfig) -> Self {
        let sampling = settings.temperature > 0.0;
        Self {
            max_new_tokens: settings.max_new_tokens,
            temperature: sampling.then_some(settings.temperature),
            top_p: (settings.top_p > 0.0 && settings.top_p < 1.0).then_some(settings.top_p),
            repetition_penalty: settings.repetition_penalty,
            do_sample: sampling,
            return_full_text: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    token: Option<StreamToken>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamToken {
    text: String,
    #[serde(default)]
    special: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for the Hugging Face text-generation inference API
#[derive(Clone)]
pub struct HfInferenceClient {
    client: reqwest::Client,
    model_id: String,
    credential: Option<String>,
    base_url: String,
}

impl HfInferenceClient {
    pub fn new(model_id: impl Into<String>, credential: Option<String>) -> Result<Self> {
        Self::with_base_url(model_id, credential, crate::config::DEFAULT_BASE_URL, Duration::from_secs(120))
    }

    pub fn with_base_url(
        model_id: impl Into<String>,
        credential: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base: String = base_url.into();

        Ok(Self {
            client,
            model_id: model_id.into(),
            credential,
            base_url: base.trim_end_matches('/').to_string(),
        })
    }

    /// Build a client for `model_id` using the endpoint and credential in `config`
    pub fn from_config(config: &Config, model_id: impl Into<String>) -> Result<Self> {
        Self::with_base_url(
            model_id,
            config.get_api_key(),
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn endpoint(&self) -> String {
        format!("{}/models/{}", self.base_url, self.model_id)
    }
}

#[async_trait]
impl TextGenerator for HfInferenceClient {
    async fn stream_generate(&self, prompt: &str, settings: &GenerationConfig) -> Result<FragmentStream> {
        let url = self.endpoint();
        let payload = GenerateRequest {
            inputs: prompt,
            parameters: GenerateParameters::from_settings(settings),
            stream: true,
        };

        debug!(model = %self.model_id, prompt_chars = prompt.len(), "opening generation stream");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&payload);
        if let Some(token) = &self.credential {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            warn!(model = %self.model_id, status, "inference API rejected request");
            return Err(ChatError::Api { status, message });
        }

        Ok(fragment_stream(response.bytes_stream()))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Line-buffered decoder for the server-sent-events body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw body bytes; returns the fragments of every completed line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String>> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if let Some(item) = parse_line(&String::from_utf8_lossy(&line)) {
                out.push(item);
            }
        }
        out
    }

    /// Flush a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Vec<Result<String>> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&line)).into_iter().collect()
    }
}

fn parse_line(line: &str) -> Option<Result<String>> {
    let data = line.trim().strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }

    let event: StreamResponse = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => return Some(Err(ChatError::decode(format!("{e}: {data}")))),
    };

    if let Some(error) = event.error {
        return Some(Err(ChatError::provider(error)));
    }

    match event.token {
        Some(token) if !token.special => Some(Ok(token.text)),
        _ => None,
    }
}

struct SseState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

/// Turn a byte stream into a fragment stream; the first error ends it.
pub fn fragment_stream<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChatError> + Send + 'static,
{
    let state = SseState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.pending.clear();
                    state.finished = true;
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let decoded = state.decoder.push(chunk.as_ref());
                    state.pending.extend(decoded);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.finished = true;
                    let decoded = state.decoder.finish();
                    state.pending.extend(decoded);
                }
            }
        }
    })
    .boxed()
}
