pub mod config;
pub mod conversation;
pub mod display;
pub mod error;
pub mod llm;
pub mod logging;
pub mod mock_llm;
pub mod prompts;
pub mod streaming;
pub mod ui;

pub use config::{Config, GenerationConfig};
pub use conversation::{Conversation, Role, Turn};
pub use display::{project, DisplayPair};
pub use error::ChatError;
pub use llm::{FragmentStream, HfInferenceClient, TextGenerator};
pub use mock_llm::MockGenerator;
pub use prompts::{format_prompt, DEFAULT_SYSTEM_PROMPT};
pub use streaming::{ResponseOrchestrator, ResponseState, Snapshot, ERROR_APOLOGY};
