use crate::conversation::{Conversation, Role};

/// Directive used when the user has not configured one.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful, concise assistant. Answer clearly and politely.";

const BEGIN_SEGMENT: &str = "<s>[INST] ";
const END_INSTRUCTION: &str = " [/INST]";
const END_TURN: &str = " </s>";
const SYS_OPEN: &str = "<<SYS>>\n";
const SYS_CLOSE: &str = "\n<</SYS>>\n\n";

/// Render a conversation into a single instruction-tagged prompt.
///
/// The directive is embedded in the first user segment only. A trailing user
/// turn leaves the prompt open after `[/INST]` so the model completes it.
pub fn format_prompt(conversation: &Conversation, system_prompt: &str) -> String {
    let mut prompt = String::new();
    let mut first_user = true;

    for turn in conversation {
        match turn.role() {
            Role::User => {
                prompt.push_str(BEGIN_SEGMENT);
                if first_user {
                    prompt.push_str(SYS_OPEN);
                    prompt.push_str(system_prompt);
                    prompt.push_str(SYS_CLOSE);
                    first_user = false;
                }
                prompt.push_str(&turn.content);
                prompt.push_str(END_INSTRUCTION);
            }
            Role::Assistant => {
                prompt.push(' ');
                prompt.push_str(&turn.content);
                prompt.push_str(END_TURN);
            }
        }
    }

    prompt
}
