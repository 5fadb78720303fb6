//! Projection of a conversation into (user, assistant) rows for rendering.

use serde::Serialize;

use crate::conversation::{Conversation, Role};

/// One exchange as shown in the chat view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DisplayPair {
    pub user: String,
    pub assistant: String,
}

impl DisplayPair {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

/// Pair each assistant turn with the user turn that preceded it.
///
/// A user turn that is followed by another user turn is dropped: only the
/// most recent pending user text is paired. An assistant turn with no pending
/// user text pairs with an empty string, and a trailing unanswered user turn
/// yields a final pair with an empty reply.
pub fn project(conversation: &Conversation) -> Vec<DisplayPair> {
    let mut pairs = Vec::new();
    let mut pending_user: Option<&str> = None;

    for turn in conversation {
        match turn.role() {
            Role::User => pending_user = Some(&turn.content),
            Role::Assistant => {
                let user = pending_user.take().unwrap_or_default();
                pairs.push(DisplayPair::new(user, turn.content.as_str()));
            }
        }
    }

    if let Some(user) = pending_user {
        pairs.push(DisplayPair::new(user, ""));
    }

    pairs
}
