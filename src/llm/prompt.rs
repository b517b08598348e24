//! Prompt construction for chat-tuned local models.

use crate::conversation::{Message, Role};

/// Render a history as a ChatML prompt ending with an open assistant turn.
pub fn format_chatml(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for message in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(message.role.as_str());
        prompt.push('\n');
        prompt.push_str(&message.content);
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

/// Bound the context to the system prompt plus the newest `max_messages`.
///
/// `max_messages == 0` keeps everything.
pub fn trim_history(messages: &[Message], max_messages: usize) -> Vec<Message> {
    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if first.role == Role::System => (Some(first), rest),
        _ => (None, messages),
    };
    let keep_from = if max_messages == 0 {
        0
    } else {
        rest.len().saturating_sub(max_messages)
    };
    system
        .into_iter()
        .chain(&rest[keep_from..])
        .cloned()
        .collect()
}
