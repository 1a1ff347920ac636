use super::{Message, Role};
use crate::events::{Finalization, LoopFinished};

/// Stamp server ids onto the current turn's user and assistant messages.
///
/// Authoritative `versions` replace whatever was accumulated from chunks.
/// Messages already resolved to a different id are left alone, and applying
/// the same finalization twice leaves the list unchanged.
pub fn finalize(mut messages: Vec<Message>, fin: &Finalization) -> Vec<Message> {
    if let Some(assistant) = current_reply_mut(&mut messages, fin.ai_message_id.as_deref()) {
        if let Some(id) = &fin.ai_message_id {
            assistant.id = Some(id.clone());
        }
        if let Some(versions) = &fin.versions {
            assistant.versions = versions.clone();
            sync_primary(assistant);
        }
    }
    if let Some(id) = &fin.user_message_id {
        if let Some(user) = newest_user_mut(&mut messages, id) {
            user.id = Some(id.clone());
        }
    }
    messages
}

/// Single-agent completion: `message_id` identifies the reply and `output`
/// fills it in when nothing was streamed. Without a reply slot in the current
/// turn, the output becomes a new assistant message.
pub fn finalize_simple(mut messages: Vec<Message>, done: &LoopFinished) -> Vec<Message> {
    let output = done.output.as_deref().unwrap_or_default();
    match current_reply_mut(&mut messages, done.message_id.as_deref()) {
        Some(assistant) => {
            if let Some(id) = &done.message_id {
                assistant.id = Some(id.clone());
            }
            if assistant.text.is_empty() && !output.is_empty() {
                assistant.text = output.to_string();
            }
        }
        None if !output.is_empty() => {
            let mut reply = Message::assistant_placeholder();
            reply.id = done.message_id.clone();
            reply.text = output.to_string();
            messages.push(reply);
        }
        None => {}
    }
    messages
}

/// The newest assistant after the newest user message, unless the server
/// already resolved it to another id.
fn current_reply_mut<'a>(messages: &'a mut [Message], id: Option<&str>) -> Option<&'a mut Message> {
    let turn_start = messages
        .iter()
        .rposition(|m| m.role == Role::User)
        .map_or(0, |i| i + 1);
    messages[turn_start..]
        .iter_mut()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .filter(|m| resolvable(m, id))
}

fn newest_user_mut<'a>(messages: &'a mut [Message], id: &str) -> Option<&'a mut Message> {
    messages
        .iter_mut()
        .rev()
        .find(|m| m.role == Role::User)
        .filter(|m| resolvable(m, Some(id)))
}

fn resolvable(message: &Message, id: Option<&str>) -> bool {
    match (message.id.as_deref(), id) {
        (Some(current), Some(id)) => current == id,
        _ => true,
    }
}

/// Keep the primary text in line with the primary agent's authoritative version.
fn sync_primary(message: &mut Message) {
    if message.agent_slug.is_none() && message.text.is_empty() {
        if let Some(first) = message.versions.first() {
            message.agent_slug = Some(first.agent_slug.clone());
        }
    }
    let Some(version) = message
        .agent_slug
        .as_deref()
        .and_then(|slug| message.version(slug))
    else {
        return;
    };
    let (text, agent_name) = (version.text.clone(), version.agent_name.clone());
    message.text = text;
    if message.agent_name.is_none() {
        message.agent_name = agent_name;
    }
}
