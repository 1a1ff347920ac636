use crate::conversation::{apply_chunk, finalize, finalize_simple, Conversation, Message};
use crate::events::{AgentEventKind, Finalization, InboundEvent};
use crate::status::{StatusCoalescer, StatusEvent, StatusUpdate};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of feeding one event to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
    /// Not for the open conversation (or none is open).
    Ignored,
}

impl Applied {
    fn from_changed(changed: bool) -> Self {
        if changed {
            Applied::Changed
        } else {
            Applied::Unchanged
        }
    }
}

/// Snapshot handed to whoever renders the conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct View {
    pub conversation_id: Option<String>,
    pub title: String,
    pub status: Option<String>,
    pub streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_agent: Option<String>,
    pub messages: Vec<Message>,
}

/// Application state for one conversation view. All mutation goes through
/// the methods below; the status line is owned by the coalescer.
#[derive(Debug)]
pub struct AppState {
    conversation: Option<Conversation>,
    status: StatusCoalescer,
    streaming: bool,
    next_agent: Option<String>,
}

impl AppState {
    pub fn new(hold: Duration) -> Self {
        Self {
            conversation: None,
            status: StatusCoalescer::new(hold),
            streaming: false,
            next_agent: None,
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> Option<&str> {
        self.status.current()
    }

    pub fn hold_deadline(&self) -> Option<Instant> {
        self.status.deadline()
    }

    /// Replace the open conversation wholesale. Any running hold and its
    /// pending status are dropped with the old one.
    pub fn open_conversation(&mut self, conversation: Conversation) {
        tracing::debug!(conversation_id = %conversation.id, "opening conversation");
        self.status.reset();
        self.streaming = false;
        self.next_agent = None;
        self.conversation = Some(conversation);
    }

    pub fn close_conversation(&mut self) {
        self.status.reset();
        self.streaming = false;
        self.next_agent = None;
        self.conversation = None;
    }

    /// Optimistically append the user's message and an empty reply slot.
    pub fn push_user_turn(&mut self, text: &str) -> Applied {
        let Some(conversation) = self.conversation.as_mut() else {
            return Applied::Ignored;
        };
        conversation.messages.push(Message::user(text));
        conversation.messages.push(Message::assistant_placeholder());
        self.streaming = true;
        Applied::Changed
    }

    pub fn apply(&mut self, event: InboundEvent, now: Instant) -> Applied {
        match event {
            InboundEvent::Agent(ev) => {
                if !self.is_open(ev.conversation_id.as_deref()) {
                    return Applied::Ignored;
                }
                let Some(status_event) = StatusEvent::from_agent_event(&ev) else {
                    return Applied::Unchanged;
                };
                let mut changed = false;
                match ev.kind {
                    AgentEventKind::LoopStart => changed |= self.set_streaming(true),
                    AgentEventKind::Error => {
                        if let Some(error) = &ev.error {
                            tracing::warn!(%error, "agent reported an error");
                        }
                        changed |= self.set_streaming(false);
                    }
                    _ => {}
                }
                changed |= self.status.apply(status_event, now);
                Applied::from_changed(changed)
            }
            InboundEvent::LoopFinished(done) => {
                // The widget shape may omit the conversation id.
                let scoped = done.conversation_id.is_some();
                if (scoped && !self.is_open(done.conversation_id.as_deref()))
                    || self.conversation.is_none()
                {
                    return Applied::Ignored;
                }
                tracing::debug!(
                    iterations = ?done.iterations,
                    tool_calls = ?done.tool_calls_count,
                    "agent loop finished"
                );
                let mut changed = false;
                if done.message_id.is_some() || done.output.is_some() {
                    changed |= self.update_messages(|messages| finalize_simple(messages, &done));
                }
                changed |= self.apply_finalization(&done.finalization);
                changed |= self.set_streaming(false);
                changed |= self.status.request(StatusUpdate::Clear, now);
                Applied::from_changed(changed)
            }
            InboundEvent::Chunk(chunk) => {
                let Some(conversation) = self.conversation.as_mut() else {
                    return Applied::Ignored;
                };
                // Even an empty fragment opens the reply slot and the agent's version.
                let messages = std::mem::take(&mut conversation.messages);
                conversation.messages = apply_chunk(messages, &chunk.chunk, &chunk.agent_slug);
                self.streaming = true;
                Applied::Changed
            }
            InboundEvent::ResponseFinished(fin) => {
                if self.conversation.is_none() {
                    return Applied::Ignored;
                }
                let mut changed = self.set_streaming(false);
                if let Some(fin) = fin {
                    changed |= self.apply_finalization(&fin);
                }
                Applied::from_changed(changed)
            }
        }
    }

    /// Called when the hold timer fires.
    pub fn expire_hold(&mut self, now: Instant) -> bool {
        self.status.expire(now)
    }

    pub fn view(&self) -> View {
        let (conversation_id, title, messages) = match &self.conversation {
            Some(c) => (Some(c.id.clone()), c.title.clone(), c.messages.clone()),
            None => (None, String::new(), Vec::new()),
        };
        View {
            conversation_id,
            title,
            status: self.status.current().map(String::from),
            streaming: self.streaming,
            next_agent: self.next_agent.clone(),
            messages,
        }
    }

    fn is_open(&self, conversation_id: Option<&str>) -> bool {
        match (&self.conversation, conversation_id) {
            (Some(open), Some(id)) => open.id == id,
            _ => false,
        }
    }

    fn apply_finalization(&mut self, fin: &Finalization) -> bool {
        if fin.is_empty() {
            return false;
        }
        let mut changed = self.update_messages(|messages| finalize(messages, fin));
        if fin.next_agent_slug.is_some() && self.next_agent != fin.next_agent_slug {
            self.next_agent = fin.next_agent_slug.clone();
            changed = true;
        }
        changed
    }

    /// Rewrite the message list and report whether it differs. Only used for
    /// finalization, which arrives once per turn.
    fn update_messages(&mut self, f: impl FnOnce(Vec<Message>) -> Vec<Message>) -> bool {
        let Some(conversation) = self.conversation.as_mut() else {
            return false;
        };
        let before = std::mem::take(&mut conversation.messages);
        let snapshot = before.clone();
        conversation.messages = f(before);
        conversation.messages != snapshot
    }

    fn set_streaming(&mut self, streaming: bool) -> bool {
        let changed = self.streaming != streaming;
        self.streaming = streaming;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{decode, EVENT_AGENT_CHANNEL, EVENT_LOOP_FINISHED, EVENT_RESPONSE};
    use crate::status::DEFAULT_HOLD;

    fn event(name: &str, payload: serde_json::Value) -> InboundEvent {
        let raw = serde_json::json!({"user_id": 1, "event_type": name, "message": payload});
        decode(name, &raw.to_string()).unwrap()
    }

    fn open(id: &str) -> AppState {
        let mut state = AppState::new(DEFAULT_HOLD);
        state.open_conversation(Conversation::new(id));
        state
    }

    #[test]
    fn test_events_for_other_conversations_are_ignored() {
        let mut state = open("c1");
        let now = Instant::now();
        let ev = event(
            EVENT_AGENT_CHANNEL,
            serde_json::json!({"type": "loop_start", "conversation_id": "c2"}),
        );
        assert_eq!(state.apply(ev, now), Applied::Ignored);
        let ev = event(EVENT_AGENT_CHANNEL, serde_json::json!({"type": "loop_start"}));
        assert_eq!(state.apply(ev, now), Applied::Ignored);
        assert_eq!(state.status(), None);
    }

    #[test]
    fn test_nothing_applies_without_open_conversation() {
        let mut state = AppState::new(DEFAULT_HOLD);
        let now = Instant::now();
        let chunk = event(EVENT_RESPONSE, serde_json::json!({"chunk": "x", "agent_slug": "a1"}));
        assert_eq!(state.apply(chunk, now), Applied::Ignored);
        assert_eq!(state.push_user_turn("hi"), Applied::Ignored);
        assert!(state.view().messages.is_empty());
    }

    #[test]
    fn test_full_turn() {
        let mut state = open("c1");
        let t0 = Instant::now();
        state.push_user_turn("hi");
        assert!(state.view().streaming);

        let ev = event(
            EVENT_AGENT_CHANNEL,
            serde_json::json!({"type": "loop_start", "conversation_id": "c1"}),
        );
        assert_eq!(state.apply(ev, t0), Applied::Changed);
        assert_eq!(state.status(), Some("Processing"));

        for part in ["Hel", "lo"] {
            let ev = event(EVENT_RESPONSE, serde_json::json!({"chunk": part, "agent_slug": "a1"}));
            state.apply(ev, t0);
        }
        let done = event(
            EVENT_LOOP_FINISHED,
            serde_json::json!({"conversation_id": "c1", "ai_message_id": 42, "user_message_id": 41}),
        );
        assert_eq!(state.apply(done, t0), Applied::Changed);

        let view = state.view();
        assert_eq!(view.status, None);
        assert!(!view.streaming);
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[0].id.as_deref(), Some("41"));
        assert_eq!(view.messages[1].id.as_deref(), Some("42"));
        assert_eq!(view.messages[1].text, "Hello");
    }

    #[test]
    fn test_loop_finished_clear_waits_for_hold() {
        let mut state = open("c1");
        let t0 = Instant::now();
        let tool = event(
            EVENT_AGENT_CHANNEL,
            serde_json::json!({"type": "tool_call_end", "conversation_id": "c1", "tool_name": "search"}),
        );
        state.apply(tool, t0);
        let done = event(
            EVENT_LOOP_FINISHED,
            serde_json::json!({"conversation_id": "c1", "output": "ok", "message_id": 3}),
        );
        state.apply(done, t0 + Duration::from_millis(100));
        assert_eq!(state.status(), Some("search completed"));
        assert!(state.expire_hold(t0 + DEFAULT_HOLD));
        assert_eq!(state.status(), None);
        assert_eq!(state.view().messages[0].text, "ok");
    }

    #[test]
    fn test_error_keeps_partial_text() {
        let mut state = open("c1");
        let now = Instant::now();
        state.push_user_turn("hi");
        let chunk = event(EVENT_RESPONSE, serde_json::json!({"chunk": "Part", "agent_slug": "a1"}));
        state.apply(chunk, now);
        let err = event(
            EVENT_AGENT_CHANNEL,
            serde_json::json!({"type": "error", "conversation_id": "c1", "error": "boom"}),
        );
        state.apply(err, now);
        let view = state.view();
        assert_eq!(view.status, None);
        assert!(!view.streaming);
        assert_eq!(view.messages[1].text, "Part");
    }

    #[test]
    fn test_switching_conversation_drops_pending_status() {
        let mut state = open("c1");
        let t0 = Instant::now();
        let tool = event(
            EVENT_AGENT_CHANNEL,
            serde_json::json!({"type": "tool_call_start", "conversation_id": "c1", "tool_name": "search"}),
        );
        state.apply(tool, t0);
        let lifecycle = event(
            EVENT_AGENT_CHANNEL,
            serde_json::json!({"type": "loop_start", "conversation_id": "c1"}),
        );
        state.apply(lifecycle, t0);
        state.open_conversation(Conversation::new("c2"));
        assert_eq!(state.hold_deadline(), None);
        assert!(!state.expire_hold(t0 + DEFAULT_HOLD));
        assert_eq!(state.status(), None);
    }

    #[test]
    fn test_empty_chunk_opens_reply() {
        let mut state = AppState::new(DEFAULT_HOLD);
        let now = Instant::now();
        state.open_conversation(Conversation {
            messages: vec![Message::user("hi")],
            ..Conversation::new("c1")
        });
        let chunk = event(EVENT_RESPONSE, serde_json::json!({"chunk": "", "agent_slug": "a1"}));
        assert_eq!(state.apply(chunk, now), Applied::Changed);
        let view = state.view();
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[1].agent_slug.as_deref(), Some("a1"));
        assert_eq!(view.messages[1].text, "");
        assert_eq!(view.messages[1].versions.len(), 1);
        assert!(view.streaming);
    }

    #[test]
    fn test_widget_loop_finished_without_conversation_id_applies() {
        let mut state = open("c1");
        let now = Instant::now();
        state.push_user_turn("hi");
        let done = event(
            EVENT_LOOP_FINISHED,
            serde_json::json!({"ai_message_id": "m2", "user_message_id": "m1"}),
        );
        assert_eq!(state.apply(done, now), Applied::Changed);
        let view = state.view();
        assert_eq!(view.messages[0].id.as_deref(), Some("m1"));
        assert_eq!(view.messages[1].id.as_deref(), Some("m2"));
        assert!(!view.streaming);
    }

    #[test]
    fn test_loop_finished_for_other_conversation_is_ignored() {
        let mut state = open("c1");
        let now = Instant::now();
        state.push_user_turn("hi");
        let done = event(
            EVENT_LOOP_FINISHED,
            serde_json::json!({"conversation_id": "c2", "ai_message_id": "m2", "output": "x"}),
        );
        assert_eq!(state.apply(done, now), Applied::Ignored);
        let view = state.view();
        assert_eq!(view.messages[1].id, None);
        assert_eq!(view.messages[1].text, "");
        assert!(view.streaming);
    }

    #[test]
    fn test_response_finished_records_next_agent() {
        let mut state = open("c1");
        let now = Instant::now();
        state.push_user_turn("hi");
        let fin = event(
            crate::events::EVENT_RESPONSE_FINISHED,
            serde_json::json!({"ai_message_id": "m2", "next_agent_slug": "critic"}),
        );
        assert_eq!(state.apply(fin, now), Applied::Changed);
        let view = state.view();
        assert_eq!(view.next_agent.as_deref(), Some("critic"));
        assert_eq!(view.messages[1].id.as_deref(), Some("m2"));
        assert!(!view.streaming);
    }
}
