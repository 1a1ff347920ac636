//! Replays a recorded event session through the reconciler.
//!
//! One JSON object per line:
//! `{"at_ms": 0, "kind": "event", "event": "response", "data": {<envelope>}}`
//! or `{"at_ms": 0, "kind": "user_turn", "text": "hi"}`.

use crate::conversation::Conversation;
use crate::reconciler;
use crate::state::View;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Deserialize)]
struct ReplayLine {
    #[serde(default)]
    at_ms: u64,
    #[serde(flatten)]
    step: ReplayStep,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ReplayStep {
    Event { event: String, data: Value },
    UserTurn { text: String },
}

/// A visible status change observed during the replay.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub at_ms: u64,
    pub status: Option<String>,
}

pub struct ReplayOutcome {
    pub changes: Vec<StatusChange>,
    pub view: View,
}

fn parse_lines(content: &str) -> Result<Vec<ReplayLine>> {
    let mut lines = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed: ReplayLine =
            serde_json::from_str(line).with_context(|| format!("replay line {}", n + 1))?;
        lines.push(parsed);
    }
    lines.sort_by_key(|l| l.at_ms);
    Ok(lines)
}

pub async fn replay_file(path: &Path, conversation: Conversation, hold: Duration) -> Result<ReplayOutcome> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading replay file {}", path.display()))?;
    replay(&content, conversation, hold).await
}

pub async fn replay(content: &str, conversation: Conversation, hold: Duration) -> Result<ReplayOutcome> {
    let lines = parse_lines(content)?;
    let (handle, task) = reconciler::spawn(hold);
    let mut views = handle.subscribe();
    handle.open(conversation)?;
    handle.snapshot().await?;
    views.borrow_and_update();

    let start = Instant::now();
    let watcher = tokio::spawn(async move {
        let mut changes = Vec::new();
        let mut last: Option<String> = None;
        while views.changed().await.is_ok() {
            let status = views.borrow_and_update().status.clone();
            if status != last {
                let at_ms = start.elapsed().as_millis() as u64;
                tracing::info!(at_ms, status = ?status, "status");
                changes.push(StatusChange {
                    at_ms,
                    status: status.clone(),
                });
                last = status;
            }
        }
        changes
    });

    let mut end_ms = 0;
    for line in lines {
        tokio::time::sleep_until(start + Duration::from_millis(line.at_ms)).await;
        end_ms = line.at_ms;
        match line.step {
            ReplayStep::Event { event, data } => handle.inbound(&event, &data.to_string())?,
            ReplayStep::UserTurn { text } => handle.user_turn(&text)?,
        }
    }

    // Let any running hold play out before taking the final view.
    tokio::time::sleep_until(start + Duration::from_millis(end_ms) + hold).await;
    let view = handle.snapshot().await?;
    drop(handle);
    task.await?;
    let changes = watcher.await?;
    Ok(ReplayOutcome { changes, view })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::DEFAULT_HOLD;

    const SESSION: &str = r#"
# user asks, agent searches, then streams an answer
{"at_ms": 0, "kind": "user_turn", "text": "hi"}
{"at_ms": 0, "kind": "event", "event": "agent_events_channel", "data": {"user_id": 1, "event_type": "agent_events_channel", "message": {"type": "tool_call_start", "conversation_id": "c1", "tool_name": "search"}}}
{"at_ms": 500, "kind": "event", "event": "agent_events_channel", "data": {"user_id": 1, "event_type": "agent_events_channel", "message": {"type": "loop_start", "conversation_id": "c1"}}}
{"at_ms": 1600, "kind": "event", "event": "response", "data": {"user_id": 1, "event_type": "response", "message": {"chunk": "Hel", "agent_slug": "a1"}}}
{"at_ms": 1700, "kind": "event", "event": "response", "data": {"user_id": 1, "event_type": "response", "message": {"chunk": "lo", "agent_slug": "a1"}}}
{"at_ms": 1800, "kind": "event", "event": "agent_loop_finished", "data": {"user_id": 1, "event_type": "agent_loop_finished", "message": {"conversation_id": "c1", "ai_message_id": 42, "user_message_id": 41}}}
"#;

    #[tokio::test(start_paused = true)]
    async fn test_replay_session() {
        let outcome = replay(SESSION, Conversation::new("c1"), DEFAULT_HOLD)
            .await
            .unwrap();
        let statuses: Vec<(u64, Option<&str>)> = outcome
            .changes
            .iter()
            .map(|c| (c.at_ms, c.status.as_deref()))
            .collect();
        assert_eq!(
            statuses,
            [
                (0, Some("Running search")),
                (1500, Some("Processing")),
                (1800, None),
            ]
        );
        let view = outcome.view;
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[0].id.as_deref(), Some("41"));
        assert_eq!(view.messages[1].id.as_deref(), Some("42"));
        assert_eq!(view.messages[1].text, "Hello");
        assert!(!view.streaming);
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let err = parse_lines("{\"kind\": \"user_turn\", \"text\": \"a\"}\n{\"kind\": \"nope\"}\n")
            .unwrap_err();
        assert!(format!("{err:#}").contains("replay line 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        std::fs::write(&path, SESSION).unwrap();
        let outcome = replay_file(&path, Conversation::new("other"), DEFAULT_HOLD)
            .await
            .unwrap();
        // Agent events are scoped to c1, so nothing shows for "other".
        assert!(outcome.changes.is_empty());
        assert_eq!(outcome.view.messages[1].text, "Hello");
    }
}
