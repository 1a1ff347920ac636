use crate::events::{
    Envelope, EMIT_MESSAGE, EMIT_REGISTER_USER, EMIT_REGISTER_WIDGET_SESSION,
};
use anyhow::Result;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

const MAX_BACKOFF_SECS: u64 = 30;

/// What the event source hands to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceFrame {
    Connected,
    Disconnected(String),
    /// A named event with its raw envelope JSON.
    Event { name: String, raw: String },
}

pub struct ChatClient {
    base_url: String,
    user_id: u64,
    client: Client,
}

impl ChatClient {
    pub fn new(base_url: &str, user_id: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id,
            client: Client::new(),
        }
    }

    pub async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    pub async fn register_user(&self) -> Result<()> {
        self.emit(EMIT_REGISTER_USER, json!({ "user_id": self.user_id }))
            .await
    }

    pub async fn register_widget_session(&self, session_id: &str) -> Result<()> {
        self.emit(
            EMIT_REGISTER_WIDGET_SESSION,
            json!({ "user_id": self.user_id, "session_id": session_id }),
        )
        .await
    }

    /// Submit a user turn. The reply arrives on the event stream.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        agent_slug: Option<&str>,
    ) -> Result<()> {
        let mut payload = json!({
            "conversation_id": conversation_id,
            "text": text,
        });
        if let Some(slug) = agent_slug {
            payload["agent_slug"] = json!(slug);
        }
        self.emit(EMIT_MESSAGE, payload).await
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<()> {
        let envelope = Envelope::outbound(self.user_id, event, payload);
        let resp = self
            .client
            .post(format!("{}/api/emit/{}", self.base_url, event))
            .json(&envelope)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Emitting `{}` failed ({}): {}", event, status, text);
        }
        Ok(())
    }

    /// Subscribe to the event stream. The connection runs in a background
    /// task and reconnects with exponential backoff (1s → 2s → ... capped at
    /// 30s). Dropping the receiver ends the task.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SourceFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        let url = format!(
            "{}/api/events?user_id={}",
            self.base_url,
            urlencoding::encode(&self.user_id.to_string())
        );
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut backoff_secs: u64 = 1;

            loop {
                let resp = match client.get(&url).send().await {
                    Ok(r) if r.status().is_success() => {
                        backoff_secs = 1;
                        info!("event stream connected");
                        if tx.send(SourceFrame::Connected).is_err() {
                            return;
                        }
                        r
                    }
                    Ok(r) => {
                        warn!("event stream rejected: {}", r.status());
                        let _ = tx.send(SourceFrame::Disconnected(format!(
                            "Rejected: {}",
                            r.status()
                        )));
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                        continue;
                    }
                    Err(e) => {
                        warn!("event stream connect failed: {}", e);
                        let _ = tx.send(SourceFrame::Disconnected(format!("Connect failed: {e}")));
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                        continue;
                    }
                };

                let mut stream = resp.bytes_stream();
                let mut parser = FrameParser::default();
                while let Some(chunk) = stream.next().await {
                    let chunk = match chunk {
                        Ok(c) => c,
                        Err(e) => {
                            warn!("event stream error: {}", e);
                            break;
                        }
                    };
                    for frame in parser.push(&chunk) {
                        if tx.send(frame).is_err() {
                            return;
                        }
                    }
                }

                let _ = tx.send(SourceFrame::Disconnected("Stream ended".to_string()));
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            }
        });

        rx
    }
}

/// Incremental SSE frame parser: `event:` names the event, `data:` lines
/// carry the envelope, a blank line ends the frame.
///
/// Buffers raw bytes so a character split across network chunks is decoded
/// only once its frame is complete.
#[derive(Default)]
struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    fn push(&mut self, bytes: &[u8]) -> Vec<SourceFrame> {
        // `\r` never occurs inside a multi-byte UTF-8 sequence.
        self.buf.extend(bytes.iter().copied().filter(|&b| b != b'\r'));
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buf.drain(..pos + 2).collect();
            match std::str::from_utf8(&block) {
                Ok(block) => frames.extend(parse_block(block)),
                Err(e) => tracing::debug!("dropping frame that is not UTF-8: {e}"),
            }
        }
        frames
    }
}

fn parse_block(block: &str) -> Option<SourceFrame> {
    let mut name = None;
    let mut data = Vec::new();
    for line in block.lines() {
        if let Some(v) = line.strip_prefix("event:") {
            name = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("data:") {
            data.push(v.trim());
        }
    }
    let raw = data.join("\n");
    if raw.is_empty() {
        return None;
    }
    // Without an explicit name, fall back to the envelope's event_type.
    let name = name.or_else(|| {
        serde_json::from_str::<Envelope>(&raw)
            .ok()
            .map(|e| e.event_type)
            .filter(|t| !t.is_empty())
    })?;
    Some(SourceFrame::Event { name, raw })
}
