//! Derives the single "what is the agent doing" line from lifecycle and tool
//! events.
//!
//! Tool messages are held on screen for at least `hold` so fast tool calls
//! don't flicker. While a hold is running, lifecycle updates are parked as
//! `pending` (latest wins) and applied when it expires. Only an error cuts a
//! hold short.

use crate::events::{AgentEvent, AgentEventKind};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_HOLD: Duration = Duration::from_millis(1500);
/// Upper bound accepted from configuration.
pub const MAX_HOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Show(String),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// `tool_call_start` / `tool_call_end`: shown at once, then held.
    Tool(String),
    Lifecycle(StatusUpdate),
    Error,
}

impl StatusEvent {
    /// `None` for event types that don't touch the status line.
    pub fn from_agent_event(event: &AgentEvent) -> Option<Self> {
        match event.kind {
            AgentEventKind::ToolCallStart | AgentEventKind::ToolCallEnd => {
                describe(event).map(StatusEvent::Tool)
            }
            AgentEventKind::LoopStart
            | AgentEventKind::IterationStart
            | AgentEventKind::AgentComplete => {
                describe(event).map(|text| StatusEvent::Lifecycle(StatusUpdate::Show(text)))
            }
            AgentEventKind::Error => Some(StatusEvent::Error),
            AgentEventKind::Other(_) => None,
        }
    }
}

/// Human-readable status text for an agent event.
pub fn describe(event: &AgentEvent) -> Option<String> {
    let tool = event.tool_name.as_deref().filter(|t| !t.is_empty());
    let text = match event.kind {
        AgentEventKind::ToolCallStart => match tool {
            Some(tool) => format!("Running {tool}"),
            None => "Running tool".to_string(),
        },
        AgentEventKind::ToolCallEnd => match tool {
            Some(tool) => format!("{tool} completed"),
            None => "Tool completed".to_string(),
        },
        AgentEventKind::LoopStart => "Processing".to_string(),
        AgentEventKind::IterationStart => match event.iteration {
            Some(n) => format!("Processing (step {n})"),
            None => "Processing".to_string(),
        },
        AgentEventKind::AgentComplete => {
            let name = event
                .agent_name
                .as_deref()
                .filter(|n| !n.is_empty())
                .unwrap_or("Agent");
            let total = event.total.unwrap_or(1);
            // `index` is 0-based and comes straight off the wire.
            let position = event.index.unwrap_or(0).saturating_add(1);
            if total > 1 && position < total {
                format!("{name} finished ({position} of {total}), waiting for next agent")
            } else {
                format!("{name} completed")
            }
        }
        AgentEventKind::Error | AgentEventKind::Other(_) => return None,
    };
    Some(text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HoldTimer {
    Idle,
    Holding {
        deadline: Instant,
        pending: Option<StatusUpdate>,
    },
}

#[derive(Debug)]
pub struct StatusCoalescer {
    hold: Duration,
    current: Option<String>,
    timer: HoldTimer,
}

impl Default for StatusCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD)
    }
}

impl StatusCoalescer {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            current: None,
            timer: HoldTimer::Idle,
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        match &self.timer {
            HoldTimer::Holding { deadline, .. } => Some(*deadline),
            HoldTimer::Idle => None,
        }
    }

    /// Returns true when the visible status changed.
    pub fn apply(&mut self, event: StatusEvent, now: Instant) -> bool {
        match event {
            StatusEvent::Tool(text) => self.show_tool(text, now),
            StatusEvent::Lifecycle(update) => self.request(update, now),
            StatusEvent::Error => self.error(),
        }
    }

    /// Show a tool message immediately and (re)start the hold. Anything that
    /// was pending behind the previous hold is dropped.
    pub fn show_tool(&mut self, text: String, now: Instant) -> bool {
        let deadline = now.checked_add(self.hold).unwrap_or(now + MAX_HOLD);
        self.timer = HoldTimer::Holding {
            deadline,
            pending: None,
        };
        self.set(Some(text))
    }

    /// Non-tool update: immediate when idle, parked while a hold runs.
    pub fn request(&mut self, update: StatusUpdate, now: Instant) -> bool {
        let expired = self.expire(now);
        if let HoldTimer::Holding { pending, .. } = &mut self.timer {
            *pending = Some(update);
            return expired;
        }
        let changed = match update {
            StatusUpdate::Show(text) => self.set(Some(text)),
            StatusUpdate::Clear => self.set(None),
        };
        expired || changed
    }

    /// Cancel the hold, drop the pending update and clear the status.
    pub fn error(&mut self) -> bool {
        self.timer = HoldTimer::Idle;
        self.set(None)
    }

    /// Apply the pending update if the hold has run out.
    pub fn expire(&mut self, now: Instant) -> bool {
        let HoldTimer::Holding { deadline, .. } = &self.timer else {
            return false;
        };
        if now < *deadline {
            return false;
        }
        let timer = std::mem::replace(&mut self.timer, HoldTimer::Idle);
        match timer {
            HoldTimer::Holding {
                pending: Some(StatusUpdate::Show(text)),
                ..
            } => self.set(Some(text)),
            HoldTimer::Holding {
                pending: Some(StatusUpdate::Clear),
                ..
            } => self.set(None),
            _ => false,
        }
    }

    /// Conversation switch or teardown: nothing carries over.
    pub fn reset(&mut self) -> bool {
        self.timer = HoldTimer::Idle;
        self.set(None)
    }

    fn set(&mut self, next: Option<String>) -> bool {
        if self.current == next {
            return false;
        }
        tracing::trace!(status = ?next, "status changed");
        self.current = next;
        true
    }
}
