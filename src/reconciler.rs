//! Single-owner event loop around [`AppState`].
//!
//! Every event, user action and timer expiry is handled by one task reading
//! one mailbox, so handlers never interleave. Views are published on a
//! `watch` channel whenever something visible changes.

use crate::conversation::Conversation;
use crate::events::{self, InboundEvent};
use crate::state::{AppState, Applied, View};
use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub enum Command {
    Open(Conversation),
    Close,
    UserTurn(String),
    /// Raw socket event; decoded inside the loop.
    Inbound { name: String, raw: String },
    Snapshot(oneshot::Sender<View>),
}

#[derive(Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::UnboundedSender<Command>,
    view_rx: watch::Receiver<View>,
}

impl ReconcilerHandle {
    pub fn open(&self, conversation: Conversation) -> Result<()> {
        self.send(Command::Open(conversation))
    }

    pub fn close(&self) -> Result<()> {
        self.send(Command::Close)
    }

    pub fn user_turn(&self, text: &str) -> Result<()> {
        self.send(Command::UserTurn(text.to_string()))
    }

    pub fn inbound(&self, name: &str, raw: &str) -> Result<()> {
        self.send(Command::Inbound {
            name: name.to_string(),
            raw: raw.to_string(),
        })
    }

    pub async fn snapshot(&self) -> Result<View> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| anyhow!("reconciler stopped"))
    }

    pub fn subscribe(&self) -> watch::Receiver<View> {
        self.view_rx.clone()
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| anyhow!("reconciler stopped"))
    }
}

/// Start the loop. It exits once every handle has been dropped.
pub fn spawn(hold: Duration) -> (ReconcilerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = AppState::new(hold);
    let (view_tx, view_rx) = watch::channel(state.view());
    let task = tokio::spawn(run(state, rx, view_tx));
    (ReconcilerHandle { tx, view_rx }, task)
}

async fn run(
    mut state: AppState,
    mut rx: mpsc::UnboundedReceiver<Command>,
    view_tx: watch::Sender<View>,
) {
    loop {
        let deadline = state.hold_deadline();
        // Timer first: a due hold expires before the next command is seen.
        let cmd = tokio::select! {
            biased;
            _ = sleep_until(deadline) => {
                if state.expire_hold(Instant::now()) {
                    view_tx.send_replace(state.view());
                }
                continue;
            }
            cmd = rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };

        let now = Instant::now();
        let mut changed = state.expire_hold(now);
        match cmd {
            Command::Open(conversation) => {
                state.open_conversation(conversation);
                changed = true;
            }
            Command::Close => {
                state.close_conversation();
                changed = true;
            }
            Command::UserTurn(text) => {
                changed |= state.push_user_turn(&text) == Applied::Changed;
            }
            Command::Inbound { name, raw } => match events::decode(&name, &raw) {
                Ok(event) => changed |= apply(&mut state, event, now),
                Err(e) => tracing::debug!(event = %name, "dropping event: {e}"),
            },
            Command::Snapshot(reply) => {
                let _ = reply.send(state.view());
            }
        }
        if changed {
            view_tx.send_replace(state.view());
        }
    }
    tracing::debug!("reconciler stopped");
}

fn apply(state: &mut AppState, event: InboundEvent, now: Instant) -> bool {
    let name = event.name();
    match state.apply(event, now) {
        Applied::Changed => true,
        Applied::Unchanged => false,
        Applied::Ignored => {
            tracing::trace!(event = name, "event does not match the open conversation");
            false
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
