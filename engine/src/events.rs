//! Server events relayed from channel reader tasks to the host loop.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::mpsc;

/// An unsolicited server event the editor needs to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Output from the program under the debugger.
    DebugOutput { project: PathBuf, body: String },
    /// The debuggee stopped; `thread_id` is now the active thread.
    DebugBreak { project: PathBuf, thread_id: u64 },
    /// Any other kind the host subscribed to, payload untouched.
    Other {
        project: PathBuf,
        kind: String,
        payload: Value,
    },
}

impl ServerEvent {
    #[must_use]
    pub fn project(&self) -> &PathBuf {
        match self {
            Self::DebugOutput { project, .. }
            | Self::DebugBreak { project, .. }
            | Self::Other { project, .. } => project,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

#[must_use]
pub fn event_queue() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Event kinds the host asked to receive, shared by every session.
///
/// Checked as each event arrives, so a subscription also covers channels
/// that are already open.
#[derive(Debug, Clone, Default)]
pub struct EventSubscriptions(Arc<RwLock<BTreeSet<String>>>);

impl EventSubscriptions {
    pub fn subscribe(&self, kind: impl Into<String>) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.into());
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(kind)
    }
}
