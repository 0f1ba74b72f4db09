//! Core domain types for the ENSIME bridge.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the bridge.

mod editor;
mod ids;

pub use editor::{Editor, Notice};
pub use ids::CallId;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard ceiling on tick-driven connection attempts for one session.
pub const MAX_CONNECTION_ATTEMPTS: u32 = 10;

// ============================================================================
// Client State
// ============================================================================

/// Connection state of one project session.
///
/// ```text
/// Stopped -> Starting -> Ready
///              |          |
///              +----------+--> Aborted   (process died without a stop)
/// any ------------------------> Stopped   (teardown)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    #[default]
    Stopped,
    Starting,
    Ready,
    Aborted,
}

impl ClientState {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Aborted => "aborted",
        }
    }

    /// Whether the session is between launch and a usable channel.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Status line shown when listing known projects.
///
/// Unlike [`ClientState`] this also covers projects whose session never
/// loaded, and is derived from the process rather than the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unloaded,
    Stopped,
    Startup,
    Ready,
    Aborted,
}

impl SessionStatus {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Stopped => "stopped",
            Self::Startup => "startup",
            Self::Ready => "ready",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Protocol Version
// ============================================================================

/// Wire protocol spoken by the analysis server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    V1,
    #[default]
    V2,
}

impl ProtocolVersion {
    #[must_use]
    pub fn from_server_v2(server_v2: bool) -> Self {
        if server_v2 { Self::V2 } else { Self::V1 }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => f.write_str("v1"),
            Self::V2 => f.write_str("v2"),
        }
    }
}
