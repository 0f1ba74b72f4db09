//! Session lifecycle for the ENSIME bridge.
//!
//! - **`bridge`**: the editor-facing context ([`Bridge`]) the host drives
//! - **`registry`**: one session and supervisor per project ([`SessionRegistry`])
//! - **`session`**: the per-project client state machine ([`Session`])
//! - **`debugger`**: debugger commands for protocol v2 sessions
//! - **`events`**: server events queued for the host's event loop

mod bridge;
pub mod debugger;
mod events;
mod registry;
mod session;

#[cfg(test)]
mod test_support;

pub use bridge::{Bridge, DEFAULT_EVENT_BUDGET};
pub use debugger::{DebugError, Debugger};
pub use events::{EventReceiver, EventSender, EventSubscriptions, ServerEvent, event_queue};
pub use registry::{ProjectEntry, SessionRegistry};
pub use session::{DRAIN_TIMEOUT, Session, SessionError};

pub use ensime_config::{BridgeSettings, ProjectConfig};
pub use ensime_server::{ChannelError, ResponseHandle};
pub use ensime_types::{
    ClientState, Editor, MAX_CONNECTION_ATTEMPTS, Notice, ProtocolVersion, SessionStatus,
};
