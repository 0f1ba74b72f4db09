//! ENSIME server lifecycle: classpath installation, process supervision and
//! the session channel to a running server.

pub mod channel;
pub mod codec;
pub mod install;
pub mod markers;
pub mod process;
pub mod protocol;
pub mod supervisor;

pub use channel::{ChannelError, EventHandlers, ResponseHandle, SessionChannel};
pub use codec::CodecError;
pub use install::InstallLayout;
pub use process::{ProcessHandle, ServerProcess};
pub use protocol::{Incoming, ProtocolV1, ProtocolV2, WireProtocol, protocol_for, typehint};
pub use supervisor::{LaunchError, ProcessSupervisor};
