//! The editor collaborator consumed by the bridge.

use std::fmt;
use std::path::PathBuf;

/// A user-visible notice, rendered from a fixed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The server for this toolchain has not been bootstrapped yet.
    InstallPrompt { scala_version: String },
    InstallStarted { scala_version: String },
    InstallFinished { scala_version: String },
    InstallFailed { reason: String },
    /// A server process was launched or adopted and is warming up.
    ServerStarting { project: String },
    /// `java-home` does not point at a usable runtime.
    InvalidJava { path: PathBuf },
    /// The server exited without being asked to.
    ServerAborted { project: String, log: Option<PathBuf> },
    /// The connection attempt ceiling was reached.
    ConnectionGaveUp { project: String, attempts: u32 },
    ConfigInvalid { path: PathBuf, reason: String },
    /// The debuggee stopped at a breakpoint.
    DebugBreak { thread_id: u64 },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstallPrompt { scala_version } => write!(
                f,
                "ENSIME server for Scala {scala_version} is not installed. Run the install command to bootstrap it."
            ),
            Self::InstallStarted { scala_version } => {
                write!(f, "Installing ENSIME server for Scala {scala_version}...")
            }
            Self::InstallFinished { scala_version } => {
                write!(f, "ENSIME server for Scala {scala_version} installed.")
            }
            Self::InstallFailed { reason } => {
                write!(f, "ENSIME server installation failed: {reason}")
            }
            Self::ServerStarting { project } => {
                write!(f, "ENSIME server for {project} is starting, please wait...")
            }
            Self::InvalidJava { path } => write!(
                f,
                "No Java runtime found at {}; check java-home in your .ensime file.",
                path.display()
            ),
            Self::ServerAborted { project, log } => match log {
                Some(log) => write!(
                    f,
                    "ENSIME server for {project} stopped unexpectedly, see {}",
                    log.display()
                ),
                None => write!(f, "ENSIME server for {project} stopped unexpectedly."),
            },
            Self::ConnectionGaveUp { project, attempts } => write!(
                f,
                "Gave up connecting to the ENSIME server for {project} after {attempts} attempts."
            ),
            Self::ConfigInvalid { path, reason } => {
                write!(f, "Invalid project config {}: {reason}", path.display())
            }
            Self::DebugBreak { thread_id } => {
                write!(f, "Debugger stopped at a breakpoint (thread {thread_id}).")
            }
        }
    }
}

/// The editing surface the bridge reports to.
///
/// Implementations must be callable from any thread; the bridge itself only
/// calls them from the host's event loop, but server events that carry
/// output are relayed from there too.
pub trait Editor: Send + Sync {
    /// Show `text` verbatim.
    fn raw_message(&self, text: &str);

    /// Show a templated notice.
    fn notify(&self, notice: &Notice) {
        self.raw_message(&notice.to_string());
    }

    /// Path of the file in the active buffer, if it has one.
    fn current_buffer_path(&self) -> Option<PathBuf>;
}
