//! A running (or adopted) server process.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Child;

use crate::markers;

/// Upper bound for one readiness check.
const READY_CHECK_TIMEOUT: Duration = Duration::from_millis(500);

/// Main class every ENSIME server JVM is started with.
pub const SERVER_MAIN_CLASS: &str = "org.ensime.server.Server";

/// How the bridge holds on to the server process.
#[derive(Debug)]
pub enum ProcessHandle {
    /// Spawned by this bridge.
    Owned(Child),
    /// Found through marker files; not launched from this session.
    External { pid: Option<u32> },
}

#[derive(Debug)]
pub struct ServerProcess {
    cache_dir: PathBuf,
    handle: ProcessHandle,
    log_path: PathBuf,
    stopped_manually: bool,
}

impl ServerProcess {
    pub(crate) fn owned(cache_dir: &Path, child: Child) -> Self {
        Self::with_handle(cache_dir, ProcessHandle::Owned(child))
    }

    pub(crate) fn adopted(cache_dir: &Path, pid: Option<u32>) -> Self {
        Self::with_handle(cache_dir, ProcessHandle::External { pid })
    }

    fn with_handle(cache_dir: &Path, handle: ProcessHandle) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            handle,
            log_path: markers::log_path(cache_dir),
            stopped_manually: false,
        }
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Server stdout/stderr, for the abort report.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    #[must_use]
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    #[must_use]
    pub fn is_owned(&self) -> bool {
        matches!(self.handle, ProcessHandle::Owned(_))
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        match &self.handle {
            ProcessHandle::Owned(child) => child.id(),
            ProcessHandle::External { pid } => *pid,
        }
    }

    #[must_use]
    pub fn stopped_manually(&self) -> bool {
        self.stopped_manually
    }

    /// Port from the `http` marker, if the server has written it.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        markers::read_port(&self.cache_dir)
    }

    /// Whether the process exists and has not exited.
    ///
    /// An adopted process without a known pid counts as running while its
    /// port marker exists; readiness is then decided by the port.
    pub fn is_running(&mut self) -> bool {
        match &mut self.handle {
            ProcessHandle::Owned(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    tracing::debug!(%status, "Server process exited");
                    false
                }
                Err(e) => {
                    tracing::warn!("Failed to poll server process: {e}");
                    false
                }
            },
            ProcessHandle::External { pid: Some(pid) } => markers::pid_alive(*pid),
            ProcessHandle::External { pid: None } => markers::port_path(&self.cache_dir).is_file(),
        }
    }

    /// Running and accepting TCP connections on the advertised port.
    ///
    /// A missing or garbled port marker or a refused connection means "not
    /// ready yet", never an error.
    pub async fn is_ready(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(port) = self.port() else {
            return false;
        };
        port_answers(port).await
    }

    /// Neither running nor stopped on purpose.
    pub fn aborted(&mut self) -> bool {
        !self.stopped_manually && !self.is_running()
    }

    /// Terminate an owned process and remove its pid marker.
    ///
    /// Adopted processes belong to whoever started them and are left alone.
    pub fn stop(&mut self) {
        let ProcessHandle::Owned(child) = &mut self.handle else {
            tracing::debug!(
                cache_dir = %self.cache_dir.display(),
                "Not stopping a server this bridge did not start"
            );
            return;
        };

        if let Some(pid) = child.id() {
            tracing::info!(pid, "Stopping server");
            #[cfg(unix)]
            if let Err(e) = markers::terminate(pid) {
                tracing::warn!(pid, "Failed to signal server: {e}");
            }
            #[cfg(not(unix))]
            if let Err(e) = child.start_kill() {
                tracing::warn!(pid, "Failed to kill server: {e}");
            }
        }

        markers::remove_pid(&self.cache_dir);
        self.stopped_manually = true;
    }
}

/// One TCP connect attempt to `127.0.0.1:port`.
pub async fn port_answers(port: u16) -> bool {
    matches!(
        tokio::time::timeout(
            READY_CHECK_TIMEOUT,
            TcpStream::connect((Ipv4Addr::LOCALHOST, port))
        )
        .await,
        Ok(Ok(_))
    )
}

/// The pid in `server.pid`, if it still names an ENSIME server.
///
/// Pids are reused, so a live pid alone proves nothing after a crash or
/// reboot. The process must have been started with [`SERVER_MAIN_CLASS`];
/// where its command line cannot be read, the advertised port must answer
/// instead. A marker that fails the check is removed.
pub async fn running_server_pid(cache_dir: &Path) -> Option<u32> {
    let pid = markers::read_pid(cache_dir)?;
    let verified = markers::pid_alive(pid)
        && match markers::command_line(pid) {
            Some(args) => args.iter().any(|arg| arg == SERVER_MAIN_CLASS),
            None => match markers::read_port(cache_dir) {
                Some(port) => port_answers(port).await,
                None => false,
            },
        };
    if verified {
        return Some(pid);
    }
    tracing::info!(pid, cache_dir = %cache_dir.display(), "Dropping stale pid marker");
    markers::remove_pid(cache_dir);
    None
}
