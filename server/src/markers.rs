//! Marker files in a project's cache directory.
//!
//! The bridge writes `server.pid` when it spawns a server; the server itself
//! writes its port to `http` once it is listening. Both survive the bridge, so
//! a later session can find and adopt a server it did not start.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tempfile::NamedTempFile;

pub const PID_FILE: &str = "server.pid";
pub const PORT_FILE: &str = "http";
pub const LOG_FILE: &str = "server.log";

#[must_use]
pub fn pid_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(PID_FILE)
}

#[must_use]
pub fn port_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(PORT_FILE)
}

#[must_use]
pub fn log_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(LOG_FILE)
}

fn read_number<T: FromStr>(path: &Path) -> Option<T> {
    let text = fs::read_to_string(path).ok()?;
    match text.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::debug!(path = %path.display(), "Ignoring garbled marker file");
            None
        }
    }
}

/// Port advertised by the server; `None` if absent or garbled.
#[must_use]
pub fn read_port(cache_dir: &Path) -> Option<u16> {
    read_number(&port_path(cache_dir))
}

/// Pid recorded by whichever bridge spawned the server.
#[must_use]
pub fn read_pid(cache_dir: &Path) -> Option<u32> {
    read_number::<u32>(&pid_path(cache_dir)).filter(|pid| *pid > 0)
}

/// Record `pid`, replacing any previous marker atomically.
pub fn write_pid(cache_dir: &Path, pid: u32) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(cache_dir)?;
    writeln!(tmp, "{pid}")?;
    tmp.as_file().sync_all()?;
    tmp.persist(pid_path(cache_dir)).map_err(|err| err.error)?;
    Ok(())
}

/// Remove the pid marker; a missing file is not an error.
pub fn remove_pid(cache_dir: &Path) {
    let path = pid_path(cache_dir);
    match fs::remove_file(&path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed pid marker"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "Failed to remove pid marker: {e}"),
    }
}

/// Whether a process with `pid` exists (signal 0).
#[cfg(unix)]
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence and permission check.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
#[must_use]
pub fn pid_alive(_pid: u32) -> bool {
    false
}

/// Arguments `pid` was started with, from `/proc/<pid>/cmdline`.
///
/// `None` when the platform has no procfs or the entry cannot be read.
#[cfg(target_os = "linux")]
#[must_use]
pub fn command_line(pid: u32) -> Option<Vec<String>> {
    let raw = fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    Some(
        raw.split(|b| *b == 0)
            .filter(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect(),
    )
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn command_line(_pid: u32) -> Option<Vec<String>> {
    None
}

/// Ask `pid` to terminate (SIGTERM). A process that is already gone is fine.
#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: plain kill(2) on a pid this bridge spawned.
    if unsafe { libc::kill(pid, libc::SIGTERM) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "stopping a server by pid is only supported on unix",
    ))
}
