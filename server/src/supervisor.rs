//! Per-project server supervision: install, launch or adopt, stop.

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use ensime_config::{BridgeSettings, ProjectConfig};
use ensime_types::{Editor, Notice};

use crate::install::InstallLayout;
use crate::markers;
use crate::process::{SERVER_MAIN_CLASS, ServerProcess, port_answers, running_server_pid};

#[cfg(windows)]
const JAVA_BINARY: &str = "java.exe";
#[cfg(not(windows))]
const JAVA_BINARY: &str = "java";

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("java runtime not found at {}", path.display())]
    JavaRuntimeNotFound { path: PathBuf },
    #[error("supervisor is disabled after a fatal launch error")]
    Disabled,
    #[error("server classpath unavailable: {0:#}")]
    Install(anyhow::Error),
    #[error("cannot prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn server: {0}")]
    Spawn(#[source] io::Error),
}

impl LaunchError {
    /// Errors that will not go away by retrying with the same config.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::JavaRuntimeNotFound { .. } | Self::Disabled)
    }
}

/// Owns at most one server process for one project.
#[derive(Debug)]
pub struct ProcessSupervisor {
    config: ProjectConfig,
    layout: InstallLayout,
    process: Option<ServerProcess>,
    disabled: bool,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(config: ProjectConfig, settings: &BridgeSettings) -> Self {
        let layout = InstallLayout::new(
            &settings.install_dir,
            config.scala_version(),
            &settings.ensime_version,
            &settings.sbt_version,
        );
        Self {
            config,
            layout,
            process: None,
            disabled: false,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    #[must_use]
    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.layout.is_installed()
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    #[must_use]
    pub fn process(&self) -> Option<&ServerProcess> {
        self.process.as_ref()
    }

    /// Port advertised in the project's cache dir.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        markers::read_port(self.config.cache_dir())
    }

    pub fn is_running(&mut self) -> bool {
        self.process.as_mut().is_some_and(ServerProcess::is_running)
    }

    pub async fn is_ready(&mut self) -> bool {
        match self.process.as_mut() {
            Some(process) => process.is_ready().await,
            None => false,
        }
    }

    /// A process exists, has died, and was not stopped on purpose.
    pub fn aborted(&mut self) -> bool {
        self.process.as_mut().is_some_and(ServerProcess::aborted)
    }

    /// Resolve the server classpath, reporting progress through `editor`.
    ///
    /// Failures are reported, never raised.
    pub async fn install(&self, editor: &dyn Editor) -> bool {
        let scala_version = self.config.scala_version().to_string();
        editor.notify(&Notice::InstallStarted {
            scala_version: scala_version.clone(),
        });
        match self.layout.generate_classpath().await {
            Ok(()) => {
                editor.notify(&Notice::InstallFinished { scala_version });
                true
            }
            Err(e) => {
                tracing::warn!(
                    project = %self.config.path().display(),
                    "Server installation failed: {e:#}"
                );
                editor.notify(&Notice::InstallFailed {
                    reason: format!("{e:#}"),
                });
                false
            }
        }
    }

    /// Make sure a server is running for this project.
    ///
    /// Idempotent: a running owned process is returned as is, then a server
    /// found through the pid or port markers is adopted, and only then is a
    /// new one spawned. A pid marker is trusted only while it still names a
    /// server process; a stale one is dropped.
    pub async fn launch(&mut self) -> Result<&ServerProcess, LaunchError> {
        if self.disabled {
            return Err(LaunchError::Disabled);
        }

        let reuse = self.is_running();
        let process = match self.process.take() {
            Some(process) if reuse => process,
            previous => match self.acquire().await {
                Ok(process) => process,
                Err(e) => {
                    self.process = previous;
                    return Err(e);
                }
            },
        };
        Ok(self.process.insert(process))
    }

    async fn acquire(&mut self) -> Result<ServerProcess, LaunchError> {
        let cache_dir = self.config.cache_dir();

        if let Some(pid) = running_server_pid(cache_dir).await {
            tracing::info!(pid, cache_dir = %cache_dir.display(), "Adopting running server");
            return Ok(ServerProcess::adopted(cache_dir, Some(pid)));
        }

        if let Some(port) = markers::read_port(cache_dir)
            && port_answers(port).await
        {
            tracing::info!(port, cache_dir = %cache_dir.display(), "Adopting listening server");
            return Ok(ServerProcess::adopted(cache_dir, None));
        }

        self.spawn().await
    }

    async fn spawn(&mut self) -> Result<ServerProcess, LaunchError> {
        let java = self.config.java_home().join("bin").join(JAVA_BINARY);
        if !java.is_file() {
            self.disabled = true;
            return Err(LaunchError::JavaRuntimeNotFound { path: java });
        }

        if !self.layout.is_installed() {
            self.layout
                .generate_classpath()
                .await
                .map_err(LaunchError::Install)?;
        }
        let classpath = self
            .layout
            .load_classpath(self.config.java_home(), self.config.scala_minor())
            .map_err(LaunchError::Install)?;

        let cache_dir = self.config.cache_dir();
        fs::create_dir_all(cache_dir).map_err(|source| LaunchError::Io {
            path: cache_dir.to_path_buf(),
            source,
        })?;
        let log_path = markers::log_path(cache_dir);
        let log = File::create(&log_path).map_err(|source| LaunchError::Io {
            path: log_path.clone(),
            source,
        })?;
        let log_err = log.try_clone().map_err(|source| LaunchError::Io {
            path: log_path.clone(),
            source,
        })?;

        let child = Command::new(&java)
            .arg("-cp")
            .arg(&classpath)
            .args(self.config.java_flags())
            .arg(format!("-Densime.config={}", self.config.path().display()))
            .arg(SERVER_MAIN_CLASS)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .spawn()
            .map_err(LaunchError::Spawn)?;

        if let Some(pid) = child.id() {
            if let Err(e) = markers::write_pid(cache_dir, pid) {
                tracing::warn!(pid, "Failed to write pid marker: {e}");
            }
            tracing::info!(
                pid,
                project = %self.config.path().display(),
                log = %log_path.display(),
                "Server started"
            );
        }
        Ok(ServerProcess::owned(cache_dir, child))
    }

    /// Stop an owned server; adopted servers are left running.
    pub fn stop(&mut self) {
        if let Some(process) = self.process.as_mut() {
            process.stop();
        }
    }
}
