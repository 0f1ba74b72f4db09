//! Per-project client state machine.
//!
//! A [`Session`] owns the channel to its project's server and drives it
//! through `Stopped -> Starting -> Ready`, falling back to `Starting` or
//! `Stopped` when the connection drops and to `Aborted` when the server dies
//! on its own. The host calls [`Session::tick`] on its idle cadence; ticking
//! is the only place connection attempts are made.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use ensime_config::ProjectConfig;
use ensime_server::{
    ChannelError, EventHandlers, LaunchError, ProcessSupervisor, ResponseHandle, SessionChannel,
    WireProtocol,
};
use ensime_types::{ClientState, Editor, MAX_CONNECTION_ATTEMPTS, Notice, ProtocolVersion};

use crate::debugger::{self, Debugger, SharedDebugState};
use crate::events::{EventSender, EventSubscriptions, ServerEvent};

/// How long teardown waits for in-flight requests before dropping them.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not connected to the ENSIME server for {project}")]
    NotConnected { project: String },
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

pub struct Session {
    config: ProjectConfig,
    state: ClientState,
    connection_attempts: u32,
    channel: Option<SessionChannel>,
    protocol: Arc<dyn WireProtocol>,
    events: EventSender,
    subscriptions: EventSubscriptions,
    debug_state: SharedDebugState,
    reported_abort: bool,
    reported_give_up: bool,
    reported_install_prompt: bool,
}

impl Session {
    #[must_use]
    pub fn new(
        config: ProjectConfig,
        protocol: Arc<dyn WireProtocol>,
        events: EventSender,
        subscriptions: EventSubscriptions,
    ) -> Self {
        Self {
            config,
            state: ClientState::Stopped,
            connection_attempts: 0,
            channel: None,
            protocol,
            events,
            subscriptions,
            debug_state: SharedDebugState::default(),
            reported_abort: false,
            reported_give_up: false,
            reported_install_prompt: false,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    #[must_use]
    pub fn connection_attempts(&self) -> u32 {
        self.connection_attempts
    }

    #[must_use]
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol.version()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(|channel| !channel.is_closed())
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.channel.as_ref().map_or(0, SessionChannel::pending_count)
    }

    /// One watchdog step.
    ///
    /// Observes process and connection health, then, while disconnected and
    /// under the attempt ceiling, (re)starts the server if needed and tries to
    /// connect. Every attempt counts; a successful one resets the counter.
    pub async fn tick(
        &mut self,
        supervisor: &mut ProcessSupervisor,
        editor: &dyn Editor,
    ) -> ClientState {
        self.observe(supervisor, editor);

        if self.is_connected() {
            return self.state;
        }

        if self.connection_attempts >= MAX_CONNECTION_ATTEMPTS {
            if !self.reported_give_up {
                self.reported_give_up = true;
                tracing::warn!(
                    project = %self.config.path().display(),
                    attempts = self.connection_attempts,
                    "Giving up on server connection"
                );
                editor.notify(&Notice::ConnectionGaveUp {
                    project: self.config.name().to_string(),
                    attempts: self.connection_attempts,
                });
            }
            return self.state;
        }

        if !supervisor.is_running() {
            self.start_server(supervisor, editor).await;
        } else if self.state == ClientState::Stopped {
            // Left running by an earlier session or another host.
            self.state = ClientState::Starting;
        }
        self.connection_attempts += 1;
        if self.connect(supervisor).await {
            self.connection_attempts = 0;
        }
        self.state
    }

    /// Launch (or adopt) the server, prompting for installation first if the
    /// server classpath is missing.
    pub async fn start_server(&mut self, supervisor: &mut ProcessSupervisor, editor: &dyn Editor) {
        if supervisor.is_disabled() {
            return;
        }

        if !supervisor.is_installed() {
            if !self.reported_install_prompt {
                self.reported_install_prompt = true;
                editor.notify(&Notice::InstallPrompt {
                    scala_version: self.config.scala_version().to_string(),
                });
            }
            return;
        }

        match supervisor.launch().await {
            Ok(process) => {
                tracing::info!(
                    project = %self.config.path().display(),
                    pid = ?process.pid(),
                    owned = process.is_owned(),
                    "Server launched"
                );
                self.state = ClientState::Starting;
                editor.notify(&Notice::ServerStarting {
                    project: self.config.name().to_string(),
                });
            }
            Err(LaunchError::JavaRuntimeNotFound { path }) => {
                tracing::error!(path = %path.display(), "Java runtime not found; supervisor disabled");
                editor.notify(&Notice::InvalidJava { path });
            }
            Err(e) => {
                tracing::warn!(
                    project = %self.config.path().display(),
                    "Failed to launch server: {e}"
                );
            }
        }
    }

    /// Open the channel if the server is ready. Returns whether it is open.
    pub async fn connect(&mut self, supervisor: &mut ProcessSupervisor) -> bool {
        if self.is_connected() {
            return true;
        }
        if !supervisor.is_ready().await {
            return false;
        }
        let Some(port) = supervisor.port() else {
            return false;
        };

        match SessionChannel::connect(port, self.protocol.clone(), self.event_handlers()).await {
            Ok(channel) => {
                tracing::info!(
                    project = %self.config.path().display(),
                    port,
                    protocol = %self.protocol.version(),
                    "Session ready"
                );
                self.channel = Some(channel);
                self.state = ClientState::Ready;
                self.reported_abort = false;
                self.reported_give_up = false;
                true
            }
            Err(e) => {
                tracing::debug!(port, "Connection attempt failed: {e}");
                false
            }
        }
    }

    /// Handlers for a new channel: subscribed kinds are queued for the host,
    /// debugger events feed the debugger on v2.
    fn event_handlers(&self) -> EventHandlers {
        let mut handlers = EventHandlers::new();

        let project = self.config.path().to_path_buf();
        let subscriptions = self.subscriptions.clone();
        let events = self.events.clone();
        handlers.otherwise(move |kind, payload| {
            if !subscriptions.contains(kind) {
                tracing::debug!(kind, "Discarding server event nobody subscribed to");
                return;
            }
            let _ = events.send(ServerEvent::Other {
                project: project.clone(),
                kind: kind.to_string(),
                payload: payload.clone(),
            });
        });

        if self.protocol.supports_debugger() {
            debugger::register_handlers(
                &mut handlers,
                self.config.path(),
                self.debug_state.clone(),
                self.events.clone(),
            );
        }
        handlers
    }

    /// Apply what the process and the channel report since the last tick.
    fn observe(&mut self, supervisor: &mut ProcessSupervisor, editor: &dyn Editor) {
        if self.state.is_live() && supervisor.aborted() {
            self.state = ClientState::Aborted;
            self.channel = None;
            debugger::reset(&self.debug_state);
            if !self.reported_abort {
                self.reported_abort = true;
                tracing::warn!(project = %self.config.path().display(), "Server aborted");
                editor.notify(&Notice::ServerAborted {
                    project: self.config.name().to_string(),
                    log: supervisor.process().map(|p| p.log_path().to_path_buf()),
                });
            }
            return;
        }

        if self.channel.as_ref().is_some_and(SessionChannel::is_closed) {
            self.channel = None;
            debugger::reset(&self.debug_state);
            self.state = if supervisor.is_running() {
                ClientState::Starting
            } else {
                ClientState::Stopped
            };
            tracing::warn!(
                project = %self.config.path().display(),
                state = %self.state,
                "Lost connection to server"
            );
        }
    }

    /// Send a request on the open channel.
    pub fn send_request(&mut self, payload: Value) -> Result<ResponseHandle, SessionError> {
        match self.channel.as_mut() {
            Some(channel) => Ok(channel.send_request(payload)?),
            None => Err(SessionError::NotConnected {
                project: self.config.name().to_string(),
            }),
        }
    }

    /// Debugger commands; only on connected protocol v2 sessions.
    pub fn debugger(&mut self) -> Option<Debugger<'_>> {
        if !self.protocol.supports_debugger() {
            return None;
        }
        let channel = self.channel.as_mut().filter(|channel| !channel.is_closed())?;
        Some(Debugger::new(channel, &self.debug_state))
    }

    /// Close the channel (draining in-flight requests) and return to `Stopped`.
    pub async fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            tracing::info!(
                project = %self.config.path().display(),
                pending = channel.pending_count(),
                "Closing session"
            );
            channel.close(DRAIN_TIMEOUT).await;
        }
        debugger::reset(&self.debug_state);
        self.state = ClientState::Stopped;
        self.connection_attempts = 0;
        self.reported_abort = false;
        self.reported_give_up = false;
        self.reported_install_prompt = false;
    }
}
