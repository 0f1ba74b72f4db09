//! The bridge: editor-facing entry points over the session registry.
//!
//! The host owns one [`Bridge`] and calls it from its event loop: on file
//! open, on buffer enter, on its periodic tick, and to drain server events.
//! Nothing here is global; the "current project" is looked up from the
//! editor's active buffer each time it is needed.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde_json::Value;
use tokio::sync::mpsc::error::TryRecvError;

use ensime_config::{BridgeSettings, ConfigError, ProjectConfig, find_from};
use ensime_types::{ClientState, Editor, Notice, SessionStatus};

use crate::events::{EventReceiver, EventSubscriptions, ServerEvent, event_queue};
use crate::registry::{ProjectEntry, SessionRegistry};

/// Server events handled per `poll_events` call by default.
pub const DEFAULT_EVENT_BUDGET: usize = 64;

type EventCallback = Box<dyn Fn(&Path, &Value) + Send + Sync>;

pub struct Bridge {
    editor: Arc<dyn Editor>,
    settings: BridgeSettings,
    registry: SessionRegistry,
    events: EventReceiver,
    subscriptions: EventSubscriptions,
    callbacks: HashMap<String, EventCallback>,
    /// Config files already reported as broken, by modification time.
    reported_config_errors: HashSet<(PathBuf, Option<SystemTime>)>,
}

impl Bridge {
    #[must_use]
    pub fn new(editor: Arc<dyn Editor>, settings: BridgeSettings) -> Self {
        let (tx, events) = event_queue();
        let subscriptions = EventSubscriptions::default();
        Self {
            editor,
            registry: SessionRegistry::new(settings.clone(), tx, subscriptions.clone()),
            settings,
            events,
            subscriptions,
            callbacks: HashMap::new(),
            reported_config_errors: HashSet::new(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Call `handler` from [`Bridge::poll_events`] for every server event of
    /// `kind` (its `typehint`), with the project's config path and the event
    /// payload. Replaces any earlier handler for the kind.
    ///
    /// Debugger events are consumed by v2 sessions and surface as notices
    /// and raw messages instead.
    pub fn on_event(
        &mut self,
        kind: impl Into<String>,
        handler: impl Fn(&Path, &Value) + Send + Sync + 'static,
    ) -> &mut Self {
        let kind = kind.into();
        self.subscriptions.subscribe(kind.clone());
        self.callbacks.insert(kind, Box::new(handler));
        self
    }

    /// Find and load the project config governing `file`.
    ///
    /// A broken config is reported once per file version and yields `None`.
    pub fn project_config_for(&mut self, file: &Path) -> Option<ProjectConfig> {
        let config_path = find_from(file)?;
        match ProjectConfig::load(&config_path) {
            Ok(config) => Some(config),
            Err(err) => {
                self.report_config_error(&err);
                None
            }
        }
    }

    fn report_config_error(&mut self, err: &ConfigError) {
        let path = err.path().to_path_buf();
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
        if !self.reported_config_errors.insert((path.clone(), modified)) {
            return;
        }
        tracing::warn!("{err}");
        let reason = match err {
            ConfigError::Parse { source, .. } => source.to_string(),
            ConfigError::Io { source, .. } => source.to_string(),
            ConfigError::Invalid { message, .. } => message.clone(),
        };
        self.editor.notify(&Notice::ConfigInvalid { path, reason });
    }

    /// A file was opened: start its project's server.
    pub async fn on_file_opened(&mut self, file: &Path) -> Option<ClientState> {
        let config = self.project_config_for(file)?;
        let editor = self.editor.clone();
        let entry = self.registry.get_or_create(config).await;
        entry.start_server(editor.as_ref()).await;
        Some(entry.session().state())
    }

    /// A buffer became active: make sure its project has a session.
    pub async fn on_buffer_entered(&mut self, file: &Path) -> Option<PathBuf> {
        let config = self.project_config_for(file)?;
        let entry = self.registry.get_or_create(config).await;
        Some(entry.session().config().path().to_path_buf())
    }

    /// The project entry for the editor's active buffer, if it is in a project.
    pub async fn current_session(&mut self) -> Option<&mut ProjectEntry> {
        let file = self.editor.current_buffer_path()?;
        let config = self.project_config_for(&file)?;
        Some(self.registry.get_or_create(config).await)
    }

    /// Watchdog step for every known project.
    pub async fn tick(&mut self) {
        let editor = self.editor.clone();
        for (_, entry) in self.registry.iter_mut() {
            entry.tick(editor.as_ref()).await;
        }
    }

    /// Relay up to `budget` queued server events to the editor.
    ///
    /// Non-blocking; returns how many were handled.
    pub fn poll_events(&mut self, budget: usize) -> usize {
        let mut count = 0;
        while count < budget {
            match self.events.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    count += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        count
    }

    fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::DebugOutput { body, .. } => self.editor.raw_message(&body),
            ServerEvent::DebugBreak { project, thread_id } => {
                tracing::debug!(project = %project.display(), thread_id, "Debugger break");
                self.editor.notify(&Notice::DebugBreak { thread_id });
            }
            ServerEvent::Other {
                project,
                kind,
                payload,
            } => match self.callbacks.get(&kind) {
                Some(handler) => handler(&project, &payload),
                None => tracing::debug!(kind = %kind, "No handler for server event"),
            },
        }
    }

    /// Status of every known project, in path order.
    pub async fn client_statuses(&mut self) -> Vec<(PathBuf, SessionStatus)> {
        let mut statuses = Vec::with_capacity(self.registry.len());
        for (path, entry) in self.registry.iter_mut() {
            statuses.push((path.to_path_buf(), entry.status().await));
        }
        statuses
    }

    /// Report every project's status through the editor.
    pub async fn report_statuses(&mut self) {
        for (path, status) in self.client_statuses().await {
            self.editor.raw_message(&format!("{}: {status}", path.display()));
        }
    }

    /// Install the server for the active buffer's project.
    pub async fn install_current(&mut self) -> bool {
        let editor = self.editor.clone();
        match self.current_session().await {
            Some(entry) => entry.supervisor().install(editor.as_ref()).await,
            None => {
                tracing::debug!("Install requested outside a project");
                false
            }
        }
    }

    /// Close every session but leave the servers running for the next host.
    pub async fn detach(&mut self) {
        for (_, entry) in self.registry.iter_mut() {
            entry.session_mut().teardown().await;
        }
    }

    /// Tear down every session and stop every owned server.
    pub async fn shutdown(&mut self) {
        self.registry.teardown_all().await;
    }
}
