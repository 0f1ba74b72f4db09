//! One session and one supervisor per project, keyed by canonical config path.
//!
//! Removal from the map is the teardown: an entry that is no longer in the
//! registry has had its channel closed and its server stopped.

use std::collections::BTreeMap;
use std::mem;
use std::path::{Path, PathBuf};

use ensime_config::{BridgeSettings, ProjectConfig};
use ensime_server::{ProcessSupervisor, protocol_for};
use ensime_types::{ClientState, Editor, ProtocolVersion, SessionStatus};

use crate::events::{EventSender, EventSubscriptions};
use crate::session::Session;

/// A project's session together with the supervisor of its server.
pub struct ProjectEntry {
    session: Session,
    supervisor: ProcessSupervisor,
}

impl ProjectEntry {
    fn new(
        config: ProjectConfig,
        settings: &BridgeSettings,
        events: EventSender,
        subscriptions: EventSubscriptions,
    ) -> Self {
        let version = ProtocolVersion::from_server_v2(settings.server_v2);
        let supervisor = ProcessSupervisor::new(config.clone(), settings);
        Self {
            session: Session::new(config, protocol_for(version), events, subscriptions),
            supervisor,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    #[must_use]
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut ProcessSupervisor {
        &mut self.supervisor
    }

    pub async fn tick(&mut self, editor: &dyn Editor) -> ClientState {
        self.session.tick(&mut self.supervisor, editor).await
    }

    pub async fn start_server(&mut self, editor: &dyn Editor) {
        self.session.start_server(&mut self.supervisor, editor).await;
    }

    /// Status derived from the server process, for the project listing.
    pub async fn status(&mut self) -> SessionStatus {
        if self.supervisor.process().is_none() {
            SessionStatus::Unloaded
        } else if self.supervisor.is_ready().await {
            SessionStatus::Ready
        } else if self.supervisor.is_running() {
            SessionStatus::Startup
        } else if self.supervisor.aborted() {
            SessionStatus::Aborted
        } else {
            SessionStatus::Stopped
        }
    }

    /// Drain and close the session, then stop the server if this bridge owns it.
    pub async fn teardown(&mut self) {
        self.session.teardown().await;
        self.supervisor.stop();
    }
}

pub struct SessionRegistry {
    entries: BTreeMap<PathBuf, ProjectEntry>,
    settings: BridgeSettings,
    events: EventSender,
    subscriptions: EventSubscriptions,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(
        settings: BridgeSettings,
        events: EventSender,
        subscriptions: EventSubscriptions,
    ) -> Self {
        Self {
            entries: BTreeMap::new(),
            settings,
            events,
            subscriptions,
        }
    }

    /// The entry for `config`'s project, created on first use.
    ///
    /// If the stored session was built from an older version of the config
    /// file, it is torn down and replaced.
    pub async fn get_or_create(&mut self, config: ProjectConfig) -> &mut ProjectEntry {
        let key = config.path().to_path_buf();

        let stale = self
            .entries
            .get(&key)
            .is_some_and(|entry| !entry.session.config().is_same_version(&config));
        if stale && let Some(mut old) = self.entries.remove(&key) {
            tracing::info!(project = %key.display(), "Config changed, recreating session");
            old.teardown().await;
        }

        let settings = &self.settings;
        let events = &self.events;
        let subscriptions = &self.subscriptions;
        self.entries.entry(key).or_insert_with(|| {
            tracing::info!(
                project = %config.path().display(),
                server_v2 = settings.server_v2,
                "Creating session"
            );
            ProjectEntry::new(config, settings, events.clone(), subscriptions.clone())
        })
    }

    #[must_use]
    pub fn get(&self, config_path: &Path) -> Option<&ProjectEntry> {
        self.entries.get(config_path)
    }

    pub fn get_mut(&mut self, config_path: &Path) -> Option<&mut ProjectEntry> {
        self.entries.get_mut(config_path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.keys().map(PathBuf::as_path)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Path, &mut ProjectEntry)> {
        self.entries
            .iter_mut()
            .map(|(path, entry)| (path.as_path(), entry))
    }

    /// Tear down every project. Safe to call more than once.
    pub async fn teardown_all(&mut self) {
        let entries = mem::take(&mut self.entries);
        for (path, mut entry) in entries {
            tracing::info!(project = %path.display(), "Tearing down session");
            entry.teardown().await;
        }
    }
}
