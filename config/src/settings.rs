//! Bridge settings, loaded from `<config_dir>/ensime-bridge/config.toml`.
//!
//! Every key is optional. A missing file yields the defaults; an unreadable
//! or malformed file is logged and also yields the defaults, so a bad
//! settings file never keeps the editor integration from starting.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
const DEFAULT_ENSIME_VERSION: &str = "1.0.0";
const DEFAULT_SBT_VERSION: &str = "0.13.11";

/// Environment override for [`BridgeSettings::server_v2`] (`0` or `1`).
const SERVER_V2_ENV: &str = "ENSIME_BRIDGE_SERVER_V2";

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    server_v2: Option<bool>,
    install_dir: Option<PathBuf>,
    tick_interval_ms: Option<u64>,
    ensime_version: Option<String>,
    sbt_version: Option<String>,
}

/// Resolved bridge settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Speak protocol v2 to the server (and offer debugger commands).
    pub server_v2: bool,
    /// Where per-Scala-version server classpaths are bootstrapped.
    pub install_dir: PathBuf,
    /// Host tick cadence.
    pub tick_interval_ms: u64,
    /// ENSIME server artifact version to bootstrap.
    pub ensime_version: String,
    /// sbt version pinned in the bootstrap project.
    pub sbt_version: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            server_v2: true,
            install_dir: default_install_dir(),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            ensime_version: DEFAULT_ENSIME_VERSION.to_string(),
            sbt_version: DEFAULT_SBT_VERSION.to_string(),
        }
    }
}

/// Default location of the settings file.
#[must_use]
pub fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ensime-bridge").join("config.toml"))
}

fn default_install_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("ensime-vim")
}

fn legacy_install_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("classpath_project_ensime"))
}

impl BridgeSettings {
    /// Load from [`settings_path`], then apply environment overrides.
    #[must_use]
    pub fn load() -> Self {
        let mut settings = settings_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        settings.apply_env_overrides(env::var(SERVER_V2_ENV).ok().as_deref());
        settings
    }

    /// Load from an explicit path; no environment overrides.
    #[must_use]
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read settings at {}: {err}", path.display());
                return Self::default();
            }
        };

        match Self::from_toml(&content) {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!("Failed to parse settings at {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let raw: RawSettings = toml::from_str(content)?;
        let defaults = Self::default();
        Ok(Self {
            server_v2: raw.server_v2.unwrap_or(defaults.server_v2),
            install_dir: raw.install_dir.unwrap_or(defaults.install_dir),
            tick_interval_ms: raw
                .tick_interval_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.tick_interval_ms),
            ensime_version: raw.ensime_version.unwrap_or(defaults.ensime_version),
            sbt_version: raw.sbt_version.unwrap_or(defaults.sbt_version),
        })
    }

    fn apply_env_overrides(&mut self, server_v2: Option<&str>) {
        match server_v2.map(str::trim) {
            Some("1" | "true") => self.server_v2 = true,
            Some("0" | "false") => self.server_v2 = false,
            Some(other) => tracing::warn!("Ignoring {SERVER_V2_ENV}={other}: expected 0 or 1"),
            None => {}
        }
    }

    /// Move a bootstrap directory left by older plugin versions into
    /// [`BridgeSettings::install_dir`], if the new location does not exist yet.
    pub fn migrate_legacy_install_dir(&self) {
        if let Some(legacy) = legacy_install_dir() {
            migrate_dir(&legacy, &self.install_dir);
        }
    }
}

fn migrate_dir(legacy: &Path, target: &Path) {
    if !legacy.is_dir() || target.exists() {
        return;
    }
    if let Some(parent) = target.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        tracing::warn!("Failed to create {}: {e}", parent.display());
        return;
    }
    match fs::rename(legacy, target) {
        Ok(()) => tracing::info!(
            from = %legacy.display(),
            to = %target.display(),
            "Migrated legacy install directory"
        ),
        Err(e) => tracing::warn!(
            "Failed to migrate legacy install directory {}: {e}",
            legacy.display()
        ),
    }
}
