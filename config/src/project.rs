//! `.ensime` project configuration: discovery and loading.

use std::fs;
use std::io;
use std::path::{self, Path, PathBuf};
use std::time::SystemTime;

use serde::Deserialize;
use serde_json::Value;

use crate::sexp::{self, ConfigParseError};

/// Well-known project config file name.
pub const CONFIG_FILE_NAME: &str = ".ensime";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ConfigParseError,
    },
    #[error("invalid project config {}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. } | Self::Parse { path, .. } | Self::Invalid { path, .. } => path,
        }
    }
}

/// Walk upward from the directory containing `file_path` looking for
/// [`CONFIG_FILE_NAME`].
///
/// Returns the nearest match, or `None` once the filesystem root has been
/// checked. A directory argument is searched from itself.
#[must_use]
pub fn find_from(file_path: &Path) -> Option<PathBuf> {
    let absolute = path::absolute(file_path).unwrap_or_else(|_| file_path.to_path_buf());
    let start = if absolute.is_dir() {
        absolute.as_path()
    } else {
        absolute.parent()?
    };

    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

/// Read and parse the project config at `config_path`.
pub fn parse(config_path: &Path) -> Result<ProjectConfig, ConfigError> {
    ProjectConfig::load(config_path)
}

#[derive(Deserialize)]
struct RawProjectConfig {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "scala-version")]
    scala_version: String,
    #[serde(rename = "java-home")]
    java_home: PathBuf,
    #[serde(rename = "java-flags", default)]
    java_flags: Option<Vec<String>>,
    #[serde(rename = "cache-dir")]
    cache_dir: PathBuf,
}

/// One loaded `.ensime` file.
///
/// Identity is the canonical path of the file: two configs describe the same
/// project iff [`ProjectConfig::path`] is equal. Instances are immutable; a
/// changed file is loaded into a new instance (compare [`ProjectConfig::modified`]).
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    path: PathBuf,
    name: String,
    scala_version: String,
    java_home: PathBuf,
    java_flags: Vec<String>,
    cache_dir: PathBuf,
    raw: Value,
    modified: Option<SystemTime>,
}

impl ProjectConfig {
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let path = fs::canonicalize(config_path).map_err(|source| ConfigError::Io {
            path: config_path.to_path_buf(),
            source,
        })?;
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();

        Self::from_str_at(&text, path, modified)
    }

    /// Build a config from already-read text; `path` is taken as canonical.
    pub fn from_str_at(
        text: &str,
        path: PathBuf,
        modified: Option<SystemTime>,
    ) -> Result<Self, ConfigError> {
        let map = sexp::parse_document(text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        let raw = Value::Object(map);

        let parsed: RawProjectConfig =
            serde_json::from_value(raw.clone()).map_err(|e| ConfigError::Invalid {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if parsed.scala_version.trim().is_empty() {
            return Err(ConfigError::Invalid {
                path,
                message: "scala-version must not be empty".to_string(),
            });
        }

        let name = parsed.name.unwrap_or_else(|| {
            path.parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_string())
        });

        Ok(Self {
            path,
            name,
            scala_version: parsed.scala_version,
            java_home: parsed.java_home,
            java_flags: parsed
                .java_flags
                .unwrap_or_default()
                .into_iter()
                .filter(|flag| !flag.is_empty())
                .collect(),
            cache_dir: parsed.cache_dir,
            raw,
            modified,
        })
    }

    /// Canonical path of the `.ensime` file (the project identity).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn scala_version(&self) -> &str {
        &self.scala_version
    }

    /// Major.minor prefix of the Scala version (`"2.11.8"` -> `"2.11"`).
    #[must_use]
    pub fn scala_minor(&self) -> &str {
        let mut dots = self.scala_version.match_indices('.').map(|(i, _)| i);
        match (dots.next(), dots.next()) {
            (Some(_), Some(second)) => &self.scala_version[..second],
            _ => &self.scala_version,
        }
    }

    #[must_use]
    pub fn java_home(&self) -> &Path {
        &self.java_home
    }

    /// Non-empty runtime flags, in file order.
    #[must_use]
    pub fn java_flags(&self) -> &[String] {
        &self.java_flags
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Modification time of the file when it was loaded.
    #[must_use]
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Any key from the file, as parsed.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    /// The whole parsed mapping.
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Whether this config was loaded from the same file version as `other`.
    #[must_use]
    pub fn is_same_version(&self, other: &Self) -> bool {
        self.path == other.path && self.modified == other.modified
    }
}
