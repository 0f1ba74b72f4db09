//! Configuration for the ENSIME bridge.
//!
//! - **`project`**: `.ensime` discovery ([`find_from`]) and loading ([`ProjectConfig`])
//! - **`sexp`**: the S-expression reader behind `.ensime` files
//! - **`settings`**: the bridge's own TOML settings ([`BridgeSettings`])

mod project;
mod settings;
pub mod sexp;

pub use project::{CONFIG_FILE_NAME, ConfigError, ProjectConfig, find_from, parse};
pub use settings::{BridgeSettings, settings_path};
pub use sexp::ConfigParseError;
