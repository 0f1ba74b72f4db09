//! Project config discovery and bridge settings, end to end on disk.

use std::fs;
use std::path::Path;

use ensime_config::{BridgeSettings, ConfigError, find_from, parse};

use crate::common::TestProject;

#[test]
fn nested_source_file_finds_project_root_config() {
    let project = TestProject::new("demo");
    let source = project.source_file();

    assert_eq!(find_from(&source), Some(project.config_path()));
    assert_eq!(find_from(&project.root), Some(project.config_path()));
}

#[test]
fn nearest_config_wins_for_nested_projects() {
    let outer = TestProject::new("outer");
    let inner_root = outer.root.join("modules").join("inner");
    fs::create_dir_all(&inner_root).unwrap();
    fs::write(
        inner_root.join(".ensime"),
        r#"(:name "inner" :scala-version "2.12.1" :java-home "/jdk" :cache-dir "/tmp/inner")"#,
    )
    .unwrap();

    let found = find_from(&inner_root.join("A.scala")).unwrap();
    assert_eq!(found, inner_root.join(".ensime"));
    assert_eq!(parse(&found).unwrap().name(), "inner");
}

#[test]
fn full_config_parses_with_nested_records() {
    let project = TestProject::new("demo");
    let config = parse(&project.config_path()).unwrap();

    assert_eq!(config.name(), "demo");
    assert_eq!(config.scala_version(), "2.11.8");
    assert_eq!(config.scala_minor(), "2.11");
    assert_eq!(config.java_home(), project.root.join("jdk"));
    assert_eq!(config.java_flags(), ["-Xmx2g", "-XX:+UseConcMarkSweepGC"]);
    assert_eq!(config.cache_dir(), project.cache_dir());

    let subprojects = config.get("subprojects").unwrap().as_array().unwrap();
    let names: Vec<_> = subprojects.iter().map(|s| s["name"].clone()).collect();
    assert_eq!(names, ["core", "web"]);
    assert_eq!(subprojects[1]["module-name"], "web");
}

#[test]
fn missing_required_key_is_invalid() {
    let project = TestProject::new("demo");
    fs::write(project.config_path(), r#"(:name "demo" :java-home "/jdk")"#).unwrap();

    let err = parse(&project.config_path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }), "{err}");
    assert_eq!(err.path(), project.config_path());
}

#[test]
fn missing_file_is_io_error() {
    let err = parse(Path::new("/nonexistent/project/.ensime")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn settings_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        "server_v2 = false\ninstall_dir = \"/opt/ensime\"\ntick_interval_ms = 250\n",
    )
    .unwrap();

    let settings = BridgeSettings::load_from(&path);
    assert!(!settings.server_v2);
    assert_eq!(settings.install_dir, Path::new("/opt/ensime"));
    assert_eq!(settings.tick_interval_ms, 250);
    assert_eq!(settings.sbt_version, BridgeSettings::default().sbt_version);
}

#[test]
fn malformed_settings_fall_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "server_v2 = \"maybe\"").unwrap();

    assert_eq!(BridgeSettings::load_from(&path), BridgeSettings::default());
}
