//! The `ensime-bridge` binary, run as a subprocess.

use std::fs;
use std::path::Path;
use std::process::{self, Command, Output};

use serde_json::Value;

use crate::common::TestProject;

fn run(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ensime-bridge"))
        .args(args)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("RUST_LOG", "debug")
        .current_dir(home)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[test]
fn find_prints_governing_config() {
    let project = TestProject::new("demo");
    let source = project.source_file();

    let output = run(&project.root, &["find", source.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), project.config_path().display().to_string());
}

#[test]
fn find_outside_project_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(dir.path(), &["find", dir.path().join("A.scala").to_str().unwrap()]);
    assert!(!output.status.success());
}

#[test]
fn parse_prints_config_as_json() {
    let project = TestProject::new("demo");
    let output = run(
        &project.root,
        &["parse", project.config_path().to_str().unwrap()],
    );
    assert!(output.status.success());

    let parsed: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(parsed["name"], "demo");
    assert_eq!(parsed["scala-version"], "2.11.8");
    assert_eq!(parsed["subprojects"][1]["name"], "web");
}

#[test]
fn status_reports_markers() {
    let project = TestProject::new("demo");
    project.install();
    let source = project.source_file();

    let settings = project.root.join("settings.toml");
    fs::write(
        &settings,
        format!(
            "install_dir = \"{}\"\n",
            project.root.join("install").display()
        ),
    )
    .unwrap();

    let output = run(
        &project.root,
        &[
            "status",
            "--settings",
            settings.to_str().unwrap(),
            source.to_str().unwrap(),
        ],
    );
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("project:   demo"), "{text}");
    assert!(text.contains("installed: yes"), "{text}");
    assert!(text.contains("pid:       none"), "{text}");
    assert!(text.contains("port:      none"), "{text}");
}

#[test]
fn stop_without_server_fails() {
    let project = TestProject::new("demo");
    let source = project.source_file();
    let output = run(&project.root, &["stop", source.to_str().unwrap()]);
    assert!(!output.status.success());
}

#[test]
fn stop_leaves_a_reused_pid_alone() {
    let project = TestProject::new("demo");
    let source = project.source_file();
    fs::create_dir_all(project.cache_dir()).unwrap();
    // This test process is alive but is not a server.
    let marker = project.cache_dir().join("server.pid");
    fs::write(&marker, process::id().to_string()).unwrap();

    let output = run(&project.root, &["stop", source.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(!marker.exists());
}

#[test]
fn debug_without_a_server_fails_cleanly() {
    let project = TestProject::new("demo");
    let source = project.source_file();
    let settings = project.root.join("settings.toml");
    fs::write(
        &settings,
        format!(
            "server_v2 = true\ntick_interval_ms = 1\ninstall_dir = \"{}\"\n",
            project.root.join("install").display()
        ),
    )
    .unwrap();

    let output = run(
        &project.root,
        &[
            "debug",
            "--settings",
            settings.to_str().unwrap(),
            source.to_str().unwrap(),
            "break",
            source.to_str().unwrap(),
            "3",
        ],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("is not ready"), "{stderr}");
}
