//! Bridge lifecycle against a mock server over real TCP.

use std::fs;
use std::time::Duration;

use serde_json::json;

use ensime_engine::{
    Bridge, ClientState, DEFAULT_EVENT_BUDGET, Editor, Notice, ProtocolVersion, SessionStatus,
};

use crate::common::{MockServer, RecordingEditor, TestProject};

async fn tick_until_ready(bridge: &mut Bridge) -> ClientState {
    for _ in 0..20 {
        bridge.tick().await;
        let state = bridge.current_session().await.unwrap().session().state();
        if state == ClientState::Ready {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    ClientState::Starting
}

#[tokio::test]
async fn v1_session_adopts_server_and_round_trips_a_request() {
    let project = TestProject::new("demo");
    project.install();
    let server = MockServer::start(&project.cache_dir(), None).await;
    let source = project.source_file();
    let editor = RecordingEditor::with_buffer(&source);
    let mut bridge = Bridge::new(editor.clone(), project.settings(false));

    assert_eq!(bridge.on_file_opened(&source).await, Some(ClientState::Starting));
    assert_eq!(tick_until_ready(&mut bridge).await, ClientState::Ready);

    let entry = bridge.current_session().await.unwrap();
    assert_eq!(entry.session().protocol_version(), ProtocolVersion::V1);
    assert!(entry.session_mut().debugger().is_none());

    let reply = entry
        .session_mut()
        .send_request(json!({"typehint": "TypecheckFileReq", "file": source}))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(reply["typehint"], "TypecheckFile");
    assert_eq!(reply["echo"]["file"], source.to_string_lossy().as_ref());
    assert_eq!(server.paths(), ["/jerky"]);

    assert!(
        editor
            .notices()
            .contains(&Notice::ServerStarting { project: "demo".to_string() })
    );
    bridge.shutdown().await;
}

#[tokio::test]
async fn v2_debug_events_reach_the_editor() {
    let project = TestProject::new("demo");
    project.install();
    let greeting = json!({"payload": {"typehint": "DebugBreakEvent", "threadId": 12}});
    let server = MockServer::start(&project.cache_dir(), Some(greeting)).await;
    let source = project.source_file();
    let editor = RecordingEditor::with_buffer(&source);
    let mut bridge = Bridge::new(editor.clone(), project.settings(true));

    bridge.on_file_opened(&source).await.unwrap();
    assert_eq!(tick_until_ready(&mut bridge).await, ClientState::Ready);

    let mut relayed = 0;
    for _ in 0..100 {
        relayed += bridge.poll_events(DEFAULT_EVENT_BUDGET);
        if relayed > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(relayed, 1);
    assert!(editor.notices().contains(&Notice::DebugBreak { thread_id: 12 }));

    let entry = bridge.current_session().await.unwrap();
    let mut debugger = entry.session_mut().debugger().unwrap();
    assert_eq!(debugger.active_thread(), Some(12));
    let frames = debugger.backtrace().unwrap().wait().await.unwrap();
    assert_eq!(frames["typehint"], "DebugBacktrace");
    assert_eq!(frames["echo"]["threadId"], 12);
    assert_eq!(server.paths(), ["/websocket"]);

    bridge.shutdown().await;
}

#[tokio::test]
async fn subscribed_events_reach_the_editor() {
    let project = TestProject::new("demo");
    project.install();
    let greeting = json!({"payload": {"typehint": "IndexerReadyEvent"}});
    let _server = MockServer::start(&project.cache_dir(), Some(greeting)).await;
    let source = project.source_file();
    let editor = RecordingEditor::with_buffer(&source);
    let mut bridge = Bridge::new(editor.clone(), project.settings(false));

    let sink = editor.clone();
    bridge.on_event("IndexerReadyEvent", move |_, payload| {
        sink.raw_message(payload["typehint"].as_str().unwrap_or_default());
    });

    bridge.on_file_opened(&source).await.unwrap();
    assert_eq!(tick_until_ready(&mut bridge).await, ClientState::Ready);
    for _ in 0..100 {
        if bridge.poll_events(DEFAULT_EVENT_BUDGET) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(editor.messages(), ["IndexerReadyEvent"]);

    bridge.shutdown().await;
}

#[tokio::test]
async fn statuses_follow_server_lifetime() {
    let project = TestProject::new("demo");
    project.install();
    let source = project.source_file();
    let editor = RecordingEditor::with_buffer(&source);
    let mut bridge = Bridge::new(editor.clone(), project.settings(true));

    let server = MockServer::start(&project.cache_dir(), None).await;
    bridge.on_file_opened(&source).await.unwrap();
    tick_until_ready(&mut bridge).await;
    assert_eq!(
        bridge.client_statuses().await,
        [(project.config_path(), SessionStatus::Ready)]
    );

    drop(server);
    fs::remove_file(project.cache_dir().join("http")).unwrap();
    assert_eq!(
        bridge.client_statuses().await,
        [(project.config_path(), SessionStatus::Aborted)]
    );

    bridge.tick().await;
    let aborted: Vec<_> = editor
        .notices()
        .into_iter()
        .filter(|n| matches!(n, Notice::ServerAborted { .. }))
        .collect();
    assert_eq!(aborted.len(), 1);
}

#[tokio::test]
async fn uninstalled_project_prompts_instead_of_launching() {
    let project = TestProject::new("demo");
    let source = project.source_file();
    let editor = RecordingEditor::with_buffer(&source);
    let mut bridge = Bridge::new(editor.clone(), project.settings(true));

    assert_eq!(bridge.on_file_opened(&source).await, Some(ClientState::Stopped));
    bridge.tick().await;
    bridge.tick().await;

    let prompts = editor
        .notices()
        .iter()
        .filter(|n| matches!(n, Notice::InstallPrompt { .. }))
        .count();
    assert_eq!(prompts, 1);
    assert_eq!(
        bridge.client_statuses().await,
        [(project.config_path(), SessionStatus::Unloaded)]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn stale_pid_marker_does_not_block_a_launch() {
    use ensime_server::markers;

    let project = TestProject::new("demo");
    project.install();
    project.fake_java();
    let source = project.source_file();
    fs::create_dir_all(project.cache_dir()).unwrap();
    // Left by a crashed server; the pid now belongs to this test process.
    let reused = std::process::id();
    markers::write_pid(&project.cache_dir(), reused).unwrap();

    let editor = RecordingEditor::with_buffer(&source);
    let mut bridge = Bridge::new(editor.clone(), project.settings(true));
    assert_eq!(bridge.on_file_opened(&source).await, Some(ClientState::Starting));

    let pid = markers::read_pid(&project.cache_dir()).unwrap();
    assert_ne!(pid, reused);
    let entry = bridge.current_session().await.unwrap();
    assert!(entry.supervisor().process().unwrap().is_owned());

    bridge.shutdown().await;
    assert_eq!(markers::read_pid(&project.cache_dir()), None);
}

#[cfg(unix)]
#[tokio::test]
async fn owned_server_is_stopped_on_shutdown_but_not_on_detach() {
    use ensime_server::markers;

    let project = TestProject::new("demo");
    project.install();
    project.fake_java();
    let source = project.source_file();
    let editor = RecordingEditor::with_buffer(&source);

    let mut bridge = Bridge::new(editor.clone(), project.settings(true));
    assert_eq!(bridge.on_file_opened(&source).await, Some(ClientState::Starting));
    let pid = markers::read_pid(&project.cache_dir()).unwrap();
    assert!(markers::pid_alive(pid));

    // A detached host leaves the server for the next one to adopt once it
    // advertises its port.
    bridge.detach().await;
    assert!(markers::pid_alive(pid));
    let _server = MockServer::start(&project.cache_dir(), None).await;

    let mut next = Bridge::new(editor.clone(), project.settings(true));
    next.on_file_opened(&source).await.unwrap();
    assert_eq!(tick_until_ready(&mut next).await, ClientState::Ready);
    assert_eq!(markers::read_pid(&project.cache_dir()), Some(pid));
    next.shutdown().await;
    // Adopted, so still running.
    assert!(markers::pid_alive(pid));

    // The owner stops it and clears the marker.
    bridge.shutdown().await;
    assert_eq!(markers::read_pid(&project.cache_dir()), None);
}
