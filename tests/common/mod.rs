//! Shared test utilities and fixtures
//!
//! Common infrastructure for integration tests.

#![allow(dead_code)]

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

use ensime_config::BridgeSettings;
use ensime_server::codec;
use ensime_types::{Editor, Notice};

/// A Scala project on disk with a `.ensime` file at its root.
pub struct TestProject {
    _tmp: tempfile::TempDir,
    pub root: PathBuf,
}

impl TestProject {
    pub fn new(name: &str) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let project = Self { _tmp: tmp, root };
        project.write_config(name);
        project
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(".ensime")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(".ensime_cache")
    }

    pub fn source_file(&self) -> PathBuf {
        let dir = self.root.join("src").join("main").join("scala");
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("Main.scala");
        fs::write(&file, "object Main extends App\n").unwrap();
        file
    }

    pub fn write_config(&self, name: &str) {
        let text = format!(
            r#"(
  :name "{name}"
  :scala-version "2.11.8"
  :java-home "{jdk}"
  :java-flags ("-Xmx2g" "-XX:+UseConcMarkSweepGC")
  :cache-dir "{cache}"
  :root-dir "{root}"
  :subprojects ((:name "core" :module-name "core") (:name "web" :module-name "web"))
)"#,
            jdk = self.root.join("jdk").display(),
            cache = self.cache_dir().display(),
            root = self.root.display(),
        );
        fs::write(self.config_path(), text).unwrap();
    }

    pub fn settings(&self, server_v2: bool) -> BridgeSettings {
        BridgeSettings {
            server_v2,
            install_dir: self.root.join("install"),
            tick_interval_ms: 10,
            ..BridgeSettings::default()
        }
    }

    /// Pretend the server classpath for 2.11.8 was bootstrapped.
    pub fn install(&self) {
        let dir = self.root.join("install").join("2.11.8");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("classpath"), "/deps/scala-library.jar").unwrap();
    }

    /// A `java` that just idles, so launches spawn a real child process whose
    /// command line still names the server main class.
    #[cfg(unix)]
    pub fn fake_java(&self) {
        use std::os::unix::fs::PermissionsExt;
        let bin = self.root.join("jdk").join("bin");
        fs::create_dir_all(&bin).unwrap();
        let java = bin.join("java");
        fs::write(&java, "#!/bin/sh\nwhile :; do sleep 1; done\n").unwrap();
        fs::set_permissions(&java, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// Editor double that records what it is told.
#[derive(Default)]
pub struct RecordingEditor {
    pub notices: Mutex<Vec<Notice>>,
    pub messages: Mutex<Vec<String>>,
    pub current: Mutex<Option<PathBuf>>,
}

impl RecordingEditor {
    pub fn with_buffer(path: &Path) -> Arc<Self> {
        let editor = Self::default();
        *editor.current.lock().unwrap() = Some(path.to_path_buf());
        Arc::new(editor)
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Editor for RecordingEditor {
    fn raw_message(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }

    fn notify(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }

    fn current_buffer_path(&self) -> Option<PathBuf> {
        self.current.lock().unwrap().clone()
    }
}

/// A minimal ENSIME server speaking either wire envelope.
///
/// Advertises its port in the cache dir, accepts websocket upgrades on any
/// path, optionally pushes `greeting` to each new connection, and echoes
/// every request back as `<Kind>` for `<Kind>Req`.
pub struct MockServer {
    accept: JoinHandle<()>,
    pub port: u16,
    paths: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    pub async fn start(cache_dir: &Path, greeting: Option<Value>) -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        fs::create_dir_all(cache_dir).unwrap();
        fs::write(cache_dir.join("http"), port.to_string()).unwrap();

        let paths: Arc<Mutex<Vec<String>>> = Arc::default();
        let seen = paths.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let greeting = greeting.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let callback = |req: &Request, mut resp: Response| {
                        seen.lock().unwrap().push(req.uri().path().to_string());
                        if let Some(value) = req.headers().get(SEC_WEBSOCKET_PROTOCOL) {
                            resp.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value.clone());
                        }
                        Ok(resp)
                    };
                    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                        return;
                    };
                    let (mut reader, mut writer) = codec::split(ws);
                    if let Some(greeting) = greeting
                        && writer.write_message(&greeting).await.is_err()
                    {
                        return;
                    }
                    while let Ok(Some(request)) = reader.read_message().await {
                        let reply = echo(&request);
                        if writer.write_message(&reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        Self {
            accept,
            port,
            paths,
        }
    }

    /// Endpoint paths clients connected to, in order.
    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

fn echo(request: &Value) -> Value {
    let (id_field, body_field) = if request.get("callId").is_some() {
        ("callId", "req")
    } else {
        ("id", "payload")
    };
    let typehint = request[body_field]["typehint"].as_str().unwrap_or("Unknown");
    let mut reply = json!({
        "payload": {
            "typehint": typehint.strip_suffix("Req").unwrap_or(typehint),
            "echo": request[body_field].clone(),
        }
    });
    reply[id_field] = request[id_field].clone();
    reply
}
