//! Fixtures shared by engine unit tests.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

use ensime_config::{BridgeSettings, CONFIG_FILE_NAME, ProjectConfig};
use ensime_server::ProcessSupervisor;
use ensime_server::codec::{self, MessageReader, MessageWriter};
use ensime_types::{Editor, Notice};

/// Editor that records everything it is told.
#[derive(Default)]
pub(crate) struct Recorder {
    notices: Mutex<Vec<Notice>>,
    messages: Mutex<Vec<String>>,
    current: Mutex<Option<PathBuf>>,
}

impl Recorder {
    pub(crate) fn count(&self, pred: impl Fn(&Notice) -> bool) -> usize {
        self.notices.lock().unwrap().iter().filter(|n| pred(n)).count()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub(crate) fn set_current(&self, path: Option<PathBuf>) {
        *self.current.lock().unwrap() = path;
    }
}

impl Editor for Recorder {
    fn raw_message(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }

    fn notify(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
        self.raw_message(&notice.to_string());
    }

    fn current_buffer_path(&self) -> Option<PathBuf> {
        self.current.lock().unwrap().clone()
    }
}

/// A project directory with an `.ensime` file. `java-home` points at a
/// directory without a runtime, so nothing is ever spawned.
pub(crate) struct Project {
    _tmp: tempfile::TempDir,
    root: PathBuf,
}

impl Project {
    pub(crate) fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let project = Self { _tmp: tmp, root };
        project.write_config("demo");
        project
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub(crate) fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub(crate) fn write_config(&self, name: &str) {
        let text = format!(
            r#"(:name "{name}" :scala-version "2.11.8" :java-home "{}" :cache-dir "{}")"#,
            self.root.join("jdk").display(),
            self.cache_dir().display()
        );
        fs::write(self.config_path(), text).unwrap();
    }

    pub(crate) fn settings(&self) -> BridgeSettings {
        BridgeSettings {
            install_dir: self.root.join("install"),
            ..BridgeSettings::default()
        }
    }

    pub(crate) fn install(&self) {
        let dir = self.settings().install_dir.join("2.11.8");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("classpath"), "/deps/ensime.jar").unwrap();
    }

    pub(crate) fn config(&self) -> ProjectConfig {
        ProjectConfig::load(&self.config_path()).unwrap()
    }

    pub(crate) fn supervisor(&self) -> ProcessSupervisor {
        ProcessSupervisor::new(self.config(), &self.settings())
    }
}

/// A stand-in server: listens on a local port, advertises it in the cache
/// dir's `http` marker, pushes an optional greeting to each new connection,
/// and answers every request except `NeverAnsweredReq`.
pub(crate) struct FakeServer {
    accept: JoinHandle<()>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
    requests: Arc<AtomicUsize>,
}

impl FakeServer {
    pub(crate) async fn start(cache_dir: &Path) -> Self {
        Self::with_greeting(cache_dir, None).await
    }

    pub(crate) async fn with_greeting(cache_dir: &Path, greeting: Option<Value>) -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        fs::create_dir_all(cache_dir).unwrap();
        fs::write(cache_dir.join("http"), port.to_string()).unwrap();

        let connections: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::default();
        let requests: Arc<AtomicUsize> = Arc::default();
        let tracked = connections.clone();
        let counter = requests.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let counter = counter.clone();
                let greeting = greeting.clone();
                let handle = tokio::spawn(async move {
                    let Some((mut reader, mut writer)) = accept_ws(stream).await else {
                        return;
                    };
                    if let Some(greeting) = greeting
                        && writer.write_message(&greeting).await.is_err()
                    {
                        return;
                    }
                    while let Ok(Some(request)) = reader.read_message().await {
                        counter.fetch_add(1, Ordering::SeqCst);
                        if let Some(reply) = reply_to(&request)
                            && writer.write_message(&reply).await.is_err()
                        {
                            break;
                        }
                    }
                });
                tracked.lock().unwrap().push(handle);
            }
        });

        Self {
            accept,
            connections,
            requests,
        }
    }

    /// Wait until `n` requests have arrived over all connections.
    pub(crate) async fn wait_for_requests(&self, n: usize) {
        for _ in 0..500 {
            if self.requests.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("fake server saw fewer than {n} requests");
    }

    /// Close every open connection; keep accepting new ones.
    pub(crate) fn drop_connections(&self) {
        for handle in self.connections.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.accept.abort();
        self.drop_connections();
    }
}

/// Complete the websocket upgrade, agreeing to whatever subprotocol the
/// client asks for.
pub(crate) async fn accept_ws(
    stream: TcpStream,
) -> Option<(MessageReader<TcpStream>, MessageWriter<TcpStream>)> {
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, mut resp: Response| {
        if let Some(value) = req.headers().get(SEC_WEBSOCKET_PROTOCOL) {
            resp.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value.clone());
        }
        Ok(resp)
    })
    .await
    .ok()?;
    Some(codec::split(ws))
}

fn reply_to(request: &Value) -> Option<Value> {
    let (id_field, payload) = match request.get("callId") {
        Some(_) => ("callId", request.get("req")?),
        None => ("id", request.get("payload")?),
    };
    let typehint = payload.get("typehint")?.as_str()?;
    if typehint == "NeverAnsweredReq" {
        return None;
    }
    let reply_kind = typehint.strip_suffix("Req").unwrap_or(typehint);
    let mut reply = json!({ "payload": { "typehint": reply_kind } });
    reply[id_field] = request[id_field].clone();
    Some(reply)
}
