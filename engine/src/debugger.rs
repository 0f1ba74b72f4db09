//! Debugger commands, offered by sessions that speak protocol v2.
//!
//! Thread-scoped commands target the thread reported by the most recent
//! `DebugBreakEvent`. Until one arrives they fail with
//! [`DebugError::NoActiveThread`] instead of sending a request the server
//! would reject.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Value, json};

use ensime_server::{ChannelError, EventHandlers, ResponseHandle, SessionChannel};

use crate::events::{EventSender, ServerEvent};

pub const DEFAULT_DEBUG_HOST: &str = "localhost";
pub const DEFAULT_DEBUG_PORT: u16 = 5005;

const BREAKPOINT_MAX_RESULTS: u32 = 10;
const BACKTRACE_COUNT: u32 = 100;

const DEBUG_OUTPUT_EVENT: &str = "DebugOutputEvent";
const DEBUG_BREAK_EVENT: &str = "DebugBreakEvent";

#[derive(Debug, thiserror::Error)]
pub enum DebugError {
    #[error("no debugger thread is active; wait for a breakpoint to be hit")]
    NoActiveThread,
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Debugger state learned from server events.
#[derive(Debug, Default)]
pub struct DebugState {
    thread_id: Option<u64>,
}

pub type SharedDebugState = Arc<Mutex<DebugState>>;

fn active_thread(state: &SharedDebugState) -> Option<u64> {
    state.lock().unwrap_or_else(PoisonError::into_inner).thread_id
}

fn set_active_thread(state: &SharedDebugState, thread_id: Option<u64>) {
    state.lock().unwrap_or_else(PoisonError::into_inner).thread_id = thread_id;
}

pub(crate) fn reset(state: &SharedDebugState) {
    set_active_thread(state, None);
}

/// Register handlers for debugger events on a new channel.
pub(crate) fn register_handlers(
    handlers: &mut EventHandlers,
    project: &Path,
    state: SharedDebugState,
    events: EventSender,
) {
    let output_project = project.to_path_buf();
    let output_events = events.clone();
    handlers.on(DEBUG_OUTPUT_EVENT, move |payload| {
        let body = payload
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let _ = output_events.send(ServerEvent::DebugOutput {
            project: output_project.clone(),
            body,
        });
    });

    let break_project: PathBuf = project.to_path_buf();
    handlers.on(DEBUG_BREAK_EVENT, move |payload| {
        let Some(thread_id) = payload.get("threadId").and_then(thread_id_of) else {
            tracing::warn!("DebugBreakEvent without a threadId");
            return;
        };
        set_active_thread(&state, Some(thread_id));
        let _ = events.send(ServerEvent::DebugBreak {
            project: break_project.clone(),
            thread_id,
        });
    });
}

/// Thread ids arrive as numbers or numeric strings depending on server version.
fn thread_id_of(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Debugger commands over one session's channel.
pub struct Debugger<'a> {
    channel: &'a mut SessionChannel,
    state: &'a SharedDebugState,
}

impl<'a> Debugger<'a> {
    pub(crate) fn new(channel: &'a mut SessionChannel, state: &'a SharedDebugState) -> Self {
        Self { channel, state }
    }

    /// Thread the debuggee last stopped on.
    #[must_use]
    pub fn active_thread(&self) -> Option<u64> {
        active_thread(self.state)
    }

    fn send(&mut self, request: Value) -> Result<ResponseHandle, DebugError> {
        Ok(self.channel.send_request(request)?)
    }

    fn send_for_thread(
        &mut self,
        typehint: &str,
        extra: Option<(&str, Value)>,
    ) -> Result<ResponseHandle, DebugError> {
        let thread_id = self.active_thread().ok_or(DebugError::NoActiveThread)?;
        let mut request = json!({ "typehint": typehint, "threadId": thread_id });
        if let Some((key, value)) = extra
            && let Some(fields) = request.as_object_mut()
        {
            fields.insert(key.to_string(), value);
        }
        self.send(request)
    }

    pub fn set_break(&mut self, file: &Path, line: u32) -> Result<ResponseHandle, DebugError> {
        self.send(json!({
            "typehint": "DebugSetBreakReq",
            "file": file.to_string_lossy(),
            "line": line,
            "maxResults": BREAKPOINT_MAX_RESULTS,
        }))
    }

    pub fn clear_breaks(&mut self) -> Result<ResponseHandle, DebugError> {
        self.send(json!({ "typehint": "DebugClearAllBreakReq" }))
    }

    /// Attach to a JVM listening for a debugger on `host:port`.
    pub fn attach(&mut self, host: &str, port: u16) -> Result<ResponseHandle, DebugError> {
        self.send(json!({
            "typehint": "DebugAttachReq",
            "hostname": host,
            "port": port.to_string(),
        }))
    }

    pub fn attach_default(&mut self) -> Result<ResponseHandle, DebugError> {
        self.attach(DEFAULT_DEBUG_HOST, DEFAULT_DEBUG_PORT)
    }

    pub fn resume(&mut self) -> Result<ResponseHandle, DebugError> {
        self.send_for_thread("DebugContinueReq", None)
    }

    pub fn step(&mut self) -> Result<ResponseHandle, DebugError> {
        self.send_for_thread("DebugStepReq", None)
    }

    pub fn step_out(&mut self) -> Result<ResponseHandle, DebugError> {
        self.send_for_thread("DebugStepOutReq", None)
    }

    pub fn step_over(&mut self) -> Result<ResponseHandle, DebugError> {
        self.send_for_thread("DebugNextReq", None)
    }

    pub fn locate_name(&mut self, name: &str) -> Result<ResponseHandle, DebugError> {
        self.send_for_thread("DebugLocateNameReq", Some(("name", json!(name))))
    }

    /// The top frames of the active thread.
    pub fn backtrace(&mut self) -> Result<ResponseHandle, DebugError> {
        let thread_id = self.active_thread().ok_or(DebugError::NoActiveThread)?;
        self.send(json!({
            "typehint": "DebugBacktraceReq",
            "threadId": thread_id,
            "index": 0,
            "count": BACKTRACE_COUNT,
        }))
    }
}
