//! The terminal stand-in for an editor.

use std::io::{Write, stderr};
use std::path::PathBuf;

use ensime_engine::{Editor, Notice};

/// Reports to stderr; the "active buffer" is the file named on the command line.
pub struct TerminalEditor {
    current: Option<PathBuf>,
}

impl TerminalEditor {
    pub fn new(current: Option<PathBuf>) -> Self {
        Self { current }
    }
}

impl Editor for TerminalEditor {
    fn raw_message(&self, text: &str) {
        let mut err = stderr().lock();
        let _ = writeln!(err, "{text}");
    }

    fn notify(&self, notice: &Notice) {
        tracing::info!(%notice, "Notice");
        self.raw_message(&notice.to_string());
    }

    fn current_buffer_path(&self) -> Option<PathBuf> {
        self.current.clone()
    }
}
