use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;

/// Session-scoped state shared by every combination of one sweep.
///
/// Broker status lines accumulate here for the whole session and the full
/// history is re-emitted into the info sink at every combination boundary,
/// so later blocks repeat earlier lines. That append-without-reset behavior
/// is deliberate policy, not an accident of shared state.
pub struct SessionContext {
    sys_info: Mutex<Vec<String>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            sys_info: Mutex::new(Vec::new()),
        }
    }

    pub fn push_status(&self, line: String) {
        self.sys_info.lock().expect("sys info poisoned").push(line);
    }

    pub fn status_history(&self) -> Vec<String> {
        self.sys_info.lock().expect("sys info poisoned").clone()
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only text sink for report and status output. One call, one line.
pub trait ReportSink: Send {
    fn append(&mut self, text: &str) -> anyhow::Result<()>;
}

/// Appends to a file on disk, creating it if missing.
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open report sink {}", path.display()))?;
        Ok(Self { file })
    }
}

impl ReportSink for FileSink {
    fn append(&mut self, text: &str) -> anyhow::Result<()> {
        writeln!(self.file, "{text}").context("append to report sink")
    }
}

/// In-memory sink, shared by cloning. Used by tests and dry runs.
#[derive(Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("memory sink poisoned").clone()
    }

    pub fn contents(&self) -> String {
        self.lines().join("\n")
    }
}

impl ReportSink for MemorySink {
    fn append(&mut self, text: &str) -> anyhow::Result<()> {
        self.lines.lock().expect("memory sink poisoned").push(text.to_string());
        Ok(())
    }
}
