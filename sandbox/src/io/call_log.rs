//! Append-only JSONL log of primitive calls handled during a live run.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};

use crate::core::types::RecordedAction;

pub struct CallLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl CallLog {
    /// Open `path` for appending, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open call log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one line and flush it.
    pub fn append(&self, action: &RecordedAction) -> Result<()> {
        let line = serde_json::to_string(action).context("serialize call log entry")?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("call log writer poisoned"))?;
        writeln!(writer, "{line}").with_context(|| format!("append {}", self.path.display()))?;
        writer
            .flush()
            .with_context(|| format!("flush {}", self.path.display()))
    }
}

/// Every entry of a call log, in order.
pub fn read_log(path: &Path) -> Result<Vec<RecordedAction>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read call log {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse {} entry {}", path.display(), index + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::script::{HostCall, Value};

    #[test]
    fn append_then_read_preserves_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs").join("calls.jsonl");
        let log = CallLog::open(&path).expect("open");
        let first = RecordedAction::new(&HostCall::new("importer_scan"), json!([]));
        let second = RecordedAction::new(
            &HostCall::new("git_commit").arg(Value::str("import")),
            json!({"success": true}),
        );
        log.append(&first).expect("append");
        log.append(&second).expect("append");

        let reopened = CallLog::open(&path).expect("reopen");
        reopened.append(&first).expect("append");

        let entries = read_log(&path).expect("read");
        assert_eq!(entries, vec![first.clone(), second, first]);
    }
}
