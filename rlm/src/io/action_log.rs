//! JSONL audit trail of dispatched actions and self-heal reports.
//!
//! Unlike tracing output this is a product artifact: when `action_log_path`
//! is set every record is appended regardless of `RUST_LOG`. Write failures
//! are logged and otherwise ignored; auditing never fails a step.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionRecord {
    Dispatch {
        skill_name: String,
        reasoning_id: String,
        depth: u32,
        route: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    SelfHeal {
        component: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        patch_id: Option<String>,
        applied: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Serialize)]
struct Line<'a> {
    ts: String,
    #[serde(flatten)]
    record: &'a ActionRecord,
}

pub struct ActionLog {
    path: Option<PathBuf>,
    lock: Mutex<()>,
}

impl ActionLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, record: &ActionRecord) {
        let Some(path) = &self.path else {
            return;
        };
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(err) = append_line(path, record) {
            warn!(err = %err, path = %path.display(), "failed to append action log");
        }
    }
}

fn append_line(path: &Path, record: &ActionRecord) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create action log dir {}", parent.display()))?;
    }
    let line = Line {
        ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        record,
    };
    let mut buf = serde_json::to_string(&line).context("serialize action record")?;
    buf.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open action log {}", path.display()))?;
    file.write_all(buf.as_bytes())
        .with_context(|| format!("append action log {}", path.display()))
}
