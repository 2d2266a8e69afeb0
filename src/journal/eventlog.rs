//! Append-only JSONL run journal.
//!
//! One line per event, each stamped with a UTC timestamp and the run id.
//! Error text written here is the error's `Display`, which never carries
//! secret-labeled content.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// A run journal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        bundle: String,
        simulate: bool,
        resources: usize,
        plan_hash: String,
        version: String,
    },
    ResourceStarted {
        resource: String,
        provider: String,
    },
    ChangeApplied {
        resource: String,
        change: String,
        changed: bool,
    },
    ResourceConverged {
        resource: String,
        changed: bool,
        duration_seconds: f64,
    },
    ResourceFailed {
        resource: String,
        provider: String,
        error: String,
    },
    RunCompleted {
        changed: usize,
        unchanged: usize,
        failed: usize,
        total_seconds: f64,
    },
}

/// Journal line: timestamp, run id, then the flattened event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub ts: String,
    pub run_id: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

/// Writer for one run's events.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
    run_id: String,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            run_id: generate_run_id(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Append one event, creating the file and its directory on first use.
    pub fn append(&self, event: RunEvent) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let entry = JournalEntry {
            ts: now_iso8601(),
            run_id: self.run_id.clone(),
            event,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| Error::Parse(format!("journal serialize: {e}")))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

/// Read every entry of a journal file.
pub fn read_journal(path: &Path) -> Result<Vec<JournalEntry>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str(l)
                .map_err(|e| Error::Parse(format!("journal line: {e}")))
        })
        .collect()
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_iso8601(secs)
}

fn format_iso8601(epoch_secs: u64) -> String {
    let (y, m, d) = civil_from_days((epoch_secs / 86_400) as i64);
    let t = epoch_secs % 86_400;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        y,
        m,
        d,
        t / 3600,
        (t % 3600) / 60,
        t % 60
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}

/// Generate a run id.
pub fn generate_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}
