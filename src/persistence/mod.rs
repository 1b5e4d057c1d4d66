//! Persisted state for external consumers.
//!
//! - Status and schedule reports, replaced wholesale on each publish
//! - SQLite journal of closed trades

mod journal;
mod report;

pub use journal::{JournalEntry, JournalSummary, TradeJournal};
pub use report::{
    ActiveTrade, BotState, ConfigSummary, RateEntry, ScheduleReport, StatisticsReport,
    StatusReport,
};

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Sink for status and schedule reports. Readers never see partial content.
pub trait StatusPublisher: Send + Sync {
    fn publish_status(&self, report: &StatusReport) -> Result<()>;

    fn publish_schedule(&self, report: &ScheduleReport) -> Result<()>;
}

/// Writes reports as pretty JSON files.
#[derive(Debug, Clone)]
pub struct JsonFilePublisher {
    status_path: PathBuf,
    schedule_path: PathBuf,
}

impl JsonFilePublisher {
    pub fn new(status_path: impl Into<PathBuf>, schedule_path: impl Into<PathBuf>) -> Self {
        Self {
            status_path: status_path.into(),
            schedule_path: schedule_path.into(),
        }
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    pub fn schedule_path(&self) -> &Path {
        &self.schedule_path
    }
}

/// Serialize to a sibling temp file, then rename over the target.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let json = serde_json::to_vec_pretty(value).context("Failed to serialize report")?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    std::fs::write(&tmp_path, json)
        .with_context(|| format!("Failed to write {:?}", tmp_path))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace {:?}", path))?;

    debug!(path = ?path, "Report written");
    Ok(())
}

impl StatusPublisher for JsonFilePublisher {
    fn publish_status(&self, report: &StatusReport) -> Result<()> {
        write_json_atomic(&self.status_path, report)
    }

    fn publish_schedule(&self, report: &ScheduleReport) -> Result<()> {
        write_json_atomic(&self.schedule_path, report)
    }
}

/// Read a status file written by [`JsonFilePublisher`].
pub fn read_status(path: impl AsRef<Path>) -> Result<StatusReport> {
    let path = path.as_ref();
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_slice(&raw).with_context(|| format!("Failed to parse {:?}", path))
}

/// Keeps every published report in memory.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    statuses: Mutex<Vec<StatusReport>>,
    schedules: Mutex<Vec<ScheduleReport>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<StatusReport> {
        self.statuses.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn schedules(&self) -> Vec<ScheduleReport> {
        self.schedules.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl StatusPublisher for MemoryPublisher {
    fn publish_status(&self, report: &StatusReport) -> Result<()> {
        self.statuses
            .lock()
            .map_err(|_| anyhow::anyhow!("status buffer poisoned"))?
            .push(report.clone());
        Ok(())
    }

    fn publish_schedule(&self, report: &ScheduleReport) -> Result<()> {
        self.schedules
            .lock()
            .map_err(|_| anyhow::anyhow!("schedule buffer poisoned"))?
            .push(report.clone());
        Ok(())
    }
}
