use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use playbook_common::{AuditEvent, Run, StepRun};

/// A self-contained snapshot of one run and its audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditExport {
    pub exported_at: DateTime<Utc>,
    pub run: Run,
    pub steps: Vec<StepRun>,
    pub events: Vec<AuditEvent>,
}

impl AuditExport {
    pub fn new(run: Run, steps: Vec<StepRun>, events: Vec<AuditEvent>) -> Self {
        Self {
            exported_at: Utc::now(),
            run,
            steps,
            events,
        }
    }

    /// File name of the form `<created>_<run id prefix>.json`.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.json",
            self.run.created_at.format("%Y-%m-%dT%H-%M-%S"),
            &self.run.id.to_string()[..8]
        )
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read audit export: {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse audit export")
    }
}

/// Write `export` into `dir` (created if missing) and return the file path.
pub fn export_run(dir: &Path, export: &AuditExport) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create audit directory: {}", dir.display()))?;
    let path = dir.join(export.file_name());
    let json = serde_json::to_string_pretty(export).context("Failed to serialize audit export")?;
    fs::write(&path, json).context("Failed to write audit export file")?;
    Ok(path)
}
