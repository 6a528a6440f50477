use anyhow::Result;
use chrono::Utc;
use logpilot_core::{runtime_dir, EventEnvelope};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only event log for router activity, with an optional verbose
/// stderr mirror. One line per event, timestamped, JSON payload.
pub struct Observer {
    log_path: PathBuf,
    verbose: bool,
}

impl Observer {
    pub fn new(workspace: &Path) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            log_path: dir.join("observe.log"),
            verbose: false,
        })
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn record_event(&self, event: &EventEnvelope) -> Result<()> {
        self.append_log_line(&format!(
            "{} EVENT {}",
            Utc::now().to_rfc3339(),
            serde_json::to_string(event)?
        ))
    }

    /// Free-form note, for messages that are not structured events.
    pub fn note(&self, message: &str) -> Result<()> {
        self.append_log_line(&format!("{} NOTE {}", Utc::now().to_rfc3339(), message))
    }

    fn append_log_line(&self, line: &str) -> Result<()> {
        if self.verbose {
            eprintln!("[logpilot] {line}");
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}
