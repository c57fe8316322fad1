use std::cell::RefCell;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::app::ports::{SecurityEvent, SecurityLog};
use crate::error::Result;

#[derive(Serialize)]
struct SecurityLogLine<'a> {
    timestamp: DateTime<Utc>,
    run_id: &'a str,
    #[serde(flatten)]
    event: &'a SecurityEvent,
}

/// Security events go to the `security` tracing target and, when a path is
/// configured, are appended to an NDJSON audit file
pub struct FileSecurityLog {
    path: Option<PathBuf>,
    run_id: String,
}

impl FileSecurityLog {
    pub fn new(path: Option<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path,
            run_id: run_id.into(),
        }
    }

    fn append(&self, path: &Path, event: &SecurityEvent) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(&SecurityLogLine {
            timestamp: Utc::now(),
            run_id: &self.run_id,
            event,
        })?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl SecurityLog for FileSecurityLog {
    fn record(&self, event: SecurityEvent) -> Result<()> {
        let details = serde_json::to_string(&event)?;
        match &event {
            SecurityEvent::HashCollision { .. } => {
                warn!(target: "security", event = event.name(), run_id = %self.run_id, %details, "Security event")
            }
            _ => info!(target: "security", event = event.name(), run_id = %self.run_id, %details, "Security event"),
        }
        if let Some(path) = &self.path {
            self.append(path, &event)?;
        }
        Ok(())
    }
}

/// Keeps events in memory; for callers that inspect what was logged
#[derive(Debug, Default)]
pub struct InMemorySecurityLog {
    events: RefCell<Vec<SecurityEvent>>,
}

impl InMemorySecurityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.borrow().clone()
    }
}

impl SecurityLog for InMemorySecurityLog {
    fn record(&self, event: SecurityEvent) -> Result<()> {
        self.events.borrow_mut().push(event);
        Ok(())
    }
}
