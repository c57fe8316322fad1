use serde::Serialize;

use crate::error::Result;
use crate::pipeline::processing::normalize::{CanonicalJobRecord, CanonicalNodeRecord};

/// Destination for emitted canonical records
pub trait RecordSink {
    /// Write all job rows; returns the number of rows written
    fn write_jobs(&mut self, jobs: &[CanonicalJobRecord]) -> Result<u64>;

    /// Write all node rows; returns the number of rows written
    fn write_nodes(&mut self, nodes: &[CanonicalNodeRecord]) -> Result<u64>;
}

/// Events that must reach the security audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SecurityEvent {
    StoreOpened {
        path: String,
        entries: usize,
    },
    HashCollision {
        category: String,
        key: String,
        pseudonym: String,
    },
    PseudonymRevealed {
        pseudonym: String,
        category: String,
    },
}

impl SecurityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SecurityEvent::StoreOpened { .. } => "store_opened",
            SecurityEvent::HashCollision { .. } => "hash_collision",
            SecurityEvent::PseudonymRevealed { .. } => "pseudonym_revealed",
        }
    }
}

/// Injected handle for security events; passed explicitly, never global
pub trait SecurityLog {
    fn record(&self, event: SecurityEvent) -> Result<()>;
}
