use std::path::Path;

use tracing::{info, instrument};

use crate::app::ports::{SecurityEvent, SecurityLog};
use crate::error::{ExportError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::pseudonymize::{Category, MappingTable};

/// A pseudonym traced back to its original value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revealed {
    pub pseudonym: String,
    pub category: Category,
    pub plaintext: String,
}

/// Use case for the auditor's reverse lookup: pseudonym → store entry → plaintext.
///
/// Only the store file is needed; the salt is not.
pub struct RevealUseCase<'a> {
    security: &'a dyn SecurityLog,
}

impl<'a> RevealUseCase<'a> {
    pub fn new(security: &'a dyn SecurityLog) -> Self {
        Self { security }
    }

    #[instrument(skip(self, store_path), fields(store = %store_path.display()))]
    pub fn reveal(&self, store_path: &Path, pseudonym: &str) -> Result<Revealed> {
        let table = MappingTable::load(store_path)?;
        let entry = table
            .lookup_pseudonym(pseudonym.trim())
            .ok_or_else(|| ExportError::UnknownPseudonym(pseudonym.to_string()))?;

        self.security.record(SecurityEvent::PseudonymRevealed {
            pseudonym: entry.pseudonym.clone(),
            category: entry.category.to_string(),
        })?;
        metrics::pseudonymize::reveal();
        info!(category = %entry.category, "Revealed pseudonym");

        Ok(Revealed {
            pseudonym: entry.pseudonym.clone(),
            category: entry.category,
            plaintext: entry.plaintext.clone(),
        })
    }
}
