use std::fmt;
use std::time::Instant;

use tracing::{debug, info};

use crate::app::ports::{SecurityEvent, SecurityLog};
use crate::constants::PSEUDONYM_SEQUENCE_WIDTH;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::processing::normalize::{CanonicalJobRecord, CanonicalNodeRecord};

pub mod hasher;
pub mod store;

pub use hasher::{HmacSha256Hasher, KeyedHasher};
pub use store::{MappingEntry, MappingStore, MappingTable};

/// Kind of identifying value; each has its own pseudonym sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    User,
    Group,
    Account,
    Host,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::User => "user",
            Category::Group => "group",
            Category::Account => "account",
            Category::Host => "host",
        }
    }

    pub fn all() -> [Category; 4] {
        [Category::User, Category::Group, Category::Account, Category::Host]
    }

    /// Category protecting a canonical field; host names cover `nodelist` and `hostname`
    pub fn for_field(field: &str) -> Option<Self> {
        match field.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Category::User),
            "group" => Some(Category::Group),
            "account" => Some(Category::Account),
            "nodelist" | "hostname" | "host" => Some(Category::Host),
            _ => None,
        }
    }

    /// `user_0001`; sequences wider than the padding print in full
    pub fn pseudonym(&self, sequence: u64) -> String {
        format!(
            "{}_{:0width$}",
            self.as_str(),
            sequence,
            width = PSEUDONYM_SEQUENCE_WIDTH
        )
    }

    /// Split `<category>_<digits>` back into its parts
    pub fn parse_pseudonym(pseudonym: &str) -> Option<(Category, u64)> {
        let (prefix, digits) = pseudonym.rsplit_once('_')?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let category = Category::all().into_iter().find(|c| c.as_str() == prefix)?;
        Some((category, digits.parse().ok()?))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replaces identifying values in canonical records with store-backed pseudonyms
pub struct Pseudonymizer<'a> {
    store: &'a mut MappingStore,
    security: &'a dyn SecurityLog,
    fields: Vec<(String, Category)>,
    replaced: u64,
    minted: u64,
}

impl<'a> Pseudonymizer<'a> {
    pub fn new(
        store: &'a mut MappingStore,
        security: &'a dyn SecurityLog,
        fields: Vec<(String, Category)>,
    ) -> Self {
        Self {
            store,
            security,
            fields,
            replaced: 0,
            minted: 0,
        }
    }

    /// Values replaced so far
    pub fn replaced(&self) -> u64 {
        self.replaced
    }

    pub fn pseudonymize_jobs(&mut self, jobs: &mut [CanonicalJobRecord]) -> Result<u64> {
        let start_time = Instant::now();
        let before = self.replaced;
        let fields = self.fields.clone();

        for job in jobs.iter_mut() {
            for (field, category) in &fields {
                match field.as_str() {
                    "user" => self.replace(*category, &mut job.user)?,
                    "group" => self.replace(*category, &mut job.group)?,
                    "account" => self.replace(*category, &mut job.account)?,
                    _ if *category == Category::Host => {
                        for host in job.nodelist.iter_mut() {
                            self.replace(*category, host)?;
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(self.finish("jobs", before, start_time))
    }

    /// Only host fields apply to nodes
    pub fn pseudonymize_nodes(&mut self, nodes: &mut [CanonicalNodeRecord]) -> Result<u64> {
        let start_time = Instant::now();
        let before = self.replaced;
        let protect_hosts = self.fields.iter().any(|(_, c)| *c == Category::Host);

        if protect_hosts {
            for node in nodes.iter_mut() {
                self.replace(Category::Host, &mut node.hostname)?;
            }
        }
        Ok(self.finish("nodes", before, start_time))
    }

    fn replace(&mut self, category: Category, value: &mut String) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        let resolved = self.store.resolve(category, value)?;
        if let Some(key) = resolved.collision_key {
            metrics::pseudonymize::hash_collision();
            self.security.record(SecurityEvent::HashCollision {
                category: category.as_str().to_string(),
                key,
                pseudonym: resolved.pseudonym.clone(),
            })?;
        }
        if resolved.minted {
            metrics::pseudonymize::entry_minted(category.as_str());
            self.minted += 1;
        }
        *value = resolved.pseudonym;
        self.replaced += 1;
        Ok(())
    }

    fn finish(&self, kind: &str, before: u64, start_time: Instant) -> u64 {
        let replaced = self.replaced - before;
        metrics::pseudonymize::values_replaced(replaced);
        info!(kind, replaced, minted = self.minted, store_entries = self.store.len(), "Pseudonymized records");
        debug!(elapsed_ms = start_time.elapsed().as_millis() as u64, "Pseudonymization finished");
        replaced
    }
}
