use std::fmt;
use std::time::Instant;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{ExportError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::parser::RawRecord;
use crate::types::{JobState, Scheduler};

pub mod classify;
pub mod dedup;
pub mod normalizers;
pub mod registry;
pub mod resources;
pub mod timefmt;

use classify::{ClassificationInput, Classifier};
use dedup::Keyed;
use normalizers::SourceNormalizer;
use registry::NormalizationRegistry;

/// Node classification tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum NodeType {
    Gpu,
    Highmem,
    Largemem,
    #[default]
    Compute,
    /// Tier added through configuration
    Custom(String),
}

impl From<&str> for NodeType {
    fn from(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "gpu" => NodeType::Gpu,
            "highmem" => NodeType::Highmem,
            "largemem" => NodeType::Largemem,
            "compute" => NodeType::Compute,
            other => NodeType::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Gpu => f.write_str("gpu"),
            NodeType::Highmem => f.write_str("highmem"),
            NodeType::Largemem => f.write_str("largemem"),
            NodeType::Compute => f.write_str("compute"),
            NodeType::Custom(label) => f.write_str(label),
        }
    }
}

/// One accelerator model and how many of it a job or node holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuType {
    pub name: String,
    pub count: u64,
}

impl GpuType {
    pub fn new(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

impl fmt::Display for GpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.count)
    }
}

/// The unified job schema. Absent values are `None` or empty and serialize as empty cells.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalJobRecord {
    pub scheduler: Scheduler,
    pub job_id: String,
    pub user: String,
    pub group: String,
    pub account: String,
    pub partition: String,
    pub qos: String,
    pub priority: String,
    pub reservation: String,
    pub status: Option<JobState>,
    pub submit_time: Option<NaiveDateTime>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub cpus_req: Option<u64>,
    pub cpus_alloc: Option<u64>,
    /// MB
    pub mem_req: Option<u64>,
    /// MB
    pub mem_used: Option<u64>,
    /// seconds
    pub walltime_used: Option<u64>,
    /// seconds
    pub cpu_time_used: Option<u64>,
    pub nodes_alloc: Option<u64>,
    pub nodelist: Vec<String>,
    pub gpu_count: u64,
    pub gpu_types: Vec<GpuType>,
    pub node_type: NodeType,
}

impl CanonicalJobRecord {
    pub fn new(scheduler: Scheduler, job_id: impl Into<String>) -> Self {
        Self {
            scheduler,
            job_id: job_id.into(),
            user: String::new(),
            group: String::new(),
            account: String::new(),
            partition: String::new(),
            qos: String::new(),
            priority: String::new(),
            reservation: String::new(),
            status: None,
            submit_time: None,
            start_time: None,
            end_time: None,
            cpus_req: None,
            cpus_alloc: None,
            mem_req: None,
            mem_used: None,
            walltime_used: None,
            cpu_time_used: None,
            nodes_alloc: None,
            nodelist: Vec::new(),
            gpu_count: 0,
            gpu_types: Vec::new(),
            node_type: NodeType::Compute,
        }
    }

    /// Seconds between submission and start; `None` when either is missing or the
    /// difference is negative
    pub fn queue_wait_seconds(&self) -> Option<i64> {
        let (submit, start) = (self.submit_time?, self.start_time?);
        let wait = (start - submit).num_seconds();
        (wait >= 0).then_some(wait)
    }

    fn classification_input(&self) -> ClassificationInput<'_> {
        ClassificationInput {
            gpu_count: self.gpu_count,
            partition: &self.partition,
            qos: &self.qos,
            nodelist: &self.nodelist,
        }
    }
}

impl Keyed for CanonicalJobRecord {
    fn key(&self) -> &str {
        &self.job_id
    }

    fn filled_fields(&self) -> usize {
        let strings = [
            &self.user,
            &self.group,
            &self.account,
            &self.partition,
            &self.qos,
            &self.priority,
            &self.reservation,
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .count();
        let numbers = [
            self.cpus_req,
            self.cpus_alloc,
            self.mem_req,
            self.mem_used,
            self.walltime_used,
            self.cpu_time_used,
            self.nodes_alloc,
        ]
        .iter()
        .filter(|v| v.is_some())
        .count();
        let times = [self.submit_time, self.start_time, self.end_time]
            .iter()
            .filter(|t| t.is_some())
            .count();
        strings
            + numbers
            + times
            + usize::from(self.status.is_some())
            + usize::from(!self.nodelist.is_empty())
            + usize::from(!self.gpu_types.is_empty())
    }
}

/// The unified cluster-inventory schema, one record per host
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalNodeRecord {
    pub scheduler: Scheduler,
    pub hostname: String,
    pub cpus: Option<u64>,
    pub memory_mb: Option<u64>,
    pub node_type: NodeType,
    /// `idle`, `allocated`, `mixed`, `down`, `drain`, `closed`, `available` or the raw state lowercased
    pub state: String,
    pub partition: String,
    pub extra: String,
    pub gpu_count: u64,
}

impl CanonicalNodeRecord {
    pub fn new(scheduler: Scheduler, hostname: impl Into<String>) -> Self {
        Self {
            scheduler,
            hostname: hostname.into(),
            cpus: None,
            memory_mb: None,
            node_type: NodeType::Compute,
            state: String::new(),
            partition: String::new(),
            extra: String::new(),
            gpu_count: 0,
        }
    }
}

impl Keyed for CanonicalNodeRecord {
    fn key(&self) -> &str {
        &self.hostname
    }

    fn filled_fields(&self) -> usize {
        [
            self.cpus.is_some(),
            self.memory_mb.is_some(),
            !self.state.is_empty(),
            !self.partition.is_empty(),
            !self.extra.is_empty(),
            self.gpu_count > 0,
        ]
        .iter()
        .filter(|filled| **filled)
        .count()
    }
}

/// Per-record normalization failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("line {line}: record has no {field}")]
    MissingIdentity { field: &'static str, line: usize },
}

/// Canonical records of one input plus what was dropped on the way
#[derive(Debug, Clone)]
pub struct NormalizeOutcome<T> {
    pub records: Vec<T>,
    pub rejected: usize,
    pub deduplicated: usize,
}

/// Batch stage: per-scheduler mapping, classification, then dedup / merge
pub struct Normalizer {
    scheduler: Scheduler,
    normalizer: Box<dyn SourceNormalizer>,
    classifier: Classifier,
}

impl Normalizer {
    pub fn new(scheduler: Scheduler, classifier: Classifier) -> Result<Self> {
        Self::with_registry(NormalizationRegistry::new(), scheduler, classifier)
    }

    /// Build from a registry that may carry replaced or extra normalizers
    pub fn with_registry(
        mut registry: NormalizationRegistry,
        scheduler: Scheduler,
        classifier: Classifier,
    ) -> Result<Self> {
        let normalizer = registry
            .take(scheduler)
            .ok_or_else(|| ExportError::UnknownScheduler(scheduler.to_string()))?;
        Ok(Self {
            scheduler,
            normalizer,
            classifier,
        })
    }

    pub fn normalize_jobs(&self, raw: &[RawRecord]) -> NormalizeOutcome<CanonicalJobRecord> {
        let start_time = Instant::now();
        let normalizer = self.normalizer.as_ref();
        let mut rejected = 0;
        let mut records = Vec::with_capacity(raw.len());

        for record in raw {
            match normalizer.normalize_job(record) {
                Ok(mut job) => {
                    job.node_type = self.classifier.classify(&job.classification_input());
                    records.push(job);
                }
                Err(e) => {
                    warn!(scheduler = %self.scheduler, error = %e, "Rejected job record");
                    rejected += 1;
                }
            }
        }

        let (records, deduplicated) = dedup::dedup_by_key(records);
        self.finish(records, rejected, deduplicated, start_time)
    }

    pub fn normalize_nodes(&self, raw: &[RawRecord]) -> NormalizeOutcome<CanonicalNodeRecord> {
        let start_time = Instant::now();
        let normalizer = self.normalizer.as_ref();
        let mut rejected = 0;
        let mut records = Vec::with_capacity(raw.len());

        for record in raw {
            match normalizer.normalize_node(record) {
                Ok(node) => records.push(node),
                Err(e) => {
                    warn!(scheduler = %self.scheduler, error = %e, "Rejected node record");
                    rejected += 1;
                }
            }
        }

        // classify after merging so per-slot or per-partition rows count as one host
        let (mut records, merged) =
            dedup::merge_by_key(records, |existing, duplicate| normalizer.merge_nodes(existing, duplicate));
        for node in &mut records {
            let hosts = [node.hostname.clone()];
            node.node_type = self.classifier.classify(&ClassificationInput {
                gpu_count: node.gpu_count,
                partition: &node.partition,
                qos: "",
                nodelist: &hosts,
            });
        }
        self.finish(records, rejected, merged, start_time)
    }

    fn finish<T>(
        &self,
        records: Vec<T>,
        rejected: usize,
        deduplicated: usize,
        start_time: Instant,
    ) -> NormalizeOutcome<T> {
        metrics::normalize::records_processed(self.scheduler.as_str(), records.len() as u64);
        metrics::normalize::records_rejected(self.scheduler.as_str(), rejected as u64);
        metrics::normalize::records_deduplicated(deduplicated as u64);
        metrics::normalize::duration(start_time.elapsed().as_secs_f64());

        info!(
            scheduler = %self.scheduler,
            normalized = records.len(),
            rejected,
            deduplicated,
            "Normalized records"
        );
        debug!(elapsed_ms = start_time.elapsed().as_millis() as u64, "Normalization finished");
        NormalizeOutcome {
            records,
            rejected,
            deduplicated,
        }
    }
}
