use tracing::{debug, warn};

use crate::observability::metrics;
use crate::pipeline::processing::normalize::resources::{
    is_unbounded_request, parse_count, HostAllocation, ResourceAllocation,
};
use crate::pipeline::processing::normalize::timefmt;
use crate::pipeline::processing::normalize::{CanonicalJobRecord, CanonicalNodeRecord, NormalizeError};
use crate::pipeline::processing::parser::RawRecord;
use crate::types::Scheduler;

/// Base trait for scheduler-specific normalizers
pub trait SourceNormalizer {
    fn scheduler(&self) -> Scheduler;

    /// Map one accounting record to the canonical job schema
    fn normalize_job(&self, record: &RawRecord) -> Result<CanonicalJobRecord, NormalizeError>;

    /// Map one inventory record to the canonical node schema
    fn normalize_node(&self, record: &RawRecord) -> Result<CanonicalNodeRecord, NormalizeError>;

    /// Raw keys this normalizer reads; everything else is discarded
    fn known_fields(&self) -> &'static [&'static str];

    /// Fold a repeated host into the record seen first. The default joins partitions,
    /// which is how SLURM lists a node once per partition.
    fn merge_nodes(&self, existing: &mut CanonicalNodeRecord, duplicate: CanonicalNodeRecord) {
        merge_partitions(existing, &duplicate.partition);
    }
}

/// A wrapper that adds metrics and discarded-field accounting to any normalizer
pub struct MetricsNormalizer<N: SourceNormalizer> {
    inner: N,
}

impl<N: SourceNormalizer> MetricsNormalizer<N> {
    pub fn new(inner: N) -> Self {
        Self { inner }
    }

    fn log_discarded(&self, record: &RawRecord) {
        let known = self.inner.known_fields();
        let discarded = record
            .fields
            .keys()
            .filter(|k| !known.contains(&k.as_str()))
            .count();
        if discarded > 0 {
            debug!(
                scheduler = %self.inner.scheduler(),
                line = record.line,
                discarded,
                "Discarded unknown raw fields"
            );
        }
    }
}

impl<N: SourceNormalizer> SourceNormalizer for MetricsNormalizer<N> {
    fn scheduler(&self) -> Scheduler {
        self.inner.scheduler()
    }

    fn normalize_job(&self, record: &RawRecord) -> Result<CanonicalJobRecord, NormalizeError> {
        self.log_discarded(record);
        self.inner.normalize_job(record)
    }

    fn normalize_node(&self, record: &RawRecord) -> Result<CanonicalNodeRecord, NormalizeError> {
        self.log_discarded(record);
        self.inner.normalize_node(record)
    }

    fn known_fields(&self) -> &'static [&'static str] {
        self.inner.known_fields()
    }

    fn merge_nodes(&self, existing: &mut CanonicalNodeRecord, duplicate: CanonicalNodeRecord) {
        self.inner.merge_nodes(existing, duplicate)
    }
}

/// Shared helpers for scheduler normalizers
pub struct NormalizerUtils;

impl NormalizerUtils {
    /// Identity field or a rejection
    pub fn require<'a>(
        record: &'a RawRecord,
        keys: &[&str],
        field: &'static str,
    ) -> Result<&'a str, NormalizeError> {
        record.first_of(keys).ok_or(NormalizeError::MissingIdentity {
            field,
            line: record.line,
        })
    }

    /// Owned text of the first non-empty key, or empty
    pub fn text(record: &RawRecord, keys: &[&str]) -> String {
        record.first_of(keys).unwrap_or_default().to_string()
    }

    pub fn count(record: &RawRecord, keys: &[&str]) -> Option<u64> {
        record.first_of(keys).and_then(parse_count)
    }

    pub fn timestamp(record: &RawRecord, keys: &[&str]) -> Option<chrono::NaiveDateTime> {
        record.first_of(keys).and_then(timefmt::parse_timestamp)
    }

    pub fn duration(record: &RawRecord, keys: &[&str]) -> Option<u64> {
        record.first_of(keys).and_then(timefmt::parse_duration_secs)
    }

    /// Warn (once per job) when a memory request is the "unlimited" sentinel
    pub fn check_unbounded_mem(job_id: &str, raw: Option<&str>) {
        if let Some(raw) = raw.filter(|r| is_unbounded_request(r)) {
            warn!(job_id, raw, "Memory request is the unbounded sentinel; leaving mem_req empty");
        }
    }

    /// Reconcile a reported CPU allocation with one counted from the host list.
    /// The reported value wins; a disagreement is logged with both values.
    pub fn resolve_cpus_alloc(job_id: &str, reported: Option<u64>, hosts: &HostAllocation) -> Option<u64> {
        match (reported, hosts.cpus) {
            (Some(reported), Some(counted)) if reported != counted => {
                warn!(job_id, reported, counted, "CPU allocation disagrees with the host list");
                metrics::normalize::allocation_mismatch();
                Some(reported)
            }
            (Some(reported), _) => Some(reported),
            (None, counted) => counted,
        }
    }

    /// Fill placement fields from a host list where the scheduler did not report them
    pub fn apply_hosts(job: &mut CanonicalJobRecord, hosts: HostAllocation) {
        if job.nodes_alloc.is_none() && !hosts.hosts.is_empty() {
            job.nodes_alloc = Some(hosts.hosts.len() as u64);
        }
        if job.nodelist.is_empty() {
            job.nodelist = hosts.hosts;
        }
    }

    /// Copy GPU figures from a decoded resource string
    pub fn apply_gpus(job: &mut CanonicalJobRecord, resources: &ResourceAllocation) {
        if !resources.gpus.is_empty() {
            job.gpu_count = resources.gpus.count();
            job.gpu_types = resources.gpus.types();
        }
    }

    /// `1234[5]` → `1234_5`, so array tasks read the same for every scheduler
    pub fn array_job_id(raw: &str) -> String {
        match raw.split_once('[') {
            Some((base, rest)) => {
                let index = rest.trim_end_matches(']');
                if index.is_empty() {
                    base.to_string()
                } else {
                    format!("{}_{}", base, index)
                }
            }
            None => raw.to_string(),
        }
    }
}

/// Flags SLURM appends to node states (`idle*`, `mix~`, `alloc+`)
const STATE_FLAGS: &[char] = &['*', '~', '#', '!', '%', '$', '@', '^', '-', '+'];

/// Map a scheduler's node state onto the shared vocabulary:
/// `idle`, `allocated`, `mixed`, `down`, `drain`, `closed`, `available`,
/// else the raw value lowercased
pub fn normalize_node_state(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let state = lower.split('+').next().unwrap_or("").trim_end_matches(STATE_FLAGS);

    let normalized = if state.is_empty() {
        ""
    } else if state.contains("free") || state == "idle" || state == "unclaimed" {
        "idle"
    } else if state.starts_with("drain") || state == "drng" {
        "drain"
    } else if state.contains("down")
        || state.contains("offline")
        || state.starts_with("unavail")
        || state.starts_with("unreach")
    {
        "down"
    } else if state.starts_with("alloc") || state.contains("job") || state == "claimed" {
        "allocated"
    } else if state.starts_with("mix") {
        "mixed"
    } else if state.starts_with("closed") {
        "closed"
    } else if state == "ok" {
        "available"
    } else {
        state
    };
    normalized.to_string()
}

/// Add `partition` to a comma-joined partition list if it is not there yet
pub fn merge_partitions(existing: &mut CanonicalNodeRecord, partition: &str) {
    if partition.is_empty() || existing.partition.split(',').any(|p| p == partition) {
        return;
    }
    if existing.partition.is_empty() {
        existing.partition = partition.to_string();
    } else {
        existing.partition.push(',');
        existing.partition.push_str(partition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_state_vocabulary() {
        assert_eq!(normalize_node_state("idle*"), "idle");
        assert_eq!(normalize_node_state("mixed~"), "mixed");
        assert_eq!(normalize_node_state("alloc+drain"), "allocated");
        assert_eq!(normalize_node_state("draining"), "drain");
        assert_eq!(normalize_node_state("free"), "idle");
        assert_eq!(normalize_node_state("job-exclusive"), "allocated");
        assert_eq!(normalize_node_state("down,offline"), "down");
        assert_eq!(normalize_node_state("ok"), "available");
        assert_eq!(normalize_node_state("closed_Adm"), "closed");
        assert_eq!(normalize_node_state("unavail"), "down");
        assert_eq!(normalize_node_state("Claimed"), "allocated");
        assert_eq!(normalize_node_state("Backfill"), "backfill");
    }

    #[test]
    fn test_cpus_alloc_reported_value_wins() {
        let hosts = HostAllocation {
            hosts: vec!["a".to_string()],
            cpus: Some(4),
        };
        assert_eq!(NormalizerUtils::resolve_cpus_alloc("1", Some(8), &hosts), Some(8));
        assert_eq!(NormalizerUtils::resolve_cpus_alloc("1", None, &hosts), Some(4));
        assert_eq!(
            NormalizerUtils::resolve_cpus_alloc("1", None, &HostAllocation::default()),
            None
        );
    }

    #[test]
    fn test_array_job_ids() {
        assert_eq!(NormalizerUtils::array_job_id("1234[5]"), "1234_5");
        assert_eq!(NormalizerUtils::array_job_id("1234[]"), "1234");
        assert_eq!(NormalizerUtils::array_job_id("1234"), "1234");
    }

    #[test]
    fn test_merge_partitions() {
        let mut node = CanonicalNodeRecord::new(Scheduler::Slurm, "n1");
        merge_partitions(&mut node, "batch");
        merge_partitions(&mut node, "gpu");
        merge_partitions(&mut node, "batch");
        assert_eq!(node.partition, "batch,gpu");
    }
}
