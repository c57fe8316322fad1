use super::base::{normalize_node_state, NormalizerUtils as U, SourceNormalizer};
use crate::pipeline::processing::normalize::resources::{
    parse_exec_host, parse_memory_mb, parse_resources, MemUnit,
};
use crate::pipeline::processing::normalize::{CanonicalJobRecord, CanonicalNodeRecord, NormalizeError};
use crate::pipeline::processing::parser::RawRecord;
use crate::types::{JobState, Scheduler};

const KNOWN_FIELDS: &[&str] = &[
    // condor_history
    "ClusterId", "ProcId", "Owner", "AcctGroup", "AccountingGroup", "JobStatus", "QDate",
    "JobStartDate", "CompletionDate", "RequestCpus", "CpusProvisioned", "RequestMemory",
    "MemoryUsage", "RemoteWallClockTime", "RemoteUserCpu", "RequestGpus", "LastRemoteHost",
    "JobPrio",
    // condor_status
    "Machine", "Name", "Cpus", "Memory", "Gpus", "State", "Activity",
];

const SLOTS_PREFIX: &str = "slots=";

fn slot_count(extra: &str) -> u64 {
    extra
        .strip_prefix(SLOTS_PREFIX)
        .and_then(|n| n.parse().ok())
        .unwrap_or(1)
}

fn add(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => a.checked_add(b),
        (a, b) => a.or(b),
    }
}

/// Normalizer for `condor_history` jobs and `condor_status` slots.
///
/// Slots are folded into one node per machine.
pub struct HtcondorNormalizer;

impl HtcondorNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl SourceNormalizer for HtcondorNormalizer {
    fn scheduler(&self) -> Scheduler {
        Scheduler::Htcondor
    }

    fn normalize_job(&self, record: &RawRecord) -> Result<CanonicalJobRecord, NormalizeError> {
        let cluster = U::require(record, &["ClusterId"], "job_id")?;
        let job_id = match record.get("ProcId") {
            Some(proc_id) => format!("{}_{}", cluster, proc_id),
            None => cluster.to_string(),
        };
        let mut job = CanonicalJobRecord::new(Scheduler::Htcondor, job_id);

        job.user = U::text(record, &["Owner"]);
        job.account = U::text(record, &["AcctGroup", "AccountingGroup"]);
        job.priority = U::text(record, &["JobPrio"]);
        job.status = record.get("JobStatus").and_then(JobState::from_condor_code);

        job.submit_time = U::timestamp(record, &["QDate"]);
        job.start_time = U::timestamp(record, &["JobStartDate"]);
        job.end_time = U::timestamp(record, &["CompletionDate"]);

        job.cpus_req = U::count(record, &["RequestCpus"]);
        job.cpus_alloc = U::count(record, &["CpusProvisioned"]);
        // slot1_3@host; the slot carries no CPU figure of its own
        let mut hosts = parse_exec_host(record.get("LastRemoteHost").unwrap_or_default());
        hosts.cpus = None;
        U::apply_hosts(&mut job, hosts);

        job.mem_req = record
            .get("RequestMemory")
            .and_then(|raw| parse_memory_mb(raw, MemUnit::Mega));
        job.mem_used = record
            .get("MemoryUsage")
            .and_then(|raw| parse_memory_mb(raw, MemUnit::Mega));
        job.walltime_used = U::duration(record, &["RemoteWallClockTime"]);
        job.cpu_time_used = U::duration(record, &["RemoteUserCpu"]);

        if let Some(gpus) = record.get("RequestGpus") {
            U::apply_gpus(&mut job, &parse_resources(&format!("gpu:{}", gpus)));
        }
        Ok(job)
    }

    fn normalize_node(&self, record: &RawRecord) -> Result<CanonicalNodeRecord, NormalizeError> {
        let hostname = match record.get("Machine") {
            Some(machine) => machine.to_string(),
            None => {
                let name = U::require(record, &["Name"], "hostname")?;
                name.rsplit('@').next().unwrap_or(name).to_string()
            }
        };
        let mut node = CanonicalNodeRecord::new(Scheduler::Htcondor, hostname);

        node.cpus = U::count(record, &["Cpus"]);
        node.memory_mb = record
            .get("Memory")
            .and_then(|raw| parse_memory_mb(raw, MemUnit::Mega));
        node.gpu_count = U::count(record, &["Gpus"]).unwrap_or(0);
        node.state = normalize_node_state(record.get("State").unwrap_or_default());
        node.extra = format!("{}1", SLOTS_PREFIX);
        Ok(node)
    }

    fn known_fields(&self) -> &'static [&'static str] {
        KNOWN_FIELDS
    }

    fn merge_nodes(&self, existing: &mut CanonicalNodeRecord, duplicate: CanonicalNodeRecord) {
        existing.cpus = add(existing.cpus, duplicate.cpus);
        existing.memory_mb = add(existing.memory_mb, duplicate.memory_mb);
        existing.gpu_count = existing.gpu_count.checked_add(duplicate.gpu_count).unwrap_or(0);
        if existing.state != duplicate.state {
            existing.state = "mixed".to_string();
        }
        let slots = slot_count(&existing.extra).saturating_add(slot_count(&duplicate.extra));
        existing.extra = format!("{}{}", SLOTS_PREFIX, slots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(&str, &str)]) -> RawRecord {
        let mut record = RawRecord::new(Scheduler::Htcondor, 1);
        for (k, v) in fields {
            record.insert(*k, *v);
        }
        record
    }

    #[test]
    fn test_history_record() {
        let raw = record(&[
            ("ClusterId", "5120"),
            ("ProcId", "0"),
            ("Owner", "dave"),
            ("AcctGroup", "group_bio"),
            ("JobStatus", "4"),
            ("QDate", "1709280000"),
            ("JobStartDate", "1709280120"),
            ("CompletionDate", "1709283720"),
            ("RequestCpus", "2"),
            ("RequestMemory", "4096"),
            ("MemoryUsage", "1200"),
            ("RemoteWallClockTime", "3600.0"),
            ("RequestGpus", "1"),
            ("LastRemoteHost", "slot1_2@wn07.example.org"),
        ]);
        let job = HtcondorNormalizer::new().normalize_job(&raw).unwrap();

        assert_eq!(job.job_id, "5120_0");
        assert_eq!(job.account, "group_bio");
        assert_eq!(job.status, Some(JobState::Completed));
        assert_eq!(job.queue_wait_seconds(), Some(120));
        assert_eq!(job.cpus_alloc, None);
        assert_eq!(job.nodelist, vec!["wn07.example.org"]);
        assert_eq!(job.mem_req, Some(4_096));
        assert_eq!(job.walltime_used, Some(3_600));
        assert_eq!(job.gpu_count, 1);
    }

    #[test]
    fn test_slots_merge_into_machine() {
        let normalizer = HtcondorNormalizer::new();
        let slot = |name: &str, cpus: &str, state: &str| {
            normalizer
                .normalize_node(&record(&[
                    ("Machine", "wn07"),
                    ("Name", name),
                    ("Cpus", cpus),
                    ("Memory", "2048"),
                    ("State", state),
                ]))
                .unwrap()
        };

        let mut node = slot("slot1_1@wn07", "4", "Claimed");
        normalizer.merge_nodes(&mut node, slot("slot1_2@wn07", "4", "Claimed"));
        assert_eq!(node.state, "allocated");
        normalizer.merge_nodes(&mut node, slot("slot1@wn07", "8", "Unclaimed"));

        assert_eq!(node.cpus, Some(16));
        assert_eq!(node.memory_mb, Some(6_144));
        assert_eq!(node.state, "mixed");
        assert_eq!(node.extra, "slots=3");
    }

    #[test]
    fn test_slot_merge_overflow_leaves_totals_empty() {
        let normalizer = HtcondorNormalizer::new();
        let slot = |name: &str, count: &str| {
            normalizer
                .normalize_node(&record(&[
                    ("Machine", "wn08"),
                    ("Name", name),
                    ("Cpus", count),
                    ("Memory", "2048"),
                    ("Gpus", count),
                    ("State", "Unclaimed"),
                ]))
                .unwrap()
        };

        let mut node = slot("slot1@wn08", "18446744073709551615");
        normalizer.merge_nodes(&mut node, slot("slot2@wn08", "1"));
        assert_eq!(node.cpus, None);
        assert_eq!(node.memory_mb, Some(4_096));
        assert_eq!(node.gpu_count, 0);
        assert_eq!(node.extra, "slots=2");
    }
}
