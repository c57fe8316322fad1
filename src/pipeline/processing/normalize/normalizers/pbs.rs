use super::base::{normalize_node_state, NormalizerUtils as U, SourceNormalizer};
use crate::pipeline::processing::normalize::resources::{
    parse_exec_host, parse_memory_mb, parse_resources, MemUnit,
};
use crate::pipeline::processing::normalize::{CanonicalJobRecord, CanonicalNodeRecord, NormalizeError};
use crate::pipeline::processing::parser::pbs::{CPUS_KEY, HOSTNAME_KEY, JOB_ID_KEY, RECORD_TIME_KEY};
use crate::pipeline::processing::parser::RawRecord;
use crate::types::{JobState, Scheduler};

const KNOWN_FIELDS: &[&str] = &[
    // accounting
    JOB_ID_KEY, RECORD_TIME_KEY, "user", "group", "account", "Account_Name", "queue",
    "resvID", "Exit_status", "qtime", "ctime", "start", "end", "Resource_List.ncpus",
    "resources_used.ncpus", "Resource_List.mem", "resources_used.mem", "resources_used.vmem",
    "resources_used.walltime", "resources_used.cput", "Resource_List.nodect",
    "Resource_List.ngpus", "Resource_List.qos", "exec_host",
    // pbsnodes
    HOSTNAME_KEY, CPUS_KEY, "np", "resources_available.ncpus", "resources_available.mem",
    "resources_available.ngpus", "gpus", "state", "queue", "resources_available.Qlist",
    "properties", "resources_available.host",
];

/// `1234.server` → `1234`; `1234[5].server` → `1234_5`
fn job_id(raw: &str) -> String {
    let base = match raw.find(']') {
        Some(close) => &raw[..=close],
        None => raw.split('.').next().unwrap_or(raw),
    };
    U::array_job_id(base)
}

/// Normalizer for PBS accounting `E` records and `pbsnodes -a` blocks
pub struct PbsNormalizer;

impl PbsNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl SourceNormalizer for PbsNormalizer {
    fn scheduler(&self) -> Scheduler {
        Scheduler::Pbs
    }

    fn normalize_job(&self, record: &RawRecord) -> Result<CanonicalJobRecord, NormalizeError> {
        let raw_id = U::require(record, &[JOB_ID_KEY], "job_id")?;
        let mut job = CanonicalJobRecord::new(Scheduler::Pbs, job_id(raw_id));

        job.user = U::text(record, &["user"]);
        job.group = U::text(record, &["group"]);
        job.account = U::text(record, &["account", "Account_Name"]);
        job.partition = U::text(record, &["queue"]);
        job.qos = U::text(record, &["Resource_List.qos"]);
        job.reservation = U::text(record, &["resvID"]);
        job.status = record
            .get("Exit_status")
            .and_then(JobState::from_exit_status);

        job.submit_time = U::timestamp(record, &["qtime", "ctime"]);
        job.start_time = U::timestamp(record, &["start"]);
        job.end_time = U::timestamp(record, &["end", RECORD_TIME_KEY]);

        job.cpus_req = U::count(record, &["Resource_List.ncpus"]);
        job.nodes_alloc = U::count(record, &["Resource_List.nodect"]);
        let hosts = parse_exec_host(record.get("exec_host").unwrap_or_default());
        job.cpus_alloc = U::resolve_cpus_alloc(
            &job.job_id,
            U::count(record, &["resources_used.ncpus"]),
            &hosts,
        );
        U::apply_hosts(&mut job, hosts);

        job.mem_req = record
            .get("Resource_List.mem")
            .and_then(|raw| parse_memory_mb(raw, MemUnit::Bytes));
        job.mem_used = record
            .first_of(&["resources_used.mem", "resources_used.vmem"])
            .and_then(|raw| parse_memory_mb(raw, MemUnit::Bytes));
        job.walltime_used = U::duration(record, &["resources_used.walltime"]);
        job.cpu_time_used = U::duration(record, &["resources_used.cput"]);

        if let Some(ngpus) = record.get("Resource_List.ngpus") {
            U::apply_gpus(&mut job, &parse_resources(&format!("gpu:{}", ngpus)));
        }
        Ok(job)
    }

    fn normalize_node(&self, record: &RawRecord) -> Result<CanonicalNodeRecord, NormalizeError> {
        let hostname = U::require(record, &[HOSTNAME_KEY], "hostname")?;
        let mut node = CanonicalNodeRecord::new(Scheduler::Pbs, hostname);

        node.cpus = U::count(record, &[CPUS_KEY]);
        node.memory_mb = record
            .get("resources_available.mem")
            .and_then(|raw| parse_memory_mb(raw, MemUnit::Bytes));
        node.gpu_count = U::count(record, &["resources_available.ngpus", "gpus"]).unwrap_or(0);
        node.state = normalize_node_state(record.get("state").unwrap_or_default());
        node.partition = U::text(record, &["queue", "resources_available.Qlist"]);
        node.extra = U::text(record, &["properties"]);
        Ok(node)
    }

    fn known_fields(&self) -> &'static [&'static str] {
        KNOWN_FIELDS
    }
}
