use super::base::{normalize_node_state, NormalizerUtils as U, SourceNormalizer};
use crate::pipeline::processing::normalize::resources::{
    parse_exec_host, parse_memory_mb, parse_resources, MemUnit,
};
use crate::pipeline::processing::normalize::{CanonicalJobRecord, CanonicalNodeRecord, NormalizeError};
use crate::pipeline::processing::parser::RawRecord;
use crate::types::{JobState, Scheduler};

const KNOWN_FIELDS: &[&str] = &[
    // bjobs -o
    "JOBID", "USER", "UGROUP", "PROJ_NAME", "QUEUE", "STAT", "SLOTS", "NALLOC_SLOT",
    "EXEC_HOST", "SUBMIT_TIME", "START_TIME", "FINISH_TIME", "RUN_TIME", "CPU_USED",
    "MEMLIMIT", "MAX_MEM", "GPU_NUM", "PRIORITY", "JOB_PRIORITY",
    // bhosts
    "HOST_NAME", "STATUS", "JL/U", "MAX", "NJOBS", "RUN", "SSUSP", "USUSP", "RSV",
    "ncpus", "NCPUS", "maxmem", "MAXMEM", "ngpus", "NGPUS",
];

/// Normalizer for `bjobs -o` and `bhosts` tables
pub struct LsfNormalizer;

impl LsfNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl SourceNormalizer for LsfNormalizer {
    fn scheduler(&self) -> Scheduler {
        Scheduler::Lsf
    }

    fn normalize_job(&self, record: &RawRecord) -> Result<CanonicalJobRecord, NormalizeError> {
        let raw_id = U::require(record, &["JOBID"], "job_id")?;
        let mut job = CanonicalJobRecord::new(Scheduler::Lsf, U::array_job_id(raw_id));

        job.user = U::text(record, &["USER"]);
        job.group = U::text(record, &["UGROUP"]);
        job.account = U::text(record, &["PROJ_NAME"]);
        job.partition = U::text(record, &["QUEUE"]);
        job.priority = U::text(record, &["JOB_PRIORITY", "PRIORITY"]);
        job.status = record.get("STAT").map(JobState::from);

        job.submit_time = U::timestamp(record, &["SUBMIT_TIME"]);
        job.start_time = U::timestamp(record, &["START_TIME"]);
        job.end_time = U::timestamp(record, &["FINISH_TIME"]);

        job.cpus_req = U::count(record, &["SLOTS"]);
        let hosts = parse_exec_host(record.get("EXEC_HOST").unwrap_or_default());
        job.cpus_alloc = U::resolve_cpus_alloc(&job.job_id, U::count(record, &["NALLOC_SLOT"]), &hosts);
        U::apply_hosts(&mut job, hosts);

        let mem_limit = record.get("MEMLIMIT");
        U::check_unbounded_mem(&job.job_id, mem_limit);
        job.mem_req = mem_limit.and_then(|raw| parse_memory_mb(raw, MemUnit::Kilo));
        job.mem_used = record
            .get("MAX_MEM")
            .and_then(|raw| parse_memory_mb(raw, MemUnit::Kilo));
        job.walltime_used = U::duration(record, &["RUN_TIME"]);
        job.cpu_time_used = U::duration(record, &["CPU_USED"]);

        if let Some(gpus) = record.get("GPU_NUM") {
            U::apply_gpus(&mut job, &parse_resources(&format!("gpu:{}", gpus)));
        }
        Ok(job)
    }

    fn normalize_node(&self, record: &RawRecord) -> Result<CanonicalNodeRecord, NormalizeError> {
        let hostname = U::require(record, &["HOST_NAME"], "hostname")?;
        let mut node = CanonicalNodeRecord::new(Scheduler::Lsf, hostname);

        node.cpus = U::count(record, &["ncpus", "NCPUS", "MAX"]);
        node.memory_mb = record
            .first_of(&["maxmem", "MAXMEM"])
            .and_then(|raw| parse_memory_mb(raw, MemUnit::Mega));
        node.gpu_count = U::count(record, &["ngpus", "NGPUS"]).unwrap_or(0);
        node.state = normalize_node_state(record.get("STATUS").unwrap_or_default());
        if let Some(max) = record.get("MAX") {
            node.extra = format!("max_jobs={}", max);
        }
        Ok(node)
    }

    fn known_fields(&self) -> &'static [&'static str] {
        KNOWN_FIELDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(&str, &str)]) -> RawRecord {
        let mut record = RawRecord::new(Scheduler::Lsf, 2);
        for (k, v) in fields {
            record.insert(*k, *v);
        }
        record
    }

    #[test]
    fn test_bjobs_record() {
        let raw = record(&[
            ("JOBID", "4242[7]"),
            ("USER", "bob"),
            ("PROJ_NAME", "chem"),
            ("QUEUE", "normal"),
            ("STAT", "DONE"),
            ("SLOTS", "8"),
            ("EXEC_HOST", "4*hostA:4*hostB"),
            ("SUBMIT_TIME", "2024/05/02-09:00:00"),
            ("START_TIME", "2024/05/02-09:10:00"),
            ("RUN_TIME", "600"),
            ("MEMLIMIT", "-"),
            ("MAX_MEM", "524288"),
            ("GPU_NUM", "2"),
        ]);
        let job = LsfNormalizer::new().normalize_job(&raw).unwrap();

        assert_eq!(job.job_id, "4242_7");
        assert_eq!(job.account, "chem");
        assert_eq!(job.status, Some(JobState::Completed));
        assert_eq!(job.cpus_alloc, Some(8));
        assert_eq!(job.nodelist, vec!["hostA", "hostB"]);
        assert_eq!(job.nodes_alloc, Some(2));
        assert_eq!(job.mem_req, None);
        assert_eq!(job.mem_used, Some(512));
        assert_eq!(job.queue_wait_seconds(), Some(600));
        assert_eq!(job.gpu_count, 2);
    }

    #[test]
    fn test_bhosts_record() {
        let raw = record(&[("HOST_NAME", "hostA"), ("STATUS", "closed_Full"), ("MAX", "16")]);
        let node = LsfNormalizer::new().normalize_node(&raw).unwrap();
        assert_eq!(node.cpus, Some(16));
        assert_eq!(node.state, "closed");
        assert_eq!(node.extra, "max_jobs=16");
    }
}
