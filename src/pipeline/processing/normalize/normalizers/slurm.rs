use super::base::{normalize_node_state, NormalizerUtils as U, SourceNormalizer};
use crate::pipeline::processing::normalize::resources::{
    expand_hostlist, parse_memory, parse_memory_mb, parse_resources, MemUnit,
};
use crate::pipeline::processing::normalize::{CanonicalJobRecord, CanonicalNodeRecord, NormalizeError};
use crate::pipeline::processing::parser::RawRecord;
use crate::types::{JobState, Scheduler};

const KNOWN_FIELDS: &[&str] = &[
    // sacct
    "JobID", "JobIDRaw", "User", "Group", "Account", "Partition", "QOS", "Priority",
    "Reservation", "State", "Submit", "Start", "End", "ReqCPUS", "AllocCPUS", "NCPUS",
    "ReqMem", "MaxRSS", "Elapsed", "ElapsedRaw", "TotalCPU", "CPUTimeRAW", "NNodes",
    "AllocNodes", "NodeList", "AllocTRES", "ReqTRES", "AllocGRES", "ReqGRES",
    // sinfo
    "NodeName", "CPUs", "Memory", "Gres", "State",
];

/// Normalizer for `sacct --parsable2` and `sinfo -N` records
pub struct SlurmNormalizer;

impl SlurmNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl SourceNormalizer for SlurmNormalizer {
    fn scheduler(&self) -> Scheduler {
        Scheduler::Slurm
    }

    fn normalize_job(&self, record: &RawRecord) -> Result<CanonicalJobRecord, NormalizeError> {
        let job_id = U::require(record, &["JobID", "JobIDRaw"], "job_id")?;
        let mut job = CanonicalJobRecord::new(Scheduler::Slurm, job_id);

        job.user = U::text(record, &["User"]);
        job.group = U::text(record, &["Group"]);
        job.account = U::text(record, &["Account"]);
        job.partition = U::text(record, &["Partition"]);
        job.qos = U::text(record, &["QOS"]);
        job.priority = U::text(record, &["Priority"]);
        job.reservation = U::text(record, &["Reservation"]);
        job.status = record.get("State").map(JobState::from);

        job.submit_time = U::timestamp(record, &["Submit"]);
        job.start_time = U::timestamp(record, &["Start"]);
        job.end_time = U::timestamp(record, &["End"]);

        let alloc_tres = parse_resources(record.get("AllocTRES").unwrap_or_default());
        let req_tres = parse_resources(record.get("ReqTRES").unwrap_or_default());

        job.cpus_req = U::count(record, &["ReqCPUS"]).or(req_tres.cpus);
        job.cpus_alloc = U::count(record, &["AllocCPUS", "NCPUS"]).or(alloc_tres.cpus);
        job.nodes_alloc = U::count(record, &["NNodes", "AllocNodes"]).or(alloc_tres.nodes);
        job.nodelist = expand_hostlist(record.get("NodeList").unwrap_or_default());
        if job.nodes_alloc.is_none() && !job.nodelist.is_empty() {
            job.nodes_alloc = Some(job.nodelist.len() as u64);
        }

        let req_mem = record.get("ReqMem");
        U::check_unbounded_mem(&job.job_id, req_mem);
        job.mem_req = req_mem
            .and_then(|raw| parse_memory(raw, MemUnit::Mega))
            .and_then(|mem| mem.total_mb(job.cpus_req.or(job.cpus_alloc), job.nodes_alloc))
            .or(req_tres.mem_mb);
        job.mem_used = record
            .get("MaxRSS")
            .and_then(|raw| parse_memory_mb(raw, MemUnit::Kilo));

        job.walltime_used = U::count(record, &["ElapsedRaw"]).or_else(|| U::duration(record, &["Elapsed"]));
        job.cpu_time_used = U::duration(record, &["TotalCPU"]).or_else(|| U::count(record, &["CPUTimeRAW"]));

        // AllocTRES is authoritative; older sacct only has AllocGRES
        let gres = if alloc_tres.gpus.is_empty() {
            parse_resources(record.first_of(&["AllocGRES", "ReqGRES"]).unwrap_or_default())
        } else {
            alloc_tres
        };
        U::apply_gpus(&mut job, &gres);

        Ok(job)
    }

    fn normalize_node(&self, record: &RawRecord) -> Result<CanonicalNodeRecord, NormalizeError> {
        let hostname = U::require(record, &["NodeName"], "hostname")?;
        let mut node = CanonicalNodeRecord::new(Scheduler::Slurm, hostname);

        node.cpus = U::count(record, &["CPUs"]);
        node.memory_mb = record
            .get("Memory")
            .and_then(|raw| parse_memory_mb(raw, MemUnit::Mega));
        node.state = normalize_node_state(record.get("State").unwrap_or_default());
        // `batch*` marks the default partition
        node.partition = record
            .get("Partition")
            .map(|p| p.trim_end_matches('*').to_string())
            .unwrap_or_default();

        if let Some(gres) = record.get("Gres").filter(|g| *g != "(null)") {
            node.gpu_count = parse_resources(gres).gpus.count();
            node.extra = gres.to_string();
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
    use crate::pipeline::processing::normalize::timefmt::format_timestamp;
    use crate::pipeline::processing::normalize::GpuType;

    fn record(fields: &[(&str, &str)]) -> RawRecord {
        let mut record = RawRecord::new(Scheduler::Slurm, 2);
        for (k, v) in fields {
            record.insert(*k, *v);
        }
        record
    }

    #[test]
    fn test_sacct_job_fields() {
        let raw = record(&[
            ("JobID", "12345_1"),
            ("User", "alice"),
            ("Account", "physics"),
            ("Partition", "gpu"),
            ("State", "CANCELLED by 1001"),
            ("Submit", "2024-03-01T08:00:00"),
            ("Start", "2024-03-01T08:05:00"),
            ("End", "Unknown"),
            ("ReqCPUS", "4"),
            ("AllocCPUS", "4"),
            ("ReqMem", "4000Mc"),
            ("MaxRSS", "2048K"),
            ("Elapsed", "01:00:00"),
            ("TotalCPU", "03:30:00"),
            ("NodeList", "gpu[01-02]"),
            ("AllocTRES", "billing=4,cpu=4,gres/gpu:a100=2,gres/gpu=2,mem=16000M,node=2"),
        ]);
        let job = SlurmNormalizer::new().normalize_job(&raw).unwrap();

        assert_eq!(job.job_id, "12345_1");
        assert_eq!(job.status, Some(JobState::Cancelled));
        assert_eq!(format_timestamp(&job.start_time.unwrap()), "2024-03-01T08:05:00");
        assert_eq!(job.end_time, None);
        assert_eq!(job.mem_req, Some(16_000));
        assert_eq!(job.mem_used, Some(2));
        assert_eq!(job.walltime_used, Some(3_600));
        assert_eq!(job.cpu_time_used, Some(12_600));
        assert_eq!(job.nodelist, vec!["gpu01", "gpu02"]);
        assert_eq!(job.nodes_alloc, Some(2));
        assert_eq!(job.gpu_count, 2);
        assert_eq!(job.gpu_types, vec![GpuType::new("a100", 2)]);
    }

    #[test]
    fn test_unbounded_mem_request_is_empty() {
        let raw = record(&[("JobID", "7"), ("ReqMem", "9223372036854775807Mn")]);
        let job = SlurmNormalizer::new().normalize_job(&raw).unwrap();
        assert_eq!(job.mem_req, None);
    }

    #[test]
    fn test_overflowing_fields_are_left_empty() {
        let raw = record(&[
            ("JobID", "8"),
            ("ReqCPUS", "4"),
            ("ReqMem", "9000000000000000000Mc"),
            ("Elapsed", "300000000000000-00:00:00"),
            ("AllocTRES", "cpu=4,gres/gpu:a100=1e20,gres/gpu:v100=1e20"),
            ("NodeList", "n[0-99999999999]"),
        ]);
        let job = SlurmNormalizer::new().normalize_job(&raw).unwrap();
        assert_eq!(job.mem_req, None);
        assert_eq!(job.walltime_used, None);
        assert_eq!(job.gpu_count, 0);
        assert!(job.gpu_types.is_empty());
        assert_eq!(job.nodelist, vec!["n[0-99999999999]"]);
        assert_eq!(job.cpus_alloc, Some(4));
    }

    #[test]
    fn test_missing_job_id_is_rejected() {
        let raw = record(&[("User", "alice")]);
        let err = SlurmNormalizer::new().normalize_job(&raw).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::MissingIdentity {
                field: "job_id",
                line: 2
            }
        );
    }

    #[test]
    fn test_sinfo_node() {
        let raw = record(&[
            ("NodeName", "gpu01"),
            ("CPUs", "48"),
            ("Memory", "385000"),
            ("Gres", "gpu:a100:4(S:0-1)"),
            ("Partition", "gpu*"),
            ("State", "mixed"),
        ]);
        let node = SlurmNormalizer::new().normalize_node(&raw).unwrap();
        assert_eq!(node.cpus, Some(48));
        assert_eq!(node.memory_mb, Some(385_000));
        assert_eq!(node.gpu_count, 4);
        assert_eq!(node.partition, "gpu");
        assert_eq!(node.state, "mixed");
        assert_eq!(node.extra, "gpu:a100:4(S:0-1)");
    }
}
