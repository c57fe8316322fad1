use once_cell::sync::Lazy;
use regex::Regex;

use super::base::{NormalizerUtils as U, SourceNormalizer};
use crate::pipeline::processing::normalize::resources::{parse_count, parse_memory_mb, parse_resources, MemUnit};
use crate::pipeline::processing::normalize::{CanonicalJobRecord, CanonicalNodeRecord, NormalizeError};
use crate::pipeline::processing::parser::uge::{HOSTNAME_KEY, RESOURCE_PREFIX};
use crate::pipeline::processing::parser::RawRecord;
use crate::types::{JobState, Scheduler};

const KNOWN_FIELDS: &[&str] = &[
    // qacct -j
    "qname", "hostname", "group", "owner", "project", "jobnumber", "taskid", "priority",
    "qsub_time", "start_time", "end_time", "slots", "failed", "exit_status", "ru_wallclock",
    "cpu", "maxvmem", "category",
    // qhost -F -xml
    "num_proc", "mem_total", "load_avg", "resource.slots", "resource.gpu",
];

static H_VMEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"h_vmem=([^,\s]+)").expect("static pattern"));
static GPU_REQUEST: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bgpu=(\d+)").expect("static pattern"));

/// `failed` is `0` or `<code> : <reason>`
fn failed_code(raw: &str) -> u64 {
    raw.split(':')
        .next()
        .and_then(|code| code.trim().parse().ok())
        .unwrap_or(0)
}

/// Normalizer for `qacct -j` blocks and `qhost -F -xml` hosts
pub struct UgeNormalizer;

impl UgeNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl SourceNormalizer for UgeNormalizer {
    fn scheduler(&self) -> Scheduler {
        Scheduler::Uge
    }

    fn normalize_job(&self, record: &RawRecord) -> Result<CanonicalJobRecord, NormalizeError> {
        let number = U::require(record, &["jobnumber"], "job_id")?;
        let job_id = match record.get("taskid").filter(|t| t.chars().all(|c| c.is_ascii_digit())) {
            Some(task) => format!("{}_{}", number, task),
            None => number.to_string(),
        };
        let mut job = CanonicalJobRecord::new(Scheduler::Uge, job_id);

        job.user = U::text(record, &["owner"]);
        job.group = U::text(record, &["group"]);
        job.account = U::text(record, &["project"]);
        job.partition = U::text(record, &["qname"]);
        job.priority = U::text(record, &["priority"]);
        job.status = match record.get("failed").map(failed_code) {
            Some(code) if code != 0 => Some(JobState::Failed),
            _ => record.get("exit_status").and_then(JobState::from_exit_status),
        };

        job.submit_time = U::timestamp(record, &["qsub_time"]);
        job.start_time = U::timestamp(record, &["start_time"]);
        job.end_time = U::timestamp(record, &["end_time"]);

        let slots = U::count(record, &["slots"]);
        job.cpus_req = slots;
        job.cpus_alloc = slots;
        if let Some(host) = record.get("hostname") {
            job.nodelist = vec![host.to_string()];
            job.nodes_alloc = Some(1);
        }

        job.walltime_used = U::duration(record, &["ru_wallclock"]);
        job.cpu_time_used = U::duration(record, &["cpu"]);
        job.mem_used = record
            .get("maxvmem")
            .and_then(|raw| parse_memory_mb(raw, MemUnit::Bytes));

        if let Some(category) = record.get("category") {
            // h_vmem is a per-slot limit
            job.mem_req = H_VMEM
                .captures(category)
                .and_then(|c| parse_memory_mb(&c[1], MemUnit::Bytes))
                .and_then(|mb| mb.checked_mul(slots.unwrap_or(1)));
            if let Some(gpus) = GPU_REQUEST.captures(category).and_then(|c| parse_count(&c[1])) {
                U::apply_gpus(&mut job, &parse_resources(&format!("gpu:{}", gpus)));
            }
        }
        Ok(job)
    }

    fn normalize_node(&self, record: &RawRecord) -> Result<CanonicalNodeRecord, NormalizeError> {
        let hostname = U::require(record, &[HOSTNAME_KEY], "hostname")?;
        let mut node = CanonicalNodeRecord::new(Scheduler::Uge, hostname);

        let slots_key = format!("{}slots", RESOURCE_PREFIX);
        let gpu_key = format!("{}gpu", RESOURCE_PREFIX);
        node.cpus = U::count(record, &[slots_key.as_str(), "num_proc"]);
        node.memory_mb = record
            .get("mem_total")
            .and_then(|raw| parse_memory_mb(raw, MemUnit::Mega));
        node.gpu_count = U::count(record, &[gpu_key.as_str()]).unwrap_or(0);
        // qhost reports no load for hosts whose execd is unreachable
        node.state = match record.get("load_avg") {
            None | Some("-") => "down",
            Some(_) => "available",
        }
        .to_string();
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
        let mut record = RawRecord::new(Scheduler::Uge, 1);
        for (k, v) in fields {
            record.insert(*k, *v);
        }
        record
    }

    #[test]
    fn test_qacct_block() {
        let raw = record(&[
            ("qname", "all.q"),
            ("hostname", "node01"),
            ("owner", "carol"),
            ("project", "astro"),
            ("jobnumber", "881"),
            ("taskid", "undefined"),
            ("qsub_time", "Fri Mar  1 08:00:00 2024"),
            ("start_time", "Fri Mar  1 08:01:00 2024"),
            ("end_time", "Fri Mar  1 09:01:00 2024"),
            ("slots", "4"),
            ("failed", "0"),
            ("exit_status", "0"),
            ("ru_wallclock", "3600s"),
            ("cpu", "14000.5"),
            ("maxvmem", "2.000G"),
            ("category", "-u carol -l gpu=1,h_vmem=2G -pe smp 4"),
        ]);
        let job = UgeNormalizer::new().normalize_job(&raw).unwrap();

        assert_eq!(job.job_id, "881");
        assert_eq!(job.status, Some(JobState::Completed));
        assert_eq!(job.cpus_alloc, Some(4));
        assert_eq!(job.nodelist, vec!["node01"]);
        assert_eq!(job.walltime_used, Some(3_600));
        assert_eq!(job.mem_used, Some(2_048));
        assert_eq!(job.mem_req, Some(8_192));
        assert_eq!(job.gpu_count, 1);
        assert_eq!(job.queue_wait_seconds(), Some(60));
    }

    #[test]
    fn test_failed_code_overrides_exit_status() {
        let raw = record(&[
            ("jobnumber", "882"),
            ("taskid", "3"),
            ("failed", "100 : assumedly after job"),
            ("exit_status", "0"),
        ]);
        let job = UgeNormalizer::new().normalize_job(&raw).unwrap();
        assert_eq!(job.job_id, "882_3");
        assert_eq!(job.status, Some(JobState::Failed));
    }

    #[test]
    fn test_oversized_vmem_request_is_empty() {
        let raw = record(&[
            ("jobnumber", "883"),
            ("slots", "4000"),
            ("category", "-l h_vmem=9000000000T"),
        ]);
        let job = UgeNormalizer::new().normalize_job(&raw).unwrap();
        assert_eq!(job.mem_req, None);
        assert_eq!(job.cpus_alloc, Some(4_000));
    }

    #[test]
    fn test_qhost_host() {
        let raw = record(&[
            (HOSTNAME_KEY, "node01"),
            ("num_proc", "32"),
            ("mem_total", "125.8G"),
            ("load_avg", "0.52"),
            ("resource.gpu", "2"),
        ]);
        let node = UgeNormalizer::new().normalize_node(&raw).unwrap();
        assert_eq!(node.cpus, Some(32));
        assert_eq!(node.memory_mb, Some(128_819));
        assert_eq!(node.gpu_count, 2);
        assert_eq!(node.state, "available");

        let down = record(&[(HOSTNAME_KEY, "node02"), ("load_avg", "-")]);
        assert_eq!(UgeNormalizer::new().normalize_node(&down).unwrap().state, "down");
    }
}
