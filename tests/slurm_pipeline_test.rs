use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Result;
use tempfile::tempdir;
use uuid::Uuid;

use hpc_export::app::{ExportUseCase, RunSummary};
use hpc_export::config::Config;
use hpc_export::infra::{CsvOutputAdapter, InMemorySecurityLog};
use hpc_export::pipeline::emit::{job_columns, CsvEmitter};
use hpc_export::pipeline::normalize::classify::Classifier;
use hpc_export::pipeline::normalize::Normalizer;
use hpc_export::pipeline::parser::slurm::SacctParser;
use hpc_export::pipeline::parser::SchedulerParser;
use hpc_export::types::{RecordKind, Scheduler};

const SACCT_JOBS: &str = include_str!("resources/sacct_jobs.txt");
const SINFO_NODES: &str = include_str!("resources/sinfo_nodes.txt");

fn read_rows(path: &Path) -> Result<Vec<HashMap<String, String>>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect(),
        );
    }
    Ok(rows)
}

fn export(config: &Config, kind: RecordKind, input: &str, output: &Path) -> Result<RunSummary> {
    let log = InMemorySecurityLog::new();
    let emitter = CsvEmitter::new(config.output.schema_version)?;
    let sink = CsvOutputAdapter::new(Some(output), emitter);
    let mut use_case = ExportUseCase::new(config, Box::new(sink), &log, Uuid::new_v4());
    Ok(use_case.run(Scheduler::Slurm, kind, input, None)?)
}

#[test]
fn test_sacct_steps_collapse_to_jobs_and_array_tasks() -> Result<()> {
    let dir = tempdir()?;
    let output = dir.path().join("jobs.csv");
    let summary = export(&Config::default(), RecordKind::Jobs, SACCT_JOBS, &output)?;

    assert_eq!(summary.parsed, 4);
    assert_eq!(summary.filtered, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.deduplicated, 1);
    assert_eq!(summary.emitted, 2);

    let rows = read_rows(&output)?;
    let ids: Vec<&str> = rows.iter().map(|r| r["job_id"].as_str()).collect();
    assert_eq!(ids, vec!["12345", "12345_1"]);

    let unique: HashSet<&str> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());
    Ok(())
}

#[test]
fn test_sacct_job_values_are_canonical() -> Result<()> {
    let dir = tempdir()?;
    let output = dir.path().join("jobs.csv");
    export(&Config::default(), RecordKind::Jobs, SACCT_JOBS, &output)?;

    let rows = read_rows(&output)?;
    let gpu_job = &rows[0];
    // the complete row wins over the later PENDING duplicate
    assert_eq!(gpu_job["status"], "COMPLETED");
    assert_eq!(gpu_job["user"], "alice");
    assert_eq!(gpu_job["start_time"], "2024-03-01T08:05:00");
    assert_eq!(gpu_job["mem_req"], "16384");
    assert_eq!(gpu_job["walltime_used"], "3600");
    assert_eq!(gpu_job["cpu_time_used"], "18000");
    assert_eq!(gpu_job["gpu_count"], "3");
    assert_eq!(gpu_job["gpu_types"], "v100:2;a100:1");
    assert_eq!(gpu_job["node_type"], "gpu");
    assert_eq!(gpu_job["queue_wait_seconds"], "300");
    assert_eq!(gpu_job["scheduler"], "slurm");

    let array_task = &rows[1];
    assert_eq!(array_task["status"], "FAILED");
    assert_eq!(array_task["mem_req"], "16000");
    assert_eq!(array_task["nodes_alloc"], "2");
    assert_eq!(array_task["nodelist"], "node01;node02");
    assert_eq!(array_task["gpu_count"], "0");
    assert_eq!(array_task["gpu_types"], "");
    assert_eq!(array_task["node_type"], "highmem");
    assert_eq!(array_task["queue_wait_seconds"], "600");
    Ok(())
}

#[test]
fn test_schema_version_one_drops_trailing_columns() -> Result<()> {
    let dir = tempdir()?;
    let output = dir.path().join("jobs_v1.csv");
    let mut config = Config::default();
    config.output.schema_version = 1;
    export(&config, RecordKind::Jobs, SACCT_JOBS, &output)?;

    let mut reader = csv::Reader::from_path(&output)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    assert_eq!(headers, job_columns(1));
    assert!(!headers.contains(&"queue_wait_seconds".to_string()));
    Ok(())
}

#[test]
fn test_sinfo_partitions_merge_per_node() -> Result<()> {
    let dir = tempdir()?;
    let output = dir.path().join("nodes.csv");
    let summary = export(&Config::default(), RecordKind::Nodes, SINFO_NODES, &output)?;

    assert_eq!(summary.parsed, 4);
    assert_eq!(summary.filtered, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.deduplicated, 1);
    assert_eq!(summary.emitted, 3);

    let rows = read_rows(&output)?;
    let hosts: Vec<&str> = rows.iter().map(|r| r["hostname"].as_str()).collect();
    assert_eq!(hosts, vec!["node01", "gpu01", "node02"]);

    assert_eq!(rows[0]["partition"], "batch,highmem");
    assert_eq!(rows[0]["node_type"], "highmem");
    assert_eq!(rows[0]["state"], "idle");
    assert_eq!(rows[1]["gpu_count"], "4");
    assert_eq!(rows[1]["node_type"], "gpu");
    assert_eq!(rows[1]["extra"], "gpu:a100:4(S:0-1)");
    assert_eq!(rows[2]["state"], "down");
    assert_eq!(rows[2]["node_type"], "compute");
    Ok(())
}

#[test]
fn test_custom_rules_replace_defaults() -> Result<()> {
    let config = Config::from_toml_str(
        r#"
[[classification.slurm]]
field = "nodelist"
pattern = "node01"
label = "fat"
"#,
    )?;
    let classifier = Classifier::from_specs(&config.classification.rules_for(Scheduler::Slurm))?;
    let normalizer = Normalizer::new(Scheduler::Slurm, classifier)?;

    let report = SacctParser.parse(SACCT_JOBS);
    let outcome = normalizer.normalize_jobs(&report.records);
    let types: Vec<String> = outcome.records.iter().map(|j| j.node_type.to_string()).collect();
    // no gpu rule any more: the first job falls through to compute
    assert_eq!(types, vec!["compute", "fat"]);
    Ok(())
}
