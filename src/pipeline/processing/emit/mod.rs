//! CSV serialization of canonical records with a versioned, additive-only column order.

use std::io::{self, Write};

use tracing::{debug, info};

use crate::error::{ExportError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::normalize::timefmt::format_timestamp;
use crate::pipeline::processing::normalize::{CanonicalJobRecord, CanonicalNodeRecord};
use crate::types::RecordKind;

pub const LATEST_SCHEMA_VERSION: u8 = 2;

const JOB_COLUMNS_V1: [&str; 23] = [
    "job_id",
    "user",
    "group",
    "account",
    "partition",
    "qos",
    "priority",
    "reservation",
    "status",
    "submit_time",
    "start_time",
    "end_time",
    "cpus_req",
    "cpus_alloc",
    "mem_req",
    "mem_used",
    "walltime_used",
    "cpu_time_used",
    "nodes_alloc",
    "nodelist",
    "gpu_count",
    "gpu_types",
    "node_type",
];
const JOB_COLUMNS_V2: [&str; 2] = ["scheduler", "queue_wait_seconds"];

const NODE_COLUMNS_V1: [&str; 7] = [
    "hostname",
    "cpus",
    "memory_mb",
    "node_type",
    "state",
    "partition",
    "extra",
];
const NODE_COLUMNS_V2: [&str; 2] = ["gpu_count", "scheduler"];

const LIST_SEPARATOR: &str = ";";

fn check_version(version: u8) -> Result<()> {
    if (1..=LATEST_SCHEMA_VERSION).contains(&version) {
        Ok(())
    } else {
        Err(ExportError::Config(format!(
            "Unsupported schema version {} (supported: 1..={})",
            version, LATEST_SCHEMA_VERSION
        )))
    }
}

pub fn job_columns(version: u8) -> Vec<&'static str> {
    let mut columns = JOB_COLUMNS_V1.to_vec();
    if version >= 2 {
        columns.extend(JOB_COLUMNS_V2);
    }
    columns
}

pub fn node_columns(version: u8) -> Vec<&'static str> {
    let mut columns = NODE_COLUMNS_V1.to_vec();
    if version >= 2 {
        columns.extend(NODE_COLUMNS_V2);
    }
    columns
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Every column of the latest version, in order
fn job_row(job: &CanonicalJobRecord) -> Vec<String> {
    vec![
        job.job_id.clone(),
        job.user.clone(),
        job.group.clone(),
        job.account.clone(),
        job.partition.clone(),
        job.qos.clone(),
        job.priority.clone(),
        job.reservation.clone(),
        opt(job.status.as_ref()),
        opt(job.submit_time.as_ref().map(format_timestamp)),
        opt(job.start_time.as_ref().map(format_timestamp)),
        opt(job.end_time.as_ref().map(format_timestamp)),
        opt(job.cpus_req),
        opt(job.cpus_alloc),
        opt(job.mem_req),
        opt(job.mem_used),
        opt(job.walltime_used),
        opt(job.cpu_time_used),
        opt(job.nodes_alloc),
        job.nodelist.join(LIST_SEPARATOR),
        job.gpu_count.to_string(),
        job.gpu_types
            .iter()
            .map(|g| g.to_string())
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR),
        job.node_type.to_string(),
        job.scheduler.to_string(),
        opt(job.queue_wait_seconds()),
    ]
}

fn node_row(node: &CanonicalNodeRecord) -> Vec<String> {
    vec![
        node.hostname.clone(),
        opt(node.cpus),
        opt(node.memory_mb),
        node.node_type.to_string(),
        node.state.clone(),
        node.partition.clone(),
        node.extra.clone(),
        node.gpu_count.to_string(),
        node.scheduler.to_string(),
    ]
}

/// Counts bytes on their way to the underlying writer
struct CountingWriter<W: Write> {
    inner: W,
    bytes: usize,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.bytes += written;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writes canonical records as CSV in one schema version
#[derive(Debug, Clone, Copy)]
pub struct CsvEmitter {
    schema_version: u8,
}

impl CsvEmitter {
    pub fn new(schema_version: u8) -> Result<Self> {
        check_version(schema_version)?;
        Ok(Self { schema_version })
    }

    pub fn schema_version(&self) -> u8 {
        self.schema_version
    }

    pub fn write_jobs<W: Write>(&self, writer: W, jobs: &[CanonicalJobRecord]) -> Result<u64> {
        let columns = job_columns(self.schema_version);
        self.write(writer, RecordKind::Jobs, &columns, jobs.iter().map(job_row))
    }

    pub fn write_nodes<W: Write>(&self, writer: W, nodes: &[CanonicalNodeRecord]) -> Result<u64> {
        let columns = node_columns(self.schema_version);
        self.write(writer, RecordKind::Nodes, &columns, nodes.iter().map(node_row))
    }

    fn write<W: Write>(
        &self,
        writer: W,
        kind: RecordKind,
        columns: &[&str],
        rows: impl Iterator<Item = Vec<String>>,
    ) -> Result<u64> {
        let mut csv_writer = csv::WriterBuilder::new().from_writer(CountingWriter {
            inner: writer,
            bytes: 0,
        });
        csv_writer.write_record(columns)?;

        let mut count = 0u64;
        for row in rows {
            // later versions only append columns
            csv_writer.write_record(&row[..columns.len()])?;
            count += 1;
        }
        csv_writer.flush()?;
        let counted = csv_writer.into_inner().map_err(|e| e.into_error())?;

        metrics::emit::rows_written(&kind.to_string(), count);
        metrics::emit::bytes_written(counted.bytes);
        info!(kind = %kind, rows = count, schema_version = self.schema_version, "Emitted CSV");
        debug!(bytes = counted.bytes, "CSV bytes written");
        Ok(count)
    }
}

impl Default for CsvEmitter {
    fn default() -> Self {
        Self {
            schema_version: LATEST_SCHEMA_VERSION,
        }
    }
}
