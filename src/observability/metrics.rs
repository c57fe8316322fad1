//! Metrics for the export pipeline
//!
//! Every phase records through the `metrics` facade using the names in
//! [`MetricName`]. A Prometheus recorder is installed by [`init`]; batch runs
//! write the rendered text to a file for the node-exporter textfile collector.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{debug, info};

use crate::error::{ExportError, Result};

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Run metrics
    RunsStarted,
    RunsFailed,
    RunDuration,

    // Parser metrics
    ParserBytesProcessed,
    ParserRecordsExtracted,
    ParserLinesSkipped,
    ParserRecordsFiltered,
    ParserDuration,

    // Normalize metrics
    NormalizeRecordsProcessed,
    NormalizeRecordsRejected,
    NormalizeRecordsDeduplicated,
    NormalizeAllocationMismatches,
    NormalizeDuration,

    // Pseudonymize metrics
    PseudonymizeValuesReplaced,
    PseudonymizeEntriesMinted,
    PseudonymizeHashCollisions,
    PseudonymizeReveals,

    // Emit metrics
    EmitRowsWritten,
    EmitBytesWritten,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RunsStarted => "hpc_export_runs_started_total",
            MetricName::RunsFailed => "hpc_export_runs_failed_total",
            MetricName::RunDuration => "hpc_export_run_duration_seconds",

            MetricName::ParserBytesProcessed => "hpc_export_parser_bytes_processed",
            MetricName::ParserRecordsExtracted => "hpc_export_parser_records_extracted_total",
            MetricName::ParserLinesSkipped => "hpc_export_parser_lines_skipped_total",
            MetricName::ParserRecordsFiltered => "hpc_export_parser_records_filtered_total",
            MetricName::ParserDuration => "hpc_export_parser_duration_seconds",

            MetricName::NormalizeRecordsProcessed => "hpc_export_normalize_records_processed_total",
            MetricName::NormalizeRecordsRejected => "hpc_export_normalize_records_rejected_total",
            MetricName::NormalizeRecordsDeduplicated => {
                "hpc_export_normalize_records_deduplicated_total"
            }
            MetricName::NormalizeAllocationMismatches => {
                "hpc_export_normalize_allocation_mismatches_total"
            }
            MetricName::NormalizeDuration => "hpc_export_normalize_duration_seconds",

            MetricName::PseudonymizeValuesReplaced => "hpc_export_pseudonymize_values_replaced_total",
            MetricName::PseudonymizeEntriesMinted => "hpc_export_pseudonymize_entries_minted_total",
            MetricName::PseudonymizeHashCollisions => {
                "hpc_export_pseudonymize_hash_collisions_total"
            }
            MetricName::PseudonymizeReveals => "hpc_export_pseudonymize_reveals_total",

            MetricName::EmitRowsWritten => "hpc_export_emit_rows_written_total",
            MetricName::EmitBytesWritten => "hpc_export_emit_bytes_written",
        }
    }

    /// Get metric metadata: (phase, description, unit)
    pub fn metadata(&self) -> (&'static str, &'static str, Option<&'static str>) {
        match self {
            MetricName::RunsStarted => ("run", "Export runs started", None),
            MetricName::RunsFailed => ("run", "Export runs aborted by a fatal error", None),
            MetricName::RunDuration => ("run", "Export run duration", Some("s")),

            MetricName::ParserBytesProcessed => ("parser", "Bytes of scheduler output parsed", Some("bytes")),
            MetricName::ParserRecordsExtracted => ("parser", "Raw records extracted", None),
            MetricName::ParserLinesSkipped => ("parser", "Malformed lines skipped", None),
            MetricName::ParserRecordsFiltered => ("parser", "Records filtered on purpose", None),
            MetricName::ParserDuration => ("parser", "Parse duration", Some("s")),

            MetricName::NormalizeRecordsProcessed => ("normalize", "Canonical records produced", None),
            MetricName::NormalizeRecordsRejected => ("normalize", "Records rejected for a missing identity", None),
            MetricName::NormalizeRecordsDeduplicated => ("normalize", "Duplicate records dropped", None),
            MetricName::NormalizeAllocationMismatches => {
                ("normalize", "Reported CPU allocation disagreeing with the host list", None)
            }
            MetricName::NormalizeDuration => ("normalize", "Normalization duration", Some("s")),

            MetricName::PseudonymizeValuesReplaced => ("pseudonymize", "Field values replaced", None),
            MetricName::PseudonymizeEntriesMinted => ("pseudonymize", "New mapping entries", None),
            MetricName::PseudonymizeHashCollisions => ("pseudonymize", "Keyed-hash collisions", None),
            MetricName::PseudonymizeReveals => ("pseudonymize", "Pseudonyms revealed", None),

            MetricName::EmitRowsWritten => ("emit", "CSV rows written", None),
            MetricName::EmitBytesWritten => ("emit", "CSV bytes written", Some("bytes")),
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            RunsStarted,
            RunsFailed,
            RunDuration,
            ParserBytesProcessed,
            ParserRecordsExtracted,
            ParserLinesSkipped,
            ParserRecordsFiltered,
            ParserDuration,
            NormalizeRecordsProcessed,
            NormalizeRecordsRejected,
            NormalizeRecordsDeduplicated,
            NormalizeAllocationMismatches,
            NormalizeDuration,
            PseudonymizeValuesReplaced,
            PseudonymizeEntriesMinted,
            PseudonymizeHashCollisions,
            PseudonymizeReveals,
            EmitRowsWritten,
            EmitBytesWritten,
        ]
        .into_iter()
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once; later calls are no-ops.
pub fn init() -> Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ExportError::Config(format!("Failed to install Prometheus recorder: {}", e)))?;

    for metric in MetricName::all_metrics() {
        let (phase, description, _) = metric.metadata();
        if metric.as_str().ends_with("_total") {
            ::metrics::describe_counter!(metric.as_str(), description);
        } else {
            ::metrics::describe_histogram!(metric.as_str(), description);
        }
        debug!(metric = metric.as_str(), phase, "Registered metric");
    }
    METRICS_HANDLE.set(handle).ok();
    info!("Metrics system initialized");
    Ok(())
}

/// Render the current metrics in Prometheus text format, if a recorder is installed
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

/// Write the rendered metrics to `path`, replacing any earlier contents
pub fn write_textfile(path: &Path) -> Result<()> {
    let Some(text) = render() else {
        return Ok(());
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    // the collector must never see a partially written file
    let tmp = path.with_extension("prom.tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), "Wrote metrics textfile");
    Ok(())
}

// ============================================================================
// Run Metrics
// ============================================================================

pub mod run {
    use super::MetricName;

    pub fn started(scheduler: &str, kind: &str) {
        ::metrics::counter!(
            MetricName::RunsStarted.as_str(),
            "scheduler" => scheduler.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    pub fn failed(scheduler: &str, kind: &str) {
        ::metrics::counter!(
            MetricName::RunsFailed.as_str(),
            "scheduler" => scheduler.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::RunDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Parser Metrics
// ============================================================================

pub mod parser {
    use super::MetricName;

    /// Record input size
    pub fn bytes_processed(bytes: usize) {
        ::metrics::histogram!(MetricName::ParserBytesProcessed.as_str()).record(bytes as f64);
    }

    /// Record extracted raw records
    pub fn records_extracted(count: u64) {
        ::metrics::counter!(MetricName::ParserRecordsExtracted.as_str()).increment(count);
    }

    /// Record skipped malformed lines
    pub fn lines_skipped(count: u64) {
        ::metrics::counter!(MetricName::ParserLinesSkipped.as_str()).increment(count);
    }

    /// Record filtered rows (job steps, template hosts, non-final records)
    pub fn records_filtered(count: u64) {
        ::metrics::counter!(MetricName::ParserRecordsFiltered.as_str()).increment(count);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::ParserDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Normalize Metrics
// ============================================================================

pub mod normalize {
    use super::MetricName;

    pub fn records_processed(scheduler: &str, count: u64) {
        ::metrics::counter!(
            MetricName::NormalizeRecordsProcessed.as_str(),
            "scheduler" => scheduler.to_string()
        )
        .increment(count);
    }

    pub fn records_rejected(scheduler: &str, count: u64) {
        ::metrics::counter!(
            MetricName::NormalizeRecordsRejected.as_str(),
            "scheduler" => scheduler.to_string()
        )
        .increment(count);
    }

    pub fn records_deduplicated(count: u64) {
        ::metrics::counter!(MetricName::NormalizeRecordsDeduplicated.as_str()).increment(count);
    }

    pub fn allocation_mismatch() {
        ::metrics::counter!(MetricName::NormalizeAllocationMismatches.as_str()).increment(1);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::NormalizeDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Pseudonymize Metrics
// ============================================================================

pub mod pseudonymize {
    use super::MetricName;

    pub fn values_replaced(count: u64) {
        ::metrics::counter!(MetricName::PseudonymizeValuesReplaced.as_str()).increment(count);
    }

    pub fn entry_minted(category: &str) {
        ::metrics::counter!(
            MetricName::PseudonymizeEntriesMinted.as_str(),
            "category" => category.to_string()
        )
        .increment(1);
    }

    pub fn hash_collision() {
        ::metrics::counter!(MetricName::PseudonymizeHashCollisions.as_str()).increment(1);
    }

    pub fn reveal() {
        ::metrics::counter!(MetricName::PseudonymizeReveals.as_str()).increment(1);
    }
}

// ============================================================================
// Emit Metrics
// ============================================================================

pub mod emit {
    use super::MetricName;

    pub fn rows_written(kind: &str, count: u64) {
        ::metrics::counter!(MetricName::EmitRowsWritten.as_str(), "kind" => kind.to_string())
            .increment(count);
    }

    pub fn bytes_written(bytes: usize) {
        ::metrics::histogram!(MetricName::EmitBytesWritten.as_str()).record(bytes as f64);
    }
}
