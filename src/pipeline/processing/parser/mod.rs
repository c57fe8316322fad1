use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AdapterConfig;
use crate::observability::metrics;
use crate::types::{RecordKind, Scheduler};

pub mod htcondor;
pub mod lsf;
pub mod pbs;
pub mod slurm;
pub mod uge;

/// One record of scheduler output as a scheduler-native key/value bag.
///
/// `line` is the 1-based line of the input where the record starts, so skipped
/// and rejected records can be traced back to the raw text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub scheduler: Scheduler,
    pub line: usize,
    pub fields: BTreeMap<String, String>,
}

/// Accounting rows and inventory rows share the same shape
pub type RawJobRecord = RawRecord;
pub type RawNodeRecord = RawRecord;

impl RawRecord {
    pub fn new(scheduler: Scheduler, line: usize) -> Self {
        Self {
            scheduler,
            line,
            fields: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Trimmed, non-empty value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// First non-empty value among `keys`, in order
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }
}

/// A line (or block) of input that did not match the expected shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedLine {
    pub line: usize,
    pub reason: String,
}

/// Tagged result of validating one tokenized line or block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Well-formed record
    Record(RawRecord),
    /// Malformed input, counted as skipped
    Skipped(SkippedLine),
    /// Well-formed but intentionally dropped (job steps, the UGE `global` host, non-final PBS records)
    Filtered { line: usize, reason: String },
}

impl ParseOutcome {
    pub fn skipped(line: usize, reason: impl Into<String>) -> Self {
        ParseOutcome::Skipped(SkippedLine {
            line,
            reason: reason.into(),
        })
    }

    pub fn filtered(line: usize, reason: impl Into<String>) -> Self {
        ParseOutcome::Filtered {
            line,
            reason: reason.into(),
        }
    }
}

/// Everything an adapter produced from one input
#[derive(Debug, Default, Clone)]
pub struct ParseReport {
    pub records: Vec<RawRecord>,
    pub skipped: Vec<SkippedLine>,
    pub filtered: usize,
}

impl ParseReport {
    pub fn push(&mut self, outcome: ParseOutcome) {
        match outcome {
            ParseOutcome::Record(record) => self.records.push(record),
            ParseOutcome::Skipped(skip) => {
                debug!(line = skip.line, reason = %skip.reason, "Skipping malformed input");
                self.skipped.push(skip);
            }
            ParseOutcome::Filtered { line, reason } => {
                debug!(line, reason = %reason, "Filtered record");
                self.filtered += 1;
            }
        }
    }

    pub fn parsed(&self) -> usize {
        self.records.len()
    }
}

impl FromIterator<ParseOutcome> for ParseReport {
    fn from_iter<I: IntoIterator<Item = ParseOutcome>>(iter: I) -> Self {
        let mut report = ParseReport::default();
        for outcome in iter {
            report.push(outcome);
        }
        report
    }
}

/// A scheduler adapter: turns the raw text of one command's output into raw records
pub trait SchedulerParser {
    fn scheduler(&self) -> Scheduler;

    fn kind(&self) -> RecordKind;

    fn parse(&self, input: &str) -> ParseReport;
}

/// A wrapper that adds metrics to any parser implementation
pub struct MetricsParser<P: SchedulerParser> {
    inner: P,
}

impl<P: SchedulerParser> MetricsParser<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: SchedulerParser> SchedulerParser for MetricsParser<P> {
    fn scheduler(&self) -> Scheduler {
        self.inner.scheduler()
    }

    fn kind(&self) -> RecordKind {
        self.inner.kind()
    }

    fn parse(&self, input: &str) -> ParseReport {
        let start_time = std::time::Instant::now();
        let report = self.inner.parse(input);

        metrics::parser::bytes_processed(input.len());
        metrics::parser::records_extracted(report.parsed() as u64);
        metrics::parser::lines_skipped(report.skipped.len() as u64);
        metrics::parser::records_filtered(report.filtered as u64);
        metrics::parser::duration(start_time.elapsed().as_secs_f64());

        info!(
            scheduler = %self.inner.scheduler(),
            kind = %self.inner.kind(),
            parsed = report.parsed(),
            skipped = report.skipped.len(),
            filtered = report.filtered,
            "Parsed scheduler output"
        );
        report
    }
}

/// Pick the adapter for a scheduler and record kind
pub fn parser_for(
    scheduler: Scheduler,
    kind: RecordKind,
    adapters: &AdapterConfig,
) -> Box<dyn SchedulerParser> {
    match (scheduler, kind) {
        (Scheduler::Slurm, RecordKind::Jobs) => Box::new(MetricsParser::new(slurm::SacctParser)),
        (Scheduler::Slurm, RecordKind::Nodes) => Box::new(MetricsParser::new(slurm::SinfoParser)),
        (Scheduler::Pbs, RecordKind::Jobs) => {
            Box::new(MetricsParser::new(pbs::PbsAccountingParser))
        }
        (Scheduler::Pbs, RecordKind::Nodes) => Box::new(MetricsParser::new(pbs::PbsNodesParser)),
        (Scheduler::Lsf, kind) => Box::new(MetricsParser::new(lsf::LsfTabularParser::new(
            kind,
            adapters.lsf.columns_for(kind),
        ))),
        (Scheduler::Uge, RecordKind::Jobs) => Box::new(MetricsParser::new(uge::QacctParser)),
        (Scheduler::Uge, RecordKind::Nodes) => Box::new(MetricsParser::new(uge::QhostXmlParser)),
        (Scheduler::Htcondor, kind) => Box::new(MetricsParser::new(
            htcondor::CondorParser::new(kind, adapters.htcondor.attributes_for(kind)),
        )),
    }
}

/// Non-empty lines with their 1-based line numbers
pub(crate) fn numbered_lines(input: &str) -> impl Iterator<Item = (usize, &str)> {
    input
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_each_outcome_kind() {
        let mut record = RawRecord::new(Scheduler::Slurm, 2);
        record.insert("JobID", "1");
        let report: ParseReport = vec![
            ParseOutcome::Record(record),
            ParseOutcome::skipped(3, "bad"),
            ParseOutcome::filtered(4, "job step"),
            ParseOutcome::filtered(5, "job step"),
        ]
        .into_iter()
        .collect();

        assert_eq!(report.parsed(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].line, 3);
        assert_eq!(report.filtered, 2);
    }

    #[test]
    fn test_raw_record_get_ignores_blank_values() {
        let mut record = RawRecord::new(Scheduler::Pbs, 1);
        record.insert("np", "  ");
        record.insert("resources_available.ncpus", " 32 ");
        assert_eq!(record.get("np"), None);
        assert_eq!(
            record.first_of(&["np", "resources_available.ncpus"]),
            Some("32")
        );
    }
}
