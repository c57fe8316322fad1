//! SLURM adapters: `sacct --parsable2` accounting rows and `sinfo -N` node lines.

use super::{numbered_lines, ParseOutcome, ParseReport, RawRecord, SchedulerParser};
use crate::types::{RecordKind, Scheduler};

/// Column carrying the job id in sacct output
const JOB_ID_COLUMNS: [&str; 2] = ["JobID", "JobIDRaw"];

/// Columns of `sinfo -N --noheader -o "%N %c %m %G %P %T"`
pub const SINFO_COLUMNS: [&str; 6] = ["NodeName", "CPUs", "Memory", "Gres", "Partition", "State"];

/// Parser for `sacct --parsable2` output (pipe-delimited, header row first).
///
/// sacct prints one row for the job and one per step. Step rows carry a `.` in
/// their id (`12345.batch`, `12345.0`, `12345_1.extern`) and are filtered out;
/// array tasks (`12345_1`) are jobs in their own right and are kept.
pub struct SacctParser;

/// True when a sacct job id names a step rather than a job or array task
pub fn is_step_id(job_id: &str) -> bool {
    job_id.contains('.')
}

impl SacctParser {
    fn validate_row(&self, header: &[String], fields: &csv::StringRecord, line: usize) -> ParseOutcome {
        if fields.len() != header.len() {
            return ParseOutcome::skipped(
                line,
                format!("expected {} fields, found {}", header.len(), fields.len()),
            );
        }

        let mut record = RawRecord::new(Scheduler::Slurm, line);
        for (name, value) in header.iter().zip(fields.iter()) {
            record.insert(name.clone(), value);
        }

        match record.first_of(&JOB_ID_COLUMNS) {
            Some(id) if is_step_id(id) => ParseOutcome::filtered(line, format!("job step {}", id)),
            _ => ParseOutcome::Record(record),
        }
    }
}

impl SchedulerParser for SacctParser {
    fn scheduler(&self) -> Scheduler {
        Scheduler::Slurm
    }

    fn kind(&self) -> RecordKind {
        RecordKind::Jobs
    }

    fn parse(&self, input: &str) -> ParseReport {
        let mut report = ParseReport::default();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'|')
            .quoting(false)
            .flexible(true)
            .has_headers(false)
            .from_reader(input.as_bytes());

        let mut header: Option<Vec<String>> = None;
        for result in reader.records() {
            let fields = match result {
                Ok(fields) => fields,
                Err(e) => {
                    let line = e.position().map(|p| p.line() as usize).unwrap_or(0);
                    report.push(ParseOutcome::skipped(line, e.to_string()));
                    continue;
                }
            };
            let line = fields.position().map(|p| p.line() as usize).unwrap_or(0);
            if fields.iter().all(|f| f.trim().is_empty()) {
                continue;
            }

            match &header {
                None => {
                    header = Some(fields.iter().map(|f| f.trim().to_string()).collect());
                }
                Some(columns) => report.push(self.validate_row(columns, &fields, line)),
            }
        }
        report
    }
}

/// Parser for per-node `sinfo -N` lines in the fixed six-column layout
pub struct SinfoParser;

impl SinfoParser {
    fn validate_line(&self, tokens: &[&str], line: usize) -> ParseOutcome {
        if tokens.len() != SINFO_COLUMNS.len() {
            return ParseOutcome::skipped(
                line,
                format!(
                    "expected {} columns, found {}",
                    SINFO_COLUMNS.len(),
                    tokens.len()
                ),
            );
        }
        // `sinfo -N` without --noheader
        if tokens[0].eq_ignore_ascii_case("NODELIST") || tokens[0].eq_ignore_ascii_case("HOSTNAMES") {
            return ParseOutcome::filtered(line, "header");
        }

        let mut record = RawRecord::new(Scheduler::Slurm, line);
        for (name, value) in SINFO_COLUMNS.iter().zip(tokens) {
            record.insert(*name, *value);
        }
        ParseOutcome::Record(record)
    }
}

impl SchedulerParser for SinfoParser {
    fn scheduler(&self) -> Scheduler {
        Scheduler::Slurm
    }

    fn kind(&self) -> RecordKind {
        RecordKind::Nodes
    }

    fn parse(&self, input: &str) -> ParseReport {
        numbered_lines(input)
            .map(|(line, text)| {
                let tokens: Vec<&str> = text.split_whitespace().collect();
                self.validate_line(&tokens, line)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SACCT: &str = "\
JobID|User|Partition|State|AllocTRES
12345|alice|batch|COMPLETED|cpu=4,mem=8G,node=1
12345.batch||||cpu=4,mem=8G,node=1
12345.0||||cpu=4,mem=8G,node=1
12345_1|bob|gpu|RUNNING|cpu=8,gres/gpu=2
12345_1.batch||||cpu=8
";

    #[test]
    fn test_sacct_filters_step_rows() {
        let report = SacctParser.parse(SACCT);
        let ids: Vec<&str> = report
            .records
            .iter()
            .map(|r| r.get("JobID").unwrap())
            .collect();
        assert_eq!(ids, vec!["12345", "12345_1"]);
        assert_eq!(report.filtered, 3);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_sacct_skips_rows_with_wrong_field_count() {
        let input = "JobID|User|State\n1|alice|COMPLETED\n2|bob\n3|carol|FAILED|extra\n";
        let report = SacctParser.parse(input);
        assert_eq!(report.parsed(), 1);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].line, 3);
        assert_eq!(report.records[0].line, 2);
    }

    #[test]
    fn test_step_id_detection() {
        assert!(is_step_id("12345.batch"));
        assert!(is_step_id("12345_7.extern"));
        assert!(!is_step_id("12345_7"));
        assert!(!is_step_id("12345_[1-10]"));
    }

    #[test]
    fn test_sinfo_lines() {
        let input = "\
NODELIST CPUS MEMORY GRES PARTITION STATE
node001 32 191000 (null) batch* idle
gpu01 48 385000 gpu:a100:4 gpu mixed
broken line
";
        let report = SinfoParser.parse(input);
        assert_eq!(report.parsed(), 2);
        assert_eq!(report.filtered, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.records[1].get("Gres"), Some("gpu:a100:4"));
    }
}
