//! LSF adapter for whitespace-aligned tabular output (`bhosts`, `bjobs -o ...`).

use super::{numbered_lines, ParseOutcome, ParseReport, RawRecord, SchedulerParser};
use crate::types::{RecordKind, Scheduler};

/// Default `bhosts` layout
pub const BHOSTS_COLUMNS: [&str; 9] = [
    "HOST_NAME", "STATUS", "JL/U", "MAX", "NJOBS", "RUN", "SSUSP", "USUSP", "RSV",
];

/// Default job layout, matching
/// `bjobs -a -o "jobid user ugroup proj_name queue stat slots nalloc_slot exec_host submit_time start_time finish_time run_time cpu_used memlimit max_mem gpu_num"`
/// with times and durations rendered as single tokens
pub const BJOBS_COLUMNS: [&str; 17] = [
    "JOBID",
    "USER",
    "UGROUP",
    "PROJ_NAME",
    "QUEUE",
    "STAT",
    "SLOTS",
    "NALLOC_SLOT",
    "EXEC_HOST",
    "SUBMIT_TIME",
    "START_TIME",
    "FINISH_TIME",
    "RUN_TIME",
    "CPU_USED",
    "MEMLIMIT",
    "MAX_MEM",
    "GPU_NUM",
];

/// LSF prints `-` for an absent value
const ABSENT: &str = "-";

/// Positional parser: the first line is a header and is skipped, every other line is
/// split on whitespace and assigned to `columns` in order. Missing trailing columns
/// are empty; a line with more tokens than columns does not match and is skipped.
pub struct LsfTabularParser {
    kind: RecordKind,
    columns: Vec<String>,
}

impl LsfTabularParser {
    pub fn new(kind: RecordKind, columns: Vec<String>) -> Self {
        Self { kind, columns }
    }

    fn validate_line(&self, tokens: &[&str], line: usize) -> ParseOutcome {
        if tokens.len() > self.columns.len() {
            return ParseOutcome::skipped(
                line,
                format!(
                    "expected at most {} columns, found {}",
                    self.columns.len(),
                    tokens.len()
                ),
            );
        }

        let mut record = RawRecord::new(Scheduler::Lsf, line);
        for (i, column) in self.columns.iter().enumerate() {
            let value = match tokens.get(i) {
                Some(&ABSENT) | None => "",
                Some(token) => *token,
            };
            record.insert(column.clone(), value);
        }
        ParseOutcome::Record(record)
    }
}

impl SchedulerParser for LsfTabularParser {
    fn scheduler(&self) -> Scheduler {
        Scheduler::Lsf
    }

    fn kind(&self) -> RecordKind {
        self.kind
    }

    fn parse(&self, input: &str) -> ParseReport {
        numbered_lines(input)
            .skip(1)
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

    fn bhosts_parser() -> LsfTabularParser {
        LsfTabularParser::new(
            RecordKind::Nodes,
            BHOSTS_COLUMNS.iter().map(|c| c.to_string()).collect(),
        )
    }

    #[test]
    fn test_bhosts_skips_header_and_pads_missing_columns() {
        let input = "\
HOST_NAME          STATUS       JL/U    MAX  NJOBS    RUN  SSUSP  USUSP    RSV
hostA              ok              -     16      4      4      0      0      0
hostB              closed          -     32
";
        let report = bhosts_parser().parse(input);
        assert_eq!(report.parsed(), 2);

        let host_a = &report.records[0];
        assert_eq!(host_a.get("HOST_NAME"), Some("hostA"));
        assert_eq!(host_a.get("MAX"), Some("16"));
        assert_eq!(host_a.get("JL/U"), None);
        assert_eq!(host_a.line, 2);

        let host_b = &report.records[1];
        assert_eq!(host_b.get("MAX"), Some("32"));
        assert_eq!(host_b.get("RSV"), None);
        assert!(host_b.fields.contains_key("RSV"));
    }

    #[test]
    fn test_extra_columns_are_skipped() {
        let parser = LsfTabularParser::new(
            RecordKind::Jobs,
            vec!["JOBID".to_string(), "USER".to_string()],
        );
        let report = parser.parse("JOBID USER\n101 alice\n102 bob surplus\n");
        assert_eq!(report.parsed(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].line, 3);
    }
}
