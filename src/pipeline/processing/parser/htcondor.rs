//! HTCondor adapter for `condor_status -af:ht` / `condor_history -af:t` output.

use super::{numbered_lines, ParseOutcome, ParseReport, RawRecord, SchedulerParser};
use crate::types::{RecordKind, Scheduler};

/// Default slot attributes for `condor_status -af:ht`
pub const STATUS_ATTRIBUTES: [&str; 7] = [
    "Machine", "Name", "Cpus", "Memory", "Gpus", "State", "Activity",
];

/// Default job attributes for `condor_history -af:t`
pub const HISTORY_ATTRIBUTES: [&str; 18] = [
    "ClusterId",
    "ProcId",
    "Owner",
    "AcctGroup",
    "AccountingGroup",
    "JobStatus",
    "QDate",
    "JobStartDate",
    "CompletionDate",
    "RequestCpus",
    "CpusProvisioned",
    "RequestMemory",
    "MemoryUsage",
    "RemoteWallClockTime",
    "RemoteUserCpu",
    "RequestGpus",
    "LastRemoteHost",
    "JobPrio",
];

/// Value HTCondor prints for an attribute the ClassAd does not define
const UNDEFINED: &str = "undefined";

/// Parser for autoformat output: one line per slot or job, attributes in a fixed order.
///
/// Lines containing a tab are split on tabs, so values with spaces survive `-af:t`;
/// everything else is split on whitespace.
pub struct CondorParser {
    kind: RecordKind,
    attributes: Vec<String>,
}

impl CondorParser {
    pub fn new(kind: RecordKind, attributes: Vec<String>) -> Self {
        Self { kind, attributes }
    }

    fn tokenize(text: &str) -> Vec<&str> {
        if text.contains('\t') {
            text.split('\t').map(str::trim).collect()
        } else {
            text.split_whitespace().collect()
        }
    }

    fn is_header(&self, tokens: &[&str]) -> bool {
        tokens.len() == self.attributes.len()
            && tokens
                .iter()
                .zip(&self.attributes)
                .all(|(token, attr)| token.eq_ignore_ascii_case(attr))
    }

    fn validate_line(&self, tokens: &[&str], line: usize) -> ParseOutcome {
        if tokens.len() != self.attributes.len() {
            return ParseOutcome::skipped(
                line,
                format!(
                    "expected {} attributes, found {}",
                    self.attributes.len(),
                    tokens.len()
                ),
            );
        }

        let mut record = RawRecord::new(Scheduler::Htcondor, line);
        for (attr, value) in self.attributes.iter().zip(tokens) {
            let value = if value.eq_ignore_ascii_case(UNDEFINED) { "" } else { value };
            record.insert(attr.clone(), value);
        }
        ParseOutcome::Record(record)
    }
}

impl SchedulerParser for CondorParser {
    fn scheduler(&self) -> Scheduler {
        Scheduler::Htcondor
    }

    fn kind(&self) -> RecordKind {
        self.kind
    }

    fn parse(&self, input: &str) -> ParseReport {
        let mut report = ParseReport::default();
        for (idx, (line, text)) in numbered_lines(input).enumerate() {
            let tokens = Self::tokenize(text);
            if idx == 0 && self.is_header(&tokens) {
                continue;
            }
            report.push(self.validate_line(&tokens, line));
        }
        report
    }
}
