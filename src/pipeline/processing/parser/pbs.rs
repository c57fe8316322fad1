//! PBS/Torque adapters: `pbsnodes -a` blocks and accounting log `E` records.

use super::{ParseOutcome, ParseReport, RawRecord, SchedulerParser};
use crate::types::{RecordKind, Scheduler};

/// Key under which the node name of a `pbsnodes` block is stored
pub const HOSTNAME_KEY: &str = "hostname";
/// Resolved CPU count of a `pbsnodes` block
pub const CPUS_KEY: &str = "cpus";
/// CPU attributes in order of preference: PBS Pro's is more specific than Torque's `np`
pub const CPU_ATTRIBUTES: [&str; 2] = ["resources_available.ncpus", "np"];

/// Key holding the job id of an accounting record (`1234.server`)
pub const JOB_ID_KEY: &str = "id";
/// Key holding the timestamp that prefixes an accounting record
pub const RECORD_TIME_KEY: &str = "record_time";

#[derive(Debug, PartialEq, Eq)]
enum NodeLine<'a> {
    Blank,
    Header(&'a str),
    Attribute(&'a str, &'a str),
    Malformed(&'static str),
}

fn tokenize_node_line(line: &str) -> NodeLine<'_> {
    if line.trim().is_empty() {
        return NodeLine::Blank;
    }
    let indented = line.starts_with(' ') || line.starts_with('\t');
    if indented {
        return match line.trim().split_once(" = ") {
            Some((key, value)) => NodeLine::Attribute(key.trim(), value.trim()),
            None => NodeLine::Malformed("attribute line without ' = '"),
        };
    }
    let header = line.trim();
    if header.contains(' ') || header.contains('=') {
        return NodeLine::Malformed("unindented line is not a node name");
    }
    NodeLine::Header(header)
}

/// Parser for the multi-line block format of `pbsnodes -a`.
///
/// A non-indented line opens a node; indented `key = value` lines belong to it
/// until a blank line or the next non-indented line.
pub struct PbsNodesParser;

impl PbsNodesParser {
    fn finish(mut record: RawRecord) -> ParseOutcome {
        let cpus = record.first_of(&CPU_ATTRIBUTES).map(str::to_string);
        if let Some(cpus) = cpus {
            record.insert(CPUS_KEY, cpus);
        }
        ParseOutcome::Record(record)
    }
}

impl SchedulerParser for PbsNodesParser {
    fn scheduler(&self) -> Scheduler {
        Scheduler::Pbs
    }

    fn kind(&self) -> RecordKind {
        RecordKind::Nodes
    }

    fn parse(&self, input: &str) -> ParseReport {
        let mut report = ParseReport::default();
        let mut current: Option<RawRecord> = None;

        for (idx, text) in input.lines().enumerate() {
            let line = idx + 1;
            match tokenize_node_line(text) {
                NodeLine::Blank => {
                    if let Some(record) = current.take() {
                        report.push(Self::finish(record));
                    }
                }
                NodeLine::Header(name) => {
                    if let Some(record) = current.take() {
                        report.push(Self::finish(record));
                    }
                    let mut record = RawRecord::new(Scheduler::Pbs, line);
                    record.insert(HOSTNAME_KEY, name);
                    current = Some(record);
                }
                NodeLine::Attribute(key, value) => match current.as_mut() {
                    Some(record) => record.insert(key, value),
                    None => report.push(ParseOutcome::skipped(line, "attribute outside of a node block")),
                },
                NodeLine::Malformed(reason) => report.push(ParseOutcome::skipped(line, reason)),
            }
        }
        if let Some(record) = current.take() {
            report.push(Self::finish(record));
        }
        report
    }
}

/// Split the attribute section of an accounting record on whitespace,
/// keeping double-quoted values (`jobname="my job"`) together
fn tokenize_attributes(section: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in section.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Parser for PBS accounting logs (`server_priv/accounting/YYYYMMDD`).
///
/// Each line is `MM/DD/YYYY HH:MM:SS;<type>;<job id>;<key=value ...>`. Only `E`
/// (job ended) records describe a finished job; `Q`, `S`, `D` and friends are filtered.
pub struct PbsAccountingParser;

impl PbsAccountingParser {
    fn validate_line(&self, text: &str, line: usize) -> ParseOutcome {
        let parts: Vec<&str> = text.splitn(4, ';').collect();
        if parts.len() < 4 {
            return ParseOutcome::skipped(line, "expected 4 ';'-separated fields");
        }
        let (timestamp, record_type, job_id, attributes) = (parts[0], parts[1], parts[2], parts[3]);
        if record_type != "E" {
            return ParseOutcome::filtered(line, format!("accounting record type {}", record_type));
        }

        let mut record = RawRecord::new(Scheduler::Pbs, line);
        record.insert(RECORD_TIME_KEY, timestamp.trim());
        record.insert(JOB_ID_KEY, job_id.trim());
        for token in tokenize_attributes(attributes) {
            match token.split_once('=') {
                Some((key, value)) => record.insert(key, value),
                None => {
                    return ParseOutcome::skipped(line, format!("token '{}' is not key=value", token))
                }
            }
        }
        ParseOutcome::Record(record)
    }
}

impl SchedulerParser for PbsAccountingParser {
    fn scheduler(&self) -> Scheduler {
        Scheduler::Pbs
    }

    fn kind(&self) -> RecordKind {
        RecordKind::Jobs
    }

    fn parse(&self, input: &str) -> ParseReport {
        super::numbered_lines(input)
            .map(|(line, text)| self.validate_line(text, line))
            .collect()
    }
}
