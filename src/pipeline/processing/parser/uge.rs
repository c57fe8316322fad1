//! UGE/SGE adapters: `qhost -F -xml` inventory and `qacct -j` accounting blocks.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{ParseOutcome, ParseReport, RawRecord, SchedulerParser};
use crate::types::{RecordKind, Scheduler};

/// Key holding the `name` attribute of a `<host>` element
pub const HOSTNAME_KEY: &str = "hostname";
/// Prefix for `<resourcevalue>` entries, keeping them apart from `<hostvalue>` ones
pub const RESOURCE_PREFIX: &str = "resource.";
/// Template host that qhost always lists first; not a machine
pub const GLOBAL_HOST: &str = "global";

/// 1-based line of a byte offset
fn line_at(input: &str, offset: usize) -> usize {
    let end = offset.min(input.len());
    input.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

fn name_attribute(element: &BytesStart<'_>) -> Result<Option<String>, quick_xml::Error> {
    match element.try_get_attribute("name")? {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

/// Parser for the hierarchical XML of `qhost -F -xml`.
///
/// Each `<host name="...">` child of the root becomes one record holding its
/// `<hostvalue>` and `<resourcevalue>` children. The `global` host is filtered.
pub struct QhostXmlParser;

impl QhostXmlParser {
    fn finish_host(record: RawRecord) -> ParseOutcome {
        match record.get(HOSTNAME_KEY) {
            None => ParseOutcome::skipped(record.line, "host element without a name attribute"),
            Some(GLOBAL_HOST) => ParseOutcome::filtered(record.line, "global template host"),
            Some(_) => ParseOutcome::Record(record),
        }
    }

    fn start_host(element: &BytesStart<'_>, line: usize) -> Result<RawRecord, quick_xml::Error> {
        let mut record = RawRecord::new(Scheduler::Uge, line);
        if let Some(name) = name_attribute(element)? {
            record.insert(HOSTNAME_KEY, name);
        }
        Ok(record)
    }

    fn value_key(element: &BytesStart<'_>) -> Result<Option<String>, quick_xml::Error> {
        let prefix = match element.local_name().as_ref() {
            b"hostvalue" => "",
            b"resourcevalue" => RESOURCE_PREFIX,
            _ => return Ok(None),
        };
        Ok(name_attribute(element)?.map(|name| format!("{}{}", prefix, name)))
    }

    fn read_hosts(&self, input: &str, report: &mut ParseReport, position: &mut usize) -> Result<(), quick_xml::Error> {
        let mut reader = Reader::from_str(input);
        reader.trim_text(true);

        let mut host: Option<RawRecord> = None;
        let mut value_key: Option<String> = None;
        loop {
            let event = reader.read_event();
            *position = reader.buffer_position();
            match event? {
                Event::Start(element) => {
                    if element.local_name().as_ref() == b"host" {
                        host = Some(Self::start_host(&element, line_at(input, *position))?);
                    } else if host.is_some() {
                        value_key = Self::value_key(&element)?;
                    }
                }
                Event::Empty(element) => {
                    if element.local_name().as_ref() == b"host" {
                        let record = Self::start_host(&element, line_at(input, *position))?;
                        report.push(Self::finish_host(record));
                    }
                }
                Event::Text(text) => {
                    if let (Some(record), Some(key)) = (host.as_mut(), value_key.as_ref()) {
                        let value = text.unescape()?;
                        let value = if value.trim() == "-" { "" } else { value.trim() };
                        record.insert(key.clone(), value);
                    }
                }
                Event::End(element) => match element.local_name().as_ref() {
                    b"host" => {
                        if let Some(record) = host.take() {
                            report.push(Self::finish_host(record));
                        }
                        value_key = None;
                    }
                    _ => value_key = None,
                },
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(())
    }
}

impl SchedulerParser for QhostXmlParser {
    fn scheduler(&self) -> Scheduler {
        Scheduler::Uge
    }

    fn kind(&self) -> RecordKind {
        RecordKind::Nodes
    }

    fn parse(&self, input: &str) -> ParseReport {
        let mut report = ParseReport::default();
        let mut position = 0;
        if let Err(e) = self.read_hosts(input, &mut report, &mut position) {
            report.push(ParseOutcome::skipped(
                line_at(input, position),
                format!("malformed XML, rest of input ignored: {}", e),
            ));
        }
        report
    }
}

#[derive(Debug, PartialEq, Eq)]
enum AccountingLine<'a> {
    Separator,
    Attribute(&'a str, &'a str),
    Malformed(&'static str),
}

fn tokenize_accounting_line(line: &str) -> AccountingLine<'_> {
    if line.starts_with("====") {
        return AccountingLine::Separator;
    }
    if line.starts_with(char::is_whitespace) {
        return AccountingLine::Malformed("continuation line outside of an attribute");
    }
    let (key, value) = match line.split_once(char::is_whitespace) {
        Some((key, value)) => (key, value.trim()),
        None => (line.trim(), ""),
    };
    if key.ends_with(':') {
        return AccountingLine::Malformed("qacct diagnostic line");
    }
    AccountingLine::Attribute(key, value)
}

/// Parser for `qacct -j` output: `=====` separated blocks of `key   value` lines
pub struct QacctParser;

impl SchedulerParser for QacctParser {
    fn scheduler(&self) -> Scheduler {
        Scheduler::Uge
    }

    fn kind(&self) -> RecordKind {
        RecordKind::Jobs
    }

    fn parse(&self, input: &str) -> ParseReport {
        let mut report = ParseReport::default();
        let mut current: Option<RawRecord> = None;

        for (line, text) in super::numbered_lines(input) {
            match tokenize_accounting_line(text) {
                AccountingLine::Separator => {
                    if let Some(record) = current.take() {
                        report.push(ParseOutcome::Record(record));
                    }
                }
                AccountingLine::Attribute(key, value) => current
                    .get_or_insert_with(|| RawRecord::new(Scheduler::Uge, line))
                    .insert(key, value),
                AccountingLine::Malformed(reason) => report.push(ParseOutcome::skipped(line, reason)),
            }
        }
        if let Some(record) = current.take() {
            report.push(ParseOutcome::Record(record));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QHOST_XML: &str = r#"<?xml version='1.0'?>
<qhost xmlns:xsd="http://arc.liv.ac.uk/repos/darcs/sge/source/dist/util/resources/schemas/qhost/qhost.xsd">
 <host name='global'>
   <hostvalue name='arch_string'>-</hostvalue>
   <hostvalue name='num_proc'>-</hostvalue>
 </host>
 <host name='node01'>
   <hostvalue name='arch_string'>lx-amd64</hostvalue>
   <hostvalue name='num_proc'>32</hostvalue>
   <hostvalue name='mem_total'>125.8G</hostvalue>
   <resourcevalue name='slots' dominance='hc'>28</resourcevalue>
   <resourcevalue name='gpu' dominance='hc'>2</resourcevalue>
 </host>
 <host>
   <hostvalue name='num_proc'>8</hostvalue>
 </host>
</qhost>
"#;

    #[test]
    fn test_qhost_excludes_global_host() {
        let report = QhostXmlParser.parse(QHOST_XML);
        assert_eq!(report.parsed(), 1);
        assert_eq!(report.filtered, 1);
        assert_eq!(report.skipped.len(), 1);

        let node = &report.records[0];
        assert_eq!(node.get(HOSTNAME_KEY), Some("node01"));
        assert_eq!(node.get("num_proc"), Some("32"));
        assert_eq!(node.get("resource.slots"), Some("28"));
        assert_eq!(node.get("resource.gpu"), Some("2"));
        assert_eq!(node.line, 7);
    }

    #[test]
    fn test_qhost_malformed_xml_counts_a_skip() {
        let input = "<qhost><host name='n1'><hostvalue name='num_proc'>4</hostvalue></host><host name='n2'></qhost>";
        let report = QhostXmlParser.parse(input);
        assert_eq!(report.parsed(), 1);
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn test_qacct_blocks() {
        let input = "\
==============================================================
qname        all.q
owner        alice
jobnumber    4021
taskid       undefined
qsub_time    Mon Jan  1 10:00:00 2024
==============================================================
qname        gpu.q
owner        bob
jobnumber    4022
taskid       3
error: job id 9 not found
";
        let report = QacctParser.parse(input);
        assert_eq!(report.parsed(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.records[0].get("qsub_time"), Some("Mon Jan  1 10:00:00 2024"));
        assert_eq!(report.records[1].get("taskid"), Some("3"));
        assert_eq!(report.records[1].line, 8);
    }
}
