//! Decoding of compound resource strings: TRES/GRES lists, memory sizes,
//! exec-host lists and SLURM compressed host lists.

use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use crate::constants::UNBOUNDED_MEM_SENTINEL;

use super::GpuType;

/// Type given to GPUs whose entry names no model
pub const UNTYPED_GPU: &str = "gpu";

/// Split on `sep` outside of `(...)` and `[...]`
pub fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemUnit {
    Bytes,
    Kilo,
    Mega,
    Giga,
    Tera,
}

impl MemUnit {
    fn from_suffix(c: char) -> Option<Self> {
        match c {
            'k' => Some(MemUnit::Kilo),
            'm' => Some(MemUnit::Mega),
            'g' => Some(MemUnit::Giga),
            't' => Some(MemUnit::Tera),
            _ => None,
        }
    }

    fn to_mb(self, value: f64) -> f64 {
        match self {
            MemUnit::Bytes => value / (1024.0 * 1024.0),
            MemUnit::Kilo => value / 1024.0,
            MemUnit::Mega => value,
            MemUnit::Giga => value * 1024.0,
            MemUnit::Tera => value * 1024.0 * 1024.0,
        }
    }
}

/// What a memory figure applies to (SLURM `ReqMem` carries `n` / `c`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemScope {
    Total,
    PerNode,
    PerCpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Memory {
    pub mb: u64,
    pub scope: MemScope,
}

impl Memory {
    /// Total MB: per-CPU figures are multiplied by `cpus`, per-node ones by `nodes`.
    /// `None` when the product does not fit.
    pub fn total_mb(&self, cpus: Option<u64>, nodes: Option<u64>) -> Option<u64> {
        match self.scope {
            MemScope::Total => Some(self.mb),
            MemScope::PerCpu => self.mb.checked_mul(cpus.unwrap_or(1).max(1)),
            MemScope::PerNode => self.mb.checked_mul(nodes.unwrap_or(1).max(1)),
        }
    }
}

/// True for the "no limit" sentinel some SLURM versions print as a memory request
pub fn is_unbounded_request(raw: &str) -> bool {
    let digits: String = raw.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits
        .parse::<u128>()
        .map(|v| v >= u128::from(UNBOUNDED_MEM_SENTINEL))
        .unwrap_or(false)
}

/// Parse a memory size to MB. `default_unit` applies to bare numbers.
///
/// Accepts `K/M/G/T` with optional `B`, `iB`, `bytes` (`16G`, `196608kb`,
/// `1.5GiB`, `25 Mbytes`), a bare `B` for bytes, and SLURM's `n`/`c` scope suffix.
pub fn parse_memory(raw: &str, default_unit: MemUnit) -> Option<Memory> {
    let lower = raw.trim().to_ascii_lowercase();
    if lower.is_empty() || lower == "-" || lower == "undefined" || lower == "(null)" {
        return None;
    }
    if is_unbounded_request(&lower) {
        return None;
    }

    let (body, scope) = if let Some(body) = lower.strip_suffix('c') {
        (body, MemScope::PerCpu)
    } else if let Some(body) = lower.strip_suffix('n') {
        (body, MemScope::PerNode)
    } else {
        (lower.as_str(), MemScope::Total)
    };

    let (body, byte_suffix) = match ["bytes", "ib", "b"]
        .iter()
        .find_map(|suffix| body.strip_suffix(suffix))
    {
        Some(stripped) => (stripped.trim_end(), true),
        None => (body, false),
    };

    let (number, unit) = match body.chars().last().and_then(MemUnit::from_suffix) {
        Some(unit) => (&body[..body.len() - 1], unit),
        None if byte_suffix => (body, MemUnit::Bytes),
        None => (body, default_unit),
    };

    let value = number.trim().parse::<f64>().ok()?;
    if value.is_nan() || value < 0.0 {
        return None;
    }
    Some(Memory {
        mb: unit.to_mb(value).round() as u64,
        scope,
    })
}

/// Shortcut for figures that are always totals
pub fn parse_memory_mb(raw: &str, default_unit: MemUnit) -> Option<u64> {
    parse_memory(raw, default_unit).map(|m| m.mb)
}

// ---------------------------------------------------------------------------
// TRES / GRES
// ---------------------------------------------------------------------------

/// GPU counts gathered from one or more resource strings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuTally {
    typed: BTreeMap<String, u64>,
    untyped: u64,
    overflowed: bool,
}

impl GpuTally {
    pub fn add_typed(&mut self, gpu_type: &str, count: u64) {
        let entry = self.typed.entry(gpu_type.to_string()).or_insert(0);
        match entry.checked_add(count) {
            Some(total) => *entry = total,
            None => self.overflowed = true,
        }
    }

    pub fn add_untyped(&mut self, count: u64) {
        match self.untyped.checked_add(count) {
            Some(total) => self.untyped = total,
            None => self.overflowed = true,
        }
    }

    /// Typed entries summed; an untyped total only wins when it is larger,
    /// since TRES strings repeat typed GPUs under the plain `gres/gpu` key.
    /// A tally whose counts do not fit in a `u64` reads as no GPUs.
    pub fn count(&self) -> u64 {
        if self.overflowed {
            return 0;
        }
        self.typed
            .values()
            .try_fold(0u64, |acc, n| acc.checked_add(*n))
            .map_or(0, |typed| typed.max(self.untyped))
    }

    /// `(type, count)` by count descending, ties by type ascending.
    /// Untyped GPUs are listed as `gpu` only when no typed entry exists.
    pub fn types(&self) -> Vec<GpuType> {
        if self.count() == 0 {
            return Vec::new();
        }
        if self.typed.is_empty() {
            return if self.untyped > 0 {
                vec![GpuType::new(UNTYPED_GPU, self.untyped)]
            } else {
                Vec::new()
            };
        }
        let mut types: Vec<GpuType> = self
            .typed
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(name, count)| GpuType::new(name, *count))
            .collect();
        types.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        types
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

/// Decoded contents of a TRES/GRES allocation string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceAllocation {
    pub cpus: Option<u64>,
    pub mem_mb: Option<u64>,
    pub nodes: Option<u64>,
    pub gpus: GpuTally,
}

/// Positional TRES ids
const TRES_CPU: &str = "1";
const TRES_MEM: &str = "2";
const TRES_NODE: &str = "4";
const TRES_GPU: &str = "1001";

/// Non-negative count; fractional values are rounded
pub fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    raw.parse::<u64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v.round() as u64))
}

/// Decode a resource string in any of the forms schedulers print:
/// `cpu=8,mem=16G,node=1,gres/gpu:v100=2` (TRES), `1=8,2=16384,4=1,1001=2`
/// (positional TRES), `gpu:v100:2,gpu:a100:1,cpu:8` and `gpu:2(IDX:0-1)` (GRES).
pub fn parse_resources(raw: &str) -> ResourceAllocation {
    let mut alloc = ResourceAllocation::default();
    let raw = raw.trim();
    if raw.is_empty() || raw == "(null)" || raw == "-" {
        return alloc;
    }

    for entry in split_top_level(raw, ',') {
        // drop `(IDX:0-1)`, `(S:0-1)` annotations
        let entry = entry.split('(').next().unwrap_or(entry).trim();
        if let Some((key, value)) = entry.split_once('=') {
            apply_tres(&mut alloc, key.trim(), value.trim());
        } else {
            apply_gres(&mut alloc, entry);
        }
    }
    alloc
}

fn apply_tres(alloc: &mut ResourceAllocation, key: &str, value: &str) {
    match key {
        "cpu" | TRES_CPU => alloc.cpus = parse_count(value),
        "mem" | TRES_MEM => alloc.mem_mb = parse_memory_mb(value, MemUnit::Mega),
        "node" | TRES_NODE => alloc.nodes = parse_count(value),
        "gres/gpu" | TRES_GPU => {
            if let Some(count) = parse_count(value) {
                alloc.gpus.add_untyped(count);
            }
        }
        other => {
            if let Some(gpu_type) = other.strip_prefix("gres/gpu:") {
                if let Some(count) = parse_count(value) {
                    alloc.gpus.add_typed(gpu_type, count);
                }
            }
        }
    }
}

fn apply_gres(alloc: &mut ResourceAllocation, entry: &str) {
    let entry = entry.strip_prefix("gres/").unwrap_or(entry);
    let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
    match parts.as_slice() {
        ["gpu"] => alloc.gpus.add_untyped(1),
        ["gpu", count] if parse_count(count).is_some() => {
            alloc.gpus.add_untyped(parse_count(count).unwrap_or(0))
        }
        ["gpu", gpu_type] => alloc.gpus.add_typed(gpu_type, 1),
        ["gpu", gpu_type, count, ..] => {
            if let Some(count) = parse_count(count) {
                alloc.gpus.add_typed(gpu_type, count);
            }
        }
        ["cpu", count] => alloc.cpus = parse_count(count),
        ["node", count] => alloc.nodes = parse_count(count),
        ["mem", value] => alloc.mem_mb = parse_memory_mb(value, MemUnit::Mega),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Host lists
// ---------------------------------------------------------------------------

/// Hosts and CPU slots named by an execution-host string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostAllocation {
    /// Distinct hosts in first-seen order
    pub hosts: Vec<String>,
    /// Sum of CPU slots across hosts; `None` when nothing was counted or the sum overflows
    pub cpus: Option<u64>,
}

/// Upper bound on hosts produced by one bracket pattern
const MAX_RANGE_HOSTS: u64 = 65_536;

fn slot_count(slots: &str) -> Option<u64> {
    match slots.split_once('-') {
        Some((lo, hi)) => match (lo.parse::<u64>(), hi.parse::<u64>()) {
            (Ok(lo), Ok(hi)) if hi >= lo => (hi - lo).checked_add(1),
            _ => Some(1),
        },
        None => Some(1),
    }
}

/// Parse one host-list token into `(host, cpus)`; cpus is `None` when the product overflows
fn parse_host_token(token: &str) -> Option<(String, Option<u64>)> {
    let (spec, multiplier) = match token.split_once('*') {
        // LSF `4*hostA`
        Some((count, host)) if count.chars().all(|c| c.is_ascii_digit()) => {
            (host, count.parse::<u64>().ok()?)
        }
        // PBS Pro `hostA/0*4`
        Some((host, count)) => (host, count.parse::<u64>().ok()?),
        None => (token, 1),
    };

    let (host, slots) = match spec.split_once('/') {
        Some((host, slots)) => (host, slot_count(slots)),
        None => (spec, Some(1)),
    };
    // HTCondor `slot1@host`
    let host = host.rsplit('@').next().unwrap_or(host).trim();
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), slots.and_then(|s| s.checked_mul(multiplier))))
}

/// Count CPU slots per host in an exec-host string: `hostA/0,hostA/1,hostB/0`,
/// PBS `hostA/0+hostA/1`, PBS Pro `hostA/0*4`, ranges `hostA/0-3`, LSF `4*hostA:2*hostB`
pub fn parse_exec_host(raw: &str) -> HostAllocation {
    let mut alloc = HostAllocation::default();
    let raw = raw.trim();
    if raw.is_empty() || raw == "-" || raw.eq_ignore_ascii_case("undefined") {
        return alloc;
    }

    let mut seen = HashSet::new();
    let mut total = Some(0u64);
    for token in raw.split(|c: char| c == ',' || c == '+' || c == ':' || c.is_whitespace()) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if let Some((host, cpus)) = parse_host_token(token) {
            if seen.insert(host.clone()) {
                alloc.hosts.push(host);
            }
            total = total.zip(cpus).and_then(|(sum, n)| sum.checked_add(n));
        }
    }
    if total.is_none() {
        warn!(raw, "CPU count of exec-host list overflows; leaving it empty");
    }
    alloc.cpus = total.filter(|n| *n > 0);
    alloc
}

/// Expand a SLURM compressed host list: `node[001-003,007],gpu01` →
/// `node001 node002 node003 node007 gpu01`. A bracket pattern naming more than
/// `MAX_RANGE_HOSTS` hosts is kept as the literal token.
pub fn expand_hostlist(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "(null)" || raw.eq_ignore_ascii_case("none assigned") {
        return Vec::new();
    }
    let mut seen = HashSet::new();
    let mut hosts = Vec::new();
    for part in split_top_level(raw, ',') {
        for host in expand_one(part) {
            if seen.insert(host.clone()) {
                hosts.push(host);
            }
        }
    }
    hosts
}

fn expand_one(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('[') else {
        return vec![pattern.to_string()];
    };
    let Some(close) = pattern[open..].find(']').map(|i| open + i) else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffixes = expand_one(&pattern[close + 1..]);
    let mut indices = Vec::new();
    for range in pattern[open + 1..close].split(',') {
        let expanded = expand_range(range.trim());
        let fits = expanded.as_ref().is_some_and(|e| {
            ((indices.len() + e.len()) as u64).saturating_mul(suffixes.len() as u64) <= MAX_RANGE_HOSTS
        });
        match expanded {
            Some(expanded) if fits => indices.extend(expanded),
            _ => {
                warn!(pattern, "Host list too wide to expand; keeping it literally");
                return vec![pattern.to_string()];
            }
        }
    }

    let mut hosts = Vec::with_capacity(indices.len() * suffixes.len());
    for index in &indices {
        for suffix in &suffixes {
            hosts.push(format!("{}{}{}", prefix, index, suffix));
        }
    }
    hosts
}

/// Indices named by one bracket range; `None` when it spans more than `MAX_RANGE_HOSTS`
fn expand_range(range: &str) -> Option<Vec<String>> {
    match range.split_once('-') {
        Some((lo, hi)) => match (lo.parse::<u64>(), hi.parse::<u64>()) {
            (Ok(start), Ok(end)) if end >= start => {
                if end - start >= MAX_RANGE_HOSTS {
                    return None;
                }
                let width = lo.len();
                Some((start..=end).map(|i| format!("{:0width$}", i, width = width)).collect())
            }
            _ => Some(vec![range.to_string()]),
        },
        None => Some(vec![range.to_string()]),
    }
}
