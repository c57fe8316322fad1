//! Node-type classification as an ordered list of predicate → label rules.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::NodeType;
use crate::error::{ExportError, Result};

/// Record field a rule looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    /// Matches when the record has at least one GPU; `pattern` is ignored
    GpuCount,
    Partition,
    Qos,
    /// Any host of the record's node list (the hostname for node records)
    Nodelist,
    /// Always matches; used as a catch-all
    Any,
}

/// One configured rule: `field` contains `pattern` (case-insensitive) → `label`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub field: RuleField,
    #[serde(default)]
    pub pattern: String,
    pub label: String,
}

impl RuleSpec {
    pub fn new(field: RuleField, pattern: &str, label: &str) -> Self {
        Self {
            field,
            pattern: pattern.to_string(),
            label: label.to_string(),
        }
    }
}

/// GPUs first, then memory tiers by partition, then by QoS; everything else is `compute`
pub fn default_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec::new(RuleField::GpuCount, "", "gpu"),
        RuleSpec::new(RuleField::Partition, "highmem", "highmem"),
        RuleSpec::new(RuleField::Partition, "largemem", "largemem"),
        RuleSpec::new(RuleField::Qos, "highmem", "highmem"),
        RuleSpec::new(RuleField::Qos, "largemem", "largemem"),
    ]
}

/// What a record exposes to the classifier
#[derive(Debug, Clone, Copy)]
pub struct ClassificationInput<'a> {
    pub gpu_count: u64,
    pub partition: &'a str,
    pub qos: &'a str,
    pub nodelist: &'a [String],
}

#[derive(Debug)]
enum Predicate {
    GpuPresent,
    Contains(RuleField, Regex),
    Always,
}

impl Predicate {
    fn matches(&self, input: &ClassificationInput<'_>) -> bool {
        match self {
            Predicate::GpuPresent => input.gpu_count > 0,
            Predicate::Always => true,
            Predicate::Contains(field, pattern) => match field {
                RuleField::Partition => pattern.is_match(input.partition),
                RuleField::Qos => pattern.is_match(input.qos),
                RuleField::Nodelist => input.nodelist.iter().any(|h| pattern.is_match(h)),
                RuleField::GpuCount | RuleField::Any => false,
            },
        }
    }
}

/// Compiled rule list; first match wins, no match is `compute`
#[derive(Debug)]
pub struct Classifier {
    rules: Vec<(Predicate, NodeType)>,
}

impl Classifier {
    pub fn from_specs(specs: &[RuleSpec]) -> Result<Self> {
        let rules = specs
            .iter()
            .map(|spec| Ok((Self::compile(spec)?, NodeType::from(spec.label.as_str()))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    fn compile(spec: &RuleSpec) -> Result<Predicate> {
        if spec.label.trim().is_empty() {
            return Err(ExportError::Config(
                "classification rule with an empty label".to_string(),
            ));
        }
        match spec.field {
            RuleField::GpuCount => Ok(Predicate::GpuPresent),
            RuleField::Any => Ok(Predicate::Always),
            field => {
                if spec.pattern.trim().is_empty() {
                    return Err(ExportError::Config(format!(
                        "classification rule on {:?} needs a pattern",
                        field
                    )));
                }
                let regex = RegexBuilder::new(&regex::escape(spec.pattern.trim()))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ExportError::Config(format!("invalid pattern '{}': {}", spec.pattern, e)))?;
                Ok(Predicate::Contains(field, regex))
            }
        }
    }

    pub fn classify(&self, input: &ClassificationInput<'_>) -> NodeType {
        self.rules
            .iter()
            .find(|(predicate, _)| predicate.matches(input))
            .map(|(_, label)| label.clone())
            .unwrap_or(NodeType::Compute)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        let rules = default_rules()
            .iter()
            .filter_map(|spec| Self::compile(spec).ok().map(|p| (p, NodeType::from(spec.label.as_str()))))
            .collect();
        Self { rules }
    }
}
