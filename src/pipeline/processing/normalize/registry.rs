use std::collections::HashMap;

use super::normalizers::{
    HtcondorNormalizer, LsfNormalizer, MetricsNormalizer, PbsNormalizer, SlurmNormalizer,
    SourceNormalizer, UgeNormalizer,
};
use crate::types::Scheduler;

/// Registry for scheduler-specific normalization strategies
pub struct NormalizationRegistry {
    normalizers: HashMap<Scheduler, Box<dyn SourceNormalizer>>,
}

impl NormalizationRegistry {
    /// Create a new normalization registry with the built-in normalizers
    pub fn new() -> Self {
        let mut registry = Self {
            normalizers: HashMap::new(),
        };
        registry.register(Box::new(MetricsNormalizer::new(SlurmNormalizer::new())));
        registry.register(Box::new(MetricsNormalizer::new(PbsNormalizer::new())));
        registry.register(Box::new(MetricsNormalizer::new(LsfNormalizer::new())));
        registry.register(Box::new(MetricsNormalizer::new(UgeNormalizer::new())));
        registry.register(Box::new(MetricsNormalizer::new(HtcondorNormalizer::new())));
        registry
    }

    /// Register a normalizer, replacing any previous one for its scheduler
    pub fn register(&mut self, normalizer: Box<dyn SourceNormalizer>) {
        self.normalizers.insert(normalizer.scheduler(), normalizer);
    }

    pub fn get_normalizer(&self, scheduler: Scheduler) -> Option<&dyn SourceNormalizer> {
        self.normalizers.get(&scheduler).map(|n| n.as_ref())
    }

    /// Remove and return the normalizer for `scheduler`
    pub fn take(&mut self, scheduler: Scheduler) -> Option<Box<dyn SourceNormalizer>> {
        self.normalizers.remove(&scheduler)
    }

    /// List all registered schedulers
    pub fn list_sources(&self) -> Vec<Scheduler> {
        let mut sources: Vec<Scheduler> = self.normalizers.keys().copied().collect();
        sources.sort_by_key(|s| s.as_str());
        sources
    }
}

impl Default for NormalizationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
