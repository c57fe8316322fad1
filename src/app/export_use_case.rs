use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::app::ports::{RecordSink, SecurityEvent, SecurityLog};
use crate::config::Config;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::processing::normalize::classify::Classifier;
use crate::pipeline::processing::normalize::Normalizer;
use crate::pipeline::processing::parser::parser_for;
use crate::pipeline::processing::pseudonymize::{HmacSha256Hasher, MappingStore, Pseudonymizer};
use crate::types::{RecordKind, Scheduler};

/// Counters reported at the end of every export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub scheduler: String,
    pub kind: String,
    pub parsed: u64,
    pub skipped: u64,
    pub filtered: u64,
    pub rejected: u64,
    pub deduplicated: u64,
    pub pseudonymized: u64,
    pub emitted: u64,
}

/// Open the configured mapping store with the resolved salt, and log the open
pub fn open_store(config: &Config, security: &dyn SecurityLog) -> Result<MappingStore> {
    let salt = config.pseudonymize.resolve_salt()?;
    let hasher = HmacSha256Hasher::new(&salt)?;
    let store = MappingStore::open(&config.pseudonymize.store_path, Box::new(hasher))?;
    security.record(SecurityEvent::StoreOpened {
        path: store.path().display().to_string(),
        entries: store.len(),
    })?;
    Ok(store)
}

/// Use case wiring adapter → normalizer → pseudonymizer → sink for one input
pub struct ExportUseCase<'a> {
    config: &'a Config,
    sink: Box<dyn RecordSink + 'a>,
    security: &'a dyn SecurityLog,
    run_id: Uuid,
}

impl<'a> ExportUseCase<'a> {
    pub fn new(
        config: &'a Config,
        sink: Box<dyn RecordSink + 'a>,
        security: &'a dyn SecurityLog,
        run_id: Uuid,
    ) -> Self {
        Self {
            config,
            sink,
            security,
            run_id,
        }
    }

    /// Run the export. Values are pseudonymized only when a store is passed.
    #[instrument(
        name = "export",
        skip(self, input, store),
        fields(run_id = %self.run_id, bytes = input.len(), pseudonymize = store.is_some())
    )]
    pub fn run(
        &mut self,
        scheduler: Scheduler,
        kind: RecordKind,
        input: &str,
        store: Option<&mut MappingStore>,
    ) -> Result<RunSummary> {
        let start_time = Instant::now();
        metrics::run::started(scheduler.as_str(), &kind.to_string());

        let result = self.execute(scheduler, kind, input, store);
        if result.is_err() {
            metrics::run::failed(scheduler.as_str(), &kind.to_string());
        }
        metrics::run::duration(start_time.elapsed().as_secs_f64());
        result
    }

    fn execute(
        &mut self,
        scheduler: Scheduler,
        kind: RecordKind,
        input: &str,
        store: Option<&mut MappingStore>,
    ) -> Result<RunSummary> {
        let fields = self.config.pseudonymize.categories()?;
        let parser = parser_for(scheduler, kind, &self.config.adapters);
        let report = parser.parse(input);

        let classifier = Classifier::from_specs(&self.config.classification.rules_for(scheduler))?;
        let normalizer = Normalizer::new(scheduler, classifier)?;

        let mut summary = RunSummary {
            run_id: self.run_id.to_string(),
            scheduler: scheduler.to_string(),
            kind: kind.to_string(),
            parsed: report.parsed() as u64,
            skipped: report.skipped.len() as u64,
            filtered: report.filtered as u64,
            ..RunSummary::default()
        };

        match kind {
            RecordKind::Jobs => {
                let mut outcome = normalizer.normalize_jobs(&report.records);
                summary.rejected = outcome.rejected as u64;
                summary.deduplicated = outcome.deduplicated as u64;
                if let Some(store) = store {
                    summary.pseudonymized = Pseudonymizer::new(store, self.security, fields)
                        .pseudonymize_jobs(&mut outcome.records)?;
                }
                summary.emitted = self.sink.write_jobs(&outcome.records)?;
            }
            RecordKind::Nodes => {
                let mut outcome = normalizer.normalize_nodes(&report.records);
                summary.rejected = outcome.rejected as u64;
                summary.deduplicated = outcome.deduplicated as u64;
                if let Some(store) = store {
                    summary.pseudonymized = Pseudonymizer::new(store, self.security, fields)
                        .pseudonymize_nodes(&mut outcome.records)?;
                }
                summary.emitted = self.sink.write_nodes(&outcome.records)?;
            }
        }

        info!(
            parsed = summary.parsed,
            skipped = summary.skipped,
            filtered = summary.filtered,
            rejected = summary.rejected,
            deduplicated = summary.deduplicated,
            pseudonymized = summary.pseudonymized,
            emitted = summary.emitted,
            "Export finished"
        );
        Ok(summary)
    }
}
