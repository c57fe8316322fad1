use std::fs;
use std::path::Path;

use anyhow::Result;
use tempfile::tempdir;
use uuid::Uuid;

use hpc_export::app::ports::SecurityEvent;
use hpc_export::app::{open_store, ExportUseCase, RevealUseCase};
use hpc_export::config::Config;
use hpc_export::error::ExportError;
use hpc_export::infra::{CsvOutputAdapter, InMemorySecurityLog};
use hpc_export::pipeline::emit::CsvEmitter;
use hpc_export::pipeline::normalize::CanonicalJobRecord;
use hpc_export::pipeline::pseudonymize::{Category, KeyedHasher, MappingStore, MappingTable, Pseudonymizer};
use hpc_export::types::{RecordKind, Scheduler};

const SACCT_JOBS: &str = include_str!("resources/sacct_jobs.txt");

/// Maps every value to the same key, forcing the collision path
struct ConstantHasher;

impl KeyedHasher for ConstantHasher {
    fn key(&self, _category: Category, _value: &str) -> String {
        "deadbeef".to_string()
    }
}

fn config_in(dir: &Path) -> Config {
    let mut config = Config::default();
    config.pseudonymize.salt = Some("integration-test-salt".to_string());
    config.pseudonymize.store_path = dir.join("pseudonym_map.csv");
    config
}

fn export_with_store(config: &Config, output: &Path, log: &InMemorySecurityLog) -> Result<u64> {
    let mut store = open_store(config, log)?;
    let sink = CsvOutputAdapter::new(Some(output), CsvEmitter::default());
    let mut use_case = ExportUseCase::new(config, Box::new(sink), log, Uuid::new_v4());
    let summary = use_case.run(Scheduler::Slurm, RecordKind::Jobs, SACCT_JOBS, Some(&mut store))?;
    Ok(summary.pseudonymized)
}

#[test]
fn test_repeated_runs_produce_identical_output() -> Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path());
    let log = InMemorySecurityLog::new();

    let first = dir.path().join("first.csv");
    let second = dir.path().join("second.csv");
    // user, group and account of two jobs plus three hosts
    assert_eq!(export_with_store(&config, &first, &log)?, 9);
    assert_eq!(export_with_store(&config, &second, &log)?, 9);

    assert_eq!(fs::read_to_string(&first)?, fs::read_to_string(&second)?);

    // nothing new was minted the second time
    let table = MappingTable::load(&config.pseudonymize.store_path)?;
    assert_eq!(table.len(), 9);
    Ok(())
}

#[test]
fn test_output_contains_no_plaintext_identities() -> Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path());
    let output = dir.path().join("jobs.csv");
    export_with_store(&config, &output, &InMemorySecurityLog::new())?;

    let csv = fs::read_to_string(&output)?;
    for plaintext in ["alice", "bob", "physics", "chem02", "gpu01", "node02"] {
        assert!(!csv.contains(plaintext), "{} leaked into the output", plaintext);
    }
    assert!(csv.contains("user_0001"));
    assert!(csv.contains("host_0003"));
    Ok(())
}

#[test]
fn test_reveal_round_trip_after_export() -> Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path());
    let output = dir.path().join("jobs.csv");
    export_with_store(&config, &output, &InMemorySecurityLog::new())?;

    let log = InMemorySecurityLog::new();
    let reveal = RevealUseCase::new(&log);
    assert_eq!(reveal.reveal(&config.pseudonymize.store_path, "user_0002")?.plaintext, "bob");
    assert_eq!(reveal.reveal(&config.pseudonymize.store_path, "host_0002")?.plaintext, "node01");
    assert_eq!(
        reveal.reveal(&config.pseudonymize.store_path, "account_0001")?.plaintext,
        "phys01"
    );

    let events = log.events();
    assert_eq!(events.len(), 3);
    assert!(events
        .iter()
        .all(|e| matches!(e, SecurityEvent::PseudonymRevealed { .. })));
    Ok(())
}

#[test]
fn test_colliding_keys_keep_distinct_pseudonyms() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("map.csv");
    let log = InMemorySecurityLog::new();

    let mut alice = CanonicalJobRecord::new(Scheduler::Slurm, "1");
    alice.user = "alice".to_string();
    let mut bob = CanonicalJobRecord::new(Scheduler::Slurm, "2");
    bob.user = "bob".to_string();
    let mut jobs = vec![alice, bob];

    {
        let mut store = MappingStore::open(&path, Box::new(ConstantHasher))?;
        let fields = vec![("user".to_string(), Category::User)];
        let replaced = Pseudonymizer::new(&mut store, &log, fields).pseudonymize_jobs(&mut jobs)?;
        assert_eq!(replaced, 2);
    }
    assert_eq!(jobs[0].user, "user_0001");
    assert_eq!(jobs[1].user, "user_0002");

    let events = log.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        SecurityEvent::HashCollision { category, key, pseudonym } => {
            assert_eq!(category, "user");
            assert_eq!(key, "deadbeef~1");
            assert_eq!(pseudonym, "user_0002");
        }
        other => panic!("unexpected event {:?}", other),
    }

    // the suffixed entry is found again after a reopen
    let mut store = MappingStore::open(&path, Box::new(ConstantHasher))?;
    let resolved = store.resolve(Category::User, "bob")?;
    assert_eq!(resolved.pseudonym, "user_0002");
    assert!(!resolved.minted);
    Ok(())
}

#[test]
fn test_corrupt_store_is_fatal() -> Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path());
    fs::write(
        &config.pseudonymize.store_path,
        "hash,plaintext,pseudonym\nabc,alice,user_0001\ndef,bob,user_0001\n",
    )?;

    let result = open_store(&config, &InMemorySecurityLog::new());
    assert!(matches!(result, Err(ExportError::StoreCorrupt { .. })));

    // the failed open released its lock
    let lock = dir.path().join("pseudonym_map.csv.lock");
    assert!(!lock.exists());
    Ok(())
}

#[test]
fn test_concurrent_open_is_refused() -> Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path());
    let log = InMemorySecurityLog::new();

    let held = open_store(&config, &log)?;
    assert!(matches!(open_store(&config, &log), Err(ExportError::StoreLocked(_))));
    drop(held);
    assert!(open_store(&config, &log).is_ok());
    Ok(())
}
