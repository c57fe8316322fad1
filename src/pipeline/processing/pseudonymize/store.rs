//! Append-only CSV mapping store: `hash,plaintext,pseudonym`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::hasher::KeyedHasher;
use super::Category;
use crate::constants::MAPPING_STORE_HEADER;
use crate::error::{ExportError, Result};

/// One row of the mapping store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub key: String,
    pub plaintext: String,
    pub pseudonym: String,
    pub category: Category,
    pub sequence: u64,
}

/// Result of looking up (or minting) a pseudonym
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub pseudonym: String,
    pub minted: bool,
    /// Store key used when the plain key was taken by a different value
    pub collision_key: Option<String>,
}

/// Validated, indexed contents of a store file
#[derive(Debug, Default)]
pub struct MappingTable {
    entries: Vec<MappingEntry>,
    by_key: HashMap<String, usize>,
    by_pseudonym: HashMap<String, usize>,
    last_sequence: HashMap<Category, u64>,
}

impl MappingTable {
    /// Read and validate a store file. A missing or empty file is an empty table.
    pub fn load(path: &Path) -> Result<Self> {
        let mut table = Self::default();
        if !path.exists() || fs::metadata(path)?.len() == 0 {
            return Ok(table);
        }

        let corrupt = |reason: String| ExportError::StoreCorrupt {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;
        let mut rows = reader.records();

        match rows.next() {
            Some(header) => {
                let header = header?;
                if header.iter().ne(MAPPING_STORE_HEADER.iter().copied()) {
                    return Err(corrupt(format!(
                        "header is '{}', expected '{}'",
                        header.iter().collect::<Vec<_>>().join(","),
                        MAPPING_STORE_HEADER.join(",")
                    )));
                }
            }
            None => return Ok(table),
        }

        for row in rows {
            let row = row?;
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            if row.len() != MAPPING_STORE_HEADER.len() {
                return Err(corrupt(format!("line {}: {} fields, expected 3", line, row.len())));
            }
            let (key, plaintext, pseudonym) = (&row[0], &row[1], &row[2]);
            if key.is_empty() {
                return Err(corrupt(format!("line {}: empty hash", line)));
            }
            let (category, sequence) = Category::parse_pseudonym(pseudonym)
                .ok_or_else(|| corrupt(format!("line {}: malformed pseudonym '{}'", line, pseudonym)))?;
            if sequence == u64::MAX {
                return Err(corrupt(format!("line {}: sequence of '{}' is exhausted", line, pseudonym)));
            }
            if table.by_key.contains_key(key) {
                return Err(corrupt(format!("line {}: duplicate hash", line)));
            }
            if table.by_pseudonym.contains_key(pseudonym) {
                return Err(corrupt(format!("line {}: duplicate pseudonym '{}'", line, pseudonym)));
            }
            table.insert(MappingEntry {
                key: key.to_string(),
                plaintext: plaintext.to_string(),
                pseudonym: pseudonym.to_string(),
                category,
                sequence,
            });
        }
        Ok(table)
    }

    fn insert(&mut self, entry: MappingEntry) {
        let position = self.entries.len();
        let last = self.last_sequence.entry(entry.category).or_insert(0);
        *last = (*last).max(entry.sequence);
        self.by_key.insert(entry.key.clone(), position);
        self.by_pseudonym.insert(entry.pseudonym.clone(), position);
        self.entries.push(entry);
    }

    fn get_by_key(&self, key: &str) -> Option<&MappingEntry> {
        self.by_key.get(key).map(|&i| &self.entries[i])
    }

    fn next_sequence(&self, category: Category) -> u64 {
        self.last_sequence.get(&category).copied().unwrap_or(0) + 1
    }

    pub fn lookup_pseudonym(&self, pseudonym: &str) -> Option<&MappingEntry> {
        self.by_pseudonym.get(pseudonym).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `<store>.lock`, held for the lifetime of a [`MappingStore`]
#[derive(Debug)]
struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    fn acquire(store: &Path) -> Result<Self> {
        let mut path = store.as_os_str().to_owned();
        path.push(".lock");
        let path = PathBuf::from(path);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                debug!(lock = %path.display(), "Acquired mapping store lock");
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(ExportError::StoreLocked(store.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to remove mapping store lock");
        }
    }
}

fn open_for_append(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    Ok(options.open(path)?)
}

#[cfg(unix)]
fn warn_if_shared(path: &Path, file: &File) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = file.metadata() {
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            warn!(path = %path.display(), mode = format!("{:o}", mode & 0o777), "Mapping store is readable by other users");
        }
    }
}

#[cfg(not(unix))]
fn warn_if_shared(_path: &Path, _file: &File) {}

/// Persistent bijection between original values and pseudonyms.
///
/// Opening validates the file and takes the lock; rows are only ever appended.
pub struct MappingStore {
    path: PathBuf,
    table: MappingTable,
    writer: csv::Writer<File>,
    hasher: Box<dyn KeyedHasher>,
    _lock: StoreLock,
}

impl MappingStore {
    pub fn open(path: &Path, hasher: Box<dyn KeyedHasher>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let lock = StoreLock::acquire(path)?;
        let table = MappingTable::load(path)?;

        let file = open_for_append(path)?;
        warn_if_shared(path, &file);
        let is_new = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer.write_record(MAPPING_STORE_HEADER)?;
            writer.flush()?;
        }

        info!(path = %path.display(), entries = table.len(), "Opened mapping store");
        Ok(Self {
            path: path.to_path_buf(),
            table,
            writer,
            hasher,
            _lock: lock,
        })
    }

    /// Pseudonym for `value`, minting and appending a new entry on first sight
    pub fn resolve(&mut self, category: Category, value: &str) -> Result<Resolved> {
        let base = self.hasher.key(category, value);
        let mut key = base.clone();
        let mut suffix = 0u32;

        while let Some(entry) = self.table.get_by_key(&key) {
            if entry.category == category && entry.plaintext == value {
                return Ok(Resolved {
                    pseudonym: entry.pseudonym.clone(),
                    minted: false,
                    collision_key: None,
                });
            }
            suffix += 1;
            key = format!("{}~{}", base, suffix);
        }

        let sequence = self.table.next_sequence(category);
        let entry = MappingEntry {
            key: key.clone(),
            plaintext: value.to_string(),
            pseudonym: category.pseudonym(sequence),
            category,
            sequence,
        };
        self.writer
            .write_record([entry.key.as_str(), entry.plaintext.as_str(), entry.pseudonym.as_str()])?;
        self.writer.flush()?;

        let pseudonym = entry.pseudonym.clone();
        self.table.insert(entry);
        Ok(Resolved {
            pseudonym,
            minted: true,
            collision_key: (suffix > 0).then_some(key),
        })
    }

    pub fn lookup_pseudonym(&self, pseudonym: &str) -> Option<&MappingEntry> {
        self.table.lookup_pseudonym(pseudonym)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
