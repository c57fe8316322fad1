use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown scheduler: {0}")]
    UnknownScheduler(String),

    #[error("Mapping store {path} is corrupt: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    #[error("Mapping store {0} is locked by another run (remove the .lock file if no run is active)")]
    StoreLocked(PathBuf),

    #[error("Pseudonymization requested but no salt is configured (set pseudonymize.salt, pseudonymize.salt_file or HPC_EXPORT_SALT)")]
    MissingSalt,

    #[error("Unknown pseudonym: {0}")]
    UnknownPseudonym(String),
}

pub type Result<T> = std::result::Result<T, ExportError>;
