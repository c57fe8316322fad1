use std::fs;
use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::Deserialize;
use tracing::{debug, info};

use crate::constants::{CONFIG_ENV, DEFAULT_CONFIG_FILE, SALT_ENV};
use crate::error::{ExportError, Result};
use crate::pipeline::processing::emit::LATEST_SCHEMA_VERSION;
use crate::pipeline::processing::normalize::classify::{default_rules, RuleSpec};
use crate::pipeline::processing::parser::{htcondor, lsf};
use crate::pipeline::processing::pseudonymize::Category;
use crate::types::{RecordKind, Scheduler};

/// Top-level configuration, read from `hpc_export.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pseudonymize: PseudonymizeConfig,
    pub classification: ClassificationConfig,
    pub adapters: AdapterConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PseudonymizeConfig {
    pub enabled: bool,
    /// Canonical fields to protect: `user`, `group`, `account`, `nodelist` (jobs) / `hostname` (nodes)
    pub fields: Vec<String>,
    pub store_path: PathBuf,
    pub salt: Option<String>,
    pub salt_file: Option<PathBuf>,
}

impl Default for PseudonymizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fields: ["user", "group", "account", "nodelist"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
            store_path: PathBuf::from("pseudonym_map.csv"),
            salt: None,
            salt_file: None,
        }
    }
}

impl PseudonymizeConfig {
    /// Resolve the HMAC key: `salt`, then `HPC_EXPORT_SALT`, then `salt_file`.
    /// A configured salt file that does not exist yet is generated.
    pub fn resolve_salt(&self) -> Result<Vec<u8>> {
        if let Some(salt) = self.salt.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            debug!("Using salt from configuration");
            return Ok(salt.as_bytes().to_vec());
        }
        if let Ok(salt) = std::env::var(SALT_ENV) {
            let salt = salt.trim();
            if !salt.is_empty() {
                debug!("Using salt from {}", SALT_ENV);
                return Ok(salt.as_bytes().to_vec());
            }
        }
        match &self.salt_file {
            Some(path) if path.exists() => {
                let salt = fs::read_to_string(path)?;
                let salt = salt.trim();
                if salt.is_empty() {
                    return Err(ExportError::Config(format!(
                        "Salt file '{}' is empty",
                        path.display()
                    )));
                }
                Ok(salt.as_bytes().to_vec())
            }
            Some(path) => generate_salt_file(path),
            None => Err(ExportError::MissingSalt),
        }
    }

    /// The protected fields as categories, rejecting names that are not identifying fields
    pub fn categories(&self) -> Result<Vec<(String, Category)>> {
        self.fields
            .iter()
            .map(|field| {
                Category::for_field(field)
                    .map(|category| (field.clone(), category))
                    .ok_or_else(|| {
                        ExportError::Config(format!(
                            "pseudonymize.fields: '{}' is not an identifying field",
                            field
                        ))
                    })
            })
            .collect()
    }
}

fn generate_salt_file(path: &Path) -> Result<Vec<u8>> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let salt = hex::encode(bytes);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    std::io::Write::write_all(&mut file, salt.as_bytes())?;
    info!(path = %path.display(), "Generated new salt file");
    Ok(salt.into_bytes())
}

/// Ordered node-type rules; a per-scheduler list replaces `rules` for that scheduler
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub rules: Option<Vec<RuleSpec>>,
    pub slurm: Option<Vec<RuleSpec>>,
    pub pbs: Option<Vec<RuleSpec>>,
    pub lsf: Option<Vec<RuleSpec>>,
    pub uge: Option<Vec<RuleSpec>>,
    pub htcondor: Option<Vec<RuleSpec>>,
}

impl ClassificationConfig {
    pub fn rules_for(&self, scheduler: Scheduler) -> Vec<RuleSpec> {
        let specific = match scheduler {
            Scheduler::Slurm => &self.slurm,
            Scheduler::Pbs => &self.pbs,
            Scheduler::Lsf => &self.lsf,
            Scheduler::Uge => &self.uge,
            Scheduler::Htcondor => &self.htcondor,
        };
        specific
            .as_ref()
            .or(self.rules.as_ref())
            .cloned()
            .unwrap_or_else(default_rules)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub lsf: LsfAdapterConfig,
    pub htcondor: HtcondorAdapterConfig,
}

/// Positional column layouts for `bjobs -o` and `bhosts`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LsfAdapterConfig {
    pub job_columns: Option<Vec<String>>,
    pub host_columns: Option<Vec<String>>,
}

impl LsfAdapterConfig {
    pub fn columns_for(&self, kind: RecordKind) -> Vec<String> {
        match kind {
            RecordKind::Jobs => layout_or(&self.job_columns, &lsf::BJOBS_COLUMNS),
            RecordKind::Nodes => layout_or(&self.host_columns, &lsf::BHOSTS_COLUMNS),
        }
    }
}

/// Attribute orders passed to `condor_history -af` and `condor_status -af`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HtcondorAdapterConfig {
    pub job_attributes: Option<Vec<String>>,
    pub slot_attributes: Option<Vec<String>>,
}

impl HtcondorAdapterConfig {
    pub fn attributes_for(&self, kind: RecordKind) -> Vec<String> {
        match kind {
            RecordKind::Jobs => layout_or(&self.job_attributes, &htcondor::HISTORY_ATTRIBUTES),
            RecordKind::Nodes => layout_or(&self.slot_attributes, &htcondor::STATUS_ATTRIBUTES),
        }
    }
}

fn layout_or(configured: &Option<Vec<String>>, default: &[&str]) -> Vec<String> {
    match configured {
        Some(columns) if !columns.is_empty() => columns.clone(),
        _ => default.iter().map(|c| c.to_string()).collect(),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub schema_version: u8,
    /// NDJSON file receiving security events in addition to the `security` log target
    pub security_log: Option<PathBuf>,
    /// Prometheus textfile written at the end of a run
    pub metrics_file: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            schema_version: LATEST_SCHEMA_VERSION,
            security_log: None,
            metrics_file: None,
        }
    }
}

impl Config {
    /// Load configuration from `path`, else `HPC_EXPORT_CONFIG`, else `hpc_export.toml`
    /// when present. `.env` is read first so it can supply either variable.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));
        let config_path = match explicit {
            Some(path) => path,
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    return Ok(Config::default());
                }
                default
            }
        };

        let config_content = fs::read_to_string(&config_path).map_err(|e| {
            ExportError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&config_content)?;
        info!(path = %config_path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=LATEST_SCHEMA_VERSION).contains(&self.output.schema_version) {
            return Err(ExportError::Config(format!(
                "output.schema_version must be between 1 and {}",
                LATEST_SCHEMA_VERSION
            )));
        }
        self.pseudonymize.categories()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::normalize::classify::RuleField;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert!(config.pseudonymize.enabled);
        assert_eq!(config.pseudonymize.fields, vec!["user", "group", "account", "nodelist"]);
        assert_eq!(config.output.schema_version, LATEST_SCHEMA_VERSION);
        assert_eq!(config.classification.rules_for(Scheduler::Slurm), default_rules());
        assert_eq!(
            config.adapters.lsf.columns_for(RecordKind::Nodes)[0],
            "HOST_NAME"
        );
    }

    #[test]
    fn test_per_scheduler_rules_override_defaults() {
        let config = Config::from_toml_str(
            r#"
[[classification.rules]]
field = "gpu_count"
label = "gpu"

[[classification.pbs]]
field = "nodelist"
pattern = "bigmem"
label = "largemem"
"#,
        )
        .unwrap();

        let slurm = config.classification.rules_for(Scheduler::Slurm);
        assert_eq!(slurm.len(), 1);
        assert_eq!(slurm[0].field, RuleField::GpuCount);

        let pbs = config.classification.rules_for(Scheduler::Pbs);
        assert_eq!(pbs[0].field, RuleField::Nodelist);
        assert_eq!(pbs[0].label, "largemem");
    }

    #[test]
    fn test_adapter_layout_override() {
        let config = Config::from_toml_str(
            r#"
[adapters.htcondor]
job_attributes = ["ClusterId", "ProcId", "Owner"]
"#,
        )
        .unwrap();
        assert_eq!(
            config.adapters.htcondor.attributes_for(RecordKind::Jobs),
            vec!["ClusterId", "ProcId", "Owner"]
        );
        assert_eq!(
            config.adapters.htcondor.attributes_for(RecordKind::Nodes).len(),
            htcondor::STATUS_ATTRIBUTES.len()
        );
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let err = Config::from_toml_str("[output]\nschema_version = 9\n").unwrap_err();
        assert!(matches!(err, ExportError::Config(_)));

        let err = Config::from_toml_str("[pseudonymize]\nfields = [\"partition\"]\n").unwrap_err();
        assert!(matches!(err, ExportError::Config(_)));
    }

    #[test]
    fn test_salt_from_config_wins() {
        let config = PseudonymizeConfig {
            salt: Some(" pepper ".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_salt().unwrap(), b"pepper".to_vec());
    }

    #[test]
    fn test_missing_salt_file_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets").join("salt");
        let config = PseudonymizeConfig {
            salt_file: Some(path.clone()),
            ..Default::default()
        };
        // only meaningful when the environment does not supply a salt
        if std::env::var(SALT_ENV).is_ok() {
            return;
        }
        let first = config.resolve_salt().unwrap();
        assert_eq!(first.len(), 64);
        let second = config.resolve_salt().unwrap();
        assert_eq!(first, second);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
