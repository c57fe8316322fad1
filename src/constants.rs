/// Scheduler name constants to ensure consistency across the codebase
/// These are the names used on the command line, in config sections and in the `scheduler` column

pub const SLURM: &str = "slurm";
pub const PBS: &str = "pbs";
pub const LSF: &str = "lsf";
pub const UGE: &str = "uge";
pub const HTCONDOR: &str = "htcondor";

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "hpc_export.toml";

/// Environment variables honored on top of the config file (and `.env`)
pub const CONFIG_ENV: &str = "HPC_EXPORT_CONFIG";
pub const SALT_ENV: &str = "HPC_EXPORT_SALT";

/// Header of the mapping store file
pub const MAPPING_STORE_HEADER: [&str; 3] = ["hash", "plaintext", "pseudonym"];

/// Zero-padding width of pseudonym sequence numbers (`user_0001`)
pub const PSEUDONYM_SEQUENCE_WIDTH: usize = 4;

/// Memory requests at or above this value are "unlimited" sentinels, not real requests
pub const UNBOUNDED_MEM_SENTINEL: u64 = 9_223_372_036_854_000_000;

/// Convert a user-supplied scheduler alias to its canonical name
pub fn scheduler_alias_to_name(alias: &str) -> &str {
    match alias {
        "slurm" | "sacct" | "sinfo" => SLURM,
        "pbs" | "torque" | "pbspro" | "openpbs" => PBS,
        "lsf" => LSF,
        "uge" | "sge" | "gridengine" => UGE,
        "htcondor" | "condor" => HTCONDOR,
        other => other,
    }
}

/// Get all supported scheduler names
pub fn get_supported_schedulers() -> Vec<&'static str> {
    vec![SLURM, PBS, LSF, UGE, HTCONDOR]
}
