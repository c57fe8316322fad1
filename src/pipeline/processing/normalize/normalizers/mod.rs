// Base trait and utilities for scheduler-specific normalizers
pub mod base;

// Individual normalizer implementations
pub mod htcondor;
pub mod lsf;
pub mod pbs;
pub mod slurm;
pub mod uge;

// Re-export the main components
pub use base::{MetricsNormalizer, SourceNormalizer};
pub use htcondor::HtcondorNormalizer;
pub use lsf::LsfNormalizer;
pub use pbs::PbsNormalizer;
pub use slurm::SlurmNormalizer;
pub use uge::UgeNormalizer;
