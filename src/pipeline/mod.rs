// Batch pipeline: adapters, normalization, pseudonymization, emission

pub mod processing;

// Re-export key types and functions from each stage
pub use processing::{emit, normalize, parser, pseudonymize};
