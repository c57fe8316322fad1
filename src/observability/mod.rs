// Observability: metrics for the export pipeline. Logging lives in crate::logging.

pub mod metrics;

pub use metrics::{init, write_textfile};
