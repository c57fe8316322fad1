pub mod csv_output_adapter;
pub mod security_log_adapter;

pub use csv_output_adapter::{CsvOutputAdapter, OutputTarget};
pub use security_log_adapter::{FileSecurityLog, InMemorySecurityLog};
