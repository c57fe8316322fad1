pub mod export_use_case;
pub mod ports;
pub mod reveal_use_case;

pub use export_use_case::{open_store, ExportUseCase, RunSummary};
pub use reveal_use_case::{RevealUseCase, Revealed};
