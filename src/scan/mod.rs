pub mod chunk;
pub mod orchestrator;
pub mod sizer;

pub use orchestrator::{ScanOptions, ScanOrchestrator, ScanOutcome};
