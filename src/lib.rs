pub mod classify;
pub mod cleanup;
pub mod collab;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod insights;
pub mod junk;
pub mod model;
pub mod monitor;
pub mod planner;
pub mod pool;
pub mod scan;
pub mod tree;

pub use cleanup::{Cart, CleanupAction, CleanupExecutor, CleanupPlan};
pub use config::EngineConfig;
pub use engine::{ScanReport, StorageEngine};
pub use error::{BlockedReason, ScanError};
pub use events::{CancelToken, ScanEvent};
pub use insights::human_bytes;
pub use model::{ScanMode, ScanSession, ScanStatus, StorageNode};
pub use pool::{ThermalState, WorkerPolicy, WorkerPool};
pub use scan::{ScanOptions, ScanOrchestrator, ScanOutcome};
pub use tree::TreeIndex;
