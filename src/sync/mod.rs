pub mod engine;
pub mod orchestrator;
pub mod pool;
pub mod report;

pub use engine::SyncEngine;
pub use orchestrator::{FetchOrchestrator, SyncState};
pub use pool::WorkerPool;
pub use report::{SyncReport, SyncTotals};
