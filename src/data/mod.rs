pub mod dataset;
pub mod planner;
pub mod store;

pub use dataset::{Batch, Dataset, DatasetMerger};
pub use planner::PeriodPlanner;
pub use store::{CsvStore, MemoryStore, PersistenceStore};
