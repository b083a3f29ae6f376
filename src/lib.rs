pub mod types;
pub mod error;
pub mod data;
pub mod source;
pub mod sync;
pub mod config;
pub mod utils;

pub use types::*;
pub use error::{Result, SyncError};
