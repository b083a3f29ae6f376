pub mod keys;
pub mod loader;

pub use keys::load_keys;
pub use loader::{load_config, validate_config, LogFormat, SourceKind, SyncConfig};
