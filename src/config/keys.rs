/// Key list loading (first column of a CSV with a header row)
use std::path::Path;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::types::Key;

pub fn load_keys<P: AsRef<Path>>(path: P) -> Result<Vec<Key>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)
        .map_err(|e| SyncError::Config(format!("Failed to read key file {}: {}", path.display(), e)))?;

    let mut keys = Vec::new();
    for record in reader.records() {
        let record = record?;
        let code = record
            .get(0)
            .map(|c| c.trim_start_matches('\u{feff}').trim())
            .unwrap_or_default();
        if !code.is_empty() {
            keys.push(Key::new(code));
        }
    }

    debug!("Loaded {} keys from {}", keys.len(), path.display());
    Ok(keys)
}
