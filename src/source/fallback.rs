/// Chain of sources tried in order for each period
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::source::DataSource;
use crate::types::{Key, Period, RawRow};

/// First non-empty answer wins. Without rows, a retryable error from any
/// source is returned so the month gets retried; otherwise an empty answer
/// beats non-retryable errors, and the last error is returned when every
/// source failed.
pub struct FallbackSource {
    sources: Vec<Arc<dyn DataSource>>,
    name: String,
}

impl FallbackSource {
    pub fn new(sources: Vec<Arc<dyn DataSource>>) -> Result<Self> {
        if sources.is_empty() {
            return Err(SyncError::Config("fallback source needs at least one source".to_string()));
        }
        let name = sources
            .iter()
            .map(|s| s.name().to_string())
            .collect::<Vec<_>>()
            .join("+");
        Ok(FallbackSource { sources, name })
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl DataSource for FallbackSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_period(&self, key: &Key, period: Period) -> Result<Vec<RawRow>> {
        let mut saw_empty = false;
        let mut retryable = None;
        let mut last_error = None;

        for source in &self.sources {
            match source.fetch_period(key, period).await {
                Ok(rows) if !rows.is_empty() => {
                    debug!("{} {} answered by {}", key, period, source.name());
                    return Ok(rows);
                }
                Ok(_) => saw_empty = true,
                Err(e) => {
                    warn!("⚠️  {} failed for {} {}: {}", source.name(), key, period, e);
                    if e.is_retryable() {
                        retryable.get_or_insert(e);
                    } else {
                        last_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = retryable {
            return Err(e);
        }
        match last_error {
            Some(e) if !saw_empty => Err(e),
            _ => Ok(Vec::new()),
        }
    }
}
