/// Dataset persistence - CSV files on disk, or in memory
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::data::Dataset;
use crate::error::{Result, SyncError};
use crate::types::{DateStyle, Field, Key, Row};
use crate::utils::CalendarNormalizer;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const DATE_COLUMN: &str = "date";

/// Where each key's dataset lives between runs
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Empty dataset when nothing was stored yet
    async fn load(&self, key: &Key) -> Result<Dataset>;

    /// Replace the stored dataset atomically
    async fn save(&self, key: &Key, dataset: &Dataset) -> Result<()>;
}

/// One `<key>.csv` per key: UTF-8 with BOM, header row, newest date first
pub struct CsvStore {
    data_dir: PathBuf,
    date_style: DateStyle,
    calendar: CalendarNormalizer,
    columns: Option<Vec<Field>>,
}

impl CsvStore {
    pub fn new(data_dir: impl Into<PathBuf>, date_style: DateStyle) -> Self {
        CsvStore {
            data_dir: data_dir.into(),
            date_style,
            calendar: CalendarNormalizer::default(),
            columns: None,
        }
    }

    pub fn with_calendar(mut self, calendar: CalendarNormalizer) -> Self {
        self.calendar = calendar;
        self
    }

    /// Fixed column layout; by default only populated columns are written
    pub fn with_columns(mut self, columns: Vec<Field>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn path_for(&self, key: &Key) -> Result<PathBuf> {
        let code = key.as_str();
        if code.is_empty() || code.contains(['/', '\\']) || code.starts_with('.') {
            return Err(SyncError::Persistence(format!("invalid key for file name: '{}'", code)));
        }
        Ok(self.data_dir.join(format!("{}.csv", code)))
    }

    fn decode(&self, path: &Path, bytes: &[u8]) -> Result<Dataset> {
        let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(body);

        let headers = reader.headers()?.clone();
        if headers.get(0).map(str::trim) != Some(DATE_COLUMN) {
            return Err(SyncError::Persistence(format!(
                "{}: first column must be '{}'",
                path.display(),
                DATE_COLUMN
            )));
        }
        let columns = headers
            .iter()
            .skip(1)
            .map(|h| {
                Field::parse(h).ok_or_else(|| {
                    SyncError::Persistence(format!("{}: unknown column '{}'", path.display(), h))
                })
            })
            .collect::<Result<Vec<Field>>>()?;

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let at = |what: String| SyncError::Persistence(format!("{} line {}: {}", path.display(), line + 2, what));

            let date_text = record.get(0).unwrap_or_default();
            let date = self
                .calendar
                .parse(date_text, self.date_style)
                .map_err(|e| at(e.to_string()))?;
            let mut row = Row::new(date);

            for (field, value) in columns.iter().zip(record.iter().skip(1)) {
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                if field.is_count() {
                    let n = value
                        .parse::<u64>()
                        .map_err(|_| at(format!("bad {} '{}'", field.as_str(), value)))?;
                    row.set_count(*field, n);
                } else {
                    let n = value
                        .parse::<f64>()
                        .map_err(|_| at(format!("bad {} '{}'", field.as_str(), value)))?;
                    row.set_price(*field, n);
                }
            }
            rows.push(row);
        }

        Ok(Dataset::from_rows(rows))
    }

    fn encode(&self, dataset: &Dataset) -> Result<Vec<u8>> {
        let columns = self
            .columns
            .clone()
            .unwrap_or_else(|| dataset.populated_fields());

        let mut out = UTF8_BOM.to_vec();
        {
            let mut writer = csv::Writer::from_writer(&mut out);
            let mut header = vec![DATE_COLUMN.to_string()];
            header.extend(columns.iter().map(|f| f.as_str().to_string()));
            writer.write_record(&header)?;

            for row in dataset.rows() {
                let mut record = vec![self.calendar.format(row.date, self.date_style)];
                record.extend(columns.iter().map(|f| match row.get(*f) {
                    Some(v) if f.is_count() => format!("{}", v as u64),
                    Some(v) => format!("{}", v),
                    None => String::new(),
                }));
                writer.write_record(&record)?;
            }
            writer
                .flush()
                .map_err(|e| SyncError::Persistence(format!("csv flush failed: {}", e)))?;
        }
        Ok(out)
    }
}

#[async_trait]
impl PersistenceStore for CsvStore {
    async fn load(&self, key: &Key) -> Result<Dataset> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No existing dataset for {} at {}", key, path.display());
                return Ok(Dataset::empty());
            }
            Err(e) => return Err(SyncError::from(e).into_persistence()),
        };
        let dataset = self.decode(&path, &bytes).map_err(SyncError::into_persistence)?;
        debug!("Loaded {} rows for {} from {}", dataset.len(), key, path.display());
        Ok(dataset)
    }

    async fn save(&self, key: &Key, dataset: &Dataset) -> Result<()> {
        let path = self.path_for(key)?;
        let bytes = self.encode(dataset).map_err(SyncError::into_persistence)?;

        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| SyncError::from(e).into_persistence())?;

        // write-then-rename so readers never see a half written file
        let tmp = path.with_extension("csv.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| SyncError::from(e).into_persistence())?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| SyncError::from(e).into_persistence())?;

        debug!("Saved {} rows for {} to {}", dataset.len(), key, path.display());
        Ok(())
    }
}

/// In-process store, handy for embedding and tests
#[derive(Default)]
pub struct MemoryStore {
    datasets: Arc<RwLock<HashMap<Key, Dataset>>>,
    saves: Arc<RwLock<HashMap<Key, usize>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: Key, dataset: Dataset) {
        let mut datasets = self.datasets.write().await;
        datasets.insert(key, dataset);
    }

    pub async fn get(&self, key: &Key) -> Option<Dataset> {
        let datasets = self.datasets.read().await;
        datasets.get(key).cloned()
    }

    /// Number of `save` calls seen for `key`
    pub async fn save_count(&self, key: &Key) -> usize {
        let saves = self.saves.read().await;
        saves.get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn load(&self, key: &Key) -> Result<Dataset> {
        Ok(self.get(key).await.unwrap_or_default())
    }

    async fn save(&self, key: &Key, dataset: &Dataset) -> Result<()> {
        {
            let mut saves = self.saves.write().await;
            *saves.entry(key.clone()).or_insert(0) += 1;
        }
        self.insert(key.clone(), dataset.clone()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> Dataset {
        let mut a = Row::new(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap());
        a.volume = Some(28_345_772);
        a.close = Some(1145.0);
        a.change = Some(-5.5);
        let mut b = Row::new(NaiveDate::from_ymd_opt(2025, 7, 31).unwrap());
        b.volume = Some(30_000_000);
        b.close = Some(1150.5);
        Dataset::from_rows(vec![b, a])
    }

    #[tokio::test]
    async fn test_csv_round_trip_offset_dates() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path(), DateStyle::Offset);
        let key = Key::new("2330");

        store.save(&key, &sample()).await.unwrap();
        let loaded = store.load(&key).await.unwrap();
        assert_eq!(loaded, sample());

        let raw = std::fs::read(dir.path().join("2330.csv")).unwrap();
        assert!(raw.starts_with(UTF8_BOM));
        let text = String::from_utf8(raw[3..].to_vec()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("date,volume,close,change"));
        assert_eq!(lines.next(), Some("114/08/01,28345772,1145,-5.5"));
        assert_eq!(lines.next(), Some("114/07/31,30000000,1150.5,"));
    }

    #[tokio::test]
    async fn test_csv_round_trip_iso_dates_fixed_columns() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path(), DateStyle::Iso)
            .with_columns(vec![Field::Volume, Field::High, Field::Close]);
        let key = Key::new("6488");

        store.save(&key, &sample()).await.unwrap();
        let text = std::fs::read_to_string(dir.path().join("6488.csv")).unwrap();
        assert!(text.contains("date,volume,high,close"));
        assert!(text.contains("2025-08-01,28345772,,1145"));

        let loaded = store.load(&key).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.rows()[0].change, None);
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("nested"), DateStyle::Offset);
        assert!(store.load(&Key::new("1101")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_path_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        // data_dir is a regular file, so the dataset path cannot be opened
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();
        let store = CsvStore::new(&blocker, DateStyle::Offset);

        assert!(matches!(
            store.load(&Key::new("2330")).await,
            Err(SyncError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn test_load_sorts_and_dedups_unsorted_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("2317.csv"),
            "date,close\n114/07/01,100\n114/08/01,110\n114/07/01,101\n",
        )
        .unwrap();

        let store = CsvStore::new(dir.path(), DateStyle::Offset);
        let loaded = store.load(&Key::new("2317")).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.rows()[0].close, Some(110.0));
        assert_eq!(loaded.rows()[1].close, Some(101.0));
    }

    #[tokio::test]
    async fn test_unparseable_row_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2603.csv"), "date,close\n114/13/01,100\n").unwrap();

        let store = CsvStore::new(dir.path(), DateStyle::Offset);
        let err = store.load(&Key::new("2603")).await.unwrap_err();
        assert!(matches!(err, SyncError::Persistence(ref m) if m.contains("line 2")));
    }

    #[tokio::test]
    async fn test_unknown_column_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2603.csv"), "date,dividend\n114/08/01,1\n").unwrap();

        let store = CsvStore::new(dir.path(), DateStyle::Offset);
        assert!(matches!(
            store.load(&Key::new("2603")).await,
            Err(SyncError::Persistence(_))
        ));
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let store = CsvStore::new("data", DateStyle::Offset);
        assert!(store.path_for(&Key::new("../etc")).is_err());
        assert!(store.path_for(&Key::new("a/b")).is_err());
        assert!(store.path_for(&Key::new("")).is_err());
        assert!(store.path_for(&Key::new("00878")).is_ok());
    }

    #[tokio::test]
    async fn test_memory_store_counts_saves() {
        let store = MemoryStore::new();
        let key = Key::new("2330");
        assert!(store.load(&key).await.unwrap().is_empty());

        store.save(&key, &sample()).await.unwrap();
        store.save(&key, &sample()).await.unwrap();
        assert_eq!(store.save_count(&key).await, 2);
        assert_eq!(store.load(&key).await.unwrap().len(), 2);
    }
}
