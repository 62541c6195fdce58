use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;
use tokio::task;

use crate::aggregate::Translations;
use crate::record::Record;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence for message records and their translation payload.
pub trait RecordStore: Send + Sync {
    fn load<'a>(&'a self, record_id: &'a str) -> StoreFuture<'a, Option<Record>>;

    /// Replaces the record's translation payload. Saving the same payload
    /// twice leaves the record unchanged.
    fn save<'a>(&'a self, record_id: &'a str, payload: &'a Translations) -> StoreFuture<'a, ()>;
}

impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    fn load<'a>(&'a self, record_id: &'a str) -> StoreFuture<'a, Option<Record>> {
        (**self).load(record_id)
    }

    fn save<'a>(&'a self, record_id: &'a str, payload: &'a Translations) -> StoreFuture<'a, ()> {
        (**self).save(record_id, payload)
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, Record>>,
    saves: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: Record) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record);
    }

    pub fn get(&self, record_id: &str) -> Option<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(record_id)
            .cloned()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl RecordStore for MemoryRecordStore {
    fn load<'a>(&'a self, record_id: &'a str) -> StoreFuture<'a, Option<Record>> {
        Box::pin(async move { Ok(self.get(record_id)) })
    }

    fn save<'a>(&'a self, record_id: &'a str, payload: &'a Translations) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.saves.fetch_add(1, Ordering::SeqCst);
            let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            let record = records
                .get_mut(record_id)
                .ok_or_else(|| anyhow!("record not found: {}", record_id))?;
            record.props.translations = Some(payload.clone());
            Ok(())
        })
    }
}

/// One pretty-printed JSON file per record. Writes go through a temp file in
/// the same directory and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create store dir: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn put(&self, record: &Record) -> Result<()> {
        let path = self.record_path(&record.id)?;
        write_json_atomic(&self.dir, &path, record)
    }

    pub fn get(&self, record_id: &str) -> Result<Option<Record>> {
        let path = self.record_path(record_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read record: {}", path.display()))?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse record: {}", path.display()))?;
        Ok(Some(record))
    }

    fn update_translations(&self, record_id: &str, payload: &Translations) -> Result<()> {
        let mut record = self
            .get(record_id)?
            .ok_or_else(|| anyhow!("record not found: {}", record_id))?;
        record.props.translations = Some(payload.clone());
        self.put(&record)
    }

    fn record_path(&self, record_id: &str) -> Result<PathBuf> {
        validate_record_id(record_id)?;
        Ok(self.dir.join(format!("{}.json", record_id)))
    }
}

// File I/O runs on the blocking pool so concurrent saves do not hold up
// runtime workers.
impl RecordStore for FileRecordStore {
    fn load<'a>(&'a self, record_id: &'a str) -> StoreFuture<'a, Option<Record>> {
        let store = self.clone();
        let record_id = record_id.to_string();
        Box::pin(async move {
            task::spawn_blocking(move || store.get(&record_id))
                .await
                .context("record load task failed")?
        })
    }

    fn save<'a>(&'a self, record_id: &'a str, payload: &'a Translations) -> StoreFuture<'a, ()> {
        let store = self.clone();
        let record_id = record_id.to_string();
        let payload = payload.clone();
        Box::pin(async move {
            task::spawn_blocking(move || store.update_translations(&record_id, &payload))
                .await
                .context("record save task failed")?
        })
    }
}

pub(crate) fn write_json_atomic<T: serde::Serialize>(
    dir: &Path,
    path: &Path,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    file.write_all(json.as_bytes())
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    file.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

fn validate_record_id(record_id: &str) -> Result<()> {
    let valid = !record_id.is_empty()
        && record_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(anyhow!("invalid record id '{}'", record_id))
    }
}
