//! Append-only persistence of uploaded images and their predictions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Verdict;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("could not encode document: {0}")]
    Encode(#[from] bson::ser::Error),

    #[error("could not decode document: {0}")]
    Decode(#[from] bson::de::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Opaque handle to a stored image blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata attached to an image blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub prediction_id: String,
    pub result: Verdict,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    pub content_type: String,
    pub upload_date: DateTime<Utc>,
    pub size: u64,
}

/// One prediction as persisted. Never mutated once inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub prediction_id: String,
    pub result: Verdict,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    #[serde(rename = "gridfs_file_id")]
    pub image_ref: ImageRef,
}

/// A record together with the store's own document id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(flatten)]
    pub record: PredictionRecord,
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Make sure the record collection exists. Safe to repeat.
    async fn ensure_collection(&self) -> Result<(), StoreError>;

    /// Store image bytes; every call creates a new blob.
    async fn put_image(
        &self,
        data: &[u8],
        filename: &str,
        content_type: &str,
        metadata: &BlobMetadata,
    ) -> Result<ImageRef, StoreError>;

    async fn insert_record(&self, record: &PredictionRecord) -> Result<(), StoreError>;

    async fn find_record(&self, prediction_id: &str) -> Result<Option<StoredRecord>, StoreError>;

    /// Lenient probe: any failure reads as "not available".
    async fn image_exists(&self, image_ref: &ImageRef) -> bool;
}

struct StoredBlob {
    data: Vec<u8>,
    metadata: BlobMetadata,
}

#[derive(Default)]
struct MemoryInner {
    blobs: HashMap<ImageRef, StoredBlob>,
    records: Vec<StoredRecord>,
    next_id: u64,
}

/// Process-local store with the same append-only semantics as MongoDB.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.lock().map(|inner| inner.records.len()).unwrap_or(0)
    }

    pub fn image_count(&self) -> usize {
        self.lock().map(|inner| inner.blobs.len()).unwrap_or(0)
    }

    pub fn image_metadata(&self, image_ref: &ImageRef) -> Option<BlobMetadata> {
        let inner = self.lock().ok()?;
        inner.blobs.get(image_ref).map(|b| b.metadata.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn ensure_collection(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn put_image(
        &self,
        data: &[u8],
        _filename: &str,
        _content_type: &str,
        metadata: &BlobMetadata,
    ) -> Result<ImageRef, StoreError> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let image_ref = ImageRef(format!("{:024x}", inner.next_id));
        inner.blobs.insert(
            image_ref.clone(),
            StoredBlob {
                data: data.to_vec(),
                metadata: metadata.clone(),
            },
        );
        Ok(image_ref)
    }

    async fn insert_record(&self, record: &PredictionRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = format!("{:024x}", inner.next_id);
        inner.records.push(StoredRecord {
            id,
            record: record.clone(),
        });
        Ok(())
    }

    async fn find_record(&self, prediction_id: &str) -> Result<Option<StoredRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .records
            .iter()
            .find(|r| r.record.prediction_id == prediction_id)
            .cloned())
    }

    async fn image_exists(&self, image_ref: &ImageRef) -> bool {
        match self.lock() {
            Ok(inner) => inner
                .blobs
                .get(image_ref)
                .map(|b| !b.data.is_empty())
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}
