//! MongoDB backed store: GridFS for images, a collection for records.

use async_trait::async_trait;
use log::{info, warn};
use mongodb::bson::{self, doc, oid::ObjectId, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::options::GridFsUploadOptions;
use mongodb::{Client, Collection, Database};

use crate::store::{
    BlobMetadata, ImageRef, PredictionRecord, ResultStore, StoreError, StoredRecord,
};

pub const PREDICTIONS_COLLECTION: &str = "predictions";

/// GridFS keeps file documents in `<bucket>.files`; the default bucket is `fs`.
const FILES_COLLECTION: &str = "fs.files";

/// Server error code for "collection already exists".
const NAMESPACE_EXISTS: i32 = 48;

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Build a client for `uri`. The driver connects lazily, so an unreachable
    /// server only shows up on the first operation.
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        info!("MongoDB client ready for database '{}'", database);

        Ok(MongoStore {
            db: client.database(database),
        })
    }

    fn predictions(&self) -> Collection<Document> {
        self.db.collection(PREDICTIONS_COLLECTION)
    }

    async fn file_length(&self, image_ref: &ImageRef) -> Result<Option<i64>, StoreError> {
        let id = ObjectId::parse_str(&image_ref.0)
            .map_err(|e| StoreError::Unavailable(format!("bad image reference: {}", e)))?;

        let file = self
            .db
            .collection::<Document>(FILES_COLLECTION)
            .find_one(doc! { "_id": id }, None)
            .await?;

        Ok(file.and_then(|f| match f.get("length") {
            Some(Bson::Int64(n)) => Some(*n),
            Some(Bson::Int32(n)) => Some(i64::from(*n)),
            _ => None,
        }))
    }
}

#[async_trait]
impl ResultStore for MongoStore {
    async fn ensure_collection(&self) -> Result<(), StoreError> {
        let names = self.db.list_collection_names(None).await?;
        if names.iter().any(|n| n == PREDICTIONS_COLLECTION) {
            return Ok(());
        }

        match self.db.create_collection(PREDICTIONS_COLLECTION, None).await {
            Ok(()) => {
                info!("Created collection '{}'", PREDICTIONS_COLLECTION);
                Ok(())
            }
            // Lost a creation race with another instance.
            Err(e) if is_namespace_exists(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_image(
        &self,
        data: &[u8],
        filename: &str,
        _content_type: &str,
        metadata: &BlobMetadata,
    ) -> Result<ImageRef, StoreError> {
        // The driver has no contentType field; it travels in the metadata.
        let mut options = GridFsUploadOptions::default();
        options.metadata = Some(bson::to_document(metadata)?);

        let bucket = self.db.gridfs_bucket(None);
        let id = bucket
            .upload_from_futures_0_3_reader(filename, data, options)
            .await?;

        Ok(ImageRef(id.to_hex()))
    }

    async fn insert_record(&self, record: &PredictionRecord) -> Result<(), StoreError> {
        let document = bson::to_document(record)?;
        self.predictions().insert_one(document, None).await?;
        Ok(())
    }

    async fn find_record(&self, prediction_id: &str) -> Result<Option<StoredRecord>, StoreError> {
        let found = self
            .predictions()
            .find_one(doc! { "prediction_id": prediction_id }, None)
            .await?;

        let document = match found {
            Some(d) => d,
            None => return Ok(None),
        };

        let id = match document.get("_id") {
            Some(Bson::ObjectId(oid)) => oid.to_hex(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let record: PredictionRecord = bson::from_document(document)?;

        Ok(Some(StoredRecord { id, record }))
    }

    async fn image_exists(&self, image_ref: &ImageRef) -> bool {
        match self.file_length(image_ref).await {
            Ok(Some(length)) => length > 0,
            Ok(None) => false,
            Err(e) => {
                warn!("Image {} treated as unavailable: {}", image_ref, e);
                false
            }
        }
    }
}

fn is_namespace_exists(err: &mongodb::error::Error) -> bool {
    matches!(&*err.kind, ErrorKind::Command(c) if c.code == NAMESPACE_EXISTS)
}
