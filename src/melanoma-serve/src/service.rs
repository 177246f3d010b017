//! Request pipeline: validate, decode, normalize, infer, persist, respond.

use std::sync::Arc;

use chrono::Utc;
use log::{error, info};
use thiserror::Error;
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::normalize::{self, NormalizeError};
use crate::record::{
    Persistence, PredictionDetails, PredictionOutcome, PredictionResponse, Verdict,
};
use crate::store::{BlobMetadata, ImageRef, PredictionRecord, ResultStore, StoreError};
use crate::timer::Timer;

/// Largest accepted upload, inclusive.
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unsupported file type: {0}")]
    UnsupportedMediaType(String),

    #[error("file size {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("could not read image: {0}")]
    BadImage(String),

    #[error("image processing failed: {0}")]
    Processing(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("prediction {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An uploaded lesion image.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Uploads must declare an `image/*` content type.
pub fn check_content_type(content_type: &str) -> Result<(), ServiceError> {
    if content_type.starts_with("image/") {
        Ok(())
    } else {
        Err(ServiceError::UnsupportedMediaType(content_type.to_string()))
    }
}

pub fn check_size(size: usize) -> Result<(), ServiceError> {
    if size > MAX_UPLOAD_BYTES {
        Err(ServiceError::PayloadTooLarge {
            size,
            limit: MAX_UPLOAD_BYTES,
        })
    } else {
        Ok(())
    }
}

pub struct PredictionService {
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn ResultStore>,
}

impl PredictionService {
    pub fn new(classifier: Arc<dyn Classifier>, store: Arc<dyn ResultStore>) -> Self {
        PredictionService { classifier, store }
    }

    pub async fn predict(&self, upload: Upload) -> Result<PredictionOutcome, ServiceError> {
        info!(
            "Prediction request for '{}' ({})",
            upload.filename, upload.content_type
        );

        check_content_type(&upload.content_type)?;

        info!("File size: {} bytes", upload.data.len());
        check_size(upload.data.len())?;

        let mut t = Timer::new_start("Decoding image");
        let image = normalize::decode(&upload.data).map_err(|e| {
            error!("Could not decode '{}': {}", upload.filename, e);
            ServiceError::BadImage(e.to_string())
        })?;
        t.stop();

        let mut t = Timer::new_start("Normalizing image");
        let tensor = normalize::normalize_image(&image).map_err(|e| match e {
            NormalizeError::Decode(e) => ServiceError::BadImage(e.to_string()),
            other => ServiceError::Processing(other.to_string()),
        })?;
        drop(image);
        t.stop();

        let probability = self.classifier.infer(&tensor).map_err(|e| {
            error!("Inference failed: {}", e);
            ServiceError::Inference(e.to_string())
        })?;
        let confidence = f64::from(probability);
        let result = Verdict::from_confidence(confidence);
        info!(
            "Prediction: {} (confidence: {:.2})",
            result.as_str(),
            confidence
        );

        let response = PredictionResponse {
            prediction_id: Uuid::new_v4(),
            result,
            confidence,
            timestamp: Utc::now(),
        };

        let persistence = self.persist(&upload, &response).await;

        Ok(PredictionOutcome {
            response,
            persistence,
        })
    }

    /// Single attempt, no retry. Failures are logged and reported in the
    /// outcome, never returned as errors.
    async fn persist(&self, upload: &Upload, response: &PredictionResponse) -> Persistence {
        let mut t = Timer::new_start("Persisting prediction");

        let outcome = match self.try_persist(upload, response).await {
            Ok(image_ref) => {
                info!("Prediction {} saved", response.prediction_id);
                Persistence::Persisted { image_ref }
            }
            Err(e) => {
                error!(
                    "Could not save prediction {}: {}",
                    response.prediction_id, e
                );
                Persistence::PersistFailed {
                    reason: e.to_string(),
                }
            }
        };

        t.stop();
        outcome
    }

    async fn try_persist(
        &self,
        upload: &Upload,
        response: &PredictionResponse,
    ) -> Result<ImageRef, StoreError> {
        let prediction_id = response.prediction_id.to_string();
        let size = upload.data.len() as u64;

        let metadata = BlobMetadata {
            prediction_id: prediction_id.clone(),
            result: response.result,
            confidence: response.confidence,
            timestamp: response.timestamp,
            filename: upload.filename.clone(),
            content_type: upload.content_type.clone(),
            upload_date: Utc::now(),
            size,
        };

        let image_ref = self
            .store
            .put_image(
                &upload.data,
                &upload.filename,
                &upload.content_type,
                &metadata,
            )
            .await?;

        let record = PredictionRecord {
            prediction_id,
            result: response.result,
            confidence: response.confidence,
            timestamp: response.timestamp,
            filename: upload.filename.clone(),
            content_type: upload.content_type.clone(),
            size,
            image_ref: image_ref.clone(),
        };
        self.store.insert_record(&record).await?;

        Ok(image_ref)
    }

    /// Look a prediction up by id and probe its image.
    pub async fn lookup(&self, prediction_id: &str) -> Result<PredictionDetails, ServiceError> {
        let stored = self
            .store
            .find_record(prediction_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(prediction_id.to_string()))?;

        let image_available = self.store.image_exists(&stored.record.image_ref).await;

        Ok(PredictionDetails {
            stored,
            image_available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::InferenceError;
    use crate::normalize::tests::gray_png;
    use crate::normalize::ImageTensor;
    use crate::store::{MemoryStore, StoredRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClassifier {
        probability: f32,
        calls: AtomicUsize,
    }

    impl FixedClassifier {
        fn new(probability: f32) -> Arc<Self> {
            Arc::new(FixedClassifier {
                probability,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Classifier for FixedClassifier {
        fn infer(&self, tensor: &ImageTensor) -> Result<f32, InferenceError> {
            assert_eq!(tensor.shape(), [1, 224, 224, 3]);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.probability)
        }
    }

    struct BrokenClassifier;

    impl Classifier for BrokenClassifier {
        fn infer(&self, _tensor: &ImageTensor) -> Result<f32, InferenceError> {
            Err(InferenceError::EmptyOutput)
        }
    }

    struct DownStore;

    #[async_trait]
    impl ResultStore for DownStore {
        async fn ensure_collection(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn put_image(
            &self,
            _data: &[u8],
            _filename: &str,
            _content_type: &str,
            _metadata: &BlobMetadata,
        ) -> Result<ImageRef, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn insert_record(&self, _record: &PredictionRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn find_record(&self, _id: &str) -> Result<Option<StoredRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn image_exists(&self, _image_ref: &ImageRef) -> bool {
            false
        }
    }

    fn png_upload() -> Upload {
        Upload {
            filename: "lesion.png".to_string(),
            content_type: "image/png".to_string(),
            data: gray_png(10, 10, 128),
        }
    }

    #[tokio::test]
    async fn predicts_and_persists() {
        let classifier = FixedClassifier::new(0.8);
        let store = Arc::new(MemoryStore::new());
        let service = PredictionService::new(classifier.clone(), store.clone());

        let outcome = service.predict(png_upload()).await.unwrap();

        assert_eq!(outcome.response.result, Verdict::Malignant);
        assert!((outcome.response.confidence - 0.8).abs() < 1e-6);
        assert_eq!(classifier.calls(), 1);
        assert_eq!(store.record_count(), 1);

        let image_ref = match &outcome.persistence {
            Persistence::Persisted { image_ref } => image_ref.clone(),
            other => panic!("expected Persisted, got {:?}", other),
        };
        let metadata = store.image_metadata(&image_ref).unwrap();
        assert_eq!(metadata.content_type, "image/png");
        assert_eq!(metadata.prediction_id, outcome.response.prediction_id.to_string());
        assert_eq!(metadata.size, png_upload().data.len() as u64);
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.image_count(), 1);
    }

    #[tokio::test]
    async fn boundary_probability_is_benign() {
        let service = PredictionService::new(FixedClassifier::new(0.5), Arc::new(MemoryStore::new()));
        let outcome = service.predict(png_upload()).await.unwrap();
        assert_eq!(outcome.response.result, Verdict::Benign);
    }

    #[tokio::test]
    async fn non_image_content_type_short_circuits() {
        let classifier = FixedClassifier::new(0.9);
        let store = Arc::new(MemoryStore::new());
        let service = PredictionService::new(classifier.clone(), store.clone());

        let mut upload = png_upload();
        upload.content_type = "application/pdf".to_string();

        let err = service.predict(upload).await.unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedMediaType(ct) if ct == "application/pdf"));
        assert_eq!(classifier.calls(), 0);
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn size_limit_is_inclusive() {
        let classifier = FixedClassifier::new(0.9);
        let service = PredictionService::new(classifier.clone(), Arc::new(MemoryStore::new()));

        let at_limit = Upload {
            filename: "big.png".to_string(),
            content_type: "image/png".to_string(),
            data: vec![0u8; MAX_UPLOAD_BYTES],
        };
        // Passes the size gate and fails later, at decoding.
        let err = service.predict(at_limit).await.unwrap_err();
        assert!(matches!(err, ServiceError::BadImage(_)), "{:?}", err);

        let over_limit = Upload {
            filename: "big.png".to_string(),
            content_type: "image/png".to_string(),
            data: vec![0u8; MAX_UPLOAD_BYTES + 1],
        };
        let err = service.predict(over_limit).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::PayloadTooLarge { size, limit } if size == MAX_UPLOAD_BYTES + 1 && limit == MAX_UPLOAD_BYTES
        ));
        assert_eq!(classifier.calls(), 0);
    }

    #[tokio::test]
    async fn undecodable_bytes_are_bad_image() {
        let classifier = FixedClassifier::new(0.9);
        let service = PredictionService::new(classifier.clone(), Arc::new(MemoryStore::new()));
        let upload = Upload {
            filename: "fake.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            data: b"GIF? no".to_vec(),
        };

        assert!(matches!(
            service.predict(upload).await,
            Err(ServiceError::BadImage(_))
        ));
        assert_eq!(classifier.calls(), 0);
    }

    #[tokio::test]
    async fn inference_failure_is_surfaced() {
        let service = PredictionService::new(Arc::new(BrokenClassifier), Arc::new(MemoryStore::new()));
        assert!(matches!(
            service.predict(png_upload()).await,
            Err(ServiceError::Inference(_))
        ));
    }

    #[tokio::test]
    async fn store_outage_does_not_fail_prediction() {
        let service = PredictionService::new(FixedClassifier::new(0.3), Arc::new(DownStore));

        let outcome = service.predict(png_upload()).await.unwrap();

        assert_eq!(outcome.response.result, Verdict::Benign);
        assert!(!outcome.persistence.is_persisted());
        assert!(matches!(
            outcome.persistence,
            Persistence::PersistFailed { ref reason } if reason.contains("connection refused")
        ));
    }

    #[tokio::test]
    async fn lookup_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let service = PredictionService::new(FixedClassifier::new(0.65), store);

        let outcome = service.predict(png_upload()).await.unwrap();
        let id = outcome.response.prediction_id.to_string();

        let details = service.lookup(&id).await.unwrap();
        assert_eq!(details.stored.record.prediction_id, id);
        assert_eq!(details.stored.record.result, outcome.response.result);
        assert_eq!(details.stored.record.confidence, outcome.response.confidence);
        assert_eq!(details.stored.record.filename, "lesion.png");
        assert!(details.image_available);
    }

    #[tokio::test]
    async fn lookup_unknown_id_is_not_found() {
        let service = PredictionService::new(FixedClassifier::new(0.1), Arc::new(MemoryStore::new()));
        assert!(matches!(
            service.lookup("does-not-exist").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn lookup_store_error_is_surfaced() {
        let service = PredictionService::new(FixedClassifier::new(0.1), Arc::new(DownStore));
        assert!(matches!(
            service.lookup("any").await,
            Err(ServiceError::Store(_))
        ));
    }
}
