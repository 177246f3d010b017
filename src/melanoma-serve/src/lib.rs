//! Melanoma risk classification for skin-lesion images.
//!
//! Uploaded images are normalized to a `[1, 224, 224, 3]` tensor, scored by a
//! binary TensorFlow classifier and stored, best effort, in MongoDB.

pub mod classifier;
pub mod config;
pub mod mongo;
pub mod normalize;
pub mod record;
pub mod service;
pub mod store;
pub mod timer;

pub use classifier::{Classifier, ModelError, ModelSignature, SavedModelClassifier};
pub use config::Settings;
pub use mongo::MongoStore;
pub use record::{Persistence, PredictionDetails, PredictionOutcome, PredictionResponse, Verdict};
pub use service::{PredictionService, ServiceError, Upload, MAX_UPLOAD_BYTES};
pub use store::{MemoryStore, ResultStore, StoreError};
pub use timer::Timer;
