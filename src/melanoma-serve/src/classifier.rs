//! Binary lesion classifier backed by a TensorFlow SavedModel.

use std::path::{Path, PathBuf};

use log::{error, info};
use tensorflow::{Graph, SavedModelBundle, Session, SessionOptions, SessionRunArgs, Status, Tensor};
use thiserror::Error;

use crate::normalize::ImageTensor;
use crate::timer::Timer;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model artifact not found, searched: {}", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("could not load model from {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: Status,
    },

    #[error("model has no operation named '{0}'")]
    Signature(String),
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("session run failed: {0}")]
    Session(#[from] Status),

    #[error("model returned an empty output tensor")]
    EmptyOutput,

    #[error("model returned a non-finite probability: {0}")]
    NonFinite(f32),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Maps a normalized image to P(malignant).
///
/// Implementations are loaded once and shared read-only between requests.
pub trait Classifier: Send + Sync {
    fn infer(&self, tensor: &ImageTensor) -> Result<f32, InferenceError>;
}

/// Names of the graph operations fed and fetched on each run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSignature {
    pub input_op: String,
    pub output_op: String,
}

impl Default for ModelSignature {
    fn default() -> Self {
        ModelSignature {
            input_op: "serving_default_input_1".to_string(),
            output_op: "StatefulPartitionedCall".to_string(),
        }
    }
}

/// First candidate that exists on disk, in priority order.
pub fn locate_artifact(candidates: &[PathBuf]) -> Result<PathBuf, ModelError> {
    match candidates.iter().find(|p| p.exists()) {
        Some(path) => {
            info!("Model found at {}", path.display());
            Ok(path.clone())
        }
        None => {
            let err = ModelError::NotFound {
                searched: candidates.to_vec(),
            };
            error!("{}", err);
            Err(err)
        }
    }
}

pub struct SavedModelClassifier {
    /// TensorFlow model graph
    graph: Graph,

    /// TensorFlow session
    session: Session,

    signature: ModelSignature,
}

impl SavedModelClassifier {
    pub fn load(export_dir: &Path, signature: ModelSignature) -> Result<Self, ModelError> {
        let mut t = Timer::new_start("Loading model");

        let mut graph = Graph::new();
        let session =
            SavedModelBundle::load(&SessionOptions::new(), &["serve"], &mut graph, export_dir)
                .map_err(|source| ModelError::Load {
                    path: export_dir.to_path_buf(),
                    source,
                })?
                .session;

        for op in [&signature.input_op, &signature.output_op] {
            if graph.operation_by_name(op).ok().flatten().is_none() {
                return Err(ModelError::Signature(op.clone()));
            }
        }

        t.stop();
        info!("Model loaded from {}", export_dir.display());

        Ok(SavedModelClassifier {
            graph,
            session,
            signature,
        })
    }

    /// Load from the first existing path in `candidates`.
    pub fn from_candidates(
        candidates: &[PathBuf],
        signature: ModelSignature,
    ) -> Result<Self, ModelError> {
        let path = locate_artifact(candidates)?;
        Self::load(&path, signature)
    }
}

impl Classifier for SavedModelClassifier {
    fn infer(&self, tensor: &ImageTensor) -> Result<f32, InferenceError> {
        let mut t = Timer::new_start("Running session");

        let input = Tensor::new(&tensor.shape()).with_values(tensor.as_slice())?;

        let mut args = SessionRunArgs::new();
        args.add_feed(
            &self
                .graph
                .operation_by_name_required(&self.signature.input_op)?,
            0,
            &input,
        );
        let result = args.request_fetch(
            &self
                .graph
                .operation_by_name_required(&self.signature.output_op)?,
            0,
        );

        self.session.run(&mut args)?;
        let output: Tensor<f32> = args.fetch(result)?;

        t.stop();

        let raw = output.first().copied().ok_or(InferenceError::EmptyOutput)?;
        clamp_probability(raw)
    }
}

/// Reject NaN/inf and pin finite outputs into [0, 1].
pub fn clamp_probability(raw: f32) -> Result<f32, InferenceError> {
    if !raw.is_finite() {
        return Err(InferenceError::NonFinite(raw));
    }
    Ok(raw.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_artifact_lists_every_candidate() {
        let candidates = vec![
            PathBuf::from("/nonexistent/app/models/cancer_detection_model"),
            PathBuf::from("./nonexistent/models/cancer_detection_model"),
        ];

        match locate_artifact(&candidates) {
            Err(ModelError::NotFound { searched }) => assert_eq!(searched, candidates),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn first_existing_candidate_wins() {
        let base = std::env::temp_dir().join(format!("melanoma-model-{}", std::process::id()));
        let deploy = base.join("deploy");
        let local = base.join("local");
        fs::create_dir_all(&deploy).unwrap();
        fs::create_dir_all(&local).unwrap();

        let found = locate_artifact(&[deploy.clone(), local.clone()]).unwrap();
        assert_eq!(found, deploy);

        let found = locate_artifact(&[base.join("absent"), local.clone()]).unwrap();
        assert_eq!(found, local);

        fs::remove_dir_all(&base).ok();
    }

    #[test]
    fn probability_is_clamped_and_checked() {
        assert_eq!(clamp_probability(0.25).unwrap(), 0.25);
        assert_eq!(clamp_probability(1.2).unwrap(), 1.0);
        assert_eq!(clamp_probability(-0.1).unwrap(), 0.0);
        assert!(matches!(
            clamp_probability(f32::NAN),
            Err(InferenceError::NonFinite(_))
        ));
    }

    #[test]
    fn default_signature_matches_keras_export() {
        let sig = ModelSignature::default();
        assert_eq!(sig.input_op, "serving_default_input_1");
        assert_eq!(sig.output_op, "StatefulPartitionedCall");
    }
}
