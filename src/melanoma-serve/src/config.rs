use std::path::PathBuf;

use crate::classifier::ModelSignature;

/// Model artifact locations, checked in order: container first, then a
/// checkout-relative path for local development.
pub const MODEL_CANDIDATES: [&str; 2] = [
    "/app/models/cancer_detection_model",
    "./models/cancer_detection_model",
];

pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";
pub const DEFAULT_MONGODB_DB: &str = "melanoma";
pub const DEFAULT_API_URL: &str = "http://backend:8000";

/// Settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mongodb_uri: String,
    pub mongodb_db: String,
    pub model_paths: Vec<PathBuf>,
    pub signature: ModelSignature,
    pub host: String,
    pub port: u16,
    /// Base URL the presentation client talks to.
    pub api_url: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let defaults = ModelSignature::default();

        Settings {
            mongodb_uri: or("MONGODB_URI", DEFAULT_MONGODB_URI),
            mongodb_db: or("MONGODB_DB", DEFAULT_MONGODB_DB),
            model_paths: MODEL_CANDIDATES.iter().map(PathBuf::from).collect(),
            signature: ModelSignature {
                input_op: or("MODEL_INPUT_OP", &defaults.input_op),
                output_op: or("MODEL_OUTPUT_OP", &defaults.output_op),
            },
            host: or("API_HOST", "0.0.0.0"),
            port: lookup("API_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            api_url: or("API_URL", DEFAULT_API_URL),
        }
    }
}
