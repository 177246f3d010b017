use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{ImageRef, StoredRecord};

/// Probabilities strictly above this are malignant; 0.5 itself is benign.
pub const MALIGNANT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "malin")]
    Malignant,

    #[serde(rename = "bénin")]
    Benign,
}

impl Verdict {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > MALIGNANT_THRESHOLD {
            Verdict::Malignant
        } else {
            Verdict::Benign
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Malignant => "malin",
            Verdict::Benign => "bénin",
        }
    }
}

/// Body of a successful `/predict` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction_id: Uuid,
    pub result: Verdict,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// What happened to the write of a prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum Persistence {
    Persisted { image_ref: ImageRef },
    PersistFailed { reason: String },
}

impl Persistence {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Persistence::Persisted { .. })
    }
}

/// Result of the prediction pipeline. The response is always present; the
/// persistence outcome is informational.
#[derive(Debug, Clone)]
pub struct PredictionOutcome {
    pub response: PredictionResponse,
    pub persistence: Persistence,
}

/// Body of `/predictions/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionDetails {
    #[serde(flatten)]
    pub stored: StoredRecord,

    pub image_available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_strict() {
        assert_eq!(Verdict::from_confidence(0.5), Verdict::Benign);
        assert_eq!(Verdict::from_confidence(0.500_001), Verdict::Malignant);
        assert_eq!(Verdict::from_confidence(0.0), Verdict::Benign);
        assert_eq!(Verdict::from_confidence(1.0), Verdict::Malignant);
    }

    #[test]
    fn verdict_sweep_matches_threshold() {
        for i in 0..=1000 {
            let c = i as f64 / 1000.0;
            let expected = if c > 0.5 {
                Verdict::Malignant
            } else {
                Verdict::Benign
            };
            assert_eq!(Verdict::from_confidence(c), expected, "confidence {}", c);
        }
    }

    #[test]
    fn verdict_wire_names() {
        assert_eq!(
            serde_json::to_string(&Verdict::Malignant).unwrap(),
            "\"malin\""
        );
        assert_eq!(serde_json::to_string(&Verdict::Benign).unwrap(), "\"bénin\"");
        assert_eq!(Verdict::Benign.as_str(), "bénin");
    }
}
