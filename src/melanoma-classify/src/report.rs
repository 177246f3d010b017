use std::fmt::Write;

use melanoma_serve::{PredictionDetails, PredictionResponse, Verdict};

const BAR_WIDTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskBand {
    Low,
    Moderate,
    High,
}

impl RiskBand {
    /// 0-30% low, 30-70% moderate, 70-100% high.
    pub fn from_confidence(confidence: f64) -> Self {
        let percent = confidence * 100.0;
        if percent < 30.0 {
            RiskBand::Low
        } else if percent < 70.0 {
            RiskBand::Moderate
        } else {
            RiskBand::High
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RiskBand::Low => "low probability of malignancy",
            RiskBand::Moderate => "moderate probability, monitoring recommended",
            RiskBand::High => "high probability of malignancy, medical consultation recommended",
        }
    }
}

fn advice(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Malignant => {
            "Potentially malignant lesion. Consult a dermatologist promptly."
        }
        Verdict::Benign => {
            "Probably benign lesion. Consult a health professional for a complete evaluation."
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn bar(confidence: f64) -> String {
    let filled = ((confidence.clamp(0.0, 1.0) * BAR_WIDTH as f64).round()) as usize;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

fn render(prediction_id: &str, verdict: Verdict, confidence: f64) -> String {
    let percent = confidence * 100.0;
    let band = RiskBand::from_confidence(confidence);

    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(out, "Result:      {}", capitalize(verdict.as_str()));
    let _ = writeln!(out, "Confidence:  {:.2}% {}", percent, bar(confidence));
    let _ = writeln!(out, "Risk:        {}", band.description());
    let _ = writeln!(out, "Advice:      {}", advice(verdict));
    let _ = writeln!(out, "Prediction:  {}", prediction_id);
    out
}

pub fn render_prediction(response: &PredictionResponse) -> String {
    render(
        &response.prediction_id.to_string(),
        response.result,
        response.confidence,
    )
}

pub fn render_details(details: &PredictionDetails) -> String {
    let record = &details.stored.record;
    let mut out = render(&record.prediction_id, record.result, record.confidence);
    let _ = writeln!(out, "File:        {} ({}, {} bytes)", record.filename, record.content_type, record.size);
    let _ = writeln!(out, "Analysed:    {}", record.timestamp.to_rfc3339());
    let _ = writeln!(
        out,
        "Image:       {}",
        if details.image_available {
            "stored"
        } else {
            "unavailable"
        }
    );
    out
}
