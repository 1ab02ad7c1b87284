use crate::types::Prediction;

/// Which of the two result blocks the page shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pneumonia,
    Normal,
}

impl Outcome {
    pub fn from_label(label: &str) -> Self {
        if label.to_lowercase().contains("pneumonia") {
            Outcome::Pneumonia
        } else {
            Outcome::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pneumonia => "pneumonia",
            Outcome::Normal => "normal",
        }
    }
}

/// Top-result confidence, e.g. `0.9731` -> `"97.3%"`.
pub fn format_confidence(score: f32) -> String {
    format!("{:.1}%", score * 100.0)
}

/// Per-label score in the detailed breakdown, e.g. `0.0269` -> `"2.69%"`.
pub fn format_detail_score(score: f32) -> String {
    format!("{:.2}%", score * 100.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailRow {
    pub label: String,
    pub score: String,
}

/// Display form of one classification result.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub outcome: Outcome,
    pub label: String,
    pub confidence: String,
    /// Progress bar fill in `[0, 1]`
    pub progress: f32,
    /// Every prediction, present only when the pipeline returned more than one
    pub details: Option<Vec<DetailRow>>,
}

impl Report {
    /// `None` when the pipeline returned nothing to show.
    pub fn from_predictions(predictions: &[Prediction]) -> Option<Self> {
        let top = predictions.first()?;

        let details = (predictions.len() > 1).then(|| {
            predictions
                .iter()
                .map(|p| DetailRow {
                    label: p.label.clone(),
                    score: format_detail_score(p.score),
                })
                .collect()
        });

        Some(Self {
            outcome: Outcome::from_label(&top.label),
            label: top.label.clone(),
            confidence: format_confidence(top.score),
            progress: top.score.clamp(0.0, 1.0),
            details,
        })
    }
}
