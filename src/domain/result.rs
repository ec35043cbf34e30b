//! Structured inference results returned to the request layer.

use crate::domain::labels::{ClassLabel, ClassProbabilities};
use serde::{Deserialize, Serialize};

/// Fixed provenance note attached to every result.
pub const AI_NOTES: &str =
    "Inference result from U-Net lung segmentation and ResNet-50 classification.";

/// One ranked condition in the triage result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// The condition label.
    pub condition: String,
    /// Softmax probability in `[0, 1]`.
    pub probability: f32,
    /// Human-readable description of the finding.
    pub description: String,
}

/// The result of one triage inference.
///
/// Created fresh per request; persistence is the surrounding service layer's
/// job. The three attribution paths are present only when the corresponding
/// map was generated and its overlay saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Probability of the predicted class.
    pub confidence: f32,
    /// Label string of the predicted class.
    pub predicted_class: String,
    /// Top findings, descending probability, at most three.
    pub findings: Vec<Finding>,
    /// Policy-derived recommendation strings.
    pub recommendations: Vec<String>,
    /// Provenance note for the consuming clinician UI.
    pub ai_notes: String,
    /// Web-relative path of the Grad-CAM overlay, if generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gradcam_path: Option<String>,
    /// Web-relative path of the Grad-CAM++ overlay, if generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gradcam_plus_path: Option<String>,
    /// Web-relative path of the Layer-CAM overlay, if generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layercam_path: Option<String>,
}

/// Builds the ranked findings list from a probability distribution.
///
/// Returns at most three findings in strictly descending probability order
/// (ties broken by class index), the first of which is the predicted class.
pub fn findings_from(probabilities: &ClassProbabilities) -> Vec<Finding> {
    probabilities
        .top_k(3)
        .into_iter()
        .map(|(label, probability)| Finding {
            condition: label.as_str().to_string(),
            probability,
            description: format!("{} probability: {:.1}%", label.as_str(), probability * 100.0),
        })
        .collect()
}

/// Derives recommendation strings from the prediction confidence and class.
///
/// Policy: high confidence (> 0.7) yields a condition-specific referral for
/// COVID and viral pneumonia, otherwise a generic further-examination
/// message; low confidence (< 0.3) yields periodic observation; anything in
/// between yields additional examination.
pub fn recommendations_for(confidence: f32, predicted: ClassLabel) -> Vec<String> {
    let message = if confidence > 0.7 {
        match predicted {
            ClassLabel::Covid => {
                "High suspicion of COVID-19. Immediate specialist consultation and further examination are recommended."
            }
            ClassLabel::ViralPneumonia => {
                "Possible viral pneumonia. Specialist consultation is recommended."
            }
            _ => "Further examination and specialist consultation are recommended.",
        }
    } else if confidence < 0.3 {
        "Periodic observation is recommended."
    } else {
        "Additional examination is recommended."
    };
    vec![message.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn findings_are_capped_and_ordered() {
        let probs = ClassProbabilities::new([0.05, 0.6, 0.25, 0.1]);
        let findings = findings_from(&probs);
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].condition, "Lung_Opacity");
        for pair in findings.windows(2) {
            assert!(pair[0].probability >= pair[1].probability);
        }
        assert!(findings[0].description.contains("60.0%"));
    }

    #[test]
    fn first_finding_matches_predicted_class() {
        let probs = ClassProbabilities::new([0.1, 0.2, 0.65, 0.05]);
        let (predicted, confidence) = probs.top();
        let findings = findings_from(&probs);
        assert_eq!(findings[0].condition, predicted.as_str());
        assert!((findings[0].probability - confidence).abs() < 1e-6);
    }

    #[test]
    fn high_confidence_covid_gets_urgent_referral() {
        let recs = recommendations_for(0.85, ClassLabel::Covid);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].contains("COVID-19"));
        assert!(recs[0].contains("Immediate"));
    }

    #[test]
    fn mid_confidence_gets_additional_examination() {
        for label in ClassLabel::ALL {
            let recs = recommendations_for(0.5, label);
            assert_eq!(recs, vec!["Additional examination is recommended.".to_string()]);
        }
    }

    #[test]
    fn low_confidence_gets_periodic_observation() {
        let recs = recommendations_for(0.1, ClassLabel::Normal);
        assert_eq!(recs, vec!["Periodic observation is recommended.".to_string()]);
    }

    #[test]
    fn high_confidence_viral_pneumonia_mentions_condition() {
        let recs = recommendations_for(0.9, ClassLabel::ViralPneumonia);
        assert!(recs[0].contains("viral pneumonia"));
    }
}
