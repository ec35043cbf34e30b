//! Class labels and classifier probability distributions.

use serde::{Deserialize, Serialize};

/// The four pulmonary conditions the classifier distinguishes.
///
/// The variant order is the classifier's output index order and must not
/// change independently of the trained weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassLabel {
    /// COVID-19 pneumonia.
    Covid,
    /// Non-COVID lung opacity.
    LungOpacity,
    /// No abnormal finding.
    Normal,
    /// Viral pneumonia.
    ViralPneumonia,
}

impl ClassLabel {
    /// All labels in classifier output index order.
    pub const ALL: [ClassLabel; 4] = [
        ClassLabel::Covid,
        ClassLabel::LungOpacity,
        ClassLabel::Normal,
        ClassLabel::ViralPneumonia,
    ];

    /// The label string used in results and file names, matching the
    /// training dataset's class names.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassLabel::Covid => "COVID",
            ClassLabel::LungOpacity => "Lung_Opacity",
            ClassLabel::Normal => "Normal",
            ClassLabel::ViralPneumonia => "Viral Pneumonia",
        }
    }

    /// The classifier output index of this label.
    pub fn index(&self) -> usize {
        match self {
            ClassLabel::Covid => 0,
            ClassLabel::LungOpacity => 1,
            ClassLabel::Normal => 2,
            ClassLabel::ViralPneumonia => 3,
        }
    }

    /// Looks up a label by classifier output index.
    pub fn from_index(index: usize) -> Option<ClassLabel> {
        Self::ALL.get(index).copied()
    }
}

impl std::fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A softmax probability distribution over the four class labels.
///
/// Values are non-negative and sum to 1 (up to floating-point error); the
/// ordering follows [`ClassLabel::ALL`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities {
    values: [f32; 4],
}

impl ClassProbabilities {
    /// Wraps a softmax output vector.
    pub fn new(values: [f32; 4]) -> Self {
        Self { values }
    }

    /// Probability of the given label.
    pub fn probability(&self, label: ClassLabel) -> f32 {
        self.values[label.index()]
    }

    /// Iterates over `(label, probability)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (ClassLabel, f32)> + '_ {
        ClassLabel::ALL.iter().copied().zip(self.values.iter().copied())
    }

    /// The raw probability vector in classifier index order.
    pub fn as_slice(&self) -> &[f32; 4] {
        &self.values
    }

    /// Returns up to `k` `(label, probability)` pairs ranked by descending
    /// probability. The sort is stable: ties keep class index order.
    pub fn top_k(&self, k: usize) -> Vec<(ClassLabel, f32)> {
        let mut ranked: Vec<(ClassLabel, f32)> = self.iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);
        ranked
    }

    /// The most probable label and its probability.
    pub fn top(&self) -> (ClassLabel, f32) {
        self.top_k(1)[0]
    }
}
