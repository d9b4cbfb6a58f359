//! Risk categories, qualitative levels and the per-session risk profile
//!
//! A [`RiskProfile`] is the unit of recomputation: it is created from one
//! scoring response and replaced wholesale by the next accepted one.

use crate::error::{MitigationError, MitigationResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of risk categories produced by the scorer
pub const CATEGORY_COUNT: usize = 5;

/// Per-category vector in [`CategoryId::ALL`] order
pub type CategoryVector = [f64; CATEGORY_COUNT];

/// Upper bound (exclusive) of the low level
pub const LOW_THRESHOLD: f64 = 0.30;
/// Upper bound (exclusive) of the medium level
pub const MEDIUM_THRESHOLD: f64 = 0.60;
/// Upper bound (exclusive) of the high level
pub const HIGH_THRESHOLD: f64 = 0.85;

/// Risk categories scored by the external model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CategoryId {
    Ransomware,
    Phishing,
    DataBreach,
    InsiderAttack,
    SupplyChain,
}

impl CategoryId {
    /// All categories in scorer output order
    pub const ALL: [CategoryId; CATEGORY_COUNT] = [
        CategoryId::Ransomware,
        CategoryId::Phishing,
        CategoryId::DataBreach,
        CategoryId::InsiderAttack,
        CategoryId::SupplyChain,
    ];

    /// Position in the scorer's probability vector
    pub fn index(self) -> usize {
        match self {
            CategoryId::Ransomware => 0,
            CategoryId::Phishing => 1,
            CategoryId::DataBreach => 2,
            CategoryId::InsiderAttack => 3,
            CategoryId::SupplyChain => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CategoryId::Ransomware => "ransomware",
            CategoryId::Phishing => "phishing",
            CategoryId::DataBreach => "dataBreach",
            CategoryId::InsiderAttack => "insiderAttack",
            CategoryId::SupplyChain => "supplyChain",
        }
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualitative risk levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl RiskLevel {
    /// Map a probability onto its qualitative level
    pub fn from_score(score: f64) -> Self {
        if score < LOW_THRESHOLD {
            RiskLevel::Low
        } else if score < MEDIUM_THRESHOLD {
            RiskLevel::Medium
        } else if score < HIGH_THRESHOLD {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

/// One scored risk category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskCategory {
    /// Category identifier
    pub id: CategoryId,
    /// Probability in [0, 1]
    pub score: f64,
}

impl RiskCategory {
    /// Create a category, rejecting scores outside [0, 1]
    pub fn new(id: CategoryId, score: f64) -> MitigationResult<Self> {
        validate_probability(id.as_str(), score)?;
        Ok(Self { id, score })
    }

    pub fn level(&self) -> RiskLevel {
        RiskLevel::from_score(self.score)
    }
}

/// Current category scores for one assessment session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    categories: Vec<RiskCategory>,
    sequence: u64,
}

impl RiskProfile {
    /// Build a profile from a scorer probability vector.
    ///
    /// The vector must have exactly [`CATEGORY_COUNT`] entries, each a finite
    /// probability. `sequence` is the scoring request that produced it; zero is
    /// reserved for profiles that did not come from the gateway.
    pub fn from_probabilities(probabilities: &[f64], sequence: u64) -> MitigationResult<Self> {
        if probabilities.len() != CATEGORY_COUNT {
            return Err(MitigationError::validation(
                "probabilities",
                format!(
                    "expected {CATEGORY_COUNT} category scores, got {}",
                    probabilities.len()
                ),
            ));
        }

        let categories = CategoryId::ALL
            .iter()
            .zip(probabilities)
            .map(|(id, score)| RiskCategory::new(*id, *score))
            .collect::<MitigationResult<Vec<_>>>()?;

        Ok(Self {
            categories,
            sequence,
        })
    }

    /// Profile with every category at zero
    pub fn empty() -> Self {
        Self {
            categories: CategoryId::ALL
                .iter()
                .map(|id| RiskCategory { id: *id, score: 0.0 })
                .collect(),
            sequence: 0,
        }
    }

    pub fn categories(&self) -> &[RiskCategory] {
        &self.categories
    }

    pub fn category(&self, id: CategoryId) -> RiskCategory {
        self.categories[id.index()]
    }

    /// Scoring sequence number that produced this profile
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn scores(&self) -> CategoryVector {
        let mut scores = [0.0; CATEGORY_COUNT];
        for category in &self.categories {
            scores[category.id.index()] = category.score;
        }
        scores
    }

    /// Aggregate risk: mean of the category scores
    pub fn aggregate(&self) -> f64 {
        aggregate(&self.scores())
    }

    pub fn level(&self) -> RiskLevel {
        RiskLevel::from_score(self.aggregate())
    }

    /// Check invariants after deserialization
    pub(crate) fn validate(&self) -> MitigationResult<()> {
        if self.categories.len() != CATEGORY_COUNT {
            return Err(MitigationError::validation(
                "categories",
                format!("expected {CATEGORY_COUNT} categories"),
            ));
        }
        for (expected, category) in CategoryId::ALL.iter().zip(&self.categories) {
            if category.id != *expected {
                return Err(MitigationError::validation(
                    "categories",
                    format!("category {} out of order", category.id),
                ));
            }
            validate_probability(category.id.as_str(), category.score)?;
        }
        Ok(())
    }
}

/// Mean of a category vector
pub fn aggregate(scores: &CategoryVector) -> f64 {
    scores.iter().sum::<f64>() / CATEGORY_COUNT as f64
}

fn validate_probability(field: &str, score: f64) -> MitigationResult<()> {
    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(MitigationError::validation(
            field,
            format!("probability {score} outside [0, 1]"),
        ));
    }
    Ok(())
}
