//! Marginal impact estimation
//!
//! For every lever away from its recommendation, estimate the aggregate risk
//! reduction of moving it there on its own. Pure function of the current
//! profile and catalog; never persisted.

use crate::lever::{Lever, LeverCatalog, LeverFamily, LeverId};
use crate::profile::{aggregate, RiskProfile};
use crate::sensitivity::{OrdinalSensitivity, SensitivityModel};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Smallest relative reduction that counts as an impact
pub const MIN_RELATIVE_REDUCTION: f64 = 1e-9;

/// Estimated effect of moving one lever to a target value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginalImpact {
    pub lever_id: LeverId,
    pub family: LeverFamily,
    /// Current value key
    pub current_value: String,
    /// Target value key
    pub target_value: String,
    /// Aggregate risk reduction in percentage points
    pub reduction_points: f64,
    /// Reduction as a fraction of the current aggregate, in [0, 1]
    pub relative_reduction: f64,
    pub importance: f64,
    pub changeable: bool,
    /// Catalog insertion position
    pub position: usize,
}

/// Reduction of a single lever move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveEstimate {
    pub reduction_points: f64,
    pub relative_reduction: f64,
}

impl MoveEstimate {
    const ZERO: MoveEstimate = MoveEstimate {
        reduction_points: 0.0,
        relative_reduction: 0.0,
    };
}

/// Estimator over a pluggable [`SensitivityModel`]
#[derive(Debug, Clone)]
pub struct ImpactEstimator {
    model: Arc<dyn SensitivityModel>,
}

impl Default for ImpactEstimator {
    fn default() -> Self {
        Self::new(Arc::new(OrdinalSensitivity))
    }
}

impl ImpactEstimator {
    pub fn new(model: Arc<dyn SensitivityModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<dyn SensitivityModel> {
        &self.model
    }

    /// Positive-impact levers, ordered by descending impact, then descending
    /// importance, then catalog position
    pub fn estimate(&self, profile: &RiskProfile, catalog: &LeverCatalog) -> Vec<MarginalImpact> {
        let mut impacts: Vec<MarginalImpact> = catalog
            .levers()
            .iter()
            .enumerate()
            .filter(|(_, lever)| !lever.is_at_recommendation())
            .filter_map(|(position, lever)| {
                let estimate = self.estimate_move(profile, lever, lever.recommended_index());
                (estimate.relative_reduction > MIN_RELATIVE_REDUCTION).then(|| MarginalImpact {
                    lever_id: lever.id.clone(),
                    family: lever.family,
                    current_value: lever.current_value().key.clone(),
                    target_value: lever.recommended_value().key.clone(),
                    reduction_points: estimate.reduction_points,
                    relative_reduction: estimate.relative_reduction,
                    importance: lever.importance,
                    changeable: lever.is_changeable(),
                    position,
                })
            })
            .collect();

        impacts.sort_by(estimate_order);
        impacts
    }

    /// Reduction of moving `lever` from its current value to `target`
    pub fn estimate_move(&self, profile: &RiskProfile, lever: &Lever, target: usize) -> MoveEstimate {
        let from = lever.current_index();
        if from == target {
            return MoveEstimate::ZERO;
        }

        let before = profile.scores();
        let reductions = self.model.category_reductions(lever, from, target);
        let mut after = before;
        for (score, reduction) in after.iter_mut().zip(reductions) {
            *score *= 1.0 - reduction.clamp(0.0, 1.0);
        }

        let before_mean = aggregate(&before);
        let after_mean = aggregate(&after);
        if before_mean <= 0.0 {
            return MoveEstimate::ZERO;
        }

        let reduction = (before_mean - after_mean).max(0.0);
        MoveEstimate {
            reduction_points: reduction * 100.0,
            relative_reduction: (reduction / before_mean).clamp(0.0, 1.0),
        }
    }
}

fn estimate_order(a: &MarginalImpact, b: &MarginalImpact) -> Ordering {
    b.reduction_points
        .total_cmp(&a.reduction_points)
        .then_with(|| b.importance.total_cmp(&a.importance))
        .then_with(|| a.position.cmp(&b.position))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lever(id: &str, family: LeverFamily, current: &str, importance: f64, exposure: f64) -> Lever {
        Lever::builder(id, id, family)
            .value("good", "Good", 0)
            .value("bad", "Bad", 1)
            .current(current)
            .importance(importance)
            .exposure([exposure; 5])
            .build()
            .unwrap()
    }

    fn profile() -> RiskProfile {
        RiskProfile::from_probabilities(&[0.72, 0.55, 0.40, 0.20, 0.30], 1).unwrap()
    }

    #[test]
    fn test_levers_at_recommendation_are_omitted() {
        let catalog = LeverCatalog::new(vec![
            lever("a", LeverFamily::Network, "good", 0.5, 0.3),
            lever("b", LeverFamily::Network, "bad", 0.5, 0.3),
        ])
        .unwrap();

        let impacts = ImpactEstimator::default().estimate(&profile(), &catalog);
        assert_eq!(impacts.len(), 1);
        assert_eq!(impacts[0].lever_id.as_str(), "b");
        assert_eq!(impacts[0].current_value, "bad");
        assert_eq!(impacts[0].target_value, "good");
    }

    #[test]
    fn test_zero_exposure_is_omitted_not_ranked_last() {
        let catalog = LeverCatalog::new(vec![
            lever("inert", LeverFamily::Network, "bad", 0.9, 0.0),
            lever("useful", LeverFamily::Network, "bad", 0.1, 0.2),
        ])
        .unwrap();

        let impacts = ImpactEstimator::default().estimate(&profile(), &catalog);
        assert_eq!(impacts.len(), 1);
        assert_eq!(impacts[0].lever_id.as_str(), "useful");
    }

    #[test]
    fn test_uniform_exposure_reduces_by_exposure() {
        let catalog =
            LeverCatalog::new(vec![lever("a", LeverFamily::Network, "bad", 0.5, 0.25)]).unwrap();
        let impact = &ImpactEstimator::default().estimate(&profile(), &catalog)[0];

        assert!((impact.relative_reduction - 0.25).abs() < 1e-12);
        assert!((impact.reduction_points - 0.434 * 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_ties_break_by_importance_then_position() {
        let catalog = LeverCatalog::new(vec![
            lever("first", LeverFamily::Network, "bad", 0.5, 0.2),
            lever("second", LeverFamily::Governance, "bad", 0.5, 0.2),
            lever("important", LeverFamily::Training, "bad", 0.8, 0.2),
            lever("big", LeverFamily::Training, "bad", 0.1, 0.4),
        ])
        .unwrap();

        let impacts = ImpactEstimator::default().estimate(&profile(), &catalog);
        let order: Vec<&str> = impacts.iter().map(|i| i.lever_id.as_str()).collect();
        assert_eq!(order, vec!["big", "important", "first", "second"]);
    }

    #[test]
    fn test_zero_profile_yields_no_impacts() {
        let catalog =
            LeverCatalog::new(vec![lever("a", LeverFamily::Network, "bad", 0.5, 0.5)]).unwrap();
        let impacts = ImpactEstimator::default().estimate(&RiskProfile::empty(), &catalog);
        assert!(impacts.is_empty());
    }

    #[test]
    fn test_estimate_move_to_current_is_zero() {
        let lever = lever("a", LeverFamily::Network, "bad", 0.5, 0.5);
        let estimate = ImpactEstimator::default().estimate_move(&profile(), &lever, 1);
        assert_eq!(estimate, MoveEstimate::ZERO);
    }
}
