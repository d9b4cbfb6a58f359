//! Current and projected aggregate risk
//!
//! The projection discounts the baseline aggregate by the relative reduction
//! of each applied change, in round order. Reductions come from the same
//! [`ImpactEstimator`] the planner used, so a fully applied round lands on
//! that round's `risk_after`.

use crate::estimator::ImpactEstimator;
use crate::lever::LeverCatalog;
use crate::profile::{RiskLevel, RiskProfile};
use crate::tracker::AppliedChange;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Aggregate risk of the baseline profile
    pub current: f64,
    /// Aggregate risk with every applied change in effect
    pub projected: f64,
}

impl Projection {
    pub fn current_level(&self) -> RiskLevel {
        RiskLevel::from_score(self.current)
    }

    pub fn projected_level(&self) -> RiskLevel {
        RiskLevel::from_score(self.projected)
    }

    /// Relative reduction from current to projected, in percent
    pub fn reduction_percentage(&self) -> f64 {
        if self.current <= 0.0 {
            return 0.0;
        }
        (self.current - self.projected) / self.current * 100.0
    }
}

pub struct ProjectionComputer<'a> {
    estimator: &'a ImpactEstimator,
    catalog: &'a LeverCatalog,
}

impl<'a> ProjectionComputer<'a> {
    pub fn new(estimator: &'a ImpactEstimator, catalog: &'a LeverCatalog) -> Self {
        Self { estimator, catalog }
    }

    /// Project `baseline` through `applied`, which must already be in round
    /// order. Changes that no longer fit the catalog contribute nothing.
    pub fn project(&self, baseline: &RiskProfile, applied: &[&AppliedChange]) -> Projection {
        let current = baseline.aggregate();
        let mut projected = current;

        for change in applied {
            let Some(lever) = self.catalog.get(&change.lever_id) else {
                debug!(lever = %change.lever_id, "skipping change for unknown lever");
                continue;
            };
            let Some(target) = lever.position_of(&change.target) else {
                debug!(lever = %change.lever_id, target = %change.target, "skipping change outside domain");
                continue;
            };

            let estimate = self.estimator.estimate_move(baseline, lever, target);
            projected *= 1.0 - estimate.relative_reduction.clamp(0.0, 1.0);
        }

        Projection {
            current,
            projected: projected.clamp(0.0, 1.0),
        }
    }
}
