//! Sensitivity models: how much moving a lever lowers each risk category
//!
//! A model answers one question: if `lever` moved from value `from` to value
//! `to`, by what fraction would each category score shrink? The estimator and
//! the projection computer both go through this seam, so the planned and the
//! projected numbers always agree.

use crate::error::MitigationResult;
use crate::gateway::{RiskScorer, ScoringGateway};
use crate::lever::{Lever, LeverCatalog, LeverId};
use crate::profile::{CategoryVector, RiskProfile, CATEGORY_COUNT};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-category relative reduction for a lever move
pub trait SensitivityModel: Send + Sync + fmt::Debug {
    /// Relative reduction in [0, 1] for each category; all zeros when the move
    /// does not lower risk
    fn category_reductions(&self, lever: &Lever, from: usize, to: usize) -> CategoryVector;

    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Sequence of the profile this model was measured against, `None` when
    /// the model does not depend on a particular profile
    fn baseline_sequence(&self) -> Option<u64> {
        None
    }
}

/// Rule-based model driven by each lever's risk ranks and exposure vector.
///
/// Moving from rank `a` to rank `b` removes `(a - b) / max_rank` of the
/// lever's exposure in every category.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdinalSensitivity;

impl SensitivityModel for OrdinalSensitivity {
    fn category_reductions(&self, lever: &Lever, from: usize, to: usize) -> CategoryVector {
        let max_rank = lever.max_rank();
        let (Some(from), Some(to)) = (lever.value(from), lever.value(to)) else {
            return [0.0; CATEGORY_COUNT];
        };
        if max_rank == 0 || to.risk_rank >= from.risk_rank {
            return [0.0; CATEGORY_COUNT];
        }

        let fraction = f64::from(from.risk_rank - to.risk_rank) / f64::from(max_rank);
        lever.exposure.map(|exposure| (exposure * fraction).clamp(0.0, 1.0))
    }

    fn name(&self) -> &'static str {
        "ordinal"
    }
}

/// Model measured by ablation against the external scorer.
///
/// For every lever away from its recommendation, the scorer is asked for the
/// profile with only that lever moved; the relative drop per category is
/// stored. Moves that were not measured are answered by the fallback model.
///
/// Measurements only hold for the baseline they were taken against; a
/// session drops the model once a profile with another sequence arrives.
#[derive(Debug, Clone)]
pub struct AblationSensitivity {
    baseline: RiskProfile,
    measured: HashMap<(LeverId, usize, usize), CategoryVector>,
    fallback: Arc<dyn SensitivityModel>,
}

impl AblationSensitivity {
    pub fn new(baseline: RiskProfile, fallback: Arc<dyn SensitivityModel>) -> Self {
        Self {
            baseline,
            measured: HashMap::new(),
            fallback,
        }
    }

    pub fn baseline(&self) -> &RiskProfile {
        &self.baseline
    }

    /// Record a measured move against the ablated profile
    pub fn record(&mut self, lever: &LeverId, from: usize, to: usize, ablated: &RiskProfile) {
        let base = self.baseline.scores();
        let after = ablated.scores();
        let mut reductions = [0.0; CATEGORY_COUNT];
        for (slot, (before, after)) in reductions.iter_mut().zip(base.iter().zip(after.iter())) {
            if *before > 0.0 {
                *slot = ((before - after) / before).clamp(0.0, 1.0);
            }
        }
        self.measured.insert((lever.clone(), from, to), reductions);
    }

    pub fn measured_len(&self) -> usize {
        self.measured.len()
    }

    /// Probe the scorer once per lever that is not at its recommendation.
    ///
    /// Recoverable scorer failures leave that lever to the fallback model;
    /// validation failures abort.
    pub async fn measure<S: RiskScorer>(
        gateway: &ScoringGateway<S>,
        catalog: &LeverCatalog,
        baseline: &RiskProfile,
        fallback: Arc<dyn SensitivityModel>,
    ) -> MitigationResult<Self> {
        let mut model = Self::new(baseline.clone(), fallback);

        for lever in catalog.levers() {
            if lever.is_at_recommendation() {
                continue;
            }
            let from = lever.current_index();
            let to = lever.recommended_index();
            let attributes = catalog.encode_with(&lever.id, to);

            match gateway.probe(&attributes).await {
                Ok(ablated) => {
                    model.record(&lever.id, from, to, &ablated);
                    debug!(lever = %lever.id, "measured lever sensitivity");
                }
                Err(e) if e.is_recoverable() => {
                    warn!(lever = %lever.id, error = %e, "ablation probe failed, using fallback");
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            sequence = baseline.sequence(),
            measured = model.measured.len(),
            levers = catalog.len(),
            "ablation sensitivity measured"
        );
        Ok(model)
    }
}

impl SensitivityModel for AblationSensitivity {
    fn category_reductions(&self, lever: &Lever, from: usize, to: usize) -> CategoryVector {
        match self.measured.get(&(lever.id.clone(), from, to)) {
            Some(reductions) => *reductions,
            None => self.fallback.category_reductions(lever, from, to),
        }
    }

    fn name(&self) -> &'static str {
        "ablation"
    }

    fn baseline_sequence(&self) -> Option<u64> {
        Some(self.baseline.sequence())
    }
}
