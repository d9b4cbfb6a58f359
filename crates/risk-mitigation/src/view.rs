//! Serializable view of a session for the UI layer

use crate::estimator::MarginalImpact;
use crate::lever::{LeverCatalog, LeverFamily, LeverId};
use crate::planner::{ImplementationPriority, Round, StrategyOutcome};
use crate::profile::{RiskLevel, RiskProfile};
use crate::session::SessionState;
use crate::tracker::{ApplicationTracker, DriftReport};
use serde::{Deserialize, Serialize};

/// State of one recommendation from the user's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    Pending,
    Applied,
    /// The lever is marked as not changeable
    Locked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationView {
    pub lever_id: LeverId,
    pub code: String,
    pub name: String,
    /// What applying the recommendation involves
    pub description: String,
    pub family: LeverFamily,
    /// Display label of the current value
    pub current: String,
    /// Display label of the recommended value
    pub target: String,
    pub target_value: String,
    pub reduction_points: f64,
    pub status: RecommendationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundView {
    pub number: usize,
    pub risk_before: f64,
    pub risk_after: f64,
    pub reduction_percentage: f64,
    pub recommendations: Vec<RecommendationView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyView {
    pub current_risk: f64,
    pub projected_risk: f64,
    pub current_level: RiskLevel,
    pub projected_level: RiskLevel,
    pub outcome: StrategyOutcome,
    pub stale: bool,
    /// A newer scoring request is still outstanding
    pub awaiting_scores: bool,
    pub priority: ImplementationPriority,
    pub rounds: Vec<RoundView>,
    pub limited_impact: Vec<RecommendationView>,
    pub deferred: Vec<RecommendationView>,
    pub drift: Vec<DriftReport>,
    pub scoring_error: Option<String>,
}

impl StrategyView {
    pub fn from_state(state: &SessionState) -> Self {
        let strategy = state.strategy();
        let catalog = state.catalog();
        let tracker = state.tracker();

        let (current_risk, projected_risk) = match state.projection() {
            Some(projection) => (projection.current, projection.projected),
            None => {
                let empty = RiskProfile::empty().aggregate();
                (empty, empty)
            }
        };

        let recommendations = |impacts: &[MarginalImpact]| {
            impacts
                .iter()
                .map(|impact| recommendation(impact, catalog, tracker))
                .collect::<Vec<_>>()
        };

        Self {
            current_risk,
            projected_risk,
            current_level: RiskLevel::from_score(current_risk),
            projected_level: RiskLevel::from_score(projected_risk),
            outcome: strategy.outcome,
            stale: strategy.stale,
            awaiting_scores: state.awaiting_scores(),
            priority: strategy.priority,
            rounds: strategy
                .rounds
                .iter()
                .map(|round| round_view(round, recommendations(&round.impacts)))
                .collect(),
            limited_impact: recommendations(&strategy.limited_impact),
            deferred: recommendations(&strategy.deferred),
            drift: state.drift().to_vec(),
            scoring_error: state.scoring_error().map(str::to_string),
        }
    }

    /// Every recommendation across rounds, in round order
    pub fn scheduled(&self) -> impl Iterator<Item = &RecommendationView> {
        self.rounds.iter().flat_map(|round| round.recommendations.iter())
    }
}

fn round_view(round: &Round, recommendations: Vec<RecommendationView>) -> RoundView {
    RoundView {
        number: round.number,
        risk_before: round.risk_before,
        risk_after: round.risk_after,
        reduction_percentage: round.reduction_percentage(),
        recommendations,
    }
}

fn recommendation(
    impact: &MarginalImpact,
    catalog: &LeverCatalog,
    tracker: &ApplicationTracker,
) -> RecommendationView {
    let lever = catalog.get(&impact.lever_id);
    let label = |key: &str| {
        lever
            .and_then(|lever| lever.position_of(key).and_then(|index| lever.value(index)))
            .map_or_else(|| key.to_string(), |value| value.label.clone())
    };

    let status = if tracker.is_applied(&impact.lever_id, &impact.target_value) {
        RecommendationStatus::Applied
    } else if !impact.changeable {
        RecommendationStatus::Locked
    } else {
        RecommendationStatus::Pending
    };

    RecommendationView {
        lever_id: impact.lever_id.clone(),
        code: lever.map(|lever| lever.code.clone()).unwrap_or_default(),
        name: lever.map_or_else(|| impact.lever_id.to_string(), |lever| lever.name.clone()),
        description: lever.map(|lever| lever.description.clone()).unwrap_or_default(),
        family: impact.family,
        current: label(&impact.current_value),
        target: label(&impact.target_value),
        target_value: impact.target_value.clone(),
        reduction_points: impact.reduction_points,
        status,
    }
}
