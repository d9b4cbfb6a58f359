//! Round planner: groups marginal impacts into phased rollout rounds
//!
//! Each round takes the strongest remaining lever from every family before
//! any family contributes a second one, so early rounds spread across
//! security domains. Risk after a round is the risk before it, discounted by
//! every scheduled lever's relative reduction.

use crate::config::PlannerConfig;
use crate::estimator::MarginalImpact;
use crate::lever::{LeverFamily, LeverId};
use crate::profile::RiskProfile;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// Total relative reduction (percent) above which a strategy is high priority
pub const HIGH_PRIORITY_REDUCTION: f64 = 30.0;
/// Total relative reduction (percent) above which a strategy is medium priority
pub const MEDIUM_PRIORITY_REDUCTION: f64 = 15.0;

/// One rollout phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    /// 1-based round number
    pub number: usize,
    pub impacts: Vec<MarginalImpact>,
    /// Aggregate risk before this round, all prior rounds applied
    pub risk_before: f64,
    /// Aggregate risk after this round
    pub risk_after: f64,
}

impl Round {
    /// Relative reduction achieved by this round, in percent
    pub fn reduction_percentage(&self) -> f64 {
        if self.risk_before <= 0.0 {
            return 0.0;
        }
        (self.risk_before - self.risk_after) / self.risk_before * 100.0
    }

    pub fn contains(&self, lever_id: &LeverId, target: &str) -> bool {
        self.impacts
            .iter()
            .any(|impact| &impact.lever_id == lever_id && impact.target_value == target)
    }
}

/// How a strategy came about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyOutcome {
    /// At least one round was scheduled
    Planned,
    /// No changeable lever can lower the risk
    AlreadyOptimized,
    /// No risk profile has been scored yet
    Unavailable,
}

/// Urgency of implementing a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImplementationPriority {
    Low,
    Medium,
    High,
}

impl ImplementationPriority {
    /// Priority for a total relative reduction given in percent
    pub fn from_reduction(percentage: f64) -> Self {
        if percentage > HIGH_PRIORITY_REDUCTION {
            ImplementationPriority::High
        } else if percentage > MEDIUM_PRIORITY_REDUCTION {
            ImplementationPriority::Medium
        } else {
            ImplementationPriority::Low
        }
    }
}

/// Full phased plan for one risk profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub rounds: Vec<Round>,
    pub initial_risk: f64,
    /// Risk with every scheduled round applied
    pub final_risk: f64,
    /// Positive-impact levers the user marked as not changeable
    pub limited_impact: Vec<MarginalImpact>,
    /// Changeable levers that did not fit within the round limit
    pub deferred: Vec<MarginalImpact>,
    pub outcome: StrategyOutcome,
    /// Set when the latest scoring attempt failed and the plan reflects an
    /// older profile
    pub stale: bool,
    pub priority: ImplementationPriority,
}

impl Strategy {
    /// Placeholder used before the first profile arrives
    pub fn unavailable() -> Self {
        Self {
            rounds: Vec::new(),
            initial_risk: 0.0,
            final_risk: 0.0,
            limited_impact: Vec::new(),
            deferred: Vec::new(),
            outcome: StrategyOutcome::Unavailable,
            stale: false,
            priority: ImplementationPriority::Low,
        }
    }

    /// Round number and in-round position of a scheduled recommendation
    pub fn placement(&self, lever_id: &LeverId, target: &str) -> Option<(usize, usize)> {
        self.rounds.iter().find_map(|round| {
            round
                .impacts
                .iter()
                .position(|impact| &impact.lever_id == lever_id && impact.target_value == target)
                .map(|position| (round.number, position))
        })
    }

    pub fn round(&self, number: usize) -> Option<&Round> {
        self.rounds.iter().find(|round| round.number == number)
    }

    /// Every scheduled recommendation in round order
    pub fn recommendations(&self) -> impl Iterator<Item = &MarginalImpact> {
        self.rounds.iter().flat_map(|round| round.impacts.iter())
    }

    /// Total relative reduction in percent
    pub fn total_reduction_percentage(&self) -> f64 {
        if self.initial_risk <= 0.0 {
            return 0.0;
        }
        (self.initial_risk - self.final_risk) / self.initial_risk * 100.0
    }
}

/// Deterministic greedy round planner
#[derive(Debug, Clone, Default)]
pub struct RoundPlanner {
    config: PlannerConfig,
}

impl RoundPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan rounds from estimator output for `profile`
    pub fn plan(&self, profile: &RiskProfile, impacts: &[MarginalImpact]) -> Strategy {
        let initial_risk = profile.aggregate();

        let (mut changeable, mut limited_impact): (Vec<_>, Vec<_>) = impacts
            .iter()
            .filter(|impact| impact.relative_reduction > 0.0)
            .cloned()
            .partition(|impact| impact.changeable);
        changeable.sort_by(plan_order);
        limited_impact.sort_by(plan_order);

        let max_rounds = self.config.max_rounds.max(1);
        let per_family = self.config.per_family_limit.max(1);

        let mut rounds = Vec::new();
        let mut remaining = changeable;
        let mut risk = initial_risk;

        while !remaining.is_empty() && rounds.len() < max_rounds {
            let mut taken: BTreeMap<LeverFamily, usize> = BTreeMap::new();
            let mut selected = Vec::new();
            let mut rest = Vec::new();

            for impact in remaining {
                let count = taken.entry(impact.family).or_insert(0);
                if *count < per_family {
                    *count += 1;
                    selected.push(impact);
                } else {
                    rest.push(impact);
                }
            }

            let risk_before = risk;
            let risk_after = selected
                .iter()
                .fold(risk_before, |acc, impact| {
                    acc * (1.0 - impact.relative_reduction.clamp(0.0, 1.0))
                })
                .clamp(0.0, risk_before);

            rounds.push(Round {
                number: rounds.len() + 1,
                impacts: selected,
                risk_before,
                risk_after,
            });
            risk = risk_after;
            remaining = rest;
        }

        let outcome = if rounds.is_empty() {
            StrategyOutcome::AlreadyOptimized
        } else {
            StrategyOutcome::Planned
        };

        let mut strategy = Strategy {
            rounds,
            initial_risk,
            final_risk: risk,
            limited_impact,
            deferred: remaining,
            outcome,
            stale: false,
            priority: ImplementationPriority::Low,
        };
        strategy.priority =
            ImplementationPriority::from_reduction(strategy.total_reduction_percentage());

        debug!(
            rounds = strategy.rounds.len(),
            limited = strategy.limited_impact.len(),
            deferred = strategy.deferred.len(),
            initial_risk = strategy.initial_risk,
            final_risk = strategy.final_risk,
            "strategy planned"
        );
        strategy
    }
}

fn plan_order(a: &MarginalImpact, b: &MarginalImpact) -> Ordering {
    b.reduction_points
        .total_cmp(&a.reduction_points)
        .then_with(|| b.importance.total_cmp(&a.importance))
        .then_with(|| a.lever_id.cmp(&b.lever_id))
}
