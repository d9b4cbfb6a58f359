//! Per-session state machine
//!
//! All user interaction and scorer traffic reaches a session as a
//! [`SessionEvent`]. [`SessionState::handle`] is a pure
//! `(state, event) -> state` transition; [`SessionState::apply`] is the same
//! transition in place. A failed event leaves the state untouched.

use crate::config::PlannerConfig;
use crate::error::{MitigationError, MitigationResult};
use crate::estimator::ImpactEstimator;
use crate::lever::{LeverCatalog, LeverId};
use crate::planner::{RoundPlanner, Strategy};
use crate::profile::RiskProfile;
use crate::projection::{Projection, ProjectionComputer};
use crate::snapshot::EngineSnapshot;
use crate::tracker::{ApplicationTracker, ApplyOutcome, DriftReport};
use crate::view::StrategyView;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Everything that can happen to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The user changed a lever's current value
    LeverEdited { lever_id: LeverId, value: String },
    /// A scoring request was issued for the current catalog
    ScoringRequested { sequence: u64 },
    /// The scorer answered; the profile carries the request's sequence
    ScoresReceived { profile: RiskProfile },
    /// The scorer could not answer the given request
    ScoringFailed { sequence: u64, reason: String },
    /// The user marked a lever as changeable or not
    ChangeabilityToggled { lever_id: LeverId, changeable: bool },
    /// The user committed to moving a lever to `target`
    RecommendationApplied { lever_id: LeverId, target: String },
    RecommendationReverted { lever_id: LeverId },
    /// Apply every recommendation of one round
    RoundApplied { round: usize },
}

impl SessionEvent {
    fn kind(&self) -> &'static str {
        match self {
            SessionEvent::LeverEdited { .. } => "lever_edited",
            SessionEvent::ScoringRequested { .. } => "scoring_requested",
            SessionEvent::ScoresReceived { .. } => "scores_received",
            SessionEvent::ScoringFailed { .. } => "scoring_failed",
            SessionEvent::ChangeabilityToggled { .. } => "changeability_toggled",
            SessionEvent::RecommendationApplied { .. } => "recommendation_applied",
            SessionEvent::RecommendationReverted { .. } => "recommendation_reverted",
            SessionEvent::RoundApplied { .. } => "round_applied",
        }
    }
}

/// Effect of an event on the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// The strategy was regenerated
    Regenerated,
    /// The ledger changed; only the projection moved
    ProjectionUpdated,
    /// Bookkeeping only
    Recorded,
    /// Nothing changed
    Unchanged,
    /// A superseded scorer reply or failure was ignored
    Discarded,
    /// The latest scoring attempt failed; the strategy is kept but stale
    MarkedStale,
}

/// Result of the pure transition
#[derive(Debug)]
pub struct Transition {
    pub state: SessionState,
    pub outcome: MitigationResult<EventOutcome>,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    catalog: LeverCatalog,
    profile: Option<RiskProfile>,
    tracker: ApplicationTracker,
    estimator: ImpactEstimator,
    planner: RoundPlanner,
    strategy: Strategy,
    drift: Vec<DriftReport>,
    requested_sequence: u64,
    last_applied_sequence: u64,
    last_failed_sequence: u64,
    scoring_error: Option<String>,
}

impl SessionState {
    /// Fresh session with no scores yet
    pub fn new(catalog: LeverCatalog, planner: PlannerConfig) -> Self {
        Self {
            catalog,
            profile: None,
            tracker: ApplicationTracker::new(),
            estimator: ImpactEstimator::default(),
            planner: RoundPlanner::new(planner),
            strategy: Strategy::unavailable(),
            drift: Vec::new(),
            requested_sequence: 0,
            last_applied_sequence: 0,
            last_failed_sequence: 0,
            scoring_error: None,
        }
    }

    /// Rebuild a session from a snapshot taken against a catalog with the
    /// same lever ids as `catalog`
    pub fn restore(
        catalog: LeverCatalog,
        planner: PlannerConfig,
        snapshot: &EngineSnapshot,
    ) -> MitigationResult<Self> {
        let mut catalog = catalog;
        for setting in &snapshot.levers {
            catalog
                .set_value(&setting.id, &setting.value)
                .and_then(|_| catalog.set_changeable(&setting.id, setting.changeable))
                .map_err(|e| MitigationError::Snapshot {
                    reason: format!("lever '{}': {e}", setting.id),
                })?;
        }

        let mut state = Self::new(catalog, planner);
        state.profile = snapshot.profile.clone();
        state.tracker = ApplicationTracker::from_changes(snapshot.applied.iter().cloned());
        state.last_applied_sequence = snapshot.last_applied_sequence;
        state.requested_sequence = snapshot.last_applied_sequence;
        state.regenerate();

        info!(
            levers = state.catalog.len(),
            applied = state.tracker.len(),
            dropped = state.drift.len(),
            "session restored from snapshot"
        );
        Ok(state)
    }

    /// Pure transition
    pub fn handle(mut self, event: SessionEvent) -> Transition {
        let outcome = self.apply(event);
        Transition {
            state: self,
            outcome,
        }
    }

    /// In-place transition
    pub fn apply(&mut self, event: SessionEvent) -> MitigationResult<EventOutcome> {
        let kind = event.kind();
        let outcome = match event {
            SessionEvent::LeverEdited { lever_id, value } => {
                if self.catalog.set_value(&lever_id, &value)? {
                    debug!(lever = %lever_id, value = %value, "lever edited");
                    self.regenerate();
                    EventOutcome::Regenerated
                } else {
                    EventOutcome::Unchanged
                }
            }
            SessionEvent::ScoringRequested { sequence } => {
                self.requested_sequence = self.requested_sequence.max(sequence);
                EventOutcome::Recorded
            }
            SessionEvent::ScoresReceived { profile } => self.receive_scores(profile)?,
            SessionEvent::ScoringFailed { sequence, reason } => {
                if sequence < self.requested_sequence || sequence <= self.last_applied_sequence {
                    debug!(sequence, "ignoring failure of superseded request");
                    EventOutcome::Discarded
                } else {
                    warn!(sequence, reason = %reason, "scoring failed, keeping previous profile");
                    self.last_failed_sequence = self.last_failed_sequence.max(sequence);
                    self.scoring_error = Some(reason);
                    self.strategy.stale = true;
                    EventOutcome::MarkedStale
                }
            }
            SessionEvent::ChangeabilityToggled {
                lever_id,
                changeable,
            } => {
                let changed = if changeable {
                    self.tracker.unlock(&mut self.catalog, &lever_id)?
                } else {
                    self.tracker.lock(&mut self.catalog, &lever_id)?
                };
                if changed {
                    self.regenerate();
                    EventOutcome::Regenerated
                } else {
                    EventOutcome::Unchanged
                }
            }
            SessionEvent::RecommendationApplied { lever_id, target } => {
                match self.tracker.apply_checked(&self.catalog, &lever_id, &target)? {
                    ApplyOutcome::Unchanged => EventOutcome::Unchanged,
                    _ => EventOutcome::ProjectionUpdated,
                }
            }
            SessionEvent::RecommendationReverted { lever_id } => {
                if !self.catalog.contains(&lever_id) {
                    return Err(MitigationError::UnknownLever {
                        lever_id: lever_id.to_string(),
                    });
                }
                match self.tracker.revert(&lever_id) {
                    Some(_) => EventOutcome::ProjectionUpdated,
                    None => EventOutcome::Unchanged,
                }
            }
            SessionEvent::RoundApplied { round } => {
                let round = self.strategy.round(round).cloned().ok_or_else(|| {
                    MitigationError::validation("round", format!("no round {round} in strategy"))
                })?;
                let mut changed = false;
                for impact in &round.impacts {
                    let outcome = self.tracker.apply(&impact.lever_id, impact.target_value.clone());
                    changed |= outcome != ApplyOutcome::Unchanged;
                }
                if changed {
                    EventOutcome::ProjectionUpdated
                } else {
                    EventOutcome::Unchanged
                }
            }
        };

        debug!(event = kind, ?outcome, "session event applied");
        Ok(outcome)
    }

    fn receive_scores(&mut self, profile: RiskProfile) -> MitigationResult<EventOutcome> {
        profile.validate()?;
        let sequence = profile.sequence();
        if sequence <= self.last_applied_sequence {
            warn!(
                sequence,
                applied = self.last_applied_sequence,
                "discarding stale scores"
            );
            return Ok(EventOutcome::Discarded);
        }

        info!(sequence, aggregate = profile.aggregate(), "risk profile updated");
        self.last_applied_sequence = sequence;
        self.requested_sequence = self.requested_sequence.max(sequence);
        self.profile = Some(profile);
        self.scoring_error = None;
        if let Some(measured) = self.estimator.model().baseline_sequence() {
            if measured != sequence {
                info!(
                    model = self.estimator.model().name(),
                    measured, sequence, "baseline moved, dropping measured sensitivity"
                );
                self.estimator = ImpactEstimator::default();
            }
        }
        self.regenerate();
        Ok(EventOutcome::Regenerated)
    }

    /// Rebuild the strategy from the current profile and catalog, then
    /// reconcile the ledger against it
    pub fn regenerate(&mut self) {
        let stale = self.strategy.stale && self.scoring_error.is_some();
        self.strategy = match &self.profile {
            Some(profile) => {
                let impacts = self.estimator.estimate(profile, &self.catalog);
                self.planner.plan(profile, &impacts)
            }
            None => Strategy::unavailable(),
        };
        self.strategy.stale = stale;

        let report = self.tracker.reconcile(&self.strategy, &self.catalog);
        self.drift.extend(report.dropped);
    }

    /// Swap the sensitivity model and regenerate. A model measured against a
    /// profile other than the current one is refused and `false` returned.
    pub fn set_estimator(&mut self, estimator: ImpactEstimator) -> bool {
        let current = self.profile.as_ref().map(RiskProfile::sequence);
        if let Some(measured) = estimator.model().baseline_sequence() {
            if current != Some(measured) {
                warn!(
                    model = estimator.model().name(),
                    measured,
                    ?current,
                    "refusing sensitivity model measured against another profile"
                );
                return false;
            }
        }
        info!(model = estimator.model().name(), "sensitivity model replaced");
        self.estimator = estimator;
        self.regenerate();
        true
    }

    pub fn estimator(&self) -> &ImpactEstimator {
        &self.estimator
    }

    /// Current and projected aggregate risk, `None` before the first scores
    pub fn projection(&self) -> Option<Projection> {
        let profile = self.profile.as_ref()?;
        let ordered = self.tracker.in_round_order(&self.strategy);
        Some(ProjectionComputer::new(&self.estimator, &self.catalog).project(profile, &ordered))
    }

    pub fn view(&self) -> StrategyView {
        StrategyView::from_state(self)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot::capture(self)
    }

    pub fn catalog(&self) -> &LeverCatalog {
        &self.catalog
    }

    pub fn profile(&self) -> Option<&RiskProfile> {
        self.profile.as_ref()
    }

    pub fn tracker(&self) -> &ApplicationTracker {
        &self.tracker
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Changes dropped by reconciliation since the session started
    pub fn drift(&self) -> &[DriftReport] {
        &self.drift
    }

    pub fn last_applied_sequence(&self) -> u64 {
        self.last_applied_sequence
    }

    /// Whether a request newer than the current profile is still outstanding
    pub fn awaiting_scores(&self) -> bool {
        self.requested_sequence > self.last_applied_sequence.max(self.last_failed_sequence)
    }

    pub fn scoring_error(&self) -> Option<&str> {
        self.scoring_error.as_deref()
    }
}
