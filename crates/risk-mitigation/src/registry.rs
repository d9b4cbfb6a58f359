//! Server-side session registry
//!
//! Each session owns its state, its ledger and its own scoring gateway, so
//! sequence numbers never cross sessions. Per-session operations serialize on
//! the session's lock; the lock is never held across a scorer call.

use crate::config::EngineConfig;
use crate::error::{MitigationError, MitigationResult};
use crate::estimator::ImpactEstimator;
use crate::gateway::{RiskScorer, ScoringGateway, ScoringResponse};
use crate::lever::{LeverCatalog, LeverId};
use crate::sensitivity::{AblationSensitivity, OrdinalSensitivity};
use crate::session::{EventOutcome, SessionEvent, SessionState};
use crate::snapshot::EngineSnapshot;
use crate::view::StrategyView;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

type SharedScorer = Arc<dyn RiskScorer>;

struct SessionEntry {
    state: Mutex<SessionState>,
    gateway: ScoringGateway<SharedScorer>,
    /// Re-measure ablation sensitivity whenever new scores land
    ablation: AtomicBool,
    created_at: DateTime<Utc>,
}

/// Registry of live assessment sessions
pub struct SessionRegistry {
    config: EngineConfig,
    scorer: SharedScorer,
    catalog: LeverCatalog,
    sessions: DashMap<Uuid, Arc<SessionEntry>>,
}

impl SessionRegistry {
    /// `catalog` is the template every new session starts from
    pub fn new(config: EngineConfig, scorer: SharedScorer, catalog: LeverCatalog) -> MitigationResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            scorer,
            catalog,
            sessions: DashMap::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a session without scoring it yet
    pub fn create_session(&self) -> Uuid {
        let state = SessionState::new(self.catalog.clone(), self.config.planner.clone());
        self.insert(state, 0)
    }

    /// Register a session and score its initial catalog
    pub async fn start_session(&self) -> MitigationResult<(Uuid, EventOutcome)> {
        let session_id = self.create_session();
        let outcome = self.refresh(session_id).await?;
        Ok((session_id, outcome))
    }

    /// Register a session from persisted bytes
    pub fn restore_session(&self, bytes: &[u8]) -> MitigationResult<Uuid> {
        let snapshot = EngineSnapshot::from_bytes(bytes)?;
        let state = SessionState::restore(self.catalog.clone(), self.config.planner.clone(), &snapshot)?;
        Ok(self.insert(state, snapshot.last_applied_sequence))
    }

    fn insert(&self, state: SessionState, sequence: u64) -> Uuid {
        let session_id = Uuid::new_v4();
        let gateway = ScoringGateway::new(
            Arc::clone(&self.scorer),
            state.catalog().encoding_ranges(),
            &self.config.gateway,
        )
        .resume_after(sequence);

        self.sessions.insert(
            session_id,
            Arc::new(SessionEntry {
                state: Mutex::new(state),
                gateway,
                ablation: AtomicBool::new(false),
                created_at: Utc::now(),
            }),
        );
        info!(%session_id, sessions = self.sessions.len(), "session created");
        session_id
    }

    pub fn remove(&self, session_id: Uuid) -> bool {
        let removed = self.sessions.remove(&session_id).is_some();
        if removed {
            info!(%session_id, "session removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn created_at(&self, session_id: Uuid) -> MitigationResult<DateTime<Utc>> {
        Ok(self.entry(session_id)?.created_at)
    }

    fn entry(&self, session_id: Uuid) -> MitigationResult<Arc<SessionEntry>> {
        self.sessions
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| MitigationError::UnknownSession {
                session_id: session_id.to_string(),
            })
    }

    pub async fn view(&self, session_id: Uuid) -> MitigationResult<StrategyView> {
        let entry = self.entry(session_id)?;
        let state = entry.state.lock().await;
        Ok(state.view())
    }

    pub async fn snapshot(&self, session_id: Uuid) -> MitigationResult<Vec<u8>> {
        let entry = self.entry(session_id)?;
        let state = entry.state.lock().await;
        state.snapshot().to_bytes()
    }

    /// Apply a local event that needs no scoring
    pub async fn dispatch(&self, session_id: Uuid, event: SessionEvent) -> MitigationResult<EventOutcome> {
        let entry = self.entry(session_id)?;
        let mut state = entry.state.lock().await;
        state.apply(event)
    }

    pub async fn set_changeable(
        &self,
        session_id: Uuid,
        lever_id: LeverId,
        changeable: bool,
    ) -> MitigationResult<EventOutcome> {
        self.dispatch(
            session_id,
            SessionEvent::ChangeabilityToggled {
                lever_id,
                changeable,
            },
        )
        .await
    }

    pub async fn apply_recommendation(
        &self,
        session_id: Uuid,
        lever_id: LeverId,
        target: impl Into<String>,
    ) -> MitigationResult<EventOutcome> {
        self.dispatch(
            session_id,
            SessionEvent::RecommendationApplied {
                lever_id,
                target: target.into(),
            },
        )
        .await
    }

    pub async fn revert_recommendation(
        &self,
        session_id: Uuid,
        lever_id: LeverId,
    ) -> MitigationResult<EventOutcome> {
        self.dispatch(session_id, SessionEvent::RecommendationReverted { lever_id })
            .await
    }

    pub async fn apply_round(&self, session_id: Uuid, round: usize) -> MitigationResult<EventOutcome> {
        self.dispatch(session_id, SessionEvent::RoundApplied { round }).await
    }

    /// Change a lever, then rescore after the debounce period. A superseded
    /// or stale reply yields [`EventOutcome::Discarded`]; a scorer failure
    /// marks the strategy stale.
    pub async fn edit_lever(
        &self,
        session_id: Uuid,
        lever_id: LeverId,
        value: impl Into<String>,
    ) -> MitigationResult<EventOutcome> {
        let entry = self.entry(session_id)?;
        let (sequence, attributes) = {
            let mut state = entry.state.lock().await;
            let outcome = state.apply(SessionEvent::LeverEdited {
                lever_id,
                value: value.into(),
            })?;
            if outcome == EventOutcome::Unchanged {
                return Ok(outcome);
            }
            let sequence = entry.gateway.issue();
            state.apply(SessionEvent::ScoringRequested { sequence })?;
            (sequence, state.catalog().encode())
        };

        let result = entry.gateway.debounce_sequenced(sequence, &attributes).await;
        let outcome = self.settle(&entry, sequence, result).await?;
        self.remeasure(&entry, outcome).await?;
        Ok(outcome)
    }

    /// Rescore the session's current catalog immediately
    pub async fn refresh(&self, session_id: Uuid) -> MitigationResult<EventOutcome> {
        let entry = self.entry(session_id)?;
        let (sequence, attributes) = {
            let mut state = entry.state.lock().await;
            let sequence = entry.gateway.issue();
            state.apply(SessionEvent::ScoringRequested { sequence })?;
            (sequence, state.catalog().encode())
        };

        let result = entry.gateway.score_sequenced(sequence, &attributes).await;
        let outcome = self.settle(&entry, sequence, result.map(Some)).await?;
        self.remeasure(&entry, outcome).await?;
        Ok(outcome)
    }

    async fn settle(
        &self,
        entry: &SessionEntry,
        sequence: u64,
        result: MitigationResult<Option<ScoringResponse>>,
    ) -> MitigationResult<EventOutcome> {
        match result {
            Ok(Some(response)) => match entry.gateway.accept(response) {
                Some(profile) => {
                    let mut state = entry.state.lock().await;
                    state.apply(SessionEvent::ScoresReceived { profile })
                }
                None => Ok(EventOutcome::Discarded),
            },
            Ok(None) => Ok(EventOutcome::Discarded),
            Err(e) if e.is_recoverable() => {
                warn!(sequence, error = %e, "scoring unavailable");
                let mut state = entry.state.lock().await;
                state.apply(SessionEvent::ScoringFailed {
                    sequence,
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the session's sensitivity model with one measured by ablation
    /// against the scorer. Returns the number of measured levers.
    ///
    /// The session keeps using ablation from then on: every new profile is
    /// measured again, and the rule-based model covers the gap.
    pub async fn measure_sensitivity(&self, session_id: Uuid) -> MitigationResult<usize> {
        let entry = self.entry(session_id)?;
        let measured = Self::measure(&entry).await?;
        entry.ablation.store(true, Ordering::SeqCst);
        Ok(measured)
    }

    async fn remeasure(&self, entry: &SessionEntry, outcome: EventOutcome) -> MitigationResult<()> {
        if outcome != EventOutcome::Regenerated || !entry.ablation.load(Ordering::SeqCst) {
            return Ok(());
        }
        match Self::measure(entry).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "re-measuring sensitivity failed, using rule-based model");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn measure(entry: &SessionEntry) -> MitigationResult<usize> {
        let (catalog, baseline) = {
            let state = entry.state.lock().await;
            let baseline = state.profile().cloned().ok_or_else(|| {
                MitigationError::scoring_unavailable("session has not been scored yet")
            })?;
            (state.catalog().clone(), baseline)
        };

        let model =
            AblationSensitivity::measure(&entry.gateway, &catalog, &baseline, Arc::new(OrdinalSensitivity))
                .await?;
        let measured = model.measured_len();

        let mut state = entry.state.lock().await;
        if !state.set_estimator(ImpactEstimator::new(Arc::new(model))) {
            return Err(MitigationError::scoring_unavailable(
                "profile changed while sensitivity was measured",
            ));
        }
        Ok(measured)
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("levers", &self.catalog.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::StrategyOutcome;
    use async_trait::async_trait;

    /// Scores every category at 0.6 minus 0.02 per safe attribute
    struct LinearScorer {
        fail: AtomicBool,
    }

    #[async_trait]
    impl RiskScorer for LinearScorer {
        async fn score(&self, attributes: &[i64]) -> MitigationResult<Vec<f64>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(MitigationError::scoring_unavailable("scorer offline"));
            }
            let safe = attributes.iter().filter(|value| **value == 0).count() as f64;
            Ok(vec![(0.6 - 0.02 * safe).max(0.0); 5])
        }
    }

    fn registry() -> (SessionRegistry, Arc<LinearScorer>) {
        let scorer = Arc::new(LinearScorer {
            fail: AtomicBool::new(false),
        });
        let mut config = EngineConfig::default();
        config.gateway.debounce_ms = 0;
        let registry = SessionRegistry::new(
            config,
            scorer.clone(),
            LeverCatalog::construction_default().unwrap(),
        )
        .unwrap();
        (registry, scorer)
    }

    #[tokio::test]
    async fn test_start_session_scores_catalog() {
        let (registry, _) = registry();
        let (session_id, outcome) = registry.start_session().await.unwrap();

        assert_eq!(outcome, EventOutcome::Regenerated);
        let view = registry.view(session_id).await.unwrap();
        assert_eq!(view.outcome, StrategyOutcome::Planned);
        assert!(!view.awaiting_scores);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (registry, _) = registry();
        let result = registry.view(Uuid::new_v4()).await;
        assert!(matches!(result, Err(MitigationError::UnknownSession { .. })));
    }

    #[tokio::test]
    async fn test_edit_lever_rescores() {
        let (registry, _) = registry();
        let (session_id, _) = registry.start_session().await.unwrap();
        let before = registry.view(session_id).await.unwrap().current_risk;

        let outcome = registry
            .edit_lever(session_id, LeverId::from("uses-mfa"), "yes")
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Regenerated);
        let after = registry.view(session_id).await.unwrap().current_risk;
        assert!(after < before);

        let unchanged = registry
            .edit_lever(session_id, LeverId::from("uses-mfa"), "yes")
            .await
            .unwrap();
        assert_eq!(unchanged, EventOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_scorer_failure_keeps_profile() {
        let (registry, scorer) = registry();
        let (session_id, _) = registry.start_session().await.unwrap();
        let before = registry.view(session_id).await.unwrap();

        scorer.fail.store(true, Ordering::SeqCst);
        let outcome = registry
            .edit_lever(session_id, LeverId::from("uses-mfa"), "yes")
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::MarkedStale);

        let view = registry.view(session_id).await.unwrap();
        assert!(view.stale);
        assert_eq!(view.current_risk, before.current_risk);
        assert!(view.scoring_error.is_some());
    }

    #[tokio::test]
    async fn test_snapshot_restore_continues_sequence() {
        let (registry, _) = registry();
        let (session_id, _) = registry.start_session().await.unwrap();
        registry
            .apply_recommendation(session_id, LeverId::from("uses-mfa"), "yes")
            .await
            .unwrap();

        let bytes = registry.snapshot(session_id).await.unwrap();
        let restored = registry.restore_session(&bytes).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.view(restored).await.unwrap(),
            registry.view(session_id).await.unwrap()
        );

        // Scores after restore are not mistaken for stale ones
        let outcome = registry.refresh(restored).await.unwrap();
        assert_eq!(outcome, EventOutcome::Regenerated);

        assert!(registry.remove(session_id));
        assert!(!registry.remove(session_id));
    }

    #[tokio::test]
    async fn test_measure_sensitivity() {
        let (registry, _) = registry();
        let unscored = registry.create_session();
        assert!(registry.measure_sensitivity(unscored).await.is_err());

        let (session_id, _) = registry.start_session().await.unwrap();
        let measured = registry.measure_sensitivity(session_id).await.unwrap();
        let catalog = LeverCatalog::construction_default().unwrap();
        let movable = catalog
            .levers()
            .iter()
            .filter(|lever| !lever.is_at_recommendation())
            .count();
        assert_eq!(measured, movable);

        let view = registry.view(session_id).await.unwrap();
        assert_eq!(view.outcome, StrategyOutcome::Planned);
    }

    async fn mfa_relative_reduction(registry: &SessionRegistry, session_id: Uuid) -> (f64, f64) {
        let entry = registry.entry(session_id).unwrap();
        let state = entry.state.lock().await;
        assert_eq!(state.estimator().model().name(), "ablation");
        let impact = state
            .strategy()
            .recommendations()
            .find(|impact| impact.lever_id.as_str() == "uses-mfa")
            .cloned()
            .unwrap();
        (impact.relative_reduction, state.profile().unwrap().aggregate())
    }

    #[tokio::test]
    async fn test_new_scores_are_measured_again() {
        let (registry, _) = registry();
        let (session_id, _) = registry.start_session().await.unwrap();
        registry.measure_sensitivity(session_id).await.unwrap();

        let (before, baseline) = mfa_relative_reduction(&registry, session_id).await;
        assert!((before - 0.02 / baseline).abs() < 1e-9);

        let outcome = registry
            .edit_lever(session_id, LeverId::from("it-team"), "yes")
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Regenerated);

        let (after, moved) = mfa_relative_reduction(&registry, session_id).await;
        assert!(moved < baseline);
        assert!((after - 0.02 / moved).abs() < 1e-9);
        assert!(after > before);
    }
}
