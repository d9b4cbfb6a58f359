//! Risk mitigation strategy engine for construction project cyber-risk assessments
//!
//! Given a scored risk profile and a catalog of security levers, this crate:
//! - Estimates the marginal risk reduction of moving each lever to its recommendation
//! - Plans phased rollout rounds that spread across security domains
//! - Tracks which recommendations the user applied and which levers are locked
//! - Projects the aggregate risk with the applied changes in effect
//! - Talks to the external scorer with stale-response suppression
//! - Hosts many sessions side by side and persists them as snapshots

pub mod config;
pub mod error;
pub mod estimator;
pub mod gateway;
pub mod lever;
pub mod planner;
pub mod profile;
pub mod projection;
pub mod registry;
pub mod sensitivity;
pub mod session;
pub mod snapshot;
pub mod telemetry;
pub mod tracker;
pub mod view;

pub use config::{EngineConfig, GatewayConfig, PlannerConfig};
pub use error::{MitigationError, MitigationResult};
pub use estimator::{ImpactEstimator, MarginalImpact};
pub use gateway::{HttpScorer, RiskScorer, ScoringGateway};
pub use lever::{Lever, LeverCatalog, LeverFamily, LeverId};
pub use planner::{ImplementationPriority, Round, RoundPlanner, Strategy, StrategyOutcome};
pub use profile::{CategoryId, RiskLevel, RiskProfile};
pub use projection::{Projection, ProjectionComputer};
pub use registry::SessionRegistry;
pub use sensitivity::{AblationSensitivity, OrdinalSensitivity, SensitivityModel};
pub use session::{EventOutcome, SessionEvent, SessionState};
pub use snapshot::EngineSnapshot;
pub use tracker::{AppliedChange, ApplicationTracker, DriftReport};
pub use view::{RecommendationStatus, StrategyView};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engine_plans_for_default_catalog() {
        let catalog = LeverCatalog::construction_default().unwrap();
        let mut session = SessionState::new(catalog, EngineConfig::default().planner);
        session
            .apply(SessionEvent::ScoresReceived {
                profile: RiskProfile::from_probabilities(&[0.72, 0.55, 0.40, 0.20, 0.30], 1)
                    .unwrap(),
            })
            .unwrap();

        let strategy = session.strategy();
        assert_eq!(strategy.outcome, StrategyOutcome::Planned);
        assert!(strategy.final_risk < strategy.initial_risk);
        // Intrinsic project attributes are never scheduled
        assert!(strategy
            .recommendations()
            .all(|impact| impact.family != LeverFamily::Project));
    }
}
