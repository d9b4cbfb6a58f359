use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use risk_mitigation::{
    EngineConfig, ImpactEstimator, LeverCatalog, LeverId, MitigationResult, RiskProfile,
    RiskScorer, RoundPlanner, SessionEvent, SessionRegistry, SessionState,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

struct StaticScorer;

#[async_trait]
impl RiskScorer for StaticScorer {
    async fn score(&self, _attributes: &[i64]) -> MitigationResult<Vec<f64>> {
        Ok(vec![0.72, 0.55, 0.40, 0.20, 0.30])
    }
}

fn profile() -> RiskProfile {
    RiskProfile::from_probabilities(&[0.72, 0.55, 0.40, 0.20, 0.30], 1).unwrap()
}

fn bench_planning(c: &mut Criterion) {
    let catalog = LeverCatalog::construction_default().unwrap();
    let profile = profile();
    let estimator = ImpactEstimator::default();
    let planner = RoundPlanner::default();

    c.bench_function("estimate_impacts", |b| {
        b.iter(|| black_box(estimator.estimate(black_box(&profile), black_box(&catalog))))
    });

    let impacts = estimator.estimate(&profile, &catalog);
    c.bench_function("plan_rounds", |b| {
        b.iter(|| black_box(planner.plan(black_box(&profile), black_box(&impacts))))
    });
}

fn bench_session(c: &mut Criterion) {
    let mut state = SessionState::new(
        LeverCatalog::construction_default().unwrap(),
        EngineConfig::default().planner,
    );
    state
        .apply(SessionEvent::ScoresReceived { profile: profile() })
        .unwrap();
    state.apply(SessionEvent::RoundApplied { round: 1 }).unwrap();

    c.bench_function("session_view", |b| b.iter(|| black_box(state.view())));

    c.bench_function("session_toggle_regenerate", |b| {
        let mut changeable = false;
        b.iter(|| {
            changeable = !changeable;
            black_box(state.apply(SessionEvent::ChangeabilityToggled {
                lever_id: LeverId::from("governance-level"),
                changeable,
            }))
        })
    });
}

fn bench_registry(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut config = EngineConfig::default();
    config.gateway.debounce_ms = 0;
    let registry = SessionRegistry::new(
        config,
        Arc::new(StaticScorer),
        LeverCatalog::construction_default().unwrap(),
    )
    .unwrap();
    let (session_id, _) = rt.block_on(registry.start_session()).unwrap();

    c.bench_function("registry_edit_lever", |b| {
        let mut mfa = false;
        b.iter(|| {
            mfa = !mfa;
            let value = if mfa { "yes" } else { "no" };
            rt.block_on(async {
                black_box(
                    registry
                        .edit_lever(session_id, LeverId::from("uses-mfa"), value)
                        .await,
                )
            })
        })
    });
}

criterion_group!(benches, bench_planning, bench_session, bench_registry);
criterion_main!(benches);
