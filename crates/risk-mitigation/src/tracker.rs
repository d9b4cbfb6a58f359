//! Ledger of recommendations the user has committed to
//!
//! At most one applied change is kept per lever. Entries survive strategy
//! regeneration and are re-validated against the catalog each time.

use crate::error::{MitigationError, MitigationResult};
use crate::lever::{LeverCatalog, LeverId};
use crate::planner::Strategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A (lever, target value) pair the user applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub lever_id: LeverId,
    /// Target value key
    pub target: String,
    pub applied_at: DateTime<Utc>,
}

/// Result of [`ApplicationTracker::apply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    /// Same target was already applied
    Unchanged,
    /// A different target for the lever was replaced
    Replaced { previous: String },
}

/// Why an applied change no longer fits the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriftReason {
    UnknownLever,
    ValueOutOfDomain,
}

/// An applied change dropped during reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    pub lever_id: LeverId,
    pub target: String,
    pub reason: DriftReason,
}

/// Outcome of [`ApplicationTracker::reconcile`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub dropped: Vec<DriftReport>,
    /// Surviving changes that match a scheduled recommendation
    pub scheduled: usize,
    /// Surviving changes outside the current plan
    pub unscheduled: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicationTracker {
    applied: BTreeMap<LeverId, AppliedChange>,
}

impl ApplicationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted changes; a later entry for the same lever wins
    pub fn from_changes(changes: impl IntoIterator<Item = AppliedChange>) -> Self {
        Self {
            applied: changes
                .into_iter()
                .map(|change| (change.lever_id.clone(), change))
                .collect(),
        }
    }

    /// Record a change. Idempotent for the same target.
    pub fn apply(&mut self, lever_id: &LeverId, target: impl Into<String>) -> ApplyOutcome {
        let target = target.into();
        let outcome = match self.applied.get(lever_id) {
            Some(existing) if existing.target == target => return ApplyOutcome::Unchanged,
            Some(existing) => ApplyOutcome::Replaced {
                previous: existing.target.clone(),
            },
            None => ApplyOutcome::Inserted,
        };

        debug!(lever = %lever_id, target = %target, "recommendation applied");
        self.applied.insert(
            lever_id.clone(),
            AppliedChange {
                lever_id: lever_id.clone(),
                target,
                applied_at: Utc::now(),
            },
        );
        outcome
    }

    /// [`Self::apply`] after checking the target against the lever's domain.
    /// A lever marked not changeable accepts no new change; an entry recorded
    /// before it was locked is kept.
    pub fn apply_checked(
        &mut self,
        catalog: &LeverCatalog,
        lever_id: &LeverId,
        target: &str,
    ) -> MitigationResult<ApplyOutcome> {
        let lever = catalog
            .get(lever_id)
            .ok_or_else(|| MitigationError::UnknownLever {
                lever_id: lever_id.to_string(),
            })?;
        if lever.position_of(target).is_none() {
            return Err(MitigationError::validation(
                lever_id.as_str(),
                format!("'{target}' is not a valid value"),
            ));
        }
        if !lever.is_changeable() {
            if self.is_applied(lever_id, target) {
                return Ok(ApplyOutcome::Unchanged);
            }
            return Err(MitigationError::validation(
                lever_id.as_str(),
                "lever is marked as not changeable",
            ));
        }
        Ok(self.apply(lever_id, target))
    }

    /// Remove the applied change for a lever
    pub fn revert(&mut self, lever_id: &LeverId) -> Option<AppliedChange> {
        let removed = self.applied.remove(lever_id);
        if removed.is_some() {
            debug!(lever = %lever_id, "recommendation reverted");
        }
        removed
    }

    pub fn is_applied(&self, lever_id: &LeverId, target: &str) -> bool {
        self.applied
            .get(lever_id)
            .map_or(false, |change| change.target == target)
    }

    pub fn applied_value(&self, lever_id: &LeverId) -> Option<&str> {
        self.applied.get(lever_id).map(|change| change.target.as_str())
    }

    /// Applied changes ordered by lever id
    pub fn changes(&self) -> impl Iterator<Item = &AppliedChange> {
        self.applied.values()
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Mark a lever as not changeable. Its applied change, if any, is kept.
    pub fn lock(&self, catalog: &mut LeverCatalog, lever_id: &LeverId) -> MitigationResult<bool> {
        catalog.set_changeable(lever_id, false)
    }

    pub fn unlock(&self, catalog: &mut LeverCatalog, lever_id: &LeverId) -> MitigationResult<bool> {
        catalog.set_changeable(lever_id, true)
    }

    /// Drop entries that no longer fit `catalog` and count how the rest
    /// relate to `strategy`
    pub fn reconcile(&mut self, strategy: &Strategy, catalog: &LeverCatalog) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();

        self.applied.retain(|lever_id, change| {
            let reason = match catalog.get(lever_id) {
                None => Some(DriftReason::UnknownLever),
                Some(lever) if lever.position_of(&change.target).is_none() => {
                    Some(DriftReason::ValueOutOfDomain)
                }
                Some(_) => None,
            };

            match reason {
                Some(reason) => {
                    warn!(lever = %lever_id, target = %change.target, ?reason, "dropping drifted change");
                    report.dropped.push(DriftReport {
                        lever_id: lever_id.clone(),
                        target: change.target.clone(),
                        reason,
                    });
                    false
                }
                None => {
                    if strategy.placement(lever_id, &change.target).is_some() {
                        report.scheduled += 1;
                    } else {
                        report.unscheduled += 1;
                    }
                    true
                }
            }
        });

        report
    }

    /// Applied changes in strategy round order; changes outside the plan
    /// follow, ordered by lever id
    pub fn in_round_order(&self, strategy: &Strategy) -> Vec<&AppliedChange> {
        let mut ordered: Vec<(Option<(usize, usize)>, &AppliedChange)> = self
            .applied
            .values()
            .map(|change| (strategy.placement(&change.lever_id, &change.target), change))
            .collect();

        ordered.sort_by(|(a, a_change), (b, b_change)| match (a, b) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a_change.lever_id.cmp(&b_change.lever_id),
        });
        ordered.into_iter().map(|(_, change)| change).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::ImpactEstimator;
    use crate::lever::{Lever, LeverFamily};
    use crate::planner::RoundPlanner;
    use crate::profile::RiskProfile;

    fn catalog() -> LeverCatalog {
        let lever = |id: &str, family, exposure| {
            Lever::builder(id, id, family)
                .value("good", "Good", 0)
                .value("bad", "Bad", 1)
                .current("bad")
                .exposure([exposure; 5])
                .build()
                .unwrap()
        };
        LeverCatalog::new(vec![
            lever("mfa", LeverFamily::Authentication, 0.3),
            lever("passwords", LeverFamily::Authentication, 0.2),
            lever("firewall", LeverFamily::Network, 0.1),
        ])
        .unwrap()
    }

    fn strategy(catalog: &LeverCatalog) -> Strategy {
        let profile = RiskProfile::from_probabilities(&[0.5; 5], 1).unwrap();
        let impacts = ImpactEstimator::default().estimate(&profile, catalog);
        RoundPlanner::default().plan(&profile, &impacts)
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut tracker = ApplicationTracker::new();
        let id = LeverId::from("mfa");

        assert_eq!(tracker.apply(&id, "good"), ApplyOutcome::Inserted);
        let first = tracker.changes().next().cloned().unwrap();
        assert_eq!(tracker.apply(&id, "good"), ApplyOutcome::Unchanged);
        assert_eq!(tracker.len(), 1);
        // Re-applying keeps the original timestamp
        assert_eq!(tracker.changes().next(), Some(&first));
    }

    #[test]
    fn test_single_value_per_lever() {
        let mut tracker = ApplicationTracker::new();
        let id = LeverId::from("firewall");

        tracker.apply(&id, "41-60");
        assert_eq!(
            tracker.apply(&id, "81-100"),
            ApplyOutcome::Replaced {
                previous: "41-60".to_string()
            }
        );
        assert_eq!(tracker.len(), 1);
        assert!(tracker.is_applied(&id, "81-100"));
        assert!(!tracker.is_applied(&id, "41-60"));
    }

    #[test]
    fn test_apply_checked_validates_domain() {
        let catalog = catalog();
        let mut tracker = ApplicationTracker::new();

        assert!(matches!(
            tracker.apply_checked(&catalog, &LeverId::from("mfa"), "sometimes"),
            Err(MitigationError::Validation { .. })
        ));
        assert!(matches!(
            tracker.apply_checked(&catalog, &LeverId::from("vpn"), "good"),
            Err(MitigationError::UnknownLever { .. })
        ));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_revert() {
        let mut tracker = ApplicationTracker::new();
        let id = LeverId::from("mfa");
        tracker.apply(&id, "good");

        assert!(tracker.revert(&id).is_some());
        assert!(tracker.revert(&id).is_none());
        assert_eq!(tracker.applied_value(&id), None);
    }

    #[test]
    fn test_reconcile_drops_drifted_changes() {
        let catalog = catalog();
        let strategy = strategy(&catalog);
        let mut tracker = ApplicationTracker::new();
        tracker.apply(&LeverId::from("mfa"), "good");
        tracker.apply(&LeverId::from("passwords"), "bad");
        tracker.apply(&LeverId::from("retired"), "good");
        tracker.apply(&LeverId::from("firewall"), "81-100");

        let report = tracker.reconcile(&strategy, &catalog);

        assert_eq!(report.dropped.len(), 2);
        assert_eq!(report.dropped[0].lever_id.as_str(), "firewall");
        assert_eq!(report.dropped[0].reason, DriftReason::ValueOutOfDomain);
        assert_eq!(report.dropped[1].reason, DriftReason::UnknownLever);
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.unscheduled, 1);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_lock_keeps_applied_change() {
        let mut catalog = catalog();
        let mut tracker = ApplicationTracker::new();
        let id = LeverId::from("mfa");
        tracker.apply(&id, "good");

        assert!(tracker.lock(&mut catalog, &id).unwrap());
        assert!(!catalog.get(&id).unwrap().is_changeable());
        assert!(tracker.is_applied(&id, "good"));
        assert!(tracker.unlock(&mut catalog, &id).unwrap());
        assert!(catalog.get(&id).unwrap().is_changeable());
    }

    #[test]
    fn test_apply_checked_refuses_locked_lever() {
        let mut catalog = catalog();
        let mut tracker = ApplicationTracker::new();
        let mfa = LeverId::from("mfa");
        let passwords = LeverId::from("passwords");
        tracker.apply_checked(&catalog, &mfa, "good").unwrap();

        tracker.lock(&mut catalog, &mfa).unwrap();
        tracker.lock(&mut catalog, &passwords).unwrap();

        // Entry from before the lock survives and re-applying it is a no-op
        assert_eq!(
            tracker.apply_checked(&catalog, &mfa, "good").unwrap(),
            ApplyOutcome::Unchanged
        );
        assert!(matches!(
            tracker.apply_checked(&catalog, &mfa, "bad"),
            Err(MitigationError::Validation { .. })
        ));
        assert!(matches!(
            tracker.apply_checked(&catalog, &passwords, "good"),
            Err(MitigationError::Validation { .. })
        ));
        assert_eq!(tracker.applied_value(&mfa), Some("good"));
        assert!(!tracker.is_applied(&passwords, "good"));
    }

    #[test]
    fn test_round_order() {
        let catalog = catalog();
        let strategy = strategy(&catalog);
        let mut tracker = ApplicationTracker::new();
        tracker.apply(&LeverId::from("passwords"), "good");
        tracker.apply(&LeverId::from("firewall"), "good");
        tracker.apply(&LeverId::from("mfa"), "bad");

        let order: Vec<&str> = tracker
            .in_round_order(&strategy)
            .iter()
            .map(|change| change.lever_id.as_str())
            .collect();
        // Round 1 is mfa then firewall, round 2 is passwords; mfa->bad is unplanned
        assert_eq!(order, vec!["firewall", "passwords", "mfa"]);
    }
}
