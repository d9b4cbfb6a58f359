//! Persistence snapshot of a session
//!
//! The snapshot is opaque JSON bytes to the project store. Decoding and
//! re-encoding a snapshot reproduces the same bytes.

use crate::error::{MitigationError, MitigationResult};
use crate::lever::LeverId;
use crate::profile::RiskProfile;
use crate::session::SessionState;
use crate::tracker::AppliedChange;
use serde::{Deserialize, Serialize};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Persisted value and changeability of one lever
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeverSetting {
    pub id: LeverId,
    pub value: String,
    pub changeable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: u32,
    pub profile: Option<RiskProfile>,
    pub levers: Vec<LeverSetting>,
    pub applied: Vec<AppliedChange>,
    pub last_applied_sequence: u64,
}

impl EngineSnapshot {
    pub fn capture(state: &SessionState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            profile: state.profile().cloned(),
            levers: state
                .catalog()
                .levers()
                .iter()
                .map(|lever| LeverSetting {
                    id: lever.id.clone(),
                    value: lever.current_value().key.clone(),
                    changeable: lever.is_changeable(),
                })
                .collect(),
            applied: state.tracker().changes().cloned().collect(),
            last_applied_sequence: state.last_applied_sequence(),
        }
    }

    pub fn to_bytes(&self) -> MitigationResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and check version and profile invariants
    pub fn from_bytes(bytes: &[u8]) -> MitigationResult<Self> {
        let snapshot: Self = serde_json::from_slice(bytes)?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(MitigationError::Snapshot {
                reason: format!(
                    "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                    snapshot.version
                ),
            });
        }
        if let Some(profile) = &snapshot.profile {
            profile.validate().map_err(|e| MitigationError::Snapshot {
                reason: format!("invalid profile: {e}"),
            })?;
        }

        Ok(snapshot)
    }
}
