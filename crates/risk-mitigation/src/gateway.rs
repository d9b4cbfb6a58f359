//! Scoring gateway: the boundary to the external risk scorer
//!
//! Every request issued through a gateway carries a sequence number that
//! increases monotonically within that gateway (one gateway per session). A
//! response is only accepted when its sequence is newer than the last
//! accepted one, so late replies to superseded requests never overwrite
//! fresher scores.

use crate::config::GatewayConfig;
use crate::error::{MitigationError, MitigationResult};
use crate::lever::validate_attribute_vector;
use crate::profile::RiskProfile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// External model turning an attribute vector into category probabilities
#[async_trait]
pub trait RiskScorer: Send + Sync {
    /// Score one attribute vector
    async fn score(&self, attributes: &[i64]) -> MitigationResult<Vec<f64>>;
}

#[async_trait]
impl<T: RiskScorer + ?Sized> RiskScorer for Arc<T> {
    async fn score(&self, attributes: &[i64]) -> MitigationResult<Vec<f64>> {
        (**self).score(attributes).await
    }
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    user_data: &'a [i64],
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    probabilities: Vec<f64>,
}

/// HTTP client for the scorer's `/predict` endpoint
#[derive(Debug, Clone)]
pub struct HttpScorer {
    client: reqwest::Client,
    predict_url: String,
}

impl HttpScorer {
    pub fn new(config: &GatewayConfig) -> MitigationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| MitigationError::Configuration {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            predict_url: format!("{}/predict", config.endpoint.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl RiskScorer for HttpScorer {
    async fn score(&self, attributes: &[i64]) -> MitigationResult<Vec<f64>> {
        let response = self
            .client
            .post(&self.predict_url)
            .json(&PredictRequest {
                user_data: attributes,
            })
            .send()
            .await?
            .error_for_status()?;

        let body: PredictResponse = response.json().await?;
        Ok(body.probabilities)
    }
}

/// Scores tagged with the request that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResponse {
    pub sequence: u64,
    pub profile: RiskProfile,
}

/// Per-session wrapper around a [`RiskScorer`]
#[derive(Debug)]
pub struct ScoringGateway<S> {
    scorer: S,
    ranges: Vec<(i64, i64)>,
    timeout: Duration,
    debounce: Duration,
    issued: AtomicU64,
    accepted: AtomicU64,
}

impl<S: RiskScorer> ScoringGateway<S> {
    /// `ranges` is the declared `[min, max]` of every attribute, in order
    pub fn new(scorer: S, ranges: Vec<(i64, i64)>, config: &GatewayConfig) -> Self {
        Self {
            scorer,
            ranges,
            timeout: config.request_timeout(),
            debounce: config.debounce(),
            issued: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
        }
    }

    /// Continue numbering after `sequence`, e.g. for a restored session
    pub fn resume_after(self, sequence: u64) -> Self {
        self.issued.store(sequence, Ordering::SeqCst);
        self.accepted.store(sequence, Ordering::SeqCst);
        self
    }

    /// Reserve the next sequence number
    pub fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Most recently issued sequence number
    pub fn latest_issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Most recently accepted sequence number
    pub fn last_accepted(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Whether a newer request has been issued after `sequence`
    pub fn is_superseded(&self, sequence: u64) -> bool {
        self.latest_issued() > sequence
    }

    /// Validate, issue a sequence number and score
    pub async fn request(&self, attributes: &[i64]) -> MitigationResult<ScoringResponse> {
        validate_attribute_vector(attributes, &self.ranges)?;
        let sequence = self.issue();
        self.score_sequenced(sequence, attributes).await
    }

    /// Score under a sequence number obtained from [`Self::issue`]
    pub async fn score_sequenced(
        &self,
        sequence: u64,
        attributes: &[i64],
    ) -> MitigationResult<ScoringResponse> {
        validate_attribute_vector(attributes, &self.ranges)?;
        debug!(sequence, "requesting scores");
        let profile = self.call(attributes, sequence).await?;
        Ok(ScoringResponse { sequence, profile })
    }

    /// Wait out the debounce period, then score unless a newer request was
    /// issued meanwhile. Returns `None` for a superseded request.
    pub async fn request_debounced(
        &self,
        attributes: &[i64],
    ) -> MitigationResult<Option<ScoringResponse>> {
        validate_attribute_vector(attributes, &self.ranges)?;
        let sequence = self.issue();
        self.debounce_sequenced(sequence, attributes).await
    }

    /// Debounced variant of [`Self::score_sequenced`]
    pub async fn debounce_sequenced(
        &self,
        sequence: u64,
        attributes: &[i64],
    ) -> MitigationResult<Option<ScoringResponse>> {
        if !self.debounce.is_zero() {
            tokio::time::sleep(self.debounce).await;
        }
        if self.is_superseded(sequence) {
            debug!(sequence, latest = self.latest_issued(), "request superseded during debounce");
            return Ok(None);
        }
        self.score_sequenced(sequence, attributes).await.map(Some)
    }

    /// Score without consuming a sequence number. Used for what-if probes
    /// whose results never replace the session profile.
    pub async fn probe(&self, attributes: &[i64]) -> MitigationResult<RiskProfile> {
        validate_attribute_vector(attributes, &self.ranges)?;
        self.call(attributes, 0).await
    }

    /// Accept a response unless an equal or newer one was already accepted
    pub fn accept(&self, response: ScoringResponse) -> Option<RiskProfile> {
        let mut current = self.accepted.load(Ordering::SeqCst);
        loop {
            if response.sequence <= current {
                warn!(
                    sequence = response.sequence,
                    accepted = current,
                    "discarding stale scoring response"
                );
                return None;
            }
            match self.accepted.compare_exchange(
                current,
                response.sequence,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(response.profile),
                Err(actual) => current = actual,
            }
        }
    }

    async fn call(&self, attributes: &[i64], sequence: u64) -> MitigationResult<RiskProfile> {
        let probabilities = tokio::time::timeout(self.timeout, self.scorer.score(attributes))
            .await
            .map_err(|_| {
                MitigationError::scoring_unavailable(format!(
                    "scorer timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })??;

        RiskProfile::from_probabilities(&probabilities, sequence).map_err(|e| {
            MitigationError::scoring_unavailable(format!("malformed scorer response: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScorer(Vec<f64>);

    #[async_trait]
    impl RiskScorer for FixedScorer {
        async fn score(&self, _attributes: &[i64]) -> MitigationResult<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    struct SlowScorer;

    #[async_trait]
    impl RiskScorer for SlowScorer {
        async fn score(&self, _attributes: &[i64]) -> MitigationResult<Vec<f64>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![0.5; 5])
        }
    }

    fn config() -> GatewayConfig {
        GatewayConfig {
            debounce_ms: 0,
            ..Default::default()
        }
    }

    fn gateway<S: RiskScorer>(scorer: S) -> ScoringGateway<S> {
        ScoringGateway::new(scorer, vec![(0, 1), (0, 4)], &config())
    }

    #[tokio::test]
    async fn test_request_assigns_increasing_sequences() {
        let gateway = gateway(FixedScorer(vec![0.1, 0.2, 0.3, 0.4, 0.5]));
        let first = gateway.request(&[0, 3]).await.unwrap();
        let second = gateway.request(&[1, 3]).await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.profile.sequence(), 2);
    }

    #[tokio::test]
    async fn test_validation_errors_are_local() {
        let gateway = gateway(FixedScorer(vec![0.1; 5]));
        assert!(matches!(
            gateway.request(&[0]).await,
            Err(MitigationError::Validation { .. })
        ));
        assert!(matches!(
            gateway.request(&[2, 0]).await,
            Err(MitigationError::Validation { .. })
        ));
        // Rejected vectors never consume a sequence number
        assert_eq!(gateway.latest_issued(), 0);
    }

    #[tokio::test]
    async fn test_malformed_response_is_unavailable() {
        let gateway = gateway(FixedScorer(vec![0.1, 0.2]));
        let err = gateway.request(&[0, 0]).await.unwrap_err();
        assert!(err.is_recoverable());

        let gateway = self::gateway(FixedScorer(vec![0.1, 0.2, 0.3, 0.4, 1.5]));
        assert!(gateway.request(&[0, 0]).await.unwrap_err().is_recoverable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_unavailable() {
        let gateway = ScoringGateway::new(
            SlowScorer,
            vec![(0, 1)],
            &GatewayConfig {
                request_timeout_ms: 50,
                debounce_ms: 0,
                ..Default::default()
            },
        );
        let err = gateway.request(&[0]).await.unwrap_err();
        assert!(matches!(err, MitigationError::ScoringUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_accept_discards_stale_responses() {
        let gateway = gateway(FixedScorer(vec![0.1; 5]));
        let older = ScoringResponse {
            sequence: 2,
            profile: RiskProfile::from_probabilities(&[0.2; 5], 2).unwrap(),
        };
        let newer = ScoringResponse {
            sequence: 3,
            profile: RiskProfile::from_probabilities(&[0.3; 5], 3).unwrap(),
        };

        assert!(gateway.accept(newer.clone()).is_some());
        assert!(gateway.accept(older).is_none());
        assert!(gateway.accept(newer).is_none());
        assert_eq!(gateway.last_accepted(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_drops_superseded_request() {
        let gateway = ScoringGateway::new(
            FixedScorer(vec![0.1; 5]),
            vec![(0, 1)],
            &GatewayConfig {
                debounce_ms: 100,
                ..Default::default()
            },
        );

        let first = gateway.issue();
        let second = gateway.issue();
        let superseded = gateway.debounce_sequenced(first, &[0]).await.unwrap();
        let latest = gateway.debounce_sequenced(second, &[1]).await.unwrap();

        assert!(superseded.is_none());
        assert_eq!(latest.map(|r| r.sequence), Some(second));
    }

    #[tokio::test]
    async fn test_unreachable_http_scorer_is_unavailable() {
        let config = GatewayConfig {
            endpoint: "http://127.0.0.1:9/".to_string(),
            request_timeout_ms: 500,
            debounce_ms: 0,
        };
        let scorer = HttpScorer::new(&config).unwrap();
        assert_eq!(scorer.predict_url, "http://127.0.0.1:9/predict");

        let gateway = ScoringGateway::new(scorer, vec![(0, 1)], &config);
        let err = gateway.request(&[1]).await.unwrap_err();
        assert!(matches!(err, MitigationError::ScoringUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_probe_does_not_consume_sequence() {
        let gateway = gateway(FixedScorer(vec![0.1; 5]));
        let profile = gateway.probe(&[1, 1]).await.unwrap();
        assert_eq!(profile.sequence(), 0);
        assert_eq!(gateway.latest_issued(), 0);
    }
}
