//! Verification engine contract and the embedding-distance implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use turnstile_core::{CaptureSample, ReasonCode};
use uuid::Uuid;

/// Width of the template vectors the verifier stores.
pub const EMBEDDING_DIM: usize = 128;

/// Euclidean distance below which a sample matches a template.
pub const MATCH_DISTANCE: f32 = 0.6;

/// A face template or probe vector.
pub type Embedding = Vec<f32>;

/// Engine verdict for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The sample matches the claimed identity.
    Match { confidence: u8 },
    /// The sample does not match; the reason feeds the denial record.
    NoMatch { reason: ReasonCode },
}

/// Engine-side failure. The session controller converts these into denials
/// with `verification_timeout`; they never surface as errors to callers.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("unusable sample: {0}")]
    BadSample(String),
}

/// Contract for pluggable verification engines.
///
/// Verification is 1:1 -- the engine checks the sample against the template
/// enrolled for the claimed user, never against the whole directory. The
/// sample is consumed; engines cannot retain or replay it.
#[async_trait]
pub trait VerificationEngine: Send + Sync {
    async fn verify(&self, claimed: Uuid, sample: CaptureSample) -> Result<Verdict, EngineError>;
}

// ---------------------------------------------------------------------------
// Embedding verifier
// ---------------------------------------------------------------------------

/// Verifier that compares fixed-width embeddings by Euclidean distance.
///
/// A distance under [`MATCH_DISTANCE`] matches with
/// `confidence = floor((1 - distance) * 100)`. A missing template denies
/// with `template_missing`, a distant probe with `face_mismatch`.
pub struct EmbeddingVerifier {
    templates: Mutex<HashMap<Uuid, Embedding>>,
    latency: Option<Duration>,
}

impl EmbeddingVerifier {
    pub fn new() -> Self {
        Self {
            templates: Mutex::new(HashMap::new()),
            latency: None,
        }
    }

    /// Adds a fixed processing delay per call. Lets demos exercise the
    /// controller's verification deadline.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Enrolls (or replaces) the template for a user.
    pub async fn enroll(&self, user_id: Uuid, template: Embedding) {
        self.templates.lock().await.insert(user_id, template);
        tracing::debug!(%user_id, "template enrolled");
    }

    /// Enrolls a template extracted from a raw frame.
    pub async fn enroll_from_frame(&self, user_id: Uuid, frame: &[u8]) {
        self.enroll(user_id, embed_frame(frame)).await;
    }

    pub async fn is_enrolled(&self, user_id: Uuid) -> bool {
        self.templates.lock().await.contains_key(&user_id)
    }
}

impl Default for EmbeddingVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VerificationEngine for EmbeddingVerifier {
    async fn verify(&self, claimed: Uuid, sample: CaptureSample) -> Result<Verdict, EngineError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if sample.is_empty() {
            return Err(EngineError::BadSample("empty frame".into()));
        }

        let probe = embed_frame(sample.bytes());
        let template = self.templates.lock().await.get(&claimed).cloned();

        let Some(template) = template else {
            tracing::debug!(user_id = %claimed, "no enrolled template");
            return Ok(Verdict::NoMatch {
                reason: ReasonCode::TemplateMissing,
            });
        };

        let distance = euclidean_distance(&template, &probe);
        if distance < MATCH_DISTANCE {
            let confidence = ((1.0 - f64::from(distance)) * 100.0) as u8;
            tracing::debug!(user_id = %claimed, distance, confidence, "sample matched");
            Ok(Verdict::Match { confidence })
        } else {
            tracing::debug!(user_id = %claimed, distance, "sample rejected");
            Ok(Verdict::NoMatch {
                reason: ReasonCode::FaceMismatch,
            })
        }
    }
}

/// Stand-in feature extractor: folds raw frame bytes into a fixed-width
/// vector of per-bucket means on the [0, 1] scale. Real deployments swap in
/// a model-backed [`VerificationEngine`]; this keeps distances deterministic
/// for the simulated stack.
pub fn embed_frame(bytes: &[u8]) -> Embedding {
    let mut sums = vec![0f32; EMBEDDING_DIM];
    let mut counts = vec![0u32; EMBEDDING_DIM];
    for (i, b) in bytes.iter().enumerate() {
        sums[i % EMBEDDING_DIM] += f32::from(*b) / 255.0;
        counts[i % EMBEDDING_DIM] += 1;
    }
    for (sum, count) in sums.iter_mut().zip(&counts) {
        if *count > 0 {
            *sum /= *count as f32;
        }
    }
    sums
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fill: u8) -> Vec<u8> {
        vec![fill; 4096]
    }

    #[tokio::test]
    async fn identical_frame_matches_at_full_confidence() {
        let verifier = EmbeddingVerifier::new();
        let user = Uuid::new_v4();
        verifier.enroll_from_frame(user, &frame(0x7f)).await;

        let verdict = verifier
            .verify(user, CaptureSample::new(frame(0x7f)))
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Match { confidence: 100 });
    }

    #[tokio::test]
    async fn near_frame_matches_with_reduced_confidence() {
        let verifier = EmbeddingVerifier::new();
        let user = Uuid::new_v4();
        verifier.enroll_from_frame(user, &frame(0x80)).await;

        // Every bucket off by 8/255 over 128 dims: distance ~ 0.355.
        let verdict = verifier
            .verify(user, CaptureSample::new(frame(0x88)))
            .await
            .unwrap();
        match verdict {
            Verdict::Match { confidence } => {
                assert!(confidence >= 60 && confidence < 100, "got {confidence}");
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn distant_frame_is_a_face_mismatch() {
        let verifier = EmbeddingVerifier::new();
        let user = Uuid::new_v4();
        verifier.enroll_from_frame(user, &frame(0x00)).await;

        let verdict = verifier
            .verify(user, CaptureSample::new(frame(0xff)))
            .await
            .unwrap();
        assert_eq!(
            verdict,
            Verdict::NoMatch {
                reason: ReasonCode::FaceMismatch
            }
        );
    }

    #[tokio::test]
    async fn missing_template_is_reported_as_such() {
        let verifier = EmbeddingVerifier::new();
        let verdict = verifier
            .verify(Uuid::new_v4(), CaptureSample::new(frame(0x10)))
            .await
            .unwrap();
        assert_eq!(
            verdict,
            Verdict::NoMatch {
                reason: ReasonCode::TemplateMissing
            }
        );
    }

    #[tokio::test]
    async fn empty_frame_is_a_bad_sample() {
        let verifier = EmbeddingVerifier::new();
        let err = verifier
            .verify(Uuid::new_v4(), CaptureSample::new(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BadSample(_)));
    }

    #[test]
    fn embedding_is_deterministic_and_fixed_width() {
        let a = embed_frame(&frame(0x42));
        let b = embed_frame(&frame(0x42));
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);
        assert!(a.iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[test]
    fn distance_reflects_frame_difference() {
        let base = embed_frame(&frame(0x40));
        let same = embed_frame(&frame(0x40));
        let far = embed_frame(&frame(0xc0));
        assert_eq!(euclidean_distance(&base, &same), 0.0);
        assert!(euclidean_distance(&base, &far) > MATCH_DISTANCE);
    }
}
