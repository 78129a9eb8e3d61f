//! Pluggable sentiment classifiers.

mod huggingface;
mod lexicon;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pulsecheck_core::{AppConfig, ClassifierKind, Label};
use thiserror::Error;

use crate::retry::Transient;

pub use huggingface::HuggingFaceClassifier;
pub use lexicon::{lexicon_score, LexiconClassifier};

/// Label and confidence for one input text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub label: Label,
    pub confidence: f64,
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model is loading (estimated {estimated_secs:.0}s)")]
    ModelLoading { estimated_secs: f64 },

    #[error("classifier rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("classifier returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed classifier response: {0}")]
    Malformed(String),

    #[error("classifier misconfigured: {0}")]
    Config(String),
}

impl Transient for ClassifierError {
    fn is_transient(&self) -> bool {
        match self {
            ClassifierError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClassifierError::ModelLoading { .. } | ClassifierError::RateLimited { .. } => true,
            ClassifierError::Status { status, .. } => *status >= 500,
            ClassifierError::Malformed(_) | ClassifierError::Config(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ClassifierError::RateLimited { retry_after } => *retry_after,
            ClassifierError::ModelLoading { estimated_secs } if *estimated_secs > 0.0 => {
                Some(Duration::from_secs_f64(estimated_secs.min(60.0)))
            }
            _ => None,
        }
    }
}

impl ClassifierError {
    /// Whether the classifier refused the inputs themselves, so the same
    /// batch without the offending text can succeed.
    #[must_use]
    pub fn is_input_rejection(&self) -> bool {
        match self {
            ClassifierError::Status { status, .. } => matches!(status, 400 | 413 | 422),
            ClassifierError::Malformed(_) => true,
            _ => false,
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify every text. Implementations must return exactly one result
    /// per input, in input order.
    async fn classify_batch(&self, texts: &[&str]) -> Result<Vec<Classification>, ClassifierError>;

    fn name(&self) -> &str;
}

/// Build the classifier selected by configuration.
///
/// # Errors
///
/// Returns [`ClassifierError::Config`] if the Hugging Face classifier is
/// selected without an API token, or [`ClassifierError::Http`] if its HTTP
/// client cannot be constructed.
pub fn build_classifier(config: &AppConfig) -> Result<Arc<dyn Classifier>, ClassifierError> {
    match config.classifier {
        ClassifierKind::Lexicon => Ok(Arc::new(LexiconClassifier)),
        ClassifierKind::HuggingFace => {
            let token = config.hf_api_token.as_deref().ok_or_else(|| {
                ClassifierError::Config(
                    "HF_API_TOKEN is required for the huggingface classifier".to_string(),
                )
            })?;
            Ok(Arc::new(HuggingFaceClassifier::new(
                token,
                &config.hf_model,
                config.http_timeout_secs,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_and_rate_limits_are_transient() {
        assert!(ClassifierError::ModelLoading {
            estimated_secs: 20.0
        }
        .is_transient());
        assert!(ClassifierError::RateLimited { retry_after: None }.is_transient());
        assert!(ClassifierError::Status {
            status: 502,
            body: String::new()
        }
        .is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!ClassifierError::Status {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!ClassifierError::Malformed("x".to_string()).is_transient());
    }

    #[test]
    fn only_bad_input_statuses_blame_the_inputs() {
        let status = |status| ClassifierError::Status {
            status,
            body: String::new(),
        };
        assert!(status(400).is_input_rejection());
        assert!(status(413).is_input_rejection());
        assert!(!status(401).is_input_rejection());
        assert!(!status(503).is_input_rejection());
        assert!(!ClassifierError::Config("x".to_string()).is_input_rejection());
    }

    #[test]
    fn model_loading_hint_is_bounded() {
        let err = ClassifierError::ModelLoading {
            estimated_secs: 500.0,
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    }
}
