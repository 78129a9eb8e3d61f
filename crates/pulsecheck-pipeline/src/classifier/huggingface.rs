//! Hugging Face Inference API text-classification client.

use std::time::Duration;

use async_trait::async_trait;
use pulsecheck_core::Label;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{Classification, Classifier, ClassifierError};

const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a [&'a str],
    parameters: InferenceParameters,
}

/// Over-long inputs are cut to the model's limit instead of refused.
#[derive(Serialize)]
struct InferenceParameters {
    truncation: bool,
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

/// The API answers a list input with one list of label scores per text;
/// some deployments collapse that to the top label per text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    PerText(Vec<Vec<LabelScore>>),
    TopOnly(Vec<LabelScore>),
}

#[derive(Debug, Deserialize)]
struct LoadingBody {
    #[serde(default)]
    estimated_time: Option<f64>,
}

pub struct HuggingFaceClassifier {
    client: Client,
    api_token: String,
    endpoint: String,
    model: String,
}

impl HuggingFaceClassifier {
    /// Creates a classifier for `model` on the public Inference API.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::Http`] if the `reqwest::Client` cannot be
    /// constructed.
    pub fn new(api_token: &str, model: &str, timeout_secs: u64) -> Result<Self, ClassifierError> {
        Self::with_base_url(api_token, model, timeout_secs, DEFAULT_BASE_URL)
    }

    /// Creates a classifier against a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::Http`] if the `reqwest::Client` cannot be
    /// constructed.
    pub fn with_base_url(
        api_token: &str,
        model: &str,
        timeout_secs: u64,
        base_url: &str,
    ) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("pulsecheck/0.1")
            .build()?;

        Ok(Self {
            client,
            api_token: api_token.to_owned(),
            endpoint: format!("{}/models/{model}", base_url.trim_end_matches('/')),
            model: model.to_owned(),
        })
    }

    fn to_classification(scores: &[LabelScore]) -> Result<Classification, ClassifierError> {
        let top = scores
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .ok_or_else(|| ClassifierError::Malformed("empty label list".to_string()))?;
        let label: Label = top
            .label
            .parse()
            .map_err(|e: pulsecheck_core::CoreError| ClassifierError::Malformed(e.to_string()))?;
        Ok(Classification {
            label,
            confidence: top.score.clamp(0.0, 1.0),
        })
    }
}

fn retry_after_header(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl Classifier for HuggingFaceClassifier {
    async fn classify_batch(&self, texts: &[&str]) -> Result<Vec<Classification>, ClassifierError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(&InferenceRequest {
                inputs: texts,
                parameters: InferenceParameters { truncation: true },
            })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            let body: LoadingBody = response
                .json()
                .await
                .unwrap_or(LoadingBody {
                    estimated_time: None,
                });
            return Err(ClassifierError::ModelLoading {
                estimated_secs: body.estimated_time.unwrap_or(0.0),
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClassifierError::RateLimited {
                retry_after: retry_after_header(&response),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: InferenceResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Malformed(format!("{}: {e}", self.model)))?;

        let results = match parsed {
            InferenceResponse::PerText(rows) => rows
                .iter()
                .map(|scores| Self::to_classification(scores))
                .collect::<Result<Vec<_>, _>>()?,
            InferenceResponse::TopOnly(rows) => rows
                .iter()
                .map(|score| Self::to_classification(std::slice::from_ref(score)))
                .collect::<Result<Vec<_>, _>>()?,
        };

        if results.len() != texts.len() {
            return Err(ClassifierError::Malformed(format!(
                "{} returned {} results for {} inputs",
                self.model,
                results.len(),
                texts.len()
            )));
        }

        Ok(results)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Transient;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL: &str = "distilbert-base-uncased-finetuned-sst-2-english";

    fn test_classifier(base_url: &str) -> HuggingFaceClassifier {
        HuggingFaceClassifier::with_base_url("hf-token", MODEL, 30, base_url)
            .expect("client construction should not fail")
    }

    #[tokio::test]
    async fn classifies_batch_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/models/{MODEL}")))
            .and(header("authorization", "Bearer hf-token"))
            .and(body_json(serde_json::json!({
                "inputs": ["love it", "hate it"],
                "parameters": { "truncation": true }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                [{"label": "POSITIVE", "score": 0.98}, {"label": "NEGATIVE", "score": 0.02}],
                [{"label": "NEGATIVE", "score": 0.91}, {"label": "POSITIVE", "score": 0.09}]
            ])))
            .mount(&server)
            .await;

        let out = test_classifier(&server.uri())
            .classify_batch(&["love it", "hate it"])
            .await
            .expect("classification should succeed");

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].label, Label::Positive);
        assert!((out[0].confidence - 0.98).abs() < 1e-9);
        assert_eq!(out[1].label, Label::Negative);
    }

    #[tokio::test]
    async fn model_loading_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": "Model is currently loading",
                "estimated_time": 20.0
            })))
            .mount(&server)
            .await;

        let err = test_classifier(&server.uri())
            .classify_batch(&["hello"])
            .await
            .unwrap_err();

        assert!(matches!(err, ClassifierError::ModelLoading { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn too_many_requests_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = test_classifier(&server.uri())
            .classify_batch(&["hello"])
            .await
            .unwrap_err();

        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn result_count_mismatch_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                [{"label": "POSITIVE", "score": 0.9}]
            ])))
            .mount(&server)
            .await;

        let err = test_classifier(&server.uri())
            .classify_batch(&["one", "two"])
            .await
            .unwrap_err();

        assert!(matches!(err, ClassifierError::Malformed(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn bad_request_is_an_input_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("input too long"))
            .mount(&server)
            .await;

        let err = test_classifier(&server.uri())
            .classify_batch(&["hello"])
            .await
            .unwrap_err();

        assert!(matches!(err, ClassifierError::Status { status: 400, .. }));
        assert!(err.is_input_rejection());
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn empty_input_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let out = test_classifier(&server.uri())
            .classify_batch(&[])
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
