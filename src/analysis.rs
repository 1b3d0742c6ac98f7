//! Key phrase extraction through the Azure Text Analytics REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;

const KEY_PHRASES_PATH: &str = "/text/analytics/v3.1/keyPhrases";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything that can turn text into an ordered list of salient phrases.
#[async_trait]
pub trait KeyPhraseService: Send + Sync {
    async fn extract_key_phrases(&self, text: &str) -> Result<Vec<String>, AnalysisError>;
}

#[derive(Debug, Serialize)]
struct KeyPhraseRequest<'a> {
    documents: [RequestDocument<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestDocument<'a> {
    id: &'a str,
    language: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct KeyPhraseResponse {
    #[serde(default)]
    documents: Vec<ResponseDocument>,
    #[serde(default)]
    errors: Vec<DocumentError>,
}

#[derive(Debug, Deserialize)]
struct ResponseDocument {
    id: String,
    #[serde(rename = "keyPhrases", default)]
    key_phrases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DocumentError {
    id: String,
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// HTTP client for the Text Analytics key phrase endpoint.
pub struct TextAnalyticsClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    language: String,
}

impl TextAnalyticsClient {
    pub fn new(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AnalysisError::RequestFailed {
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            language: config.language.clone(),
        })
    }

    fn url(&self) -> String {
        format!("{}{KEY_PHRASES_PATH}", self.endpoint)
    }
}

#[async_trait]
impl KeyPhraseService for TextAnalyticsClient {
    async fn extract_key_phrases(&self, text: &str) -> Result<Vec<String>, AnalysisError> {
        let body = KeyPhraseRequest {
            documents: [RequestDocument {
                id: "1",
                language: &self.language,
                text,
            }],
        };

        let resp = self
            .client
            .post(self.url())
            .header("Ocp-Apim-Subscription-Key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, &error_detail(&body)));
        }

        let parsed: KeyPhraseResponse =
            resp.json()
                .await
                .map_err(|e| AnalysisError::InvalidResponse {
                    reason: e.to_string(),
                })?;
        phrases_from_response(parsed)
    }
}

fn status_error(status: StatusCode, retry_after: Option<Duration>, detail: &str) -> AnalysisError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AnalysisError::AuthFailed {
            status: status.as_u16(),
        },
        StatusCode::TOO_MANY_REQUESTS => AnalysisError::RateLimited { retry_after },
        _ => AnalysisError::RequestFailed {
            reason: format!("HTTP {status}: {detail}"),
        },
    }
}

/// Pull `error.message` out of a service error body, falling back to the
/// raw text.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn phrases_from_response(response: KeyPhraseResponse) -> Result<Vec<String>, AnalysisError> {
    if let Some(err) = response.errors.first() {
        return Err(AnalysisError::InvalidResponse {
            reason: format!(
                "document {} rejected: {} {}",
                err.id, err.error.code, err.error.message
            ),
        });
    }
    let document = response
        .documents
        .into_iter()
        .find(|d| d.id == "1")
        .ok_or_else(|| AnalysisError::InvalidResponse {
            reason: "response contained no document".into(),
        })?;
    Ok(document
        .key_phrases
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect())
}
