use crate::constants::{
    CHAT_COMPLETIONS_PATH, DEFAULT_BASE_URL, DEFAULT_MODEL, ERROR_BODY_PREVIEW_CHARS,
};
use crate::credentials::CredentialStore;
use crate::hardening::RetryPolicy;
use crate::projections::RequestProjection;
use crate::specs::openai::{OpenAiRequest, OpenAiTool};
use crate::streaming::{ChunkStream, StreamDriver, StreamOutcome};
use crate::types::{
    Completion, ObservedError, PrismError, ProgressSink, Result, TurnRecord, WireError,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
        }
    }
}

/// Chat-completions client over one OpenAI-compatible endpoint. Cheap to
/// clone; the HTTP connection pool is shared between clones.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    config: AdapterConfig,
    credentials: Arc<dyn CredentialStore>,
}

impl ChatClient {
    pub fn new(
        http: reqwest::Client,
        config: AdapterConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            http,
            config,
            credentials,
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            CHAT_COMPLETIONS_PATH
        )
    }

    /// Posts one request and returns the raw response, or a raw (not yet
    /// classified) error. A missing credential never reaches the network.
    async fn post_chat(&self, request: &OpenAiRequest) -> Result<reqwest::Response> {
        let key = match self.credentials.get() {
            Some(k) => k,
            None => {
                return Err(PrismError::Auth("no API key configured".to_string()).into());
            }
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(key)
            .json(request)
            .send()
            .await
            .map_err(PrismError::Network)?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let error_body = match response.text().await {
                Ok(text) => text,
                Err(_) => String::new(),
            };
            Err(PrismError::Upstream(status, error_body).into())
        }
    }

    /// Streams one assistant turn. Decoded text goes to the sink as it
    /// arrives; finalized tool calls follow their flush points. Cancelling
    /// the token stops the stream at the next chunk boundary and counts as a
    /// normal outcome.
    pub async fn stream_response(
        &self,
        history: &[TurnRecord],
        tools: Option<Vec<OpenAiTool>>,
        sink: &mut dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Result<StreamOutcome> {
        let request = RequestProjection::project(&self.config, history, tools, true);
        tracing::debug!(target: "transport", "opening response stream against {}", self.endpoint());

        let response = match self.post_chat(&request).await {
            Ok(r) => r,
            Err(e) => return Err(self.classify_error(e)),
        };

        let source = ChunkStream::from_response(response, cancel.clone());
        let driver = StreamDriver::new(cancel);
        Ok(driver.run(source, sink).await)
    }

    /// Single-shot, non-streaming completion.
    pub async fn complete(
        &self,
        history: &[TurnRecord],
        tools: Option<Vec<OpenAiTool>>,
    ) -> Result<Completion> {
        let request = RequestProjection::project(&self.config, history, tools, false);
        tracing::debug!(target: "transport", "posting completion against {}", self.endpoint());

        let response = match self.post_chat(&request).await {
            Ok(r) => r,
            Err(e) => return Err(self.classify_error(e)),
        };

        let completion = response
            .json::<Completion>()
            .await
            .map_err(PrismError::Network)?;
        Ok(completion)
    }

    /// Cheap reachability and credential probe: a one-token completion.
    /// Transient failures are retried here, at the caller side of the
    /// pipeline; classification happens once, after the policy gives up.
    pub async fn verify_connection(&self) -> Result<()> {
        let mut probe = self.config.clone();
        probe.max_tokens = Some(1);
        let history = [TurnRecord::user("ping")];
        let request = RequestProjection::project(&probe, &history, None, false);

        let policy = RetryPolicy::new(3, 500);
        let client = self.clone();

        let outcome = policy
            .execute_with_retry(move || {
                let client = client.clone();
                let request = request.clone();
                async move {
                    let response = client.post_chat(&request).await?;
                    let _ = response.bytes().await;
                    Ok(())
                }
            })
            .await;

        match outcome {
            Ok(()) => {
                tracing::info!(target: "transport", "connection verified against {}", self.endpoint());
                Ok(())
            }
            Err(e) => Err(self.classify_error(e)),
        }
    }

    /// Maps a raw failure onto its caller-facing category. A 401 deletes the
    /// stored credential so a dead key is not offered again; a 429 keeps it,
    /// since the key itself is fine. Failures that did not come from the
    /// transport pass through unchanged.
    pub fn classify_error(&self, err: ObservedError) -> ObservedError {
        let span_trace = err.span_trace;
        let inner = match err.inner {
            PrismError::Upstream(status, body)
                if status == reqwest::StatusCode::UNAUTHORIZED =>
            {
                tracing::warn!(
                    target: "auth",
                    "upstream rejected credential (401), deleting stored key"
                );
                self.credentials.delete();
                PrismError::Auth(extract_error_message(&body))
            }
            PrismError::Upstream(status, body)
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS =>
            {
                PrismError::RateLimited(extract_error_message(&body))
            }
            PrismError::Upstream(status, body) => PrismError::Protocol(format!(
                "upstream returned {}: {}",
                status,
                extract_error_message(&body)
            )),
            PrismError::Network(e) => PrismError::Protocol(format!("network failure: {}", e)),
            other => other,
        };
        ObservedError { inner, span_trace }
    }
}

/// Pulls the human-readable message out of an error body when it follows the
/// `{"error": {"message": ...}}` shape, otherwise a bounded prefix of the raw
/// body.
fn extract_error_message(body: &str) -> String {
    if let Ok(wire) = serde_json::from_str::<WireError>(body) {
        return wire.error.message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "(empty error body)".to_string();
    }
    crate::str_utils::prefix_chars(trimmed, ERROR_BODY_PREVIEW_CHARS).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_structured_error_message() {
        let body = r#"{"error":{"message":"Incorrect API key provided","code":"invalid_api_key"}}"#;
        assert_eq!(extract_error_message(body), "Incorrect API key provided");
    }

    #[test]
    fn test_extract_falls_back_to_raw_body() {
        assert_eq!(extract_error_message("  Bad Gateway  "), "Bad Gateway");
        assert_eq!(extract_error_message("   "), "(empty error body)");

        let long = "x".repeat(5000);
        assert_eq!(extract_error_message(&long).chars().count(), 300);
    }

    #[test]
    fn test_endpoint_tolerates_trailing_slash() {
        let config = AdapterConfig {
            base_url: "https://example.test/v1/".to_string(),
            ..Default::default()
        };
        let client = ChatClient::new(
            reqwest::Client::new(),
            config,
            Arc::new(crate::credentials::MemoryCredentialStore::new()),
        );
        assert_eq!(client.endpoint(), "https://example.test/v1/chat/completions");
    }
}
