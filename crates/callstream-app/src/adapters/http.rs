//! JSON-over-HTTP collaborator clients.
//!
//! # Design
//! - One shared transport maps HTTP status codes onto [`BackendErrorKind`] so
//!   every client classifies failures the same way.
//! - The response body travels in the error detail; the ingestion monitor
//!   inspects it for duplicate phrasing.
//! - Each request carries the per-call timeout configured on the client.

use std::time::Duration;

use async_trait::async_trait;
use callstream_config::{IngestSettings, RecognizerSettings, RedactionSettings};
use callstream_core::{
    BackendError, BackendErrorKind, BackendResult, ConversationRecord, Finding, IngestRequest,
    IngestionBackend, OperationHandle, OperationStatus, RecognitionConfig, RedactionService,
    SpeechRecognizer, Transcript,
};
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};

/// Map a non-success status onto an error kind.
#[must_use]
pub fn classify_status(status: StatusCode, body: &str) -> BackendErrorKind {
    match status.as_u16() {
        429 => BackendErrorKind::QuotaExhausted,
        401 | 403 => BackendErrorKind::PermissionDenied,
        404 => BackendErrorKind::NotFound,
        400 if body.to_ascii_lowercase().contains("recognizer") => {
            BackendErrorKind::RecognizerConfig
        }
        400..=499 => BackendErrorKind::InvalidRequest,
        _ => BackendErrorKind::Transient,
    }
}

/// Shared HTTP client bound to one base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Client for `base_url` with `timeout` applied to every request.
    ///
    /// # Errors
    ///
    /// Returns an error when the TLS backend cannot be initialised.
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::http("http.client_build", base_url.to_string(), err))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post<B, R>(&self, operation: &'static str, path: &str, body: &B) -> BackendResult<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.client.post(self.url(path)).json(body);
        let response = self.send(operation, request).await?;
        decode(operation, response).await
    }

    async fn get<R>(&self, operation: &'static str, path: &str) -> BackendResult<R>
    where
        R: DeserializeOwned,
    {
        let response = self.send(operation, self.client.get(self.url(path))).await?;
        decode(operation, response).await
    }

    async fn probe(&self, operation: &'static str, path: &str) -> BackendResult<()> {
        self.send(operation, self.client.get(self.url(path)))
            .await
            .map(|_| ())
    }

    async fn post_probe<B>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> BackendResult<()>
    where
        B: Serialize + Sync + ?Sized,
    {
        self.send(operation, self.client.post(self.url(path)).json(body))
            .await
            .map(|_| ())
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> BackendResult<reqwest::Response> {
        let response = request.send().await.map_err(|err| {
            let detail = if err.is_timeout() {
                format!("request timed out: {err}")
            } else {
                err.to_string()
            };
            BackendError::transient(operation, detail)
        })?;
        let status = response.status();
        debug!(operation, status = status.as_u16(), "http response received");
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::new(
            classify_status(status, &body),
            operation,
            format!("{status}: {body}"),
        ))
    }
}

async fn decode<R: DeserializeOwned>(
    operation: &'static str,
    response: reqwest::Response,
) -> BackendResult<R> {
    response.json::<R>().await.map_err(|err| {
        BackendError::new(
            BackendErrorKind::InvalidRequest,
            operation,
            format!("malformed response body: {err}"),
        )
    })
}

#[derive(Serialize)]
struct RecognizeRequest<'a> {
    audio_uri: &'a str,
    config: &'a RecognitionConfig,
}

/// Speech recognizer reached over HTTP.
pub struct HttpSpeechRecognizer {
    transport: HttpTransport,
}

impl HttpSpeechRecognizer {
    /// Recognizer client over `transport`.
    #[must_use]
    pub const fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    /// Client for the configured recognizer endpoint.
    ///
    /// # Errors
    ///
    /// See [`HttpTransport::new`].
    pub fn from_settings(settings: &RecognizerSettings, timeout: Duration) -> AppResult<Self> {
        HttpTransport::new(&settings.endpoint, timeout).map(Self::new)
    }
}

#[async_trait]
impl SpeechRecognizer for HttpSpeechRecognizer {
    async fn transcribe(
        &self,
        audio_uri: &str,
        config: &RecognitionConfig,
    ) -> BackendResult<Transcript> {
        self.transport
            .post(
                "recognizer.transcribe",
                "recognize",
                &RecognizeRequest { audio_uri, config },
            )
            .await
    }

    async fn health_check(&self, config: &RecognitionConfig) -> BackendResult<()> {
        self.transport
            .post_probe("recognizer.health_check", "recognize:validate", config)
            .await
    }
}

#[derive(Serialize)]
struct InspectRequest<'a> {
    text: &'a str,
    template: &'a str,
    include_quote: bool,
}

#[derive(Deserialize)]
struct InspectResponse {
    #[serde(default)]
    findings: Vec<Finding>,
}

#[derive(Serialize)]
struct DeidentifyRequest<'a> {
    text: &'a str,
    template: &'a str,
}

#[derive(Deserialize)]
struct DeidentifyResponse {
    text: String,
}

/// Redaction service reached over HTTP.
///
/// Inspection is skipped without an inspect template and text passes through
/// unchanged without a de-identify template.
pub struct HttpRedactionService {
    transport: HttpTransport,
    inspect_template: Option<String>,
    deidentify_template: Option<String>,
    include_quote: bool,
}

impl HttpRedactionService {
    /// Redaction client over `transport` using the configured templates.
    #[must_use]
    pub fn new(transport: HttpTransport, settings: &RedactionSettings) -> Self {
        Self {
            transport,
            inspect_template: settings.inspect_template.clone(),
            deidentify_template: settings.deidentify_template.clone(),
            include_quote: settings.include_quote,
        }
    }

    /// Client for the configured redaction endpoint.
    ///
    /// # Errors
    ///
    /// See [`HttpTransport::new`].
    pub fn from_settings(settings: &RedactionSettings, timeout: Duration) -> AppResult<Self> {
        HttpTransport::new(&settings.endpoint, timeout)
            .map(|transport| Self::new(transport, settings))
    }
}

#[async_trait]
impl RedactionService for HttpRedactionService {
    async fn inspect(&self, text: &str) -> BackendResult<Vec<Finding>> {
        let Some(template) = self.inspect_template.as_deref() else {
            return Ok(Vec::new());
        };
        let response: InspectResponse = self
            .transport
            .post(
                "redaction.inspect",
                "inspect",
                &InspectRequest {
                    text,
                    template,
                    include_quote: self.include_quote,
                },
            )
            .await?;
        Ok(response.findings)
    }

    async fn deidentify(&self, text: &str) -> BackendResult<String> {
        let Some(template) = self.deidentify_template.as_deref() else {
            return Ok(text.to_string());
        };
        let response: DeidentifyResponse = self
            .transport
            .post(
                "redaction.deidentify",
                "deidentify",
                &DeidentifyRequest { text, template },
            )
            .await?;
        Ok(response.text)
    }

    async fn health_check(&self) -> BackendResult<()> {
        for template in [&self.inspect_template, &self.deidentify_template]
            .into_iter()
            .flatten()
        {
            let path = format!("templates/{}", template.trim_start_matches('/'));
            self.transport.probe("redaction.health_check", &path).await?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct NamedResource {
    name: String,
}

/// Analytics backend reached over HTTP.
pub struct HttpIngestionBackend {
    transport: HttpTransport,
}

impl HttpIngestionBackend {
    /// Backend client over `transport`.
    #[must_use]
    pub const fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    /// Client for the configured backend endpoint.
    ///
    /// # Errors
    ///
    /// See [`HttpTransport::new`].
    pub fn from_settings(settings: &IngestSettings, timeout: Duration) -> AppResult<Self> {
        HttpTransport::new(&settings.endpoint, timeout).map(Self::new)
    }
}

#[async_trait]
impl IngestionBackend for HttpIngestionBackend {
    async fn submit_bulk(&self, request: &IngestRequest) -> BackendResult<OperationHandle> {
        let accepted: NamedResource = self
            .transport
            .post("ingest.submit_bulk", "conversations:ingest", request)
            .await?;
        Ok(OperationHandle {
            name: accepted.name,
            started_at: Utc::now(),
        })
    }

    async fn poll(&self, handle: &OperationHandle) -> BackendResult<OperationStatus> {
        let name = handle.name.trim_start_matches("operations/");
        self.transport
            .get("ingest.poll", &format!("operations/{name}"))
            .await
    }

    async fn create_single(&self, record: &ConversationRecord) -> BackendResult<String> {
        let created: NamedResource = self
            .transport
            .post("ingest.create_single", "conversations", record)
            .await?;
        Ok(created.name)
    }

    async fn health_check(&self) -> BackendResult<()> {
        self.transport
            .probe("ingest.health_check", "conversations")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_error_taxonomy() {
        let cases = [
            (429, "", BackendErrorKind::QuotaExhausted),
            (401, "", BackendErrorKind::PermissionDenied),
            (403, "", BackendErrorKind::PermissionDenied),
            (404, "", BackendErrorKind::NotFound),
            (
                400,
                "Recognizer projects/p/recognizers/x not found",
                BackendErrorKind::RecognizerConfig,
            ),
            (400, "bad field", BackendErrorKind::InvalidRequest),
            (
                409,
                "0 failed and 2 were skipped as they already exist",
                BackendErrorKind::InvalidRequest,
            ),
            (500, "", BackendErrorKind::Transient),
            (503, "", BackendErrorKind::Transient),
        ];
        for (code, body, expected) in cases {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::IM_A_TEAPOT);
            assert_eq!(classify_status(status, body), expected, "status {code}");
        }
    }

    #[test]
    fn urls_are_joined_without_duplicate_slashes() -> AppResult<()> {
        let transport = HttpTransport::new("http://localhost:9000/v1/", Duration::from_secs(1))?;
        assert_eq!(transport.base_url(), "http://localhost:9000/v1");
        assert_eq!(transport.url("/recognize"), "http://localhost:9000/v1/recognize");
        Ok(())
    }
}
