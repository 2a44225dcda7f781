//! HTTP client for the Glyph API

use crate::config::SessionConfig;
use crate::error::ServiceError;
use crate::service::{
    EventStream, ModificationService, ModifyRequest, ModifyResponse, ValidationReport,
};
use crate::stream::{SseDecoder, StreamError, StreamEvent};
use async_trait::async_trait;
use futures::StreamExt;
use glyph_history::SessionId;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// Body of a document generation request
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    /// Template data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Raw HTML to render
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Page to render
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Template to fill
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Free-form description of the document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// Style preset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Output format, `pdf` unless set
    pub format: String,
    /// Renderer options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    /// Lifetime of the hosted file in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl CreateRequest {
    /// Request rendering `html` as a PDF
    pub fn from_html(html: impl Into<String>) -> Self {
        Self {
            html: Some(html.into()),
            format: "pdf".to_string(),
            ..Self::default()
        }
    }
}

/// Result of a generation request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    /// Hosted file URL
    pub url: String,
    /// Editing session for the generated document
    pub session_id: SessionId,
    /// Output format
    #[serde(default)]
    pub format: Option<String>,
    /// File size in bytes
    #[serde(default)]
    pub size: Option<u64>,
    /// Suggested file name
    #[serde(default)]
    pub filename: Option<String>,
    /// Expiry timestamp
    #[serde(default)]
    pub expires_at: Option<String>,
    /// Optional document analysis
    #[serde(default)]
    pub analysis: Option<Value>,
}

/// Template catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TemplateSummary {
    /// Template ID
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Category, e.g. `invoice`
    #[serde(default)]
    pub category: Option<String>,
    /// Short description
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemplateList {
    #[serde(default)]
    templates: Vec<TemplateSummary>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AutoFixBody {
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    session_id: SessionId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyBody<'a> {
    #[serde(flatten)]
    request: &'a ModifyRequest,
    stream: bool,
}

/// reqwest-backed client
#[derive(Debug, Clone)]
pub struct HttpModificationService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpModificationService {
    /// Create client for `base_url`; a trailing slash is ignored
    #[must_use]
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Create client from session configuration
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(&config.base_url, config.api_key.clone())
    }

    /// Base URL without trailing slash
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Generate a document
    ///
    /// # Errors
    /// Returns [`ServiceError`] on transport or service failure.
    pub async fn create(&self, request: &CreateRequest) -> Result<CreateResponse, ServiceError> {
        self.send_json(self.request(Method::POST, "/v1/create").json(request))
            .await
    }

    /// List templates, optionally filtered by category
    ///
    /// # Errors
    /// Returns [`ServiceError`] on transport or service failure.
    pub async fn templates(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<TemplateSummary>, ServiceError> {
        let list: TemplateList = self
            .send_json(self.request(Method::GET, &templates_path(category)))
            .await?;
        Ok(list.templates)
    }

    /// JSON schema of a template's data
    ///
    /// # Errors
    /// Returns [`ServiceError`] on transport or service failure.
    pub async fn template_schema(&self, template_id: &str) -> Result<Value, ServiceError> {
        let path = format!("/v1/templates/{}/schema", urlencoding::encode(template_id));
        self.send_json(self.request(Method::GET, &path)).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.request_accepting(method, path, "application/json")
    }

    fn request_accepting(&self, method: Method, path: &str, accept: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, accept);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ServiceError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ServiceError::connection(format!("Connection error: {e}")))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        Err(error_from_body(status, &text))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, ServiceError> {
        let response = self.send(builder).await?;
        let status = response.status().as_u16();
        response.json().await.map_err(|e| {
            ServiceError::new(format!("Invalid response body: {e}"), status, "INVALID_RESPONSE")
        })
    }
}

fn templates_path(category: Option<&str>) -> String {
    match category {
        Some(category) => format!("/v1/templates?category={}", urlencoding::encode(category)),
        None => "/v1/templates".to_string(),
    }
}

fn error_from_body(status: u16, text: &str) -> ServiceError {
    let body: ErrorBody = serde_json::from_str(text).unwrap_or_default();
    ServiceError::from_response(status, body.error, body.code)
}

#[async_trait]
impl ModificationService for HttpModificationService {
    async fn modify_stream(&self, request: &ModifyRequest) -> Result<EventStream, ServiceError> {
        let builder = self
            .request_accepting(Method::POST, "/v1/modify", "text/event-stream")
            .json(&ModifyBody {
                request,
                stream: true,
            });
        let response = self.send(builder).await?;

        let bytes = Box::pin(response.bytes_stream());
        let events = futures::stream::unfold(
            (bytes, SseDecoder::new(), VecDeque::new(), false),
            |(mut bytes, mut decoder, mut queue, mut done)| async move {
                loop {
                    if let Some(item) = queue.pop_front() {
                        return Some((item, (bytes, decoder, queue, done)));
                    }
                    if done {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            let decoded = decoder.push(&chunk);
                            if decoded.is_empty() {
                                // Chunk arrival resets the activity timer, including keep-alives
                                // and frames split across chunks
                                queue.push_back(Ok(StreamEvent::Heartbeat));
                            }
                            queue.extend(decoded);
                        }
                        Some(Err(e)) => {
                            done = true;
                            queue.push_back(Err(StreamError::Transport(ServiceError::connection(
                                format!("Stream interrupted: {e}"),
                            ))));
                        }
                        None => {
                            done = true;
                            queue.extend(decoder.finish());
                        }
                    }
                }
            },
        );

        Ok(events.boxed())
    }

    async fn modify(&self, request: &ModifyRequest) -> Result<ModifyResponse, ServiceError> {
        self.send_json(self.request(Method::POST, "/v1/modify").json(&ModifyBody {
            request,
            stream: false,
        }))
        .await
    }

    async fn validation_status(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ValidationReport>, ServiceError> {
        let path = format!("/v1/validate/{}", urlencoding::encode(session_id.as_str()));
        let response = self.send(self.request(Method::GET, &path)).await?;
        if response.status() == StatusCode::ACCEPTED {
            return Ok(None);
        }

        let status = response.status().as_u16();
        let body: Value = response.json().await.map_err(|e| {
            ServiceError::new(format!("Invalid response body: {e}"), status, "INVALID_RESPONSE")
        })?;
        parse_validation(status, body)
    }

    async fn auto_fix(&self, session_id: &SessionId) -> Result<String, ServiceError> {
        let path = format!("/v1/validate/{}/fix", urlencoding::encode(session_id.as_str()));
        let body: AutoFixBody = self.send_json(self.request(Method::POST, &path)).await?;
        Ok(body.content)
    }

    async fn refresh_session(&self, session_id: &SessionId) -> Result<SessionId, ServiceError> {
        let path = format!("/v1/sessions/{}/refresh", urlencoding::encode(session_id.as_str()));
        let body: RefreshBody = self.send_json(self.request(Method::POST, &path)).await?;
        Ok(body.session_id)
    }
}

fn parse_validation(status: u16, body: Value) -> Result<Option<ValidationReport>, ServiceError> {
    let pending = matches!(
        body.get("status").and_then(Value::as_str),
        Some("pending" | "running")
    );
    if pending {
        return Ok(None);
    }
    serde_json::from_value(body).map(Some).map_err(|e| {
        ServiceError::new(format!("Invalid validation report: {e}"), status, "INVALID_RESPONSE")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base_url_trailing_slash_is_stripped() {
        let client = HttpModificationService::new("https://api.glyph.you/", None);
        assert_eq!(client.base_url(), "https://api.glyph.you");
    }

    #[test]
    fn template_paths_are_encoded() {
        assert_eq!(templates_path(None), "/v1/templates");
        assert_eq!(
            templates_path(Some("quotes & invoices")),
            "/v1/templates?category=quotes%20%26%20invoices"
        );
    }

    #[test]
    fn error_body_fields_and_defaults() {
        let err = error_from_body(403, r#"{"error":"Protected region","code":"GUARDRAIL_PROTECTED"}"#);
        assert_eq!(err.message, "Protected region");
        assert_eq!(err.code, "GUARDRAIL_PROTECTED");
        assert_eq!(err.status, 403);

        let err = error_from_body(502, "<html>Bad Gateway</html>");
        assert_eq!(err.message, "Request failed with status 502");
        assert_eq!(err.code, "UNKNOWN_ERROR");
    }

    #[test]
    fn modify_body_flattens_request() {
        let request = ModifyRequest::new(SessionId::new("s"), "p", "<p/>");
        let body = serde_json::to_value(ModifyBody {
            request: &request,
            stream: true,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({"sessionId": "s", "prompt": "p", "currentContent": "<p/>", "stream": true})
        );
    }

    #[test]
    fn create_request_omits_unset_fields() {
        let body = serde_json::to_value(CreateRequest::from_html("<h1>Hi</h1>")).unwrap();
        assert_eq!(body, json!({"html": "<h1>Hi</h1>", "format": "pdf"}));
    }

    #[test]
    fn pending_validation_reads_as_none() {
        assert_eq!(parse_validation(200, json!({"status": "pending"})).unwrap(), None);

        let report = parse_validation(200, json!({"criticalCount": 0, "warningCount": 2}))
            .unwrap()
            .unwrap();
        assert_eq!(report.warning_count, 2);
    }
}
