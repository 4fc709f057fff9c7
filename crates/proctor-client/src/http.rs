//! Session lifecycle calls to the exam server.

use std::fmt;

use futures::future::BoxFuture;
use proctor_model::{
    ErrorResponse, ExamDefinition, RecordViolationRequest, Session, SessionId,
    StartSessionResponse, SubmitRequest, SubmitResponse,
};
use reqwest::{Response, StatusCode, Url};
use tracing::debug;

use crate::error::{ClientError, Result};

/// Header carrying the caller identity.
pub const CALLER_HEADER: &str = "x-caller-id";

/// The server operations the engine depends on.
pub trait ExamServer: Send + Sync + fmt::Debug {
    /// Reads an exam definition.
    fn fetch_exam<'a>(&'a self, exam_id: &'a str) -> BoxFuture<'a, Result<ExamDefinition>>;

    /// Starts or resumes the caller's attempt.
    fn start_session<'a>(&'a self, exam_id: &'a str) -> BoxFuture<'a, Result<StartSessionResponse>>;

    /// Finalizes a session.
    ///
    /// A 409 is reported as `ClientError::DuplicateFinalize`.
    fn submit<'a>(
        &'a self,
        session_id: &'a SessionId,
        request: &'a SubmitRequest,
    ) -> BoxFuture<'a, Result<Session>>;

    /// Appends an integrity event to the session's audit log.
    fn record_violation<'a>(
        &'a self,
        session_id: &'a SessionId,
        request: &'a RecordViolationRequest,
    ) -> BoxFuture<'a, Result<()>>;
}

/// `reqwest` implementation of [`ExamServer`].
#[derive(Debug, Clone)]
pub struct HttpExamServer {
    client: reqwest::Client,
    base_url: Url,
    caller_id: String,
}

impl HttpExamServer {
    /// Creates a client for a server at `base_url` (e.g. `http://127.0.0.1:3000`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidationError` if `base_url` is not an http(s) URL.
    pub fn new(base_url: &str, caller_id: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            ClientError::config_validation(
                format!("Invalid server URL '{base_url}': {e}"),
                "Use a URL such as http://127.0.0.1:3000",
            )
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::config_validation(
                format!("Unsupported server URL scheme '{}'", base_url.scheme()),
                "Use http:// or https://",
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            caller_id: caller_id.into(),
        })
    }

    /// Caller identity sent with every request.
    #[must_use]
    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    /// WebSocket URL of the relay for this caller.
    #[must_use]
    pub fn relay_url(&self) -> String {
        let mut url = self.base_url.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) to ws(s) is always an allowed scheme change.
        let _ = url.set_scheme(scheme);
        url.set_path("/ws");
        url.query_pairs_mut()
            .clear()
            .append_pair("caller", &self.caller_id);
        url.to_string()
    }

    /// `{base}/api/{segments...}` with every segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ClientError::config_validation(
                    format!("Server URL '{}' cannot carry a path", self.base_url),
                    "Use a URL such as http://127.0.0.1:3000",
                )
            })?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or(body);
        Err(ClientError::server(status.as_u16(), message))
    }
}

impl ExamServer for HttpExamServer {
    fn fetch_exam<'a>(&'a self, exam_id: &'a str) -> BoxFuture<'a, Result<ExamDefinition>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.endpoint(&["exams", exam_id])?)
                .header(CALLER_HEADER, &self.caller_id)
                .send()
                .await?;
            Ok(Self::check(response).await?.json().await?)
        })
    }

    fn start_session<'a>(&'a self, exam_id: &'a str) -> BoxFuture<'a, Result<StartSessionResponse>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.endpoint(&["sessions", exam_id, "start"])?)
                .header(CALLER_HEADER, &self.caller_id)
                .send()
                .await?;
            let started: StartSessionResponse = Self::check(response).await?.json().await?;
            debug!(
                session_id = %started.session.id,
                created = started.created,
                "Session started"
            );
            Ok(started)
        })
    }

    fn submit<'a>(
        &'a self,
        session_id: &'a SessionId,
        request: &'a SubmitRequest,
    ) -> BoxFuture<'a, Result<Session>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.endpoint(&["sessions", session_id.as_str(), "submit"])?)
                .header(CALLER_HEADER, &self.caller_id)
                .json(request)
                .send()
                .await?;
            match Self::check(response).await {
                Ok(response) => {
                    let accepted: SubmitResponse = response.json().await?;
                    Ok(accepted.session)
                }
                Err(ClientError::Server { status, message })
                    if status == StatusCode::CONFLICT.as_u16() =>
                {
                    Err(ClientError::duplicate_finalize(session_id.clone(), message))
                }
                Err(e) => Err(e),
            }
        })
    }

    fn record_violation<'a>(
        &'a self,
        session_id: &'a SessionId,
        request: &'a RecordViolationRequest,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.endpoint(&["sessions", session_id.as_str(), "violations"])?)
                .header(CALLER_HEADER, &self.caller_id)
                .json(request)
                .send()
                .await?;
            Self::check(response).await?;
            Ok(())
        })
    }
}
