//! Testing utilities for the Glyph workspace
//!
//! Scripted service, document fixtures and notice helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use futures::StreamExt;
use glyph_history::{DocumentSnapshot, SessionId, Storage};
use glyph_session::{
    EventStream, ModificationService, ModificationSession, ModifyRequest, ModifyResponse,
    ServiceError, SessionConfig, SessionNotice, StreamError, StreamEvent, ValidationConfig,
    ValidationReport,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

pub const INVOICE: &str = r#"<html><body><header data-region="header"><h1>Invoice #1042</h1></header><table data-region="items"><tr><td>Design work</td><td>$1,250.00</td></tr></table><footer data-region="footer">Due on receipt</footer></body></html>"#;

pub const SESSION: &str = "sess-test";

pub fn invoice_snapshot() -> DocumentSnapshot {
    DocumentSnapshot::new(INVOICE, SessionId::new(SESSION))
}

/// The invoice with a navy header
pub fn navy_invoice() -> String {
    INVOICE.replace("<h1>", r#"<h1 style="color:navy">"#)
}

/// One step of a scripted stream
#[derive(Debug, Clone)]
pub enum Step {
    Event(StreamEvent),
    Delay(Duration),
    Fail(StreamError),
    /// Never yields again
    Hang,
}

/// Scripted answer to one modification attempt
#[derive(Debug, Clone)]
pub enum Script {
    Stream(Vec<Step>),
    Reject(ServiceError),
    Respond(ModifyResponse),
}

pub fn start() -> Step {
    Step::Event(StreamEvent::Start {
        model: Some("test-model".into()),
        session_id: None,
    })
}

pub fn delta(content: &str) -> Step {
    Step::Event(StreamEvent::Delta {
        content: content.into(),
    })
}

pub fn complete(content: &str) -> Step {
    Step::Event(StreamEvent::Complete {
        content: content.into(),
        changed_regions: Vec::new(),
    })
}

pub fn error_event(message: &str, status: u16) -> Step {
    Step::Event(StreamEvent::Error {
        message: message.into(),
        code: None,
        status: Some(status),
    })
}

pub fn secs(n: u64) -> Step {
    Step::Delay(Duration::from_secs(n))
}

/// Start, one delta and a complete event carrying `content`
pub fn success(content: &str) -> Vec<Step> {
    let head: String = content.chars().take(16).collect();
    vec![start(), delta(&head), complete(content)]
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub request: ModifyRequest,
}

/// In-memory [`ModificationService`] answering from queued scripts
#[derive(Debug, Default)]
pub struct ScriptedService {
    scripts: Mutex<VecDeque<Script>>,
    validations: Mutex<VecDeque<Result<Option<ValidationReport>, ServiceError>>>,
    auto_fix: Mutex<Option<Result<String, ServiceError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    refreshes: Mutex<Vec<SessionId>>,
    validation_polls: AtomicUsize,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, script: Script) -> Self {
        self.scripts.lock().push_back(script);
        self
    }

    pub fn then_stream(self, steps: Vec<Step>) -> Self {
        self.then(Script::Stream(steps))
    }

    pub fn then_reject(self, error: ServiceError) -> Self {
        self.then(Script::Reject(error))
    }

    pub fn then_respond(self, content: &str) -> Self {
        self.then(Script::Respond(ModifyResponse {
            content: content.into(),
            changed_regions: Vec::new(),
        }))
    }

    pub fn with_validations(
        self,
        results: impl IntoIterator<Item = Result<Option<ValidationReport>, ServiceError>>,
    ) -> Self {
        self.validations.lock().extend(results);
        self
    }

    pub fn with_auto_fix(self, result: Result<String, ServiceError>) -> Self {
        *self.auto_fix.lock() = Some(result);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Modification attempts received
    pub fn attempts(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn refreshes(&self) -> Vec<SessionId> {
        self.refreshes.lock().clone()
    }

    pub fn validation_polls(&self) -> usize {
        self.validation_polls.load(Ordering::SeqCst)
    }

    fn next_script(&self, request: &ModifyRequest) -> Option<Script> {
        self.calls.lock().push(RecordedCall {
            at: Instant::now(),
            request: request.clone(),
        });
        self.scripts.lock().pop_front()
    }
}

fn exhausted() -> ServiceError {
    ServiceError::new("no scripted response", 400, "SCRIPT_EXHAUSTED")
}

fn script_stream(steps: Vec<Step>) -> EventStream {
    futures::stream::unfold(steps.into_iter(), |mut steps| async move {
        loop {
            match steps.next()? {
                Step::Event(event) => return Some((Ok(event), steps)),
                Step::Fail(error) => return Some((Err(error), steps)),
                Step::Delay(delay) => tokio::time::sleep(delay).await,
                Step::Hang => futures::future::pending::<()>().await,
            }
        }
    })
    .boxed()
}

#[async_trait]
impl ModificationService for ScriptedService {
    async fn modify_stream(&self, request: &ModifyRequest) -> Result<EventStream, ServiceError> {
        match self.next_script(request).ok_or_else(exhausted)? {
            Script::Stream(steps) => Ok(script_stream(steps)),
            Script::Reject(error) => Err(error),
            Script::Respond(response) => Ok(script_stream(vec![Step::Event(
                StreamEvent::Complete {
                    content: response.content,
                    changed_regions: response.changed_regions,
                },
            )])),
        }
    }

    async fn modify(&self, request: &ModifyRequest) -> Result<ModifyResponse, ServiceError> {
        match self.next_script(request).ok_or_else(exhausted)? {
            Script::Respond(response) => Ok(response),
            Script::Reject(error) => Err(error),
            Script::Stream(steps) => steps
                .into_iter()
                .find_map(|step| match step {
                    Step::Event(StreamEvent::Complete {
                        content,
                        changed_regions,
                    }) => Some(ModifyResponse {
                        content,
                        changed_regions,
                    }),
                    _ => None,
                })
                .ok_or_else(exhausted),
        }
    }

    async fn validation_status(
        &self,
        _session_id: &SessionId,
    ) -> Result<Option<ValidationReport>, ServiceError> {
        self.validation_polls.fetch_add(1, Ordering::SeqCst);
        self.validations.lock().pop_front().unwrap_or(Ok(None))
    }

    async fn auto_fix(&self, _session_id: &SessionId) -> Result<String, ServiceError> {
        self.auto_fix.lock().take().unwrap_or_else(|| Err(exhausted()))
    }

    async fn refresh_session(&self, session_id: &SessionId) -> Result<SessionId, ServiceError> {
        self.refreshes.lock().push(session_id.clone());
        Ok(SessionId::new(format!("{session_id}-refreshed")))
    }
}

pub fn report(critical: u32, warnings: u32, has_auto_fix: bool) -> ValidationReport {
    ValidationReport {
        critical_count: critical,
        warning_count: warnings,
        issues: Vec::new(),
        has_auto_fix,
    }
}

/// Default config with validation polling off
pub fn test_config() -> SessionConfig {
    SessionConfig::default().with_validation(ValidationConfig {
        enabled: false,
        ..ValidationConfig::default()
    })
}

pub fn session_with(service: Arc<ScriptedService>, config: SessionConfig) -> ModificationSession {
    ModificationSession::builder(invoice_snapshot(), service)
        .config(config)
        .storage(Arc::new(Storage::in_memory()))
        .build()
}

pub fn test_session(service: Arc<ScriptedService>) -> ModificationSession {
    session_with(service, test_config())
}

/// Every notice currently buffered
pub fn drain_notices(rx: &mut broadcast::Receiver<SessionNotice>) -> Vec<SessionNotice> {
    let mut notices = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(notice) => notices.push(notice),
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    notices
}
