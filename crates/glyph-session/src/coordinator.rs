//! Request lifecycle: single flight, timeouts, retries, cancellation
//!
//! One [`Flight`] exists per submission. Each network attempt inside it runs
//! under a child cancellation token that both the user and the absolute ceiling
//! can fire; elapsed time decides which of the two it was.

use crate::config::RequestConfig;
use crate::error::{ErrorClass, ModifyError, ServiceError};
use crate::notice::{Notifier, SessionNotice};
use crate::service::{ModificationService, ModifyRequest};
use crate::stream::{detect_refusal, DecodedModification, Progress, StreamDecoder, StreamError};
use futures::StreamExt;
use glyph_history::SessionId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of the coordinator's current request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Nothing submitted yet
    #[default]
    Idle,
    /// Attempt running
    InFlight,
    /// Waiting out a backoff
    Retrying,
    /// Stopped by the user
    Cancelled,
    /// Gave up
    Failed,
    /// Last request succeeded
    Succeeded,
}

impl RequestState {
    /// Whether a request currently occupies the coordinator
    #[inline]
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::InFlight | Self::Retrying)
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: RequestState,
    auto_retries: u32,
    cancel: Option<CancellationToken>,
    generation: u64,
}

/// Exclusive right to run one submission
///
/// Dropping an unfinished flight cancels it and marks the request cancelled.
#[derive(Debug)]
pub struct Flight {
    shared: Arc<Mutex<Shared>>,
    token: CancellationToken,
    generation: u64,
    done: bool,
}

impl Flight {
    /// Token observed by this submission
    #[inline]
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Settle the flight in `state`
    pub fn finish(mut self, state: RequestState) {
        self.settle(state);
    }

    fn set_state(&self, state: RequestState) {
        let mut shared = self.shared.lock();
        if shared.generation == self.generation {
            shared.state = state;
        }
    }

    fn settle(&mut self, state: RequestState) {
        if self.done {
            return;
        }
        self.done = true;
        let mut shared = self.shared.lock();
        if shared.generation == self.generation {
            shared.state = state;
            shared.cancel = None;
        }
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        if !self.done {
            self.token.cancel();
            self.settle(RequestState::Cancelled);
        }
    }
}

/// Result of a submission that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Service produced an accepted document
    Completed {
        /// Decoded result
        modification: DecodedModification,
        /// Session used by the successful attempt, refreshed if it expired
        session_id: SessionId,
        /// Network attempts made
        attempts: u32,
    },
    /// User cancelled
    Cancelled {
        /// Network attempts made
        attempts: u32,
    },
}

#[derive(Debug)]
enum Failure {
    Cancelled,
    Failed { class: ErrorClass, message: String },
}

impl Failure {
    fn from_service(err: ServiceError) -> Self {
        Self::Failed {
            class: err.class(),
            message: err.message,
        }
    }

    fn from_stream(err: StreamError) -> Self {
        let class = err.class();
        let message = match err {
            StreamError::Refusal { explanation } => explanation,
            StreamError::Remote(e) | StreamError::Transport(e) => e.message,
            other => other.to_string(),
        };
        Self::Failed { class, message }
    }

    fn timeout(message: String) -> Self {
        Self::Failed {
            class: ErrorClass::Timeout,
            message,
        }
    }
}

/// Runs modification requests against a [`ModificationService`]
#[derive(Debug)]
pub struct RequestCoordinator {
    config: RequestConfig,
    streaming: bool,
    shared: Arc<Mutex<Shared>>,
    notifier: Notifier,
}

impl RequestCoordinator {
    /// Create coordinator
    #[must_use]
    pub fn new(config: RequestConfig, streaming: bool, notifier: Notifier) -> Self {
        Self {
            config,
            streaming,
            shared: Arc::new(Mutex::new(Shared::default())),
            notifier,
        }
    }

    /// Current request state
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.shared.lock().state
    }

    /// Automatic retries used by the current submission
    #[must_use]
    pub fn auto_retries(&self) -> u32 {
        self.shared.lock().auto_retries
    }

    /// Claim the coordinator for a new submission
    ///
    /// Returns `None` without side effects while another submission is active.
    /// A new submission starts with a fresh auto-retry counter.
    #[must_use]
    pub fn try_begin(&self) -> Option<Flight> {
        let mut shared = self.shared.lock();
        if shared.state.is_active() {
            debug!("Rejecting submission while {:?}", shared.state);
            return None;
        }

        let token = CancellationToken::new();
        shared.generation += 1;
        shared.state = RequestState::InFlight;
        shared.auto_retries = 0;
        shared.cancel = Some(token.clone());

        Some(Flight {
            shared: Arc::clone(&self.shared),
            token,
            generation: shared.generation,
            done: false,
        })
    }

    /// Cancel the active submission
    ///
    /// Returns whether there was one to cancel.
    pub fn cancel(&self) -> bool {
        let shared = self.shared.lock();
        match &shared.cancel {
            Some(token) if shared.state.is_active() => {
                info!("Cancelling active modification");
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Drive `flight` to completion with retries
    ///
    /// # Errors
    /// Returns [`ModifyError`] for non-retryable failures and when automatic
    /// retries are exhausted. User cancellation is not an error.
    pub async fn run(
        &self,
        flight: Flight,
        service: &dyn ModificationService,
        mut request: ModifyRequest,
    ) -> Result<RunOutcome, ModifyError> {
        let token = flight.token().clone();
        let mut attempts = 0;

        loop {
            attempts += 1;
            flight.set_state(RequestState::InFlight);
            debug!("Modification attempt {} for session {}", attempts, request.session_id);

            let (class, message) = match self.attempt(service, &request, &token).await {
                Ok(modification) => {
                    self.shared.lock().auto_retries = 0;
                    flight.finish(RequestState::Succeeded);
                    info!("Modification succeeded after {} attempt(s)", attempts);
                    return Ok(RunOutcome::Completed {
                        modification,
                        session_id: request.session_id,
                        attempts,
                    });
                }
                Err(Failure::Cancelled) => return Ok(self.cancelled(flight, attempts)),
                Err(Failure::Failed { class, message }) => (class, message),
            };

            let Some(retry) = self.claim_retry(class) else {
                error!(
                    "Modification failed ({}) after {} attempt(s): {}",
                    class, attempts, message
                );
                flight.finish(RequestState::Failed);
                return Err(ModifyError::new(class, message, attempts));
            };

            let delay = self.config.backoff(retry);
            warn!(
                "Attempt {} failed ({}): {}; retry {} in {:?}",
                attempts, class, message, retry, delay
            );
            flight.set_state(RequestState::Retrying);
            self.notifier.send(SessionNotice::RetryScheduled {
                attempt: retry,
                delay,
                class,
            });

            let cancelled = tokio::select! {
                biased;
                () = token.cancelled() => true,
                () = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                return Ok(self.cancelled(flight, attempts));
            }

            if class == ErrorClass::Session {
                let refreshed = tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    result = service.refresh_session(&request.session_id) => Some(result),
                };
                match refreshed {
                    None => return Ok(self.cancelled(flight, attempts)),
                    Some(Ok(session_id)) => {
                        info!("Session refreshed: {} -> {}", request.session_id, session_id);
                        self.notifier.send(SessionNotice::SessionRefreshed {
                            session_id: session_id.clone(),
                        });
                        request.session_id = session_id;
                    }
                    Some(Err(e)) => warn!("Session refresh failed, retrying anyway: {}", e),
                }
            }
        }
    }

    fn claim_retry(&self, class: ErrorClass) -> Option<u32> {
        if !class.is_retryable() {
            return None;
        }
        let mut shared = self.shared.lock();
        if shared.auto_retries >= self.config.max_auto_retries {
            return None;
        }
        shared.auto_retries += 1;
        Some(shared.auto_retries)
    }

    fn cancelled(&self, flight: Flight, attempts: u32) -> RunOutcome {
        info!("Modification cancelled after {} attempt(s)", attempts);
        flight.finish(RequestState::Cancelled);
        self.notifier.send(SessionNotice::Cancelled);
        RunOutcome::Cancelled { attempts }
    }

    async fn attempt(
        &self,
        service: &dyn ModificationService,
        request: &ModifyRequest,
        parent: &CancellationToken,
    ) -> Result<DecodedModification, Failure> {
        let started = Instant::now();
        let token = parent.child_token();

        let work = self.drive(service, request, &token);
        tokio::pin!(work);
        let ceiling = tokio::time::sleep(self.config.ceiling());
        tokio::pin!(ceiling);
        let warning = tokio::time::sleep(self.config.warning_after());
        tokio::pin!(warning);

        let mut ceiling_hit = false;
        let mut warned = false;
        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                () = &mut ceiling, if !ceiling_hit => {
                    ceiling_hit = true;
                    warn!("Attempt reached the {:?} ceiling, aborting", self.config.ceiling());
                    token.cancel();
                }
                () = &mut warning, if !warned => {
                    warned = true;
                    let elapsed = started.elapsed();
                    info!("Modification still running after {:?}", elapsed);
                    self.notifier.send(SessionNotice::SlowResponse { elapsed });
                }
            }
        };

        match result {
            Err(Failure::Cancelled) => Err(self.classify_abort(started.elapsed())),
            other => other,
        }
    }

    /// User cancel when well below the ceiling, timeout otherwise
    fn classify_abort(&self, elapsed: Duration) -> Failure {
        let threshold = self.config.ceiling().saturating_sub(self.config.cancel_margin());
        if elapsed < threshold {
            Failure::Cancelled
        } else {
            Failure::timeout(format!(
                "Request exceeded the {}s limit",
                self.config.ceiling_secs
            ))
        }
    }

    async fn drive(
        &self,
        service: &dyn ModificationService,
        request: &ModifyRequest,
        token: &CancellationToken,
    ) -> Result<DecodedModification, Failure> {
        if !self.streaming {
            return Self::drive_blocking(service, request, token).await;
        }

        let activity = self.config.activity_timeout();
        let silence = || {
            Failure::timeout(format!("No data received for {}s", activity.as_secs()))
        };

        let opened = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Failure::Cancelled),
            opened = tokio::time::timeout(activity, service.modify_stream(request)) => opened,
        };
        let mut events = opened.map_err(|_| silence())?.map_err(Failure::from_service)?;

        let mut decoder = StreamDecoder::new();
        while !decoder.is_finished() {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => return Err(Failure::Cancelled),
                next = tokio::time::timeout(activity, events.next()) => next,
            };

            let event = match next {
                Err(_) => return Err(silence()),
                Ok(None) => break,
                Ok(Some(event)) => event.map_err(Failure::from_stream)?,
            };

            match decoder.feed(event).map_err(Failure::from_stream)? {
                Progress::Started { model } => {
                    debug!("Stream started (model {:?})", model);
                    self.notifier.send(SessionNotice::Started { model });
                }
                Progress::Received { chars } => {
                    self.notifier.send(SessionNotice::Progress { chars });
                }
                Progress::Regions(regions) => debug!("Service reported regions {:?}", regions),
                Progress::KeepAlive | Progress::Finished | Progress::Ignored => {}
            }
        }

        decoder.finish().map_err(Failure::from_stream)
    }

    async fn drive_blocking(
        service: &dyn ModificationService,
        request: &ModifyRequest,
        token: &CancellationToken,
    ) -> Result<DecodedModification, Failure> {
        let response = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Failure::Cancelled),
            response = service.modify(request) => response.map_err(Failure::from_service)?,
        };

        if let Some(explanation) = detect_refusal(&response.content) {
            return Err(Failure::from_stream(StreamError::Refusal { explanation }));
        }

        Ok(DecodedModification {
            content: response.content,
            changed_regions: response.changed_regions,
            model: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> RequestCoordinator {
        RequestCoordinator::new(RequestConfig::default(), true, Notifier::new())
    }

    #[test]
    fn single_flight() {
        let coordinator = coordinator();
        let flight = coordinator.try_begin().unwrap();
        assert_eq!(coordinator.state(), RequestState::InFlight);
        assert!(coordinator.try_begin().is_none());

        flight.finish(RequestState::Succeeded);
        assert_eq!(coordinator.state(), RequestState::Succeeded);
        assert!(coordinator.try_begin().is_some());
    }

    #[test]
    fn dropped_flight_is_cancelled() {
        let coordinator = coordinator();
        let flight = coordinator.try_begin().unwrap();
        let token = flight.token().clone();
        drop(flight);

        assert!(token.is_cancelled());
        assert_eq!(coordinator.state(), RequestState::Cancelled);
        assert!(!coordinator.cancel());
    }

    #[test]
    fn cancel_fires_active_token() {
        let coordinator = coordinator();
        assert!(!coordinator.cancel());

        let flight = coordinator.try_begin().unwrap();
        assert!(coordinator.cancel());
        assert!(flight.token().is_cancelled());
    }

    #[test]
    fn abort_classification_uses_margin() {
        let coordinator = coordinator();
        assert!(matches!(
            coordinator.classify_abort(Duration::from_secs(5)),
            Failure::Cancelled
        ));
        assert!(matches!(
            coordinator.classify_abort(Duration::from_millis(87_999)),
            Failure::Cancelled
        ));
        assert!(matches!(
            coordinator.classify_abort(Duration::from_secs(88)),
            Failure::Failed {
                class: ErrorClass::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn retry_budget_is_per_submission() {
        let coordinator = coordinator();
        let flight = coordinator.try_begin().unwrap();
        assert_eq!(coordinator.claim_retry(ErrorClass::Server), Some(1));
        assert_eq!(coordinator.claim_retry(ErrorClass::Network), Some(2));
        assert_eq!(coordinator.claim_retry(ErrorClass::Network), None);
        assert_eq!(coordinator.claim_retry(ErrorClass::Guardrail), None);
        flight.finish(RequestState::Failed);

        let _next = coordinator.try_begin().unwrap();
        assert_eq!(coordinator.auto_retries(), 0);
    }
}
