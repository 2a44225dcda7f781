//! Background validation polling after successful edits

use crate::config::ValidationConfig;
use crate::notice::{Notifier, SessionNotice, ValidationNotice};
use crate::service::ModificationService;
use glyph_history::SessionId;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Run {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polls the service's validation status on its own task
///
/// The poller only publishes notices; it never touches the document.
pub struct ValidationPoller {
    config: ValidationConfig,
    service: Arc<dyn ModificationService>,
    notifier: Notifier,
    current: Mutex<Option<Run>>,
}

impl std::fmt::Debug for ValidationPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationPoller")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ValidationPoller {
    /// Create idle poller
    #[must_use]
    pub fn new(
        config: ValidationConfig,
        service: Arc<dyn ModificationService>,
        notifier: Notifier,
    ) -> Self {
        Self {
            config,
            service,
            notifier,
            current: Mutex::new(None),
        }
    }

    /// Start polling `session_id`, replacing any previous run
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, session_id: SessionId) {
        let token = CancellationToken::new();
        let handle = tokio::spawn(poll(
            self.config,
            Arc::clone(&self.service),
            self.notifier.clone(),
            session_id,
            token.clone(),
        ));

        if let Some(previous) = self.current.lock().replace(Run { token, handle }) {
            debug!("Replacing previous validation run");
            previous.token.cancel();
        }
    }

    /// Stop polling; safe to call at any time
    pub fn stop(&self) {
        if let Some(run) = self.current.lock().take() {
            debug!("Stopping validation polling");
            run.token.cancel();
        }
    }

    /// Whether a run is still polling
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }
}

impl Drop for ValidationPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll(
    config: ValidationConfig,
    service: Arc<dyn ModificationService>,
    notifier: Notifier,
    session_id: SessionId,
    token: CancellationToken,
) {
    let interval = config.poll_interval();

    for attempt in 1..=config.max_attempts {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }

        let status = tokio::select! {
            biased;
            () = token.cancelled() => return,
            status = service.validation_status(&session_id) => status,
        };

        match status {
            Ok(Some(report)) if report.critical_count > 0 => {
                info!(
                    "Validation found {} critical issue(s) for {}",
                    report.critical_count, session_id
                );
                notifier.send(SessionNotice::Validation(ValidationNotice::IssuesFound(report)));
                return;
            }
            Ok(Some(report)) => {
                info!("Validation passed for {} with {} warning(s)", session_id, report.warning_count);
                notifier.send(SessionNotice::Validation(ValidationNotice::Passed {
                    warnings: report.warning_count,
                }));
                return;
            }
            Ok(None) => debug!("Validation pending ({}/{})", attempt, config.max_attempts),
            Err(e) => warn!("Validation poll {} failed: {}", attempt, e),
        }
    }

    info!("Validation still running after {} polls", config.max_attempts);
    notifier.send(SessionNotice::Validation(ValidationNotice::StillVerifying));
}
