//! The modification session controller
//!
//! A [`ModificationSession`] owns every piece of per-document state: timeline,
//! diff capture, saved versions and action memory all live behind one lock, and
//! the visible document is always the timeline's current snapshot. The lock is
//! never held across an `.await`.

use crate::config::SessionConfig;
use crate::coordinator::{RequestCoordinator, RequestState, RunOutcome};
use crate::error::{ErrorClass, ModifyError, SessionError};
use crate::notice::{Notifier, SessionNotice};
use crate::poller::ValidationPoller;
use crate::service::{ModificationService, ModifyRequest};
use glyph_actions::InstantActionEngine;
use glyph_history::{
    DiffTracker, DocumentSnapshot, FileStore, HistoryEntry, HistoryManager, MarkerRegions,
    RecentActions, RegionSource, SavedVersion, SavedVersions, Storage,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

const FIRST_SUCCESS_FLAG: &str = "first_success_shown";
const AUTO_FIX_PROMPT: &str = "Auto-fix validation issues";
const SUGGESTION_LIMIT: usize = 3;

/// How a submission ended, when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Applied locally by an instant action
    Instant {
        /// Rule that fired
        rule: &'static str,
        /// New document content
        content: String,
    },
    /// Applied from the remote service
    Modified {
        /// New document content
        content: String,
        /// Regions that differ from the previous document
        changed_regions: BTreeSet<String>,
        /// Network attempts made
        attempts: u32,
    },
    /// Rejected because another modification is in flight
    Busy,
    /// Cancelled by the user; nothing changed
    Cancelled,
}

struct SessionState {
    history: HistoryManager,
    diff: DiffTracker,
    versions: SavedVersions,
    recent: RecentActions,
    last_failed: Option<String>,
}

/// Builder for [`ModificationSession`]
pub struct SessionBuilder {
    initial: DocumentSnapshot,
    service: Arc<dyn ModificationService>,
    config: SessionConfig,
    storage: Option<Arc<Storage>>,
    regions: Box<dyn RegionSource>,
    engine: InstantActionEngine,
}

impl SessionBuilder {
    /// Use `config`
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `storage` instead of the one derived from the config
    #[must_use]
    pub fn storage(mut self, storage: Arc<Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use a renderer-provided region source
    #[must_use]
    pub fn region_source(mut self, regions: Box<dyn RegionSource>) -> Self {
        self.regions = regions;
        self
    }

    /// Use a custom instant action table
    #[must_use]
    pub fn engine(mut self, engine: InstantActionEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Build the session
    #[must_use]
    pub fn build(self) -> ModificationSession {
        let Self {
            initial,
            service,
            config,
            storage,
            regions,
            engine,
        } = self;

        let storage = storage.unwrap_or_else(|| {
            Arc::new(match &config.storage_dir {
                Some(dir) => Storage::new(Arc::new(FileStore::new(dir))),
                None => Storage::in_memory(),
            })
        });

        let notifier = Notifier::new();
        let history = HistoryManager::with_limits(
            initial,
            config.history.undo_limit,
            config.history.redo_limit,
        );

        ModificationSession {
            coordinator: RequestCoordinator::new(
                config.request,
                config.streaming,
                notifier.clone(),
            ),
            poller: ValidationPoller::new(config.validation, Arc::clone(&service), notifier.clone()),
            state: Mutex::new(SessionState {
                history,
                diff: DiffTracker::new(regions),
                versions: SavedVersions::load_with_limit(
                    Arc::clone(&storage),
                    config.history.version_limit,
                ),
                recent: RecentActions::load(Arc::clone(&storage)),
                last_failed: None,
            }),
            service,
            engine,
            storage,
            notifier,
            config,
        }
    }
}

/// Interactive editing session for one document
pub struct ModificationSession {
    config: SessionConfig,
    service: Arc<dyn ModificationService>,
    engine: InstantActionEngine,
    coordinator: RequestCoordinator,
    poller: ValidationPoller,
    storage: Arc<Storage>,
    notifier: Notifier,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for ModificationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModificationSession")
            .field("session_id", &self.document().session_id)
            .field("request_state", &self.request_state())
            .finish_non_exhaustive()
    }
}

impl ModificationSession {
    /// Start building a session around `initial`
    #[must_use]
    pub fn builder(
        initial: DocumentSnapshot,
        service: Arc<dyn ModificationService>,
    ) -> SessionBuilder {
        SessionBuilder {
            initial,
            service,
            config: SessionConfig::default(),
            storage: None,
            regions: Box::new(MarkerRegions),
            engine: InstantActionEngine::new(),
        }
    }

    /// Session with default settings
    #[must_use]
    pub fn new(initial: DocumentSnapshot, service: Arc<dyn ModificationService>) -> Self {
        Self::builder(initial, service).build()
    }

    /// Apply a natural-language instruction
    ///
    /// Instant actions are applied locally; everything else goes to the
    /// service. While a modification is in flight further submissions return
    /// [`SubmitOutcome::Busy`] and change nothing.
    ///
    /// # Errors
    /// Returns [`ModifyError`] when the instruction failed. The document and
    /// history are then exactly as before the call.
    pub async fn submit(&self, prompt: &str) -> Result<SubmitOutcome, ModifyError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ModifyError::new(
                ErrorClass::Impossible,
                "Describe the change you want to make",
                0,
            ));
        }

        if let Some(outcome) = self.try_instant(prompt) {
            return Ok(outcome);
        }

        let Some(flight) = self.coordinator.try_begin() else {
            debug!("Modification in flight, ignoring '{}'", prompt);
            return Ok(SubmitOutcome::Busy);
        };
        self.poller.stop();

        let (request, pending, attempt) = {
            let mut state = self.state.lock();
            let current = state.history.current_snapshot().clone();
            let pending = state.history.begin_pending(prompt);
            let attempt = state.diff.capture_before(&current.content);
            let request = ModifyRequest::new(current.session_id, prompt, current.content);
            (request, pending, attempt)
        };
        info!("Submitting '{}' to the modification service", prompt);

        match self.coordinator.run(flight, self.service.as_ref(), request).await {
            Ok(RunOutcome::Completed {
                modification,
                session_id,
                attempts,
            }) => {
                let changed_regions = {
                    let mut state = self.state.lock();
                    let mut snapshot = state
                        .history
                        .current_snapshot()
                        .with_content(modification.content.clone());
                    snapshot.session_id = session_id.clone();

                    if state.history.commit_pending(pending, snapshot.clone()).is_none() {
                        warn!("Optimistic entry lost, committing directly");
                        state.history.commit(prompt, snapshot);
                    }
                    state.diff.hint(modification.changed_regions);
                    state.diff.capture_after(attempt, &modification.content);
                    state.recent.record(prompt, None);
                    state.last_failed = None;
                    state.diff.changed_regions()
                };

                if self.config.validation.enabled {
                    self.poller.start(session_id);
                }
                self.after_success();

                Ok(SubmitOutcome::Modified {
                    content: modification.content,
                    changed_regions,
                    attempts,
                })
            }
            Ok(RunOutcome::Cancelled { .. }) => {
                self.roll_back(pending, None);
                Ok(SubmitOutcome::Cancelled)
            }
            Err(err) => {
                self.roll_back(pending, Some(prompt));
                Err(self.report_failure(err))
            }
        }
    }

    /// Attach suggestions and publish the failure notices
    fn report_failure(&self, err: ModifyError) -> ModifyError {
        let err = if err.class.suggests_alternatives() {
            let suggestions = self.suggestions(SUGGESTION_LIMIT);
            err.with_suggestions(suggestions)
        } else {
            err
        };

        if err.class == ErrorClass::AiRefusal {
            self.notifier.send(SessionNotice::Warning {
                message: err.user_message(),
            });
        }
        self.notifier.send(SessionNotice::Failed {
            class: err.class,
            message: err.user_message(),
            suggestions: err.suggestions.clone(),
        });
        err
    }

    fn try_instant(&self, prompt: &str) -> Option<SubmitOutcome> {
        let edit = {
            let mut state = self.state.lock();
            if self.coordinator.state().is_active() {
                return None;
            }

            let current = state.history.current_snapshot().clone();
            let edit = self.engine.try_apply(prompt, &current.content)?;
            let attempt = state.diff.capture_before(&current.content);
            state.history.commit(prompt, current.with_content(edit.content.clone()));
            state.diff.capture_after(attempt, &edit.content);
            state.recent.record(prompt, Some(edit.rule));
            edit
        };

        info!("Applied instant action '{}'", edit.rule);
        self.after_success();
        Some(SubmitOutcome::Instant {
            rule: edit.rule,
            content: edit.content,
        })
    }

    fn roll_back(&self, pending: glyph_history::PendingToken, failed_prompt: Option<&str>) {
        let mut state = self.state.lock();
        if !state.history.rollback_pending(pending) {
            warn!("No optimistic entry to roll back");
        }
        state.diff.clear();
        if let Some(prompt) = failed_prompt {
            state.last_failed = Some(prompt.to_string());
        }
    }

    fn after_success(&self) {
        if self.storage.take_flag(FIRST_SUCCESS_FLAG) {
            self.notifier.send(SessionNotice::FirstSuccess);
        }
        self.flush_storage_warning();
    }

    fn flush_storage_warning(&self) {
        if let Some(message) = self.storage.take_warning() {
            self.notifier.send(SessionNotice::StorageDegraded {
                message: message.to_string(),
            });
        }
    }

    /// Cancel the in-flight modification
    ///
    /// Returns whether there was one.
    pub fn cancel(&self) -> bool {
        self.coordinator.cancel()
    }

    /// Resubmit the last failed instruction
    ///
    /// # Errors
    /// [`SessionError::NothingToRetry`] when nothing failed, otherwise the
    /// failure of the new attempt.
    pub async fn retry_last(&self) -> Result<SubmitOutcome, SessionError> {
        let prompt = self
            .state
            .lock()
            .last_failed
            .clone()
            .ok_or(SessionError::NothingToRetry)?;
        info!("Manually retrying '{}'", prompt);
        Ok(self.submit(&prompt).await?)
    }

    /// Step back one edit
    ///
    /// # Errors
    /// [`SessionError::Busy`] during a modification, otherwise
    /// [`SessionError::NothingToUndo`] at the oldest entry.
    pub fn undo(&self) -> Result<DocumentSnapshot, SessionError> {
        let mut state = self.state.lock();
        if self.coordinator.state().is_active() {
            return Err(SessionError::Busy);
        }
        let snapshot = state.history.undo().ok_or(SessionError::NothingToUndo)?;
        state.diff.clear();
        Ok(snapshot)
    }

    /// Step forward one edit
    ///
    /// # Errors
    /// [`SessionError::Busy`] during a modification, otherwise
    /// [`SessionError::NothingToRedo`] at the newest entry.
    pub fn redo(&self) -> Result<DocumentSnapshot, SessionError> {
        let mut state = self.state.lock();
        if self.coordinator.state().is_active() {
            return Err(SessionError::Busy);
        }
        let snapshot = state.history.redo().ok_or(SessionError::NothingToRedo)?;
        state.diff.clear();
        Ok(snapshot)
    }

    /// Save the visible document under `name`
    ///
    /// # Errors
    /// Fails for an empty name.
    pub fn save_version(&self, name: &str) -> Result<SavedVersion, SessionError> {
        let version = {
            let mut state = self.state.lock();
            let content = state.history.current_snapshot().content.clone();
            state.versions.save(name, &content)?
        };
        info!("Saved version '{}'", version.name);
        self.flush_storage_warning();
        Ok(version)
    }

    /// Make a saved version the visible document, as a new undoable edit
    ///
    /// # Errors
    /// Fails for an unknown version or during a modification.
    pub fn restore_version(&self, id: Uuid) -> Result<DocumentSnapshot, SessionError> {
        let mut state = self.state.lock();
        if self.coordinator.state().is_active() {
            return Err(SessionError::Busy);
        }
        let version = state
            .versions
            .get(id)
            .cloned()
            .ok_or_else(|| glyph_history::VersionError::NotFound(id.to_string()))?;

        let current = state.history.current_snapshot().clone();
        let attempt = state.diff.capture_before(&current.content);
        let snapshot = current.with_content(version.content);
        state.history.restore(&version.name, snapshot.clone());
        state.diff.capture_after(attempt, &snapshot.content);
        info!("Restored version '{}'", version.name);
        Ok(snapshot)
    }

    /// Delete a saved version
    ///
    /// # Errors
    /// Fails for an unknown version.
    pub fn delete_version(&self, id: Uuid) -> Result<SavedVersion, SessionError> {
        let version = self.state.lock().versions.delete(id)?;
        self.flush_storage_warning();
        Ok(version)
    }

    /// Saved versions, newest first
    #[must_use]
    pub fn versions(&self) -> Vec<SavedVersion> {
        self.state.lock().versions.list().to_vec()
    }

    /// Let the service fix its validation findings
    ///
    /// The result is committed as a normal undoable edit.
    ///
    /// # Errors
    /// Returns the service failure, also published as
    /// [`SessionNotice::Failed`]; the document is then unchanged.
    pub async fn apply_auto_fix(&self) -> Result<SubmitOutcome, SessionError> {
        let Some(flight) = self.coordinator.try_begin() else {
            return Ok(SubmitOutcome::Busy);
        };
        self.poller.stop();

        let (session_id, pending, attempt) = {
            let mut state = self.state.lock();
            let current = state.history.current_snapshot().clone();
            let pending = state.history.begin_pending(AUTO_FIX_PROMPT);
            let attempt = state.diff.capture_before(&current.content);
            (current.session_id, pending, attempt)
        };

        let token = flight.token().clone();
        let fixed = tokio::select! {
            biased;
            () = token.cancelled() => None,
            fixed = tokio::time::timeout(
                self.config.request.ceiling(),
                self.service.auto_fix(&session_id),
            ) => Some(fixed),
        };

        let content = match fixed {
            None => {
                flight.finish(RequestState::Cancelled);
                self.roll_back(pending, None);
                self.notifier.send(SessionNotice::Cancelled);
                return Ok(SubmitOutcome::Cancelled);
            }
            Some(Err(_)) => {
                flight.finish(RequestState::Failed);
                self.roll_back(pending, None);
                warn!("Auto-fix exceeded the request ceiling");
                let err = ModifyError::new(
                    ErrorClass::Timeout,
                    format!("Auto-fix exceeded the {}s limit", self.config.request.ceiling_secs),
                    1,
                );
                return Err(self.report_failure(err).into());
            }
            Some(Ok(Err(e))) => {
                flight.finish(RequestState::Failed);
                self.roll_back(pending, None);
                warn!("Auto-fix failed: {}", e);
                let err = ModifyError::new(e.class(), e.message, 1);
                return Err(self.report_failure(err).into());
            }
            Some(Ok(Ok(content))) => content,
        };

        let changed_regions = {
            let mut state = self.state.lock();
            let snapshot = state.history.current_snapshot().with_content(content.clone());
            if state.history.commit_pending(pending, snapshot.clone()).is_none() {
                state.history.commit(AUTO_FIX_PROMPT, snapshot);
            }
            state.diff.capture_after(attempt, &content);
            state.diff.changed_regions()
        };
        flight.finish(RequestState::Succeeded);
        info!("Applied auto-fix");

        if self.config.validation.enabled {
            self.poller.start(session_id);
        }
        Ok(SubmitOutcome::Modified {
            content,
            changed_regions,
            attempts: 1,
        })
    }

    /// The visible document
    #[must_use]
    pub fn document(&self) -> DocumentSnapshot {
        self.state.lock().history.current_snapshot().clone()
    }

    /// Timeline entries, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().history.entries().to_vec()
    }

    /// Whether undo is currently possible
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.state.lock().history.can_undo() && !self.coordinator.state().is_active()
    }

    /// Whether redo is currently possible
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.state.lock().history.can_redo() && !self.coordinator.state().is_active()
    }

    /// Regions changed by the last edit
    #[must_use]
    pub fn changed_regions(&self) -> BTreeSet<String> {
        self.state.lock().diff.changed_regions()
    }

    /// Current request state
    #[must_use]
    pub fn request_state(&self) -> RequestState {
        self.coordinator.state()
    }

    /// Instant action prompts ranked by the user's own usage
    #[must_use]
    pub fn suggestions(&self, limit: usize) -> Vec<String> {
        let catalog: Vec<(&str, &str)> = self
            .engine
            .rules()
            .iter()
            .map(|rule| (rule.name, rule.example))
            .collect();
        self.state.lock().recent.ranked(&catalog, limit)
    }

    /// Last instruction that failed, if any
    #[must_use]
    pub fn last_failed(&self) -> Option<String> {
        self.state.lock().last_failed.clone()
    }

    /// Whether validation polling is running
    #[must_use]
    pub fn is_validating(&self) -> bool {
        self.poller.is_running()
    }

    /// Stop validation polling
    pub fn stop_validation(&self) {
        self.poller.stop();
    }

    /// Subscribe to advisory notices
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notifier.subscribe()
    }
}
