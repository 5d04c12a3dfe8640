//! Concurrent grading orchestrator.
//!
//! The orchestrator drives one session per job:
//! - Pre-flight: validate the provider config and make one connection test
//! - Fan-out: one task per student, bounded by a semaphore
//! - Per call: timeout, then retry with backoff for transient errors
//! - Fan-in: normalize each response and write it into its slot
//!
//! Per-student failures are recorded on the slot and never abort the batch.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use gradeflow_core::{normalize, GradeResult, GradingReport, GradingRequest, ReviewEdit};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, RuntimeConfig, Settings};
use crate::job::GradingJob;
use crate::providers::{
    GradingProvider, ProviderConfig, ProviderError, ProviderRegistry, TokenUsage,
};
use crate::resilience::RetryPolicy;
use crate::session::{GradingSession, ProgressSnapshot, SessionError, SessionStore};

/// Errors from the orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("grading task failed: {0}")]
    TaskFailed(String),
}

/// Runs grading jobs against one provider.
///
/// Cloning is cheap; clones share the provider, config and session store.
#[derive(Clone)]
pub struct GradingOrchestrator {
    provider: Arc<dyn GradingProvider>,
    provider_config: Arc<ProviderConfig>,
    config: RuntimeConfig,
    retry: RetryPolicy,
    store: SessionStore,
}

impl GradingOrchestrator {
    pub fn builder() -> GradingOrchestratorBuilder {
        GradingOrchestratorBuilder::new()
    }

    /// Orchestrator for the active provider in `settings`.
    pub fn from_settings(
        settings: &Settings,
        registry: &ProviderRegistry,
    ) -> Result<Self, OrchestratorError> {
        let provider_config = settings.active_provider_config()?;
        let provider = registry.create(&provider_config)?;
        GradingOrchestratorBuilder::new()
            .provider(provider)
            .provider_config(provider_config)
            .runtime_config(settings.runtime.clone())
            .build()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn provider_config(&self) -> &ProviderConfig {
        &self.provider_config
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Validate the provider config, then make one connection test.
    ///
    /// No grading call is made.
    pub async fn preflight(&self) -> Result<(), ConfigError> {
        self.provider_config.validate()?;

        let timeout = self.provider_config.timeout;
        match tokio::time::timeout(timeout, self.provider.test_connection(&self.provider_config))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConfigError::from_preflight(e)),
            Err(_) => Err(ConfigError::Unreachable(format!(
                "connection test timed out after {}",
                humantime::format_duration(timeout)
            ))),
        }
    }

    /// Start a job in the background.
    ///
    /// The session is registered in the store before this returns, so its
    /// status can be polled right away.
    pub async fn submit(&self, job: GradingJob) -> JobHandle {
        let session = Arc::new(GradingSession::create(self.provider.name(), job));
        self.store.insert(Arc::clone(&session)).await;

        let this = self.clone();
        let task_session = Arc::clone(&session);
        let task = tokio::spawn(async move { this.execute(task_session).await });

        JobHandle { session, task }
    }

    /// Run a job to the end.
    ///
    /// Returns the session whatever its final status; pre-flight faults
    /// show up as status `error` on the session.
    pub async fn run(&self, job: GradingJob) -> Result<Arc<GradingSession>, OrchestratorError> {
        self.submit(job).await.wait().await
    }

    /// Request cancellation of a session. Returns `false` if it already ended.
    pub async fn cancel(&self, session_id: &str) -> Result<bool, OrchestratorError> {
        let session = self.store.get(session_id).await?;
        let cancelled = session.cancel();
        if cancelled {
            info!(session = %session_id, "Cancellation requested");
        }
        Ok(cancelled)
    }

    pub async fn status(&self, session_id: &str) -> Result<ProgressSnapshot, OrchestratorError> {
        Ok(self.store.current_status(session_id).await?)
    }

    /// Grade one student again, once the run has ended.
    ///
    /// The grading runs on its own task, so dropping the returned future
    /// does not abandon the slot: the previous result stays visible until
    /// the new one is written.
    pub async fn regrade_student(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<GradeResult, OrchestratorError> {
        let session = self.store.get(session_id).await?;
        let (index, request) = session.reopen_slot(student_id)?;
        info!(session = %session_id, student = %student_id, "Regrading student");

        let this = self.clone();
        let slot_session = Arc::clone(&session);
        let task = tokio::spawn(async move {
            let (result, usage) = this.grade_request(&request, || true).await;
            slot_session.record_usage(usage);
            slot_session.complete_slot(index, result.clone());
            result
        });

        match task.await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(session = %session_id, student = %student_id, error = %e, "Regrade task aborted");
                session.abandon_slot(index);
                Err(OrchestratorError::TaskFailed(e.to_string()))
            }
        }
    }

    /// Apply a reviewer edit to a finished session.
    pub async fn apply_review(
        &self,
        session_id: &str,
        student_id: &str,
        edit: &ReviewEdit,
    ) -> Result<GradeResult, OrchestratorError> {
        let session = self.store.get(session_id).await?;
        let result = session.apply_review(student_id, edit)?;
        info!(session = %session_id, student = %student_id, score = ?result.score, "Review applied");
        Ok(result)
    }

    /// Ordered results and summary for the exporter.
    pub async fn report(&self, session_id: &str) -> Result<GradingReport, OrchestratorError> {
        Ok(self.store.get(session_id).await?.report())
    }

    async fn execute(&self, session: Arc<GradingSession>) {
        if let Err(e) = self.preflight().await {
            warn!(session = %session.id(), error = %e, "Pre-flight failed");
            session.fail_preflight(e.to_string());
            return;
        }

        if let Err(e) = session.start() {
            warn!(session = %session.id(), error = %e, "Session not started");
            return;
        }

        info!(
            session = %session.id(),
            provider = %self.provider.name(),
            model = %self.provider_config.model,
            students = session.total(),
            concurrency = self.config.concurrency,
            "Grading started"
        );

        self.dispatch(&session).await;
        session.finish();

        let snapshot = session.snapshot();
        info!(
            session = %session.id(),
            status = %snapshot.status,
            completed = snapshot.completed,
            failed = snapshot.failed,
            needs_review = snapshot.needs_review,
            tokens = snapshot.usage.total(),
            "Grading finished"
        );
    }

    async fn dispatch(&self, session: &Arc<GradingSession>) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = Vec::with_capacity(session.total());

        for index in 0..session.total() {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let Some(request) = session.begin_slot(index) else {
                if session.is_cancelled() {
                    debug!(session = %session.id(), dispatched = index, "Dispatch stopped");
                    break;
                }
                continue;
            };

            let this = self.clone();
            let slot_session = Arc::clone(session);
            let task = tokio::spawn(async move {
                let _permit = permit;
                let keep_going = || !slot_session.is_cancelled();
                let (result, usage) = this.grade_request(&request, keep_going).await;
                slot_session.record_usage(usage);
                slot_session.complete_slot(index, result);
            });
            tasks.push((index, task));
        }

        let (indices, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        for (index, joined) in indices.into_iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                warn!(session = %session.id(), slot = index, error = %e, "Grading task aborted");
                if let Some(request) = session.job().request(index) {
                    let cause = format!("grading task failed: {}", e);
                    session.complete_slot(
                        index,
                        GradeResult::failed(&request, cause, self.provider.name()),
                    );
                }
            }
        }
    }

    /// Grade one request with timeout and retries. Never fails; errors
    /// become a `failed` result.
    async fn grade_request<K>(&self, request: &GradingRequest, keep_going: K) -> (GradeResult, TokenUsage)
    where
        K: FnMut() -> bool + Send,
    {
        let student = request.student.id.as_str();
        let provider = &self.provider;
        let config = self.provider_config.as_ref();
        let timeout = config.timeout;
        let attempts = AtomicU32::new(0);
        let counter = &attempts;

        let outcome = self
            .retry
            .run(
                || async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!(student, attempt, "Calling provider");
                    match tokio::time::timeout(timeout, provider.grade(request, config)).await {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Timeout(timeout)),
                    }
                },
                keep_going,
                |e: &ProviderError, delay| {
                    warn!(
                        student,
                        attempt = counter.load(Ordering::SeqCst),
                        error = %e,
                        delay = ?delay,
                        "Transient provider error, retrying"
                    );
                },
            )
            .await;

        let attempts = attempts.load(Ordering::SeqCst);
        let name = self.provider.name();
        match outcome {
            Ok(raw) => {
                debug!(student, bytes = raw.text.len(), "Response received");
                let normalized = normalize(&raw.text, request.max_score());
                match &normalized.issue {
                    Some(issue) => warn!(student, cause = %issue, "Response needs review"),
                    None => info!(student, score = ?normalized.score, attempts, "Graded"),
                }
                let result =
                    GradeResult::from_normalized(request, normalized, raw.text, name).with_attempts(attempts);
                (result, raw.usage)
            }
            Err(e) => {
                warn!(student, attempts, error = %e, "Grading failed");
                let result = GradeResult::failed(request, e.to_string(), name).with_attempts(attempts);
                (result, TokenUsage::default())
            }
        }
    }
}

impl std::fmt::Debug for GradingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GradingOrchestrator")
            .field("provider", &self.provider.name())
            .field("provider_config", &self.provider_config)
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish()
    }
}

/// A running job.
#[derive(Debug)]
pub struct JobHandle {
    session: Arc<GradingSession>,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        self.session.id()
    }

    pub fn session(&self) -> &Arc<GradingSession> {
        &self.session
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.session.snapshot()
    }

    /// Stop dispatching; in-flight calls finish and write their slots.
    pub fn cancel(&self) -> bool {
        self.session.cancel()
    }

    /// Wait for the job to end.
    pub async fn wait(self) -> Result<Arc<GradingSession>, OrchestratorError> {
        self.task
            .await
            .map_err(|e| OrchestratorError::TaskFailed(e.to_string()))?;
        Ok(self.session)
    }
}

/// Builder for [`GradingOrchestrator`].
pub struct GradingOrchestratorBuilder {
    provider: Option<Arc<dyn GradingProvider>>,
    provider_config: Option<ProviderConfig>,
    config: RuntimeConfig,
    store: Option<SessionStore>,
}

impl GradingOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            provider_config: None,
            config: RuntimeConfig::default(),
            store: None,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn GradingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn provider_config(mut self, config: ProviderConfig) -> Self {
        self.provider_config = Some(config);
        self
    }

    pub fn runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing store instead of creating one.
    pub fn store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<GradingOrchestrator, OrchestratorError> {
        let provider = self
            .provider
            .ok_or_else(|| OrchestratorError::ProviderNotConfigured("No provider set".to_string()))?;
        let provider_config = self.provider_config.ok_or_else(|| {
            OrchestratorError::ProviderNotConfigured("No provider config set".to_string())
        })?;
        self.config.validate()?;

        let retry = RetryPolicy::new(&self.config.retry, provider_config.max_retries);
        let store = self
            .store
            .unwrap_or_else(|| SessionStore::from_config(&self.config));

        Ok(GradingOrchestrator {
            provider,
            provider_config: Arc::new(provider_config),
            config: self.config,
            retry,
            store,
        })
    }
}

impl Default for GradingOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
