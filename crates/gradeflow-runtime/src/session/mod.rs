//! Grading session state.
//!
//! A session owns one slot per student, pre-allocated in roster order.
//! Slot writes and the aggregate counters change together under one lock,
//! so every [`ProgressSnapshot`] satisfies
//! `completed + failed + pending == total`.
//!
//! A slot reopened for regrading keeps its previous result, and that result
//! stays counted and visible until the new one is written.

mod store;

pub use store::SessionStore;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gradeflow_core::{
    FeedbackStyle, GradeResult, GradeStatus, GradingMode, GradingReport, GradingRequest,
    ReviewEdit, ReviewError, Rubric, Student,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::GradingJob;
use crate::providers::TokenUsage;

/// Session lifecycle.
///
/// `queued -> running -> completed | cancelled`, or `queued -> error` when
/// pre-flight fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Queued,
    Running,
    Completed,
    Cancelled,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Queued => "queued",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Error => "error",
        }
    }

    /// Whether the session can no longer change on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Error
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from session queries and edits.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("no result for student '{student_id}'")]
    ResultNotFound { student_id: String },

    #[error("session is {status}; cannot {action}")]
    InvalidState {
        status: SessionStatus,
        action: &'static str,
    },

    #[error("student '{0}' is being graded")]
    SlotBusy(String),

    #[error("review rejected: {0}")]
    Review(#[from] ReviewError),

    #[error("invalid session snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Failed to encode session snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Point-in-time view of a session's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    pub total: usize,

    /// Terminal, non-failed slots (`needs_review` included)
    pub completed: usize,
    pub failed: usize,

    /// Subset of `completed` awaiting a human decision
    pub needs_review: usize,

    /// Subset of `pending` currently being graded
    pub in_flight: usize,
    pub pending: usize,

    pub error: Option<String>,
    pub usage: TokenUsage,
}

impl ProgressSnapshot {
    /// Share of slots that reached a terminal state, from 0 to 100.
    pub fn percent_done(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.completed + self.failed) as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone)]
enum SlotState {
    Pending,
    InFlight,
    Done(Box<GradeResult>),

    /// Being graded again; holds the result it replaces
    Regrading(Box<GradeResult>),
}

impl SlotState {
    /// Result readers see for this slot.
    fn visible(&self) -> Option<&GradeResult> {
        match self {
            SlotState::Done(result) | SlotState::Regrading(result) => Some(result.as_ref()),
            SlotState::Pending | SlotState::InFlight => None,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    slots: Vec<SlotState>,
    completed: usize,
    needs_review: usize,
    failed: usize,
    in_flight: usize,
    error: Option<String>,
    usage: TokenUsage,
    finished_at: Option<DateTime<Utc>>,
}

impl SessionState {
    fn count(&mut self, status: GradeStatus) {
        match status {
            GradeStatus::Failed => self.failed += 1,
            GradeStatus::NeedsReview => {
                self.completed += 1;
                self.needs_review += 1;
            }
            GradeStatus::Success => self.completed += 1,
        }
    }

    fn uncount(&mut self, status: GradeStatus) {
        match status {
            GradeStatus::Failed => self.failed -= 1,
            GradeStatus::NeedsReview => {
                self.completed -= 1;
                self.needs_review -= 1;
            }
            GradeStatus::Success => self.completed -= 1,
        }
    }
}

/// One grading run over a roster.
#[derive(Debug)]
pub struct GradingSession {
    id: String,
    provider: String,
    created_at: DateTime<Utc>,
    job: GradingJob,
    cancelled: AtomicBool,
    state: Mutex<SessionState>,
}

impl GradingSession {
    /// New queued session with every slot pending.
    pub fn new(id: impl Into<String>, provider: impl Into<String>, job: GradingJob) -> Self {
        let slots = vec![SlotState::Pending; job.len()];
        Self {
            id: id.into(),
            provider: provider.into(),
            created_at: Utc::now(),
            job,
            cancelled: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                status: SessionStatus::Queued,
                slots,
                completed: 0,
                needs_review: 0,
                failed: 0,
                in_flight: 0,
                error: None,
                usage: TokenUsage::default(),
                finished_at: None,
            }),
        }
    }

    /// New session with a random id.
    pub fn create(provider: impl Into<String>, job: GradingJob) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), provider, job)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn job(&self) -> &GradingJob {
        &self.job
    }

    /// Slot count; fixed for the session's lifetime.
    pub fn total(&self) -> usize {
        self.job.len()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `queued -> running`.
    pub fn start(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if state.status != SessionStatus::Queued {
            return Err(SessionError::InvalidState {
                status: state.status,
                action: "start",
            });
        }
        state.status = SessionStatus::Running;
        Ok(())
    }

    /// `queued -> error`. No slot is touched.
    pub fn fail_preflight(&self, message: impl Into<String>) {
        let mut state = self.state.lock();
        if state.status == SessionStatus::Queued {
            state.status = SessionStatus::Error;
            state.error = Some(message.into());
            state.finished_at = Some(Utc::now());
        }
    }

    /// Request cancellation. Returns `false` if the session already ended.
    pub fn cancel(&self) -> bool {
        let state = self.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        true
    }

    /// Claim a pending slot for dispatch.
    ///
    /// Returns `None` if the session is not running, cancellation was
    /// requested, or the slot is not pending.
    pub fn begin_slot(&self, index: usize) -> Option<GradingRequest> {
        let mut state = self.state.lock();
        if state.status != SessionStatus::Running || self.is_cancelled() {
            return None;
        }
        match state.slots.get(index) {
            Some(SlotState::Pending) => {}
            _ => return None,
        }
        state.slots[index] = SlotState::InFlight;
        state.in_flight += 1;
        drop(state);
        self.job.request(index)
    }

    /// Write the terminal result of an in-flight or regrading slot.
    ///
    /// Returns `false` (and writes nothing) if the slot was neither.
    pub fn complete_slot(&self, index: usize, result: GradeResult) -> bool {
        let mut state = self.state.lock();
        let status = result.status;
        let Some(slot) = state.slots.get_mut(index) else {
            return false;
        };
        let replaced = match std::mem::replace(slot, SlotState::Done(Box::new(result))) {
            SlotState::InFlight => None,
            SlotState::Regrading(previous) => Some(previous.status),
            other => {
                *slot = other;
                return false;
            }
        };

        match replaced {
            Some(previous) => state.uncount(previous),
            None => state.in_flight -= 1,
        }
        state.count(status);
        true
    }

    /// Release a slot whose grading task died without a result.
    ///
    /// A regrading slot goes back to its previous result, an in-flight one
    /// back to pending.
    pub fn abandon_slot(&self, index: usize) {
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(index) else {
            return;
        };
        match std::mem::replace(slot, SlotState::Pending) {
            SlotState::Regrading(previous) => *slot = SlotState::Done(previous),
            SlotState::InFlight => state.in_flight -= 1,
            other => *slot = other,
        }
    }

    /// Reopen one slot for regrading after the run has ended.
    pub fn reopen_slot(&self, student_id: &str) -> Result<(usize, GradingRequest), SessionError> {
        let index = self
            .job
            .position(student_id)
            .ok_or_else(|| SessionError::ResultNotFound {
                student_id: student_id.to_string(),
            })?;

        let mut state = self.state.lock();
        if !matches!(
            state.status,
            SessionStatus::Completed | SessionStatus::Cancelled
        ) {
            return Err(SessionError::InvalidState {
                status: state.status,
                action: "regrade",
            });
        }

        let slot = &mut state.slots[index];
        match std::mem::replace(slot, SlotState::Pending) {
            SlotState::Done(previous) => *slot = SlotState::Regrading(previous),
            SlotState::Pending => {
                *slot = SlotState::InFlight;
                state.in_flight += 1;
            }
            busy => {
                *slot = busy;
                return Err(SessionError::SlotBusy(student_id.to_string()));
            }
        }
        drop(state);

        let request = self
            .job
            .request(index)
            .ok_or_else(|| SessionError::ResultNotFound {
                student_id: student_id.to_string(),
            })?;
        Ok((index, request))
    }

    /// `running -> completed | cancelled`.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        if state.status == SessionStatus::Running {
            state.status = if self.is_cancelled() {
                SessionStatus::Cancelled
            } else {
                SessionStatus::Completed
            };
            state.finished_at = Some(Utc::now());
        }
    }

    pub fn record_usage(&self, usage: TokenUsage) {
        self.state.lock().usage += usage;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock();
        let total = state.slots.len();
        ProgressSnapshot {
            session_id: self.id.clone(),
            status: state.status,
            total,
            completed: state.completed,
            failed: state.failed,
            needs_review: state.needs_review,
            in_flight: state.in_flight,
            pending: total - state.completed - state.failed,
            error: state.error.clone(),
            usage: state.usage,
        }
    }

    /// Terminal result for a student (first match in roster order).
    pub fn result_for(&self, student_id: &str) -> Result<GradeResult, SessionError> {
        self.job
            .position(student_id)
            .and_then(|index| self.result_at(index))
            .ok_or_else(|| SessionError::ResultNotFound {
                student_id: student_id.to_string(),
            })
    }

    /// Terminal result in slot `index`.
    pub fn result_at(&self, index: usize) -> Option<GradeResult> {
        self.state
            .lock()
            .slots
            .get(index)
            .and_then(SlotState::visible)
            .cloned()
    }

    /// Terminal results in roster order.
    pub fn results(&self) -> Vec<GradeResult> {
        self.state
            .lock()
            .slots
            .iter()
            .filter_map(|slot| slot.visible().cloned())
            .collect()
    }

    /// Apply a reviewer edit once the run has ended.
    pub fn apply_review(
        &self,
        student_id: &str,
        edit: &ReviewEdit,
    ) -> Result<GradeResult, SessionError> {
        let not_found = || SessionError::ResultNotFound {
            student_id: student_id.to_string(),
        };
        let index = self.job.position(student_id).ok_or_else(not_found)?;

        let mut state = self.state.lock();
        if !state.status.is_terminal() {
            return Err(SessionError::InvalidState {
                status: state.status,
                action: "edit results",
            });
        }

        let mut edited = match &state.slots[index] {
            SlotState::Done(result) => result.as_ref().clone(),
            SlotState::InFlight | SlotState::Regrading(_) => {
                return Err(SessionError::SlotBusy(student_id.to_string()))
            }
            SlotState::Pending => return Err(not_found()),
        };
        let previous = edited.status;
        edited.apply_review(edit)?;

        state.uncount(previous);
        state.count(edited.status);
        state.slots[index] = SlotState::Done(Box::new(edited.clone()));
        Ok(edited)
    }

    /// Exporter hand-off.
    pub fn report(&self) -> GradingReport {
        GradingReport::new(self.id.clone(), self.provider.clone(), self.results())
    }

    /// Serializable copy of the session.
    pub fn to_record(&self) -> SessionRecord {
        let state = self.state.lock();
        SessionRecord {
            id: self.id.clone(),
            provider: self.provider.clone(),
            status: state.status,
            created_at: self.created_at,
            finished_at: state.finished_at,
            error: state.error.clone(),
            usage: state.usage,
            rubric: self.job.rubric.as_ref().clone(),
            mode: self.job.mode,
            feedback_style: self.job.feedback_style,
            total_marks: self.job.total_marks,
            students: self.job.students.clone(),
            results: state
                .slots
                .iter()
                .map(|slot| slot.visible().cloned())
                .collect(),
        }
    }

    /// Rebuild a session from a record.
    ///
    /// A record taken mid-run comes back `cancelled`; slots without a
    /// result come back pending.
    pub fn from_record(record: SessionRecord) -> Result<Self, SessionError> {
        if record.results.len() != record.students.len() {
            return Err(SessionError::InvalidSnapshot(format!(
                "{} results for {} students",
                record.results.len(),
                record.students.len()
            )));
        }

        let status = match record.status {
            SessionStatus::Queued | SessionStatus::Running => SessionStatus::Cancelled,
            other => other,
        };

        let job = GradingJob {
            students: record.students,
            rubric: Arc::new(record.rubric),
            mode: record.mode,
            feedback_style: record.feedback_style,
            total_marks: record.total_marks,
        };

        let mut state = SessionState {
            status,
            slots: Vec::with_capacity(job.len()),
            completed: 0,
            needs_review: 0,
            failed: 0,
            in_flight: 0,
            error: record.error,
            usage: record.usage,
            finished_at: record.finished_at,
        };
        for result in record.results {
            match result {
                Some(result) => {
                    state.count(result.status);
                    state.slots.push(SlotState::Done(Box::new(result)));
                }
                None => state.slots.push(SlotState::Pending),
            }
        }

        Ok(Self {
            id: record.id,
            provider: record.provider,
            created_at: record.created_at,
            job,
            cancelled: AtomicBool::new(status == SessionStatus::Cancelled),
            state: Mutex::new(state),
        })
    }
}

/// Serialized form of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub provider: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub usage: TokenUsage,

    pub rubric: Rubric,
    pub mode: GradingMode,
    pub feedback_style: FeedbackStyle,
    pub total_marks: f64,
    pub students: Vec<Student>,

    /// One entry per student; `None` where no terminal result exists
    pub results: Vec<Option<GradeResult>>,
}
