//! Session store with an idle retention window.

use std::sync::Arc;
use std::time::Duration;

use gradeflow_core::GradeResult;
use moka::future::Cache;

use super::{GradingSession, ProgressSnapshot, SessionError, SessionRecord};
use crate::config::RuntimeConfig;

/// Sessions by id.
///
/// Entries idle for longer than the retention window are evicted. Cloning
/// the store shares the same entries.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Cache<String, Arc<GradingSession>>,
}

impl SessionStore {
    pub fn new(retention: Duration) -> Self {
        let sessions = Cache::builder().time_to_idle(retention).build();
        Self { sessions }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.session_retention)
    }

    pub async fn insert(&self, session: Arc<GradingSession>) {
        self.sessions
            .insert(session.id().to_string(), session)
            .await;
    }

    pub async fn get(&self, session_id: &str) -> Result<Arc<GradingSession>, SessionError> {
        self.sessions
            .get(session_id)
            .await
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))
    }

    /// Progress of a session.
    pub async fn current_status(&self, session_id: &str) -> Result<ProgressSnapshot, SessionError> {
        Ok(self.get(session_id).await?.snapshot())
    }

    pub async fn result_for(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<GradeResult, SessionError> {
        self.get(session_id).await?.result_for(student_id)
    }

    /// Terminal results in roster order.
    pub async fn results(&self, session_id: &str) -> Result<Vec<GradeResult>, SessionError> {
        Ok(self.get(session_id).await?.results())
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<GradingSession>> {
        self.sessions.remove(session_id).await
    }

    /// Serialize a session for hand-off or persistence.
    pub async fn export_snapshot(&self, session_id: &str) -> Result<String, SessionError> {
        let record = self.get(session_id).await?.to_record();
        Ok(serde_json::to_string_pretty(&record)?)
    }

    /// Load a serialized session, replacing any session with the same id.
    pub async fn import_snapshot(&self, json: &str) -> Result<Arc<GradingSession>, SessionError> {
        let record: SessionRecord = serde_json::from_str(json)?;
        let session = Arc::new(GradingSession::from_record(record)?);
        tracing::debug!(session = %session.id(), "Imported session snapshot");
        self.insert(Arc::clone(&session)).await;
        Ok(session)
    }

    pub fn len(&self) -> u64 {
        self.sessions.entry_count()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::GradingJob;
    use crate::session::SessionStatus;
    use gradeflow_core::{Rubric, Student};

    fn session(id: &str) -> Arc<GradingSession> {
        let job = GradingJob::new(
            vec![Student::new("a", "one"), Student::new("b", "two")],
            Rubric::from_text("Be clear.", "Essay"),
        );
        Arc::new(GradingSession::new(id, "Mock", job))
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let store = SessionStore::default();
        store.insert(session("one")).await;

        let snapshot = store.current_status("one").await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Queued);
        assert_eq!(snapshot.pending, 2);

        assert!(matches!(
            store.current_status("missing").await,
            Err(SessionError::SessionNotFound(_))
        ));
        assert!(matches!(
            store.result_for("one", "a").await,
            Err(SessionError::ResultNotFound { .. })
        ));

        assert!(store.remove("one").await.is_some());
        assert!(store.get("one").await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_export_import() {
        let store = SessionStore::default();
        let original = session("snap");
        original.start().unwrap();
        let request = original.begin_slot(0).unwrap();
        original.complete_slot(0, GradeResult::failed(&request, "timeout", "Mock"));
        original.finish();
        store.insert(original).await;

        let json = store.export_snapshot("snap").await.unwrap();
        assert!(json.contains("\"status\": \"completed\""));

        let other = SessionStore::default();
        let restored = other.import_snapshot(&json).await.unwrap();
        assert_eq!(restored.status(), SessionStatus::Completed);
        assert_eq!(other.results("snap").await.unwrap().len(), 1);
        assert!(other.import_snapshot("{not json").await.is_err());
    }
}
