//! End-to-end orchestration against a scripted provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{job, local_config, orchestrator, roster, ScriptedProvider};
use gradeflow_core::{GradeStatus, ReviewEdit, Student};
use gradeflow_runtime::{
    ProviderConfig, ProviderError, ProviderKind, SessionError, SessionStatus, OrchestratorError,
};

#[tokio::test(start_paused = true)]
async fn test_bounded_concurrency_writes_every_slot_once() {
    let provider = Arc::new(ScriptedProvider::new().with_delay(Duration::from_millis(50)));
    let orchestrator = orchestrator(Arc::clone(&provider), 3, local_config(0));

    let session = orchestrator.run(job(roster(10))).await.unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(snapshot.total, 10);
    assert_eq!(snapshot.completed, 10);
    assert_eq!(snapshot.pending, 0);
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.usage.total(), 10 * 120);

    assert_eq!(provider.calls(), 10);
    assert_eq!(provider.max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 3);

    let ids: Vec<_> = session.results().into_iter().map(|r| r.student_id).collect();
    let expected: Vec<_> = roster(10).into_iter().map(|s| s.id).collect();
    assert_eq!(ids, expected);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_retry_and_permanent_errors_do_not() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .script(
                "flaky",
                [
                    Err(ProviderError::Network("connection reset".into())),
                    Err(ProviderError::RateLimited {
                        retry_after: Some(Duration::from_secs(1)),
                        detail: "HTTP 429".into(),
                    }),
                    Ok(r#"{"score": 72}"#),
                ],
            )
            .script("locked", [Err(ProviderError::Auth("HTTP 401".into()))])
            .script("down", [Err(ProviderError::Network("HTTP 503".into()))]),
    );
    let orchestrator = orchestrator(Arc::clone(&provider), 2, local_config(2));

    let students = vec![
        Student::new("flaky", "a"),
        Student::new("locked", "b"),
        Student::new("down", "c"),
    ];
    let session = orchestrator.run(job(students)).await.unwrap();
    assert_eq!(session.status(), SessionStatus::Completed);

    let flaky = session.result_for("flaky").unwrap();
    assert_eq!(flaky.status, GradeStatus::Success);
    assert_eq!(flaky.score, Some(72.0));
    assert_eq!(flaky.attempts, 3);

    let locked = session.result_for("locked").unwrap();
    assert_eq!(locked.status, GradeStatus::Failed);
    assert_eq!(locked.attempts, 1);
    assert!(locked.cause.unwrap().contains("authentication failed"));

    let down = session.result_for("down").unwrap();
    assert_eq!(down.status, GradeStatus::Failed);
    assert_eq!(down.attempts, 3);
    assert_eq!(down.cause.as_deref(), Some("network error: HTTP 503"));
    assert!(down.raw_response.is_none());

    assert_eq!(provider.calls(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_slow_calls_time_out_and_retry() {
    let provider = Arc::new(ScriptedProvider::new().with_delay(Duration::from_secs(30)));
    let config = local_config(1).with_timeout(Duration::from_secs(2));
    let orchestrator = orchestrator(Arc::clone(&provider), 1, config);

    let session = orchestrator.run(job(roster(1))).await.unwrap();

    let result = session.result_for("s01").unwrap();
    assert_eq!(result.status, GradeStatus::Failed);
    assert_eq!(result.attempts, 2);
    assert!(result.cause.unwrap().contains("timed out"));
    assert_eq!(session.snapshot().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_finished_slots() {
    let provider = Arc::new(ScriptedProvider::new().with_delay(Duration::from_millis(100)));
    let orchestrator = orchestrator(Arc::clone(&provider), 1, local_config(0));

    let handle = orchestrator.submit(job(roster(10))).await;
    loop {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if handle.snapshot().completed >= 4 {
            assert!(handle.cancel());
            break;
        }
    }
    let session = handle.wait().await.unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Cancelled);
    assert_eq!(snapshot.total, 10);
    assert!((4..=5).contains(&snapshot.completed));
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.pending, 10 - snapshot.completed);
    assert!((0..4).all(|i| session.result_at(i).is_some()));
    assert!(session.result_at(9).is_none());
    assert!(provider.calls() <= 5);
}

#[tokio::test]
async fn test_failed_connection_test_makes_no_grading_calls() {
    let provider = Arc::new(
        ScriptedProvider::new().with_connection(Err(ProviderError::Auth("HTTP 401".into()))),
    );
    let orchestrator = orchestrator(Arc::clone(&provider), 4, local_config(3));

    let session = orchestrator.run(job(roster(5))).await.unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Error);
    assert_eq!(snapshot.total, 5);
    assert_eq!(snapshot.pending, 5);
    assert!(snapshot.error.unwrap().starts_with("invalid credential"));
    assert_eq!(provider.calls(), 0);
    assert_eq!(provider.connection_checks.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_credential_fails_before_connection_test() {
    let provider = Arc::new(ScriptedProvider::new());
    let orchestrator = orchestrator(
        Arc::clone(&provider),
        4,
        ProviderConfig::new(ProviderKind::OpenAi),
    );

    let session = orchestrator.run(job(roster(2))).await.unwrap();
    assert_eq!(session.status(), SessionStatus::Error);
    assert_eq!(provider.connection_checks.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_empty_roster_completes() {
    let provider = Arc::new(ScriptedProvider::new());
    let orchestrator = orchestrator(Arc::clone(&provider), 4, local_config(0));

    let session = orchestrator.run(job(Vec::new())).await.unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!((snapshot.total, snapshot.completed, snapshot.pending), (0, 0, 0));
    assert!(session.results().is_empty());
}

#[tokio::test]
async fn test_out_of_range_and_unstructured_need_review() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .script("over", [Ok(r#"{"score": 150, "feedback": "Generous."}"#)])
            .script("prose", [Ok("A thoughtful essay, but I cannot assign a mark.")]),
    );
    let orchestrator = orchestrator(Arc::clone(&provider), 2, local_config(0));

    let students = vec![Student::new("over", "a"), Student::new("prose", "b")];
    let session = orchestrator.run(job(students)).await.unwrap();

    let over = session.result_for("over").unwrap();
    assert_eq!(over.status, GradeStatus::NeedsReview);
    assert_eq!(over.score, Some(100.0));
    assert!(over.cause.unwrap().contains("150"));

    let prose = session.result_for("prose").unwrap();
    assert_eq!(prose.status, GradeStatus::NeedsReview);
    assert_eq!(prose.score, None);
    assert!(prose.feedback.contains("thoughtful essay"));

    let snapshot = session.snapshot();
    assert_eq!(snapshot.completed, 2);
    assert_eq!(snapshot.needs_review, 2);
}

#[tokio::test(start_paused = true)]
async fn test_regrade_replaces_failed_result() {
    let provider = Arc::new(ScriptedProvider::new().script(
        "s02",
        [
            Err(ProviderError::MalformedRequest("HTTP 400".into())),
            Ok(r#"{"score": 64}"#),
        ],
    ));
    let orchestrator = orchestrator(Arc::clone(&provider), 2, local_config(0));

    let session = orchestrator.run(job(roster(3))).await.unwrap();
    assert_eq!(session.snapshot().failed, 1);

    let regraded = orchestrator
        .regrade_student(session.id(), "s02")
        .await
        .unwrap();
    assert_eq!(regraded.status, GradeStatus::Success);
    assert_eq!(regraded.score, Some(64.0));
    assert_eq!(regraded.attempts, 1);

    let snapshot = orchestrator.status(session.id()).await.unwrap();
    assert_eq!((snapshot.completed, snapshot.failed), (3, 0));
    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(provider.calls(), 4);

    assert!(matches!(
        orchestrator.regrade_student(session.id(), "nobody").await,
        Err(OrchestratorError::Session(SessionError::ResultNotFound { .. }))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_regrade_keeps_previous_result() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_delay(Duration::from_secs(5))
            .script("s01", [Ok(r#"{"score": 70}"#), Ok(r#"{"score": 90}"#)]),
    );
    let orchestrator = orchestrator(Arc::clone(&provider), 2, local_config(0));
    let session = orchestrator.run(job(roster(2))).await.unwrap();
    assert_eq!(session.result_for("s01").unwrap().score, Some(70.0));

    let abandoned = tokio::time::timeout(
        Duration::from_secs(1),
        orchestrator.regrade_student(session.id(), "s01"),
    )
    .await;
    assert!(abandoned.is_err());

    let snapshot = orchestrator.status(session.id()).await.unwrap();
    assert_eq!(
        (snapshot.completed, snapshot.failed, snapshot.pending),
        (2, 0, 0)
    );
    assert_eq!(session.result_for("s01").unwrap().score, Some(70.0));
    let report = orchestrator.report(session.id()).await.unwrap();
    assert_eq!(report.results.len(), 2);
    assert!(matches!(
        orchestrator.regrade_student(session.id(), "s01").await,
        Err(OrchestratorError::Session(SessionError::SlotBusy(_)))
    ));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(provider.calls(), 3);
    let regraded = session.result_for("s01").unwrap();
    assert_eq!(regraded.status, GradeStatus::Success);
    assert_eq!(regraded.score, Some(90.0));
    assert_eq!(orchestrator.status(session.id()).await.unwrap().completed, 2);

    let again = orchestrator
        .regrade_student(session.id(), "s01")
        .await
        .unwrap();
    assert_eq!(again.score, Some(90.0));
    assert_eq!(provider.calls(), 4);
}

#[tokio::test]
async fn test_review_edit_and_report() {
    let provider = Arc::new(ScriptedProvider::new().script(
        "s01",
        [Ok(r#"{"breakdown": [
            {"criterion": "Clarity", "points": 30, "max_points": 40},
            {"criterion": "Argument", "points": 40, "max_points": 60}
        ], "feedback": "Clear but thin."}"#)],
    ));
    let orchestrator = orchestrator(Arc::clone(&provider), 2, local_config(0));
    let session = orchestrator.run(job(roster(2))).await.unwrap();

    let original = session.result_for("s01").unwrap();
    assert_eq!(original.score, Some(70.0));

    let edit = ReviewEdit::default()
        .with_criterion("argument", 50.0)
        .with_feedback("Stronger argument than the model credited.");
    let edited = orchestrator
        .apply_review(session.id(), "s01", &edit)
        .await
        .unwrap();
    assert!(edited.manually_edited);
    assert_eq!(edited.score, Some(80.0));

    let report = orchestrator.report(session.id()).await.unwrap();
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.average_score, Some(80.0));
    assert_eq!(report.results[0].feedback, "Stronger argument than the model credited.");
}

#[tokio::test]
async fn test_snapshot_survives_export_and_import() {
    let provider = Arc::new(ScriptedProvider::new());
    let orchestrator = orchestrator(Arc::clone(&provider), 2, local_config(0));
    let session = orchestrator.run(job(roster(3))).await.unwrap();

    let json = orchestrator
        .store()
        .export_snapshot(session.id())
        .await
        .unwrap();
    assert!(!json.contains("api_key"));

    orchestrator.store().remove(session.id()).await;
    assert!(orchestrator.status(session.id()).await.is_err());

    let restored = orchestrator.store().import_snapshot(&json).await.unwrap();
    assert_eq!(restored.id(), session.id());
    assert_eq!(restored.results(), session.results());

    let snapshot = orchestrator.status(session.id()).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(snapshot.completed, 3);
}
