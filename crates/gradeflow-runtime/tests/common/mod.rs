//! Scripted provider shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gradeflow_core::{GradingRequest, Rubric, Student};
use gradeflow_runtime::{
    GradingJob, GradingOrchestrator, GradingProvider, ProviderConfig, ProviderError, ProviderKind,
    RawResponse, RetryConfig, RuntimeConfig, TokenUsage,
};
use parking_lot::Mutex;

/// Provider whose answers are scripted per student.
///
/// Students without a script get `{"score": 80}`.
pub struct ScriptedProvider {
    delay: Duration,
    connection: Result<(), ProviderError>,
    scripts: Mutex<HashMap<String, VecDeque<Result<String, ProviderError>>>>,
    pub calls: AtomicU32,
    pub connection_checks: AtomicU32,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            connection: Ok(()),
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
            connection_checks: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_connection(mut self, connection: Result<(), ProviderError>) -> Self {
        self.connection = connection;
        self
    }

    /// Queue outcomes for one student; the last one repeats.
    pub fn script(
        self,
        student_id: &str,
        outcomes: impl IntoIterator<Item = Result<&'static str, ProviderError>>,
    ) -> Self {
        self.scripts.lock().insert(
            student_id.to_string(),
            outcomes
                .into_iter()
                .map(|o| o.map(str::to_string))
                .collect(),
        );
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, student_id: &str) -> Result<String, ProviderError> {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(student_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ => Ok(r#"{"score": 80, "feedback": "Good work."}"#.to_string()),
        }
    }
}

#[async_trait]
impl GradingProvider for ScriptedProvider {
    async fn grade(
        &self,
        request: &GradingRequest,
        _config: &ProviderConfig,
    ) -> Result<RawResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.next_outcome(&request.student.id).map(|text| RawResponse {
            text,
            model: Some("scripted".to_string()),
            usage: TokenUsage::new(100, 20),
        })
    }

    async fn test_connection(&self, _config: &ProviderConfig) -> Result<(), ProviderError> {
        self.connection_checks.fetch_add(1, Ordering::SeqCst);
        self.connection.clone()
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}

pub fn roster(n: usize) -> Vec<Student> {
    (1..=n)
        .map(|i| Student::new(format!("s{:02}", i), format!("Essay number {}", i)))
        .collect()
}

pub fn job(students: Vec<Student>) -> GradingJob {
    GradingJob::new(students, Rubric::from_text("Clarity and argument.", "Essay"))
}

/// Runtime config with short, deterministic backoff.
pub fn runtime(concurrency: usize) -> RuntimeConfig {
    RuntimeConfig::default()
        .with_concurrency(concurrency)
        .with_retry(RetryConfig {
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter: false,
        })
}

pub fn orchestrator(
    provider: Arc<ScriptedProvider>,
    concurrency: usize,
    provider_config: ProviderConfig,
) -> GradingOrchestrator {
    GradingOrchestrator::builder()
        .provider(provider)
        .provider_config(provider_config)
        .runtime_config(runtime(concurrency))
        .build()
        .unwrap()
}

/// Local provider config; needs no credential.
pub fn local_config(max_retries: u32) -> ProviderConfig {
    ProviderConfig::new(ProviderKind::Ollama).with_max_retries(max_retries)
}
