//! # gradeflow-runtime
//!
//! Provider adapters and concurrent orchestration for gradeflow.
//!
//! This crate turns a roster and a rubric into a grading session:
//! - [`providers`]: the [`GradingProvider`] trait and adapters for OpenAI,
//!   Anthropic, Gemini, Ollama, LM Studio and generic OpenAI-compatible
//!   servers (behind cargo features)
//! - [`GradingOrchestrator`]: pre-flight, bounded fan-out, retries and
//!   per-call timeouts
//! - [`session`]: slot state, progress snapshots and the [`SessionStore`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use gradeflow_core::{Rubric, Student};
//! use gradeflow_runtime::{GradingJob, GradingOrchestrator, ProviderRegistry, Settings};
//!
//! let settings = Settings::from_file("gradeflow.yaml")?;
//! let orchestrator =
//!     GradingOrchestrator::from_settings(&settings, &ProviderRegistry::with_defaults())?;
//!
//! let job = GradingJob::with_config(students, rubric, &settings.runtime);
//! let handle = orchestrator.submit(job).await;
//! println!("{:?}", handle.snapshot());
//! let session = handle.wait().await?;
//! ```

pub mod config;
pub mod job;
pub mod orchestrator;
pub mod providers;
pub mod resilience;
pub mod session;

pub use config::{ConfigError, ProviderEntry, RetryConfig, RuntimeConfig, Settings};
pub use job::GradingJob;
pub use orchestrator::{GradingOrchestrator, GradingOrchestratorBuilder, JobHandle, OrchestratorError};
pub use providers::{
    ApiCredential, ChatMessage, CredentialSource, GradingProvider, ProviderConfig, ProviderError,
    ProviderErrorKind, ProviderFactory, ProviderKind, ProviderRegistry, RawResponse, TokenUsage,
};
pub use resilience::RetryPolicy;
pub use session::{
    GradingSession, ProgressSnapshot, SessionError, SessionRecord, SessionStatus, SessionStore,
};
