//! gradeflow command line.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gradeflow_core::{FeedbackStyle, GradingMode, Rubric, Student};
use gradeflow_runtime::{
    GradingJob, GradingOrchestrator, ProgressSnapshot, ProviderKind, ProviderRegistry,
    SessionStatus, Settings,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gradeflow", version, about = "AI-assisted grading of student assignments")]
struct Cli {
    /// Settings file (YAML or JSON)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Provider to use, overriding the settings file
    #[arg(short, long, global = true)]
    provider: Option<String>,

    /// Model to use, overriding the settings file
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Grade a roster against a rubric
    Grade {
        /// Roster: a YAML/JSON list of students, or a directory of .txt/.md files
        #[arg(short, long)]
        roster: PathBuf,

        /// Rubric: YAML, JSON, or plain text
        #[arg(long)]
        rubric: PathBuf,

        /// Where to write the JSON report
        #[arg(short, long, default_value = "gradeflow-report.json")]
        out: PathBuf,

        /// Also write a session snapshot that can be reloaded later
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Maximum concurrent provider calls
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// auto or suggestion
        #[arg(long)]
        mode: Option<String>,

        /// brief or detailed
        #[arg(long)]
        style: Option<String>,

        /// Total marks when the rubric declares none
        #[arg(long)]
        total_marks: Option<f64>,

        /// Seconds between progress lines
        #[arg(long, default_value_t = 2)]
        progress_interval: u64,
    },

    /// Check that the provider is reachable and the credential works
    TestConnection,

    /// List the models the provider offers
    Models,

    /// List supported providers
    Providers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut settings = load_settings(cli.settings.as_deref())?;
    if let Some(provider) = &cli.provider {
        let kind: ProviderKind = provider
            .parse()
            .with_context(|| format!("Unknown provider '{}'", provider))?;
        settings.provider = Some(kind);
    }
    if let Some(model) = cli.model.clone() {
        let kind = settings
            .provider
            .context("--model needs a provider: pass --provider or set 'provider' in settings")?;
        settings.providers.entry(kind).or_default().model = Some(model);
    }

    match cli.command {
        Command::Grade {
            roster,
            rubric,
            out,
            snapshot,
            concurrency,
            mode,
            style,
            total_marks,
            progress_interval,
        } => {
            if let Some(concurrency) = concurrency {
                settings.runtime.concurrency = concurrency;
            }
            if let Some(mode) = mode {
                settings.runtime.mode = mode.parse::<GradingMode>()?;
            }
            if let Some(style) = style {
                settings.runtime.feedback_style = style.parse::<FeedbackStyle>()?;
            }
            if let Some(total_marks) = total_marks {
                settings.runtime.default_total_marks = total_marks;
            }
            settings
                .runtime
                .validate()
                .context("Invalid runtime settings")?;

            let students = load_roster(&roster)?;
            let rubric = Rubric::from_file(&rubric)
                .with_context(|| format!("Failed to load rubric from {}", rubric.display()))?;
            let job = GradingJob::with_config(students, rubric, &settings.runtime);

            grade(&settings, job, &out, snapshot.as_deref(), progress_interval).await
        }
        Command::TestConnection => test_connection(&settings).await,
        Command::Models => list_models(&settings).await,
        Command::Providers => {
            list_providers();
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

/// Load a roster file, or one student per text file in a directory.
fn load_roster(path: &Path) -> Result<Vec<Student>> {
    if path.is_dir() {
        return load_roster_dir(path);
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read roster {}", path.display()))?;
    let students: Vec<Student> = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse roster {}", path.display()))?,
        _ => serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse roster {}", path.display()))?,
    };
    Ok(students)
}

fn load_roster_dir(dir: &Path) -> Result<Vec<Student>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        let is_text = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("txt") | Some("md")
        );
        if path.is_file() && is_text {
            files.push(path);
        }
    }
    files.sort();

    files
        .into_iter()
        .map(|path| {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let id = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let source = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(Student::new(id, text).with_source(source))
        })
        .collect()
}

async fn grade(
    settings: &Settings,
    job: GradingJob,
    out: &Path,
    snapshot_path: Option<&Path>,
    progress_interval: u64,
) -> Result<()> {
    let orchestrator = GradingOrchestrator::from_settings(settings, &ProviderRegistry::with_defaults())
        .context("Failed to configure provider")?;

    let handle = orchestrator.submit(job).await;
    let session = Arc::clone(handle.session());
    info!(session = %session.id(), students = session.total(), "Session submitted");

    let mut ticker = tokio::time::interval(Duration::from_secs(progress_interval.max(1)));
    let wait = handle.wait();
    tokio::pin!(wait);

    let session = loop {
        tokio::select! {
            finished = &mut wait => break finished?,
            _ = ticker.tick() => print_progress(&session.snapshot()),
            _ = tokio::signal::ctrl_c() => {
                if session.cancel() {
                    warn!("Cancelling: waiting for in-flight students to finish");
                }
            }
        }
    };

    let snapshot = session.snapshot();
    if snapshot.status == SessionStatus::Error {
        bail!(
            "Grading did not start: {}",
            snapshot.error.unwrap_or_else(|| "pre-flight failed".to_string())
        );
    }

    let report = orchestrator.report(session.id()).await?;
    fs::write(out, report.to_json_pretty()?)
        .with_context(|| format!("Failed to write report to {}", out.display()))?;

    if let Some(path) = snapshot_path {
        let json = orchestrator.store().export_snapshot(session.id()).await?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write snapshot to {}", path.display()))?;
    }

    let summary = &report.summary;
    println!(
        "Session {} {}: {} graded, {} need review, {} failed (of {})",
        session.id(),
        snapshot.status,
        summary.succeeded,
        summary.needs_review,
        summary.failed,
        summary.total
    );
    if let Some(average) = summary.average_score {
        println!("Average score: {:.1}", average);
    }
    println!("Report written to {}", out.display());
    Ok(())
}

fn print_progress(snapshot: &ProgressSnapshot) {
    eprintln!(
        "[{}] {:>5.1}% | {} done, {} failed, {} in flight, {} pending",
        snapshot.status,
        snapshot.percent_done(),
        snapshot.completed,
        snapshot.failed,
        snapshot.in_flight,
        snapshot.pending
    );
}

async fn test_connection(settings: &Settings) -> Result<()> {
    let orchestrator = GradingOrchestrator::from_settings(settings, &ProviderRegistry::with_defaults())
        .context("Failed to configure provider")?;
    let config = orchestrator.provider_config();

    orchestrator
        .preflight()
        .await
        .with_context(|| format!("Connection test failed for {}", config.kind.display_name()))?;

    println!(
        "{} reachable at {} (model: {})",
        config.kind.display_name(),
        config.endpoint,
        config.model
    );
    Ok(())
}

async fn list_models(settings: &Settings) -> Result<()> {
    let config = settings.active_provider_config()?;
    let provider = ProviderRegistry::with_defaults()
        .create(&config)
        .context("Failed to configure provider")?;

    let models = provider
        .list_models(&config)
        .await
        .with_context(|| format!("Failed to list models for {}", config.kind.display_name()))?;

    if models.is_empty() {
        println!("{} does not list models", config.kind.display_name());
    }
    for model in models {
        println!("{}", model);
    }
    Ok(())
}

fn list_providers() {
    let registry = ProviderRegistry::with_defaults();
    for kind in ProviderKind::all() {
        let access = if kind.requires_key() {
            format!("key: {}", kind.credential_env().unwrap_or("api_key"))
        } else if kind.is_local() {
            "local".to_string()
        } else {
            "optional key".to_string()
        };
        println!(
            "{:<10} {:<28} {:<22} {:<40} {}{}",
            kind.as_str(),
            kind.display_name(),
            access,
            kind.default_endpoint().unwrap_or("(endpoint required)"),
            kind.default_model(),
            if registry.has_provider(*kind) { "" } else { "  [not built]" }
        );
    }
}
