//! Command implementations: build the infrastructure, run a stage, report.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use llm::{CompletionClient, HttpBackend};
use pipeline::{
    AnalysisStore, CompletionProvider, CountingSink, InterviewerMode, ProgressHandle,
    SessionStore,
};
use stages::{AnalysisBatch, BatchScheduler, FallbackCascade, SessionRunner};
use store::{load_personas, FileAnalysisStore, FileSessionStore};

use crate::config::ProjectConfig;
use crate::progress::BarSink;

// ============================================================================
// interview
// ============================================================================

pub async fn interview(
    config_path: &Path,
    personas_override: Option<PathBuf>,
    concurrency_override: Option<usize>,
    show_bar: bool,
) -> Result<()> {
    let config = ProjectConfig::load(config_path).await?;
    let api_key = config.api_key()?;
    let interview = Arc::new(config.interview_config()?);
    let concurrency = concurrency_override.unwrap_or(config.concurrency);

    let personas_path = personas_override.unwrap_or_else(|| config.personas.clone());
    let personas = load_personas(&personas_path)
        .await
        .with_context(|| format!("failed to load personas from {}", personas_path.display()))?;

    let store = Arc::new(FileSessionStore::new(config.sessions_dir()));
    let done = store.completed_personas().await?;
    let remaining: HashSet<_> = personas
        .iter()
        .filter(|p| !done.contains(&p.id))
        .map(|p| &p.id)
        .collect();
    // A floor; retried turns extend the bar as they happen.
    let calls_per_session = match interview.mode {
        InterviewerMode::FixedScript => 1,
        InterviewerMode::ModelDriven => 2,
    } * interview.script.len() as u64;
    let expected_calls = remaining.len() as u64 * calls_per_session;

    let progress = ProgressHandle::new();
    let provider = completion_provider(&config, api_key, progress.clone())?;
    let runner = Arc::new(SessionRunner::new(provider, Arc::clone(&interview)));
    let scheduler = BatchScheduler::new(runner, store);

    let reporter = Reporter::install(&progress, show_bar, Some(expected_calls), "model calls");
    let result = scheduler.run_batch(personas, concurrency).await;
    let calls = reporter.finish(&progress);

    let sessions = result.context("interview batch failed")?;
    info!(sessions = sessions.len(), calls, "interview run finished");
    Ok(())
}

// ============================================================================
// analyze
// ============================================================================

pub async fn analyze(
    config_path: &Path,
    concurrency_override: Option<usize>,
    show_bar: bool,
) -> Result<()> {
    let config = ProjectConfig::load(config_path).await?;
    let api_key = config.api_key()?;
    let plan = Arc::new(config.analysis_plan()?);
    let concurrency = concurrency_override.unwrap_or_else(|| config.analysis_concurrency());

    let sessions = FileSessionStore::new(config.sessions_dir())
        .load_all()
        .await
        .context("failed to load stored sessions")?;
    if sessions.is_empty() {
        warn!("no stored sessions to analyse; run `synthview interview` first");
        return Ok(());
    }

    let progress = ProgressHandle::new();
    let provider = completion_provider(&config, api_key, progress.clone())?;
    let cascade = Arc::new(
        FallbackCascade::new(provider)
            .with_temperature(config.analysis.temperature)
            .with_max_output_tokens(config.analysis.max_output_tokens),
    );
    let store = Arc::new(FileAnalysisStore::new(config.analysis_path()));
    let batch = AnalysisBatch::new(cascade, store, plan);

    let reporter = Reporter::install(&progress, show_bar, None, "model calls");
    let result = batch.run(sessions, concurrency).await;
    let calls = reporter.finish(&progress);

    let records = result.context("analysis batch failed")?;
    let blank = records.iter().filter(|r| r.model.is_none()).count();
    info!(records = records.len(), blank, calls, "analysis run finished");
    Ok(())
}

// ============================================================================
// status
// ============================================================================

pub async fn status(config_path: &Path) -> Result<()> {
    let config = ProjectConfig::load(config_path).await?;

    let personas = match load_personas(&config.personas).await {
        Ok(personas) => personas.len().to_string(),
        Err(e) => {
            warn!(error = %e, "could not read persona list");
            "unavailable".to_string()
        }
    };
    let interviewed = FileSessionStore::new(config.sessions_dir())
        .completed_personas()
        .await?
        .len();
    let analyzed = FileAnalysisStore::new(config.analysis_path())
        .analyzed_personas()
        .await?
        .len();

    println!("project:     {}", config.project);
    println!("personas:    {personas}");
    println!("interviewed: {interviewed}");
    println!("analyzed:    {analyzed}");
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn completion_provider(
    config: &ProjectConfig,
    api_key: String,
    progress: ProgressHandle,
) -> Result<Arc<dyn CompletionProvider>> {
    let retry = config.retry_config();
    let backend = HttpBackend::new(&config.api.base_url, api_key, retry.request_timeout)?;
    Ok(Arc::new(
        CompletionClient::new(backend, retry).with_progress(progress),
    ))
}

/// The sink registered for the duration of one command.
///
/// A bar garbles JSON log output, so machine-readable runs count silently.
enum Reporter {
    Bar(Arc<BarSink>),
    Count(Arc<CountingSink>),
}

impl Reporter {
    fn install(
        progress: &ProgressHandle,
        show_bar: bool,
        expected: Option<u64>,
        label: &'static str,
    ) -> Self {
        if show_bar {
            let bar = Arc::new(BarSink::new(expected, label));
            progress.register(bar.clone());
            Self::Bar(bar)
        } else {
            let counter = Arc::new(CountingSink::new());
            progress.register(counter.clone());
            Self::Count(counter)
        }
    }

    /// Unregisters the sink and returns how many calls it saw.
    fn finish(self, progress: &ProgressHandle) -> u64 {
        progress.clear();
        match self {
            Self::Bar(bar) => {
                bar.finish();
                bar.position()
            }
            Self::Count(counter) => counter.count(),
        }
    }
}
