//! Project configuration: one TOML file per study.
//!
//! ```toml
//! project = "commute-study"
//! personas = "personas.json"
//! data_dir = "data"
//! concurrency = 4
//!
//! [api]
//! base_url = "https://openrouter.ai/api/v1"
//! key_env = "SYNTHVIEW_API_KEY"
//!
//! [interview]
//! mode = "model_driven"
//! interviewer_model = "openai/gpt-4o-mini"
//! respondent_model = "meta-llama/llama-3.1-70b-instruct"
//! script = ["How do you get to work?", "What would make it better?"]
//!
//! [[segments]]
//! id = "commuters"
//! name = "Daily commuters"
//!
//! [analysis]
//! model = "openai/gpt-4o-mini"
//!
//! [[analysis.fields]]
//! key = "sentiment"
//! description = "overall attitude towards the commute"
//! ```

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::fs;

use llm::RetryConfig;
use pipeline::{
    FieldKey, FieldSpec, InterviewerMode, ModelId, PipelineError, ProjectName, ScriptStep,
    Segment, SegmentId,
};
use stages::{AnalysisPlan, InterviewConfig, TurnBudgets};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "synthview.toml";

/// Environment variable holding the API credential unless overridden.
pub const DEFAULT_KEY_ENV: &str = "SYNTHVIEW_API_KEY";

/// Models tried after the primary analysis model when none are configured.
pub const DEFAULT_FALLBACK_MODELS: &[&str] = &[
    "openai/gpt-4o-mini",
    "anthropic/claude-3.5-haiku",
    "meta-llama/llama-3.1-70b-instruct",
];

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub project: String,
    #[serde(default = "default_personas")]
    pub personas: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub api: ApiConfig,
    pub interview: InterviewSection,
    #[serde(default)]
    pub segments: Vec<SegmentSection>,
    pub analysis: AnalysisSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_key_env")]
    pub key_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            key_env: default_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterviewSection {
    #[serde(default)]
    pub mode: InterviewerMode,
    /// Required in model-driven mode; defaults to the respondent model.
    #[serde(default)]
    pub interviewer_model: Option<String>,
    pub respondent_model: String,
    #[serde(default = "default_interviewer_prompt")]
    pub interviewer_system_prompt: String,
    #[serde(default)]
    pub respondent_system_prompt: String,
    pub script: Vec<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default = "default_interviewer_attempts")]
    pub interviewer_attempts: u32,
    #[serde(default = "default_respondent_attempts")]
    pub respondent_attempts: u32,
    #[serde(default = "default_respondent_delay_secs")]
    pub respondent_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentSection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub hints: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisSection {
    pub model: String,
    /// `None` selects [`DEFAULT_FALLBACK_MODELS`]; an explicit empty list
    /// disables fallback.
    #[serde(default)]
    pub fallback_models: Option<Vec<String>>,
    pub fields: Vec<FieldSection>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// Defaults to the top-level `concurrency`.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSection {
    pub key: String,
    #[serde(default)]
    pub description: String,
}

impl ProjectConfig {
    /// Reads and validates the configuration at `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PipelineError::configuration(format!(
                    "config file {} not found",
                    path.display()
                )))
            }
            Err(e) => {
                return Err(PipelineError::configuration(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        let mut config = Self::from_toml_str(&contents)?;
        config.resolve_paths(path);
        Ok(config)
    }

    /// Parses and validates a configuration document.
    pub fn from_toml_str(contents: &str) -> Result<Self, PipelineError> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| PipelineError::configuration(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, config_path: &Path) {
        self.personas = resolve_path(config_path, &self.personas);
        self.data_dir = resolve_path(config_path, &self.data_dir);
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.project.trim().is_empty() {
            return Err(PipelineError::configuration("project must not be empty"));
        }
        if self.concurrency == 0 || self.analysis.concurrency == Some(0) {
            return Err(PipelineError::configuration("concurrency must be at least 1"));
        }
        if self.interview.script.iter().all(|q| q.trim().is_empty()) {
            return Err(PipelineError::configuration(
                "interview.script must contain at least one question",
            ));
        }
        if self.interview.script.iter().any(|q| q.trim().is_empty()) {
            return Err(PipelineError::configuration(
                "interview.script must not contain blank questions",
            ));
        }
        if self.interview.respondent_attempts == 0 {
            return Err(PipelineError::configuration(
                "interview.respondent_attempts must be at least 1",
            ));
        }
        if self.interview.mode == InterviewerMode::ModelDriven
            && self.interview.interviewer_model.is_none()
        {
            return Err(PipelineError::configuration(
                "interview.interviewer_model is required in model_driven mode",
            ));
        }
        // Model ids are checked by conversion.
        self.interview_config()?;
        self.analysis_plan()?;

        let mut seen = HashSet::new();
        for segment in &self.segments {
            if !seen.insert(segment.id.as_str()) {
                return Err(PipelineError::configuration(format!(
                    "duplicate segment id '{}'",
                    segment.id
                )));
            }
        }
        Ok(())
    }

    /// Interview settings for the session runner.
    pub fn interview_config(&self) -> Result<InterviewConfig, PipelineError> {
        let section = &self.interview;
        let respondent_model = model_id("interview.respondent_model", &section.respondent_model)?;
        let interviewer_model = match &section.interviewer_model {
            Some(model) => model_id("interview.interviewer_model", model)?,
            None => respondent_model.clone(),
        };

        let mut segments = HashMap::new();
        for segment in &self.segments {
            let id = SegmentId::new(segment.id.trim())
                .ok_or_else(|| PipelineError::configuration("segment id must not be empty"))?;
            segments.insert(
                id.clone(),
                Segment {
                    id,
                    name: segment.name.clone(),
                    hints: segment.hints.clone(),
                },
            );
        }

        Ok(InterviewConfig {
            project: ProjectName::new(self.project.trim())
                .ok_or_else(|| PipelineError::configuration("project must not be empty"))?,
            mode: section.mode,
            interviewer_model,
            respondent_model,
            interviewer_system_prompt: section.interviewer_system_prompt.clone(),
            respondent_system_prompt: section.respondent_system_prompt.clone(),
            script: section.script.iter().map(|q| ScriptStep::new(q.trim())).collect(),
            segments,
            temperature: section.temperature,
            max_output_tokens: section.max_output_tokens,
            budgets: TurnBudgets {
                interviewer_attempts: section.interviewer_attempts,
                respondent_attempts: section.respondent_attempts,
                respondent_delay: Duration::from_secs(section.respondent_delay_secs),
            },
        })
    }

    /// Fields and model chain for the analysis cascade.
    pub fn analysis_plan(&self) -> Result<AnalysisPlan, PipelineError> {
        let section = &self.analysis;
        if section.fields.is_empty() {
            return Err(PipelineError::configuration(
                "analysis.fields must contain at least one field",
            ));
        }

        let mut keys = HashSet::new();
        let mut fields = Vec::with_capacity(section.fields.len());
        for field in &section.fields {
            let key = FieldKey::new(field.key.trim()).ok_or_else(|| {
                PipelineError::configuration("analysis field keys must not be empty")
            })?;
            if !keys.insert(key.clone()) {
                return Err(PipelineError::configuration(format!(
                    "duplicate analysis field '{key}'"
                )));
            }
            fields.push(FieldSpec::new(key, field.description.clone()));
        }

        let fallbacks = match &section.fallback_models {
            Some(models) => models
                .iter()
                .map(|m| model_id("analysis.fallback_models", m))
                .collect::<Result<Vec<_>, _>>()?,
            None => DEFAULT_FALLBACK_MODELS
                .iter()
                .filter_map(|m| ModelId::new(*m))
                .collect(),
        };

        Ok(AnalysisPlan {
            fields,
            primary: model_id("analysis.model", &section.model)?,
            fallbacks,
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            request_timeout: Duration::from_secs(self.api.request_timeout_secs),
            max_retries: self.api.max_retries,
            initial_backoff: Duration::from_millis(self.api.initial_backoff_ms),
        }
    }

    pub fn analysis_concurrency(&self) -> usize {
        self.analysis.concurrency.unwrap_or(self.concurrency)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn analysis_path(&self) -> PathBuf {
        self.data_dir.join("analysis.jsonl")
    }

    /// Reads the API credential from the configured environment variable.
    pub fn api_key(&self) -> Result<String, PipelineError> {
        match std::env::var(&self.api.key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(PipelineError::MissingCredential {
                name: self.api.key_env.clone(),
            }),
        }
    }
}

fn model_id(field: &str, value: &str) -> Result<ModelId, PipelineError> {
    ModelId::new(value.trim())
        .ok_or_else(|| PipelineError::configuration(format!("{field} must not be empty")))
}

/// Resolve a path relative to the config file's directory.
///
/// Absolute paths are returned unchanged.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    config_dir.join(path)
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_personas() -> PathBuf {
    PathBuf::from("personas.json")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_concurrency() -> usize {
    4
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_key_env() -> String {
    DEFAULT_KEY_ENV.to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_interviewer_prompt() -> String {
    "You are a warm, neutral user researcher conducting a one-on-one interview. \
Ask one question at a time and never answer on the respondent's behalf."
        .to_string()
}

fn default_interviewer_attempts() -> u32 {
    2
}

fn default_respondent_attempts() -> u32 {
    4
}

fn default_respondent_delay_secs() -> u64 {
    2
}
