//! Structured analysis of finished sessions with model fallback.
//!
//! Every model in the chain gets up to three chances to yield the configured
//! fields: a strict JSON parse of its answer, a strict parse of a follow-up
//! answer after a JSON-only reminder, and finally a loose line-by-line scan.
//! When the whole chain fails the record is still produced, with every field
//! empty. Analysis never fails a batch over one transcript.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use pipeline::{
    extract_json, AnalysisRecord, AnalysisStore, CompletionProvider, CompletionRequest,
    FieldSpec, ModelId, PipelineError, Session, Turn,
};

use crate::prompts;

/// Field values keyed by field key.
type FieldValues = HashMap<String, String>;

/// Fields to extract and the models to extract them with.
#[derive(Debug, Clone)]
pub struct AnalysisPlan {
    pub fields: Vec<FieldSpec>,
    pub primary: ModelId,
    pub fallbacks: Vec<ModelId>,
}

/// Tries each model in turn until one yields usable field values.
pub struct FallbackCascade {
    provider: Arc<dyn CompletionProvider>,
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
}

impl FallbackCascade {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            temperature: None,
            max_output_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: Option<u32>) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Extracts `fields` from `session`, trying `primary` then each fallback.
    ///
    /// The record always carries exactly the configured keys. `model` names
    /// the model whose answer was used, or is `None` when all of them failed.
    #[instrument(skip_all, fields(persona = %session.persona_id, session = %session.id))]
    pub async fn analyze(
        &self,
        session: &Session,
        fields: &[FieldSpec],
        primary: &ModelId,
        fallbacks: &[ModelId],
    ) -> AnalysisRecord {
        let prompt = prompts::analysis_prompt(session, fields);

        for model in std::iter::once(primary).chain(fallbacks) {
            if let Some(values) = self.try_model(model, &prompt, fields).await {
                info!(%model, "analysis complete");
                return AnalysisRecord::from_lookup(session, fields, Some(model.clone()), |key| {
                    values.get(key.as_str()).cloned()
                });
            }
            warn!(%model, "model gave no usable analysis, trying next");
        }

        warn!("every model failed, recording empty analysis");
        AnalysisRecord::empty(session, fields)
    }

    async fn try_model(
        &self,
        model: &ModelId,
        prompt: &str,
        fields: &[FieldSpec],
    ) -> Option<FieldValues> {
        let first = self.request(model, prompt).await?;
        if let Some(values) = parse_strict(&first, fields) {
            return Some(values);
        }

        debug!(%model, "answer was not parseable JSON, sending reminder");
        let reminder = self.request(model, &prompts::reminder_prompt(prompt)).await;
        if let Some(values) = reminder.as_deref().and_then(|text| parse_strict(text, fields)) {
            return Some(values);
        }

        let latest = reminder.as_deref().unwrap_or(&first);
        let values = parse_loose(latest, fields);
        if values.is_some() {
            debug!(%model, "recovered fields from labelled lines");
        }
        values
    }

    /// One completion call; `None` on error or empty content.
    async fn request(&self, model: &ModelId, prompt: &str) -> Option<String> {
        let request = CompletionRequest::new(model.clone())
            .with_turn(Turn::system(prompts::ANALYST_SYSTEM_PROMPT))
            .with_turn(Turn::user(prompt))
            .with_temperature(self.temperature)
            .with_max_output_tokens(self.max_output_tokens);

        match self.provider.complete(request).await {
            Ok(result) => {
                let text = result.content().trim();
                if text.is_empty() {
                    warn!(%model, "analysis answer was empty");
                    None
                } else {
                    Some(text.to_string())
                }
            }
            Err(e) => {
                warn!(%model, error = %e, "analysis request failed");
                None
            }
        }
    }
}

/// Parses `text` as a JSON object carrying at least one configured field.
///
/// The whole text is tried first, then the span located by
/// [`extract_json`]. An array is accepted when its first element is an
/// object. Configured values must be scalars: strings are kept, numbers and
/// booleans are stringified, `null` becomes `""`. A nested value under a
/// configured key rejects the parse. Unknown keys are ignored.
pub fn parse_strict(text: &str, fields: &[FieldSpec]) -> Option<FieldValues> {
    let text = text.trim();
    std::iter::once(text)
        .chain(extract_json(text))
        .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .find_map(|value| field_values(value, fields))
}

fn field_values(value: Value, fields: &[FieldSpec]) -> Option<FieldValues> {
    let object = match value {
        Value::Object(map) => map,
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(map)) => map,
            _ => return None,
        },
        _ => return None,
    };

    let mut values = FieldValues::new();
    for spec in fields {
        let Some(value) = object.get(spec.key.as_str()) else {
            continue;
        };
        let text = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            Value::Array(_) | Value::Object(_) => return None,
        };
        values.insert(spec.key.as_str().to_string(), text);
    }

    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Recovers fields from `key: value` lines.
///
/// Keys match case-insensitively, with `_` also matching a space. The
/// separator is one of `- – — : =`; an optional list bullet or number, bold
/// markers and quotes around the key are tolerated. Succeeds only when at
/// least one field gets a non-empty value.
pub fn parse_loose(text: &str, fields: &[FieldSpec]) -> Option<FieldValues> {
    let mut values = FieldValues::new();
    for spec in fields {
        let Some(pattern) = line_pattern(spec.key.as_str()) else {
            continue;
        };
        let found = pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| clean_value(m.as_str()))
            .find(|v| !v.is_empty());
        if let Some(value) = found {
            values.insert(spec.key.as_str().to_string(), value);
        }
    }

    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

fn line_pattern(key: &str) -> Option<Regex> {
    let key = regex::escape(key).replace('_', "[ _]");
    let pattern = format!(
        r#"(?im)^[ \t]*(?:[-*•][ \t]+|\d+[.)][ \t]+)?(?:\*\*)?["'`]?{key}["'`]?(?:\*\*)?[ \t]*[-–—:=](?:\*\*)?[ \t]*(.*)$"#
    );
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(key, error = %e, "could not build field pattern");
            None
        }
    }
}

fn clean_value(raw: &str) -> String {
    let value = raw.trim().trim_end_matches(',').trim();
    let value = value.strip_suffix("**").unwrap_or(value).trim();
    for quote in ['"', '\'', '`'] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].trim().to_string();
        }
    }
    value.to_string()
}

/// Runs the cascade over stored sessions and appends each record as it lands.
///
/// Sessions whose persona already has a stored record are skipped, so the
/// batch resumes after interruption. Only storage failures abort it.
pub struct AnalysisBatch {
    cascade: Arc<FallbackCascade>,
    store: Arc<dyn AnalysisStore>,
    plan: Arc<AnalysisPlan>,
}

impl AnalysisBatch {
    pub fn new(
        cascade: Arc<FallbackCascade>,
        store: Arc<dyn AnalysisStore>,
        plan: Arc<AnalysisPlan>,
    ) -> Self {
        Self {
            cascade,
            store,
            plan,
        }
    }

    /// Analyses every session without a stored record, at most `concurrency`
    /// (minimum 1) at a time, and returns the records produced by this call.
    #[instrument(skip_all, fields(sessions = sessions.len(), concurrency = concurrency))]
    pub async fn run(
        &self,
        sessions: Vec<Session>,
        concurrency: usize,
    ) -> Result<Vec<AnalysisRecord>, PipelineError> {
        let concurrency = concurrency.max(1);
        let analyzed = self.store.analyzed_personas().await?;

        let mut seen = HashSet::new();
        let mut pending: VecDeque<Session> = sessions
            .into_iter()
            .filter(|s| !analyzed.contains(&s.persona_id) && seen.insert(s.persona_id.clone()))
            .collect();
        info!(
            already_analyzed = analyzed.len(),
            to_run = pending.len(),
            "starting analysis batch"
        );

        let mut tasks = JoinSet::new();
        let mut records = Vec::with_capacity(pending.len());
        let mut first_error: Option<PipelineError> = None;

        loop {
            while first_error.is_none() && tasks.len() < concurrency {
                let Some(session) = pending.pop_front() else {
                    break;
                };
                tasks.spawn(analyze_and_append(
                    Arc::clone(&self.cascade),
                    Arc::clone(&self.store),
                    Arc::clone(&self.plan),
                    session,
                ));
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let outcome = joined.unwrap_or_else(|e| {
                Err(PipelineError::Task {
                    message: e.to_string(),
                })
            });
            match outcome {
                Ok(record) => records.push(record),
                Err(e) if first_error.is_none() => {
                    error!(error = %e, "analysis store failed, draining batch");
                    first_error = Some(e);
                }
                Err(e) => warn!(error = %e, "additional failure while draining"),
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        let blank = records.iter().filter(|r| r.model.is_none()).count();
        info!(records = records.len(), blank, "analysis batch complete");
        Ok(records)
    }
}

async fn analyze_and_append(
    cascade: Arc<FallbackCascade>,
    store: Arc<dyn AnalysisStore>,
    plan: Arc<AnalysisPlan>,
    session: Session,
) -> Result<AnalysisRecord, PipelineError> {
    let record = cascade
        .analyze(&session, &plan.fields, &plan.primary, &plan.fallbacks)
        .await;
    store.append(&record).await?;
    Ok(record)
}
