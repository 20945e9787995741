//! In-memory fakes for the port traits, shared by the stage tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use pipeline::{
    AnalysisRecord, AnalysisStore, CompletionError, CompletionProvider, CompletionRequest,
    CompletionResult, InterviewerMode, ModelId, Persona, PersonaId, ProjectName, Role,
    ScriptStep, SegmentId, Session, SessionId, SessionStore, StorageResult, Timestamp, Turn,
};

use crate::interview::{InterviewConfig, TurnBudgets};

type Responder = dyn Fn(&CompletionRequest) -> Result<CompletionResult, CompletionError> + Send + Sync;

/// Answers each request through a closure and records every request seen.
pub struct FakeProvider {
    respond: Box<Responder>,
    latency: Duration,
    requests: Mutex<Vec<CompletionRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeProvider {
    pub fn new(
        respond: impl Fn(&CompletionRequest) -> Result<CompletionResult, CompletionError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            latency: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every call suspends for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for FakeProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResult, CompletionError> {
        self.requests.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.respond)(&request)
    }
}

/// Text of the system turn of `request`, or `""`.
pub fn system_text(request: &CompletionRequest) -> &str {
    request
        .turns
        .iter()
        .find(|t| t.role == Role::System)
        .map(|t| t.text.as_str())
        .unwrap_or("")
}

/// Text of the last turn of `request`, or `""`.
pub fn last_text(request: &CompletionRequest) -> &str {
    request.turns.last().map(|t| t.text.as_str()).unwrap_or("")
}

pub fn ok(text: &str) -> Result<CompletionResult, CompletionError> {
    Ok(CompletionResult::from_text(text))
}

pub fn bad_request() -> CompletionError {
    CompletionError::Status {
        status: 400,
        message: "bad request".into(),
        body: "{}".into(),
        retry_after: None,
    }
}

pub fn persona(id: &str, name: &str) -> Persona {
    Persona {
        id: PersonaId::new(id).unwrap(),
        segment_id: SegmentId::new("seg-a").unwrap(),
        name: name.to_string(),
        age: 30,
        occupation: "designer".into(),
        biography: format!("{name} grew up by the sea."),
        hidden_traits: vec!["impatient".into()],
    }
}

/// Three-step script, one-second respondent back-off.
pub fn interview_config(mode: InterviewerMode) -> InterviewConfig {
    InterviewConfig {
        project: ProjectName::new("commute-study").unwrap(),
        mode,
        interviewer_model: ModelId::new("interviewer/model").unwrap(),
        respondent_model: ModelId::new("respondent/model").unwrap(),
        interviewer_system_prompt: "You are a friendly interviewer.".into(),
        respondent_system_prompt: "Stay in character.".into(),
        script: vec![
            ScriptStep::new("How do you get to work?"),
            ScriptStep::new("What would make it better?"),
            ScriptStep::new("Anything else?"),
        ],
        segments: HashMap::new(),
        temperature: Some(0.7),
        max_output_tokens: Some(300),
        budgets: TurnBudgets {
            interviewer_attempts: 2,
            respondent_attempts: 3,
            respondent_delay: Duration::from_secs(1),
        },
    }
}

/// A finished one-step session for `persona`.
pub fn session_for(persona: &Persona, answer: &str) -> Session {
    Session {
        id: SessionId::new_random(),
        project: ProjectName::new("commute-study").unwrap(),
        persona_id: persona.id.clone(),
        segment_id: persona.segment_id.clone(),
        started_at: Timestamp::now(),
        ended_at: Timestamp::now(),
        turns: vec![
            Turn::user("How do you get to work?"),
            Turn::assistant(answer),
        ],
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    pub sessions: Mutex<Vec<Session>>,
}

impl MemorySessionStore {
    pub fn with_sessions(sessions: Vec<Session>) -> Self {
        Self {
            sessions: Mutex::new(sessions),
        }
    }

    pub fn saved(&self) -> Vec<Session> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn completed_personas(&self) -> StorageResult<HashSet<PersonaId>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.persona_id.clone())
            .collect())
    }

    async fn save(&self, session: &Session) -> StorageResult<()> {
        self.sessions.lock().unwrap().push(session.clone());
        Ok(())
    }

    async fn load_all(&self) -> StorageResult<Vec<Session>> {
        Ok(self.saved())
    }
}

#[derive(Default)]
pub struct MemoryAnalysisStore {
    pub records: Mutex<Vec<AnalysisRecord>>,
}

impl MemoryAnalysisStore {
    pub fn records(&self) -> Vec<AnalysisRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn analyzed_personas(&self) -> StorageResult<HashSet<PersonaId>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.persona_id.clone())
            .collect())
    }

    async fn append(&self, record: &AnalysisRecord) -> StorageResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
