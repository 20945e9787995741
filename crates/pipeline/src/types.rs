//! Shared value types for the interview domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (a finished session holds two turns per
//! script step, an analysis record holds exactly the configured keys) and
//! flow between the stages.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{FieldKey, ModelId, PersonaId, ProjectName, SegmentId, SessionId};

// ---------------------------------------------------------------------------
// Conversation turns
// ---------------------------------------------------------------------------

/// Speaker role of a [`Turn`], in the vocabulary of the completion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Instructions that frame the whole exchange.
    System,
    /// The party asking. In a stored session this is always the interviewer.
    User,
    /// The party answering. In a stored session this is always the respondent.
    Assistant,
}

impl Role {
    /// Returns the wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Swaps `User` and `Assistant`; `System` is unchanged.
    ///
    /// Used when the interviewer model is asked to speak: from its point of
    /// view the respondent is the user.
    pub fn mirrored(self) -> Self {
        match self {
            Role::System => Role::System,
            Role::User => Role::Assistant,
            Role::Assistant => Role::User,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One utterance in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

// ---------------------------------------------------------------------------
// Completion request / result
// ---------------------------------------------------------------------------

/// A single structured completion request.
///
/// Constructed per call and never mutated once handed to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: ModelId,
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model: ModelId) -> Self {
        Self {
            model,
            turns: Vec::new(),
            temperature: None,
            max_output_tokens: None,
        }
    }

    #[must_use]
    pub fn with_turn(mut self, turn: Turn) -> Self {
        self.turns.push(turn);
        self
    }

    #[must_use]
    pub fn with_turns(mut self, turns: impl IntoIterator<Item = Turn>) -> Self {
        self.turns.extend(turns);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_max_output_tokens(mut self, max_output_tokens: Option<u32>) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }
}

/// One candidate output returned by the completion service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Candidate {
    /// Primary output text.
    pub text: String,
    /// Secondary reasoning text some models emit instead of, or next to, the
    /// primary text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Candidate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reasoning: None,
        }
    }

    /// Returns the primary text, or the reasoning text when the primary is blank.
    pub fn content(&self) -> &str {
        if !self.text.trim().is_empty() {
            return &self.text;
        }
        self.reasoning.as_deref().unwrap_or("")
    }
}

/// Ordered candidate outputs of one successful completion call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompletionResult {
    pub candidates: Vec<Candidate>,
}

impl CompletionResult {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    /// Convenience constructor for a single-candidate result.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(vec![Candidate::new(text)])
    }

    /// Content of the first candidate, or `""` when there are none.
    pub fn content(&self) -> &str {
        self.candidates.first().map(Candidate::content).unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Interview inputs
// ---------------------------------------------------------------------------

/// A synthetic respondent profile. Read-only input to an interview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: PersonaId,
    pub segment_id: SegmentId,
    pub name: String,
    pub age: u32,
    pub occupation: String,
    pub biography: String,
    /// Traits the respondent acts on but never states outright. Never empty.
    pub hidden_traits: Vec<String>,
}

impl Persona {
    /// First whitespace-separated word of the persona's name.
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("")
    }
}

/// An audience segment and the hints that shape its respondents' answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub name: String,
    #[serde(default)]
    pub hints: String,
}

/// One step of the interview script: the canonical question to ask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStep {
    pub question: String,
}

impl ScriptStep {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
        }
    }
}

/// How interviewer turns are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewerMode {
    /// The literal script line is used; no network call.
    #[default]
    FixedScript,
    /// A model paraphrases each script line in light of the conversation so far.
    ModelDriven,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The complete transcript of one persona's interview.
///
/// Built once, at completion, and never mutated after it has been persisted.
/// Holds exactly two turns per script step: the interviewer's (`User`) followed
/// by the respondent's (`Assistant`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub project: ProjectName,
    pub persona_id: PersonaId,
    pub segment_id: SegmentId,
    pub started_at: Timestamp,
    pub ended_at: Timestamp,
    pub turns: Vec<Turn>,
}

impl Session {
    /// Renders the transcript as `Interviewer:` / `Respondent:` lines.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for turn in &self.turns {
            let speaker = match turn.role {
                Role::User => "Interviewer",
                Role::Assistant => "Respondent",
                Role::System => continue,
            };
            out.push_str(speaker);
            out.push_str(": ");
            out.push_str(turn.text.trim());
            out.push_str("\n\n");
        }
        out.truncate(out.trim_end().len());
        out
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// One entry of the configured analysis schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: FieldKey,
    #[serde(default)]
    pub description: String,
}

impl FieldSpec {
    pub fn new(key: FieldKey, description: impl Into<String>) -> Self {
        Self {
            key,
            description: description.into(),
        }
    }
}

/// Structured analysis extracted from one session.
///
/// `fields` always holds exactly the configured keys, in configured order;
/// a value nobody could extract is the empty string, never absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub persona_id: PersonaId,
    pub segment_id: SegmentId,
    pub session_id: SessionId,
    /// The model whose output produced `fields`; `None` when every model failed.
    pub model: Option<ModelId>,
    pub fields: IndexMap<FieldKey, String>,
}

impl AnalysisRecord {
    /// A record for `session` with every configured field set to `""`.
    pub fn empty(session: &Session, schema: &[FieldSpec]) -> Self {
        Self::from_lookup(session, schema, None, |_| None)
    }

    /// Builds a record by asking `lookup` for each configured key in order.
    /// Keys `lookup` cannot answer default to `""`.
    pub fn from_lookup(
        session: &Session,
        schema: &[FieldSpec],
        model: Option<ModelId>,
        mut lookup: impl FnMut(&FieldKey) -> Option<String>,
    ) -> Self {
        let fields = schema
            .iter()
            .map(|spec| {
                let value = lookup(&spec.key).unwrap_or_default();
                (spec.key.clone(), value)
            })
            .collect();
        Self {
            persona_id: session.persona_id.clone(),
            segment_id: session.segment_id.clone(),
            session_id: session.id,
            model,
            fields,
        }
    }

    /// Returns `true` if every field is empty.
    pub fn is_blank(&self) -> bool {
        self.fields.values().all(|v| v.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(turns: Vec<Turn>) -> Session {
        Session {
            id: SessionId::new_random(),
            project: ProjectName::new("demo").unwrap(),
            persona_id: PersonaId::new("p-1").unwrap(),
            segment_id: SegmentId::new("s-1").unwrap(),
            started_at: Timestamp::now(),
            ended_at: Timestamp::now(),
            turns,
        }
    }

    fn schema() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new(FieldKey::new("sentiment").unwrap(), "overall mood"),
            FieldSpec::new(FieldKey::new("pain_point").unwrap(), "main complaint"),
        ]
    }

    #[test]
    fn candidate_falls_back_to_reasoning_when_text_is_blank() {
        let candidate = Candidate {
            text: "  \n".into(),
            reasoning: Some("thought it through".into()),
        };
        assert_eq!(candidate.content(), "thought it through");

        let candidate = Candidate {
            text: "answer".into(),
            reasoning: Some("ignored".into()),
        };
        assert_eq!(candidate.content(), "answer");
    }

    #[test]
    fn result_without_candidates_has_empty_content() {
        assert_eq!(CompletionResult::default().content(), "");
    }

    #[test]
    fn mirrored_roles_swap_speakers_only() {
        assert_eq!(Role::User.mirrored(), Role::Assistant);
        assert_eq!(Role::Assistant.mirrored(), Role::User);
        assert_eq!(Role::System.mirrored(), Role::System);
    }

    #[test]
    fn empty_record_has_every_configured_key() {
        let record = AnalysisRecord::empty(&session(vec![]), &schema());
        let keys: Vec<_> = record.fields.keys().map(FieldKey::as_str).collect();
        assert_eq!(keys, vec!["sentiment", "pain_point"]);
        assert!(record.is_blank());
        assert!(record.model.is_none());
    }

    #[test]
    fn transcript_labels_speakers() {
        let s = session(vec![
            Turn::user("How do you commute?"),
            Turn::assistant(" By bike. "),
        ]);
        assert_eq!(
            s.transcript(),
            "Interviewer: How do you commute?\n\nRespondent: By bike."
        );
    }

    #[test]
    fn persona_first_name() {
        let persona = Persona {
            id: PersonaId::new("p").unwrap(),
            segment_id: SegmentId::new("s").unwrap(),
            name: "Maria  Lopez".into(),
            age: 41,
            occupation: "nurse".into(),
            biography: String::new(),
            hidden_traits: vec!["frugal".into()],
        };
        assert_eq!(persona.first_name(), "Maria");
    }
}
