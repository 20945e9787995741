//! One interview session, step by step.
//!
//! The runner walks the script linearly. Each step appends one interviewer
//! turn and one respondent turn, so a finished session always holds
//! `2 * script.len()` turns. Interviewer failures degrade to the literal
//! script line; respondent failures past their budget fail the session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use pipeline::{
    sanitize_utterance, CompletionProvider, CompletionRequest, InterviewerMode, ModelId,
    Persona, ProjectName, ScriptStep, Segment, SegmentId, Session, SessionError, SessionId,
    Timestamp, Turn,
};

use crate::prompts;

/// Attempt budgets for the two kinds of turn.
///
/// Kept separate on purpose: a lost interviewer paraphrase costs nothing (the
/// literal line is used), a lost respondent answer costs the whole session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnBudgets {
    /// Attempts at a model-driven interviewer paraphrase before falling back.
    pub interviewer_attempts: u32,
    /// Attempts at a respondent answer before the session fails.
    pub respondent_attempts: u32,
    /// Base of the linear delay between respondent attempts: attempt *k*
    /// (one-based, k ≥ 2) waits `respondent_delay * (k - 1)`.
    pub respondent_delay: Duration,
}

impl Default for TurnBudgets {
    fn default() -> Self {
        Self {
            interviewer_attempts: 2,
            respondent_attempts: 4,
            respondent_delay: Duration::from_secs(2),
        }
    }
}

impl TurnBudgets {
    /// Pause before respondent attempt `attempt` (one-based). Saturates
    /// instead of overflowing on very large delays.
    pub fn respondent_backoff(&self, attempt: u32) -> Duration {
        self.respondent_delay
            .saturating_mul(attempt.saturating_sub(1))
    }
}

/// Everything an interview needs besides the persona.
#[derive(Debug, Clone)]
pub struct InterviewConfig {
    pub project: ProjectName,
    pub mode: InterviewerMode,
    pub interviewer_model: ModelId,
    pub respondent_model: ModelId,
    pub interviewer_system_prompt: String,
    pub respondent_system_prompt: String,
    pub script: Vec<ScriptStep>,
    pub segments: HashMap<SegmentId, Segment>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub budgets: TurnBudgets,
}

/// Drives one persona through the interview script.
pub struct SessionRunner {
    provider: Arc<dyn CompletionProvider>,
    config: Arc<InterviewConfig>,
}

impl SessionRunner {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: Arc<InterviewConfig>) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &InterviewConfig {
        &self.config
    }

    /// Runs the full script for `persona`.
    ///
    /// Returns the finished, not yet persisted, session. Fails only when a
    /// respondent turn exhausts its budget; the partial transcript is dropped.
    #[instrument(skip_all, fields(persona = %persona.id))]
    pub async fn run(&self, persona: &Persona) -> Result<Session, SessionError> {
        let started_at = Timestamp::now();
        let total = self.config.script.len();
        let system_prompt = prompts::respondent_system_prompt(
            &self.config.respondent_system_prompt,
            persona,
            self.config.segments.get(&persona.segment_id),
        );
        let mut transcript: Vec<Turn> = Vec::with_capacity(total * 2);

        for (step, script_step) in self.config.script.iter().enumerate() {
            let question = self.interviewer_turn(step, script_step, &transcript).await;
            transcript.push(Turn::user(question));

            let answer = self
                .respondent_turn(step, persona, &system_prompt, &transcript)
                .await?;
            transcript.push(Turn::assistant(answer));
            debug!(step, total, "interview step complete");
        }

        info!(turns = transcript.len(), "interview complete");
        Ok(Session {
            id: SessionId::new_random(),
            project: self.config.project.clone(),
            persona_id: persona.id.clone(),
            segment_id: persona.segment_id.clone(),
            started_at,
            ended_at: Timestamp::now(),
            turns: transcript,
        })
    }

    /// Produces the interviewer's utterance for `step`. Never fails.
    async fn interviewer_turn(
        &self,
        step: usize,
        script_step: &ScriptStep,
        transcript: &[Turn],
    ) -> String {
        let literal = script_step.question.trim().to_string();
        if self.config.mode == InterviewerMode::FixedScript {
            return literal;
        }

        let request = CompletionRequest::new(self.config.interviewer_model.clone())
            .with_turn(Turn::system(self.config.interviewer_system_prompt.clone()))
            .with_turns(
                transcript
                    .iter()
                    .map(|t| Turn::new(t.role.mirrored(), t.text.clone())),
            )
            .with_turn(Turn::user(prompts::interviewer_instruction(
                step,
                self.config.script.len(),
                &literal,
            )))
            .with_temperature(self.config.temperature)
            .with_max_output_tokens(self.config.max_output_tokens);

        for attempt in 1..=self.config.budgets.interviewer_attempts {
            match self.provider.complete(request.clone()).await {
                Ok(result) => {
                    let text = sanitize_utterance(result.content(), None);
                    if !text.is_empty() {
                        return text;
                    }
                    debug!(step, attempt, "interviewer returned empty text");
                }
                Err(e) => {
                    warn!(step, attempt, error = %e, "interviewer turn failed, using script line");
                    return literal;
                }
            }
        }
        debug!(step, "interviewer attempts exhausted, using script line");
        literal
    }

    /// Produces the respondent's answer to the last interviewer turn.
    async fn respondent_turn(
        &self,
        step: usize,
        persona: &Persona,
        system_prompt: &str,
        transcript: &[Turn],
    ) -> Result<String, SessionError> {
        let request = CompletionRequest::new(self.config.respondent_model.clone())
            .with_turn(Turn::system(system_prompt))
            .with_turns(transcript.iter().cloned())
            .with_temperature(self.config.temperature)
            .with_max_output_tokens(self.config.max_output_tokens);

        let budget = self.config.budgets.respondent_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=budget {
            if attempt > 1 {
                tokio::time::sleep(self.config.budgets.respondent_backoff(attempt)).await;
            }
            match self.provider.complete(request.clone()).await {
                Ok(result) => {
                    let text = sanitize_utterance(result.content(), Some(persona.first_name()));
                    if !text.is_empty() {
                        return Ok(text);
                    }
                    warn!(step, attempt, "respondent returned empty text");
                    last_error = None;
                }
                Err(e) => {
                    warn!(step, attempt, error = %e, "respondent turn failed");
                    last_error = Some(e);
                }
            }
        }

        Err(SessionError::RespondentExhausted {
            step,
            attempts: budget,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use pipeline::Role;
    use tokio::time::Instant;

    use super::*;
    use crate::testing::{
        bad_request, interview_config, last_text, ok, persona, system_text, FakeProvider,
    };

    #[test]
    fn respondent_backoff_grows_linearly_and_saturates() {
        let budgets = TurnBudgets::default();
        assert_eq!(budgets.respondent_backoff(1), Duration::ZERO);
        assert_eq!(budgets.respondent_backoff(3), Duration::from_secs(4));

        let huge = TurnBudgets {
            respondent_delay: Duration::MAX,
            ..TurnBudgets::default()
        };
        assert_eq!(huge.respondent_backoff(3), Duration::MAX);
        assert_eq!(huge.respondent_backoff(u32::MAX), Duration::MAX);
    }

    fn runner(provider: Arc<FakeProvider>, mode: InterviewerMode) -> SessionRunner {
        SessionRunner::new(provider, Arc::new(interview_config(mode)))
    }

    #[tokio::test]
    async fn fixed_script_uses_literal_lines_without_interviewer_calls() {
        let provider = Arc::new(FakeProvider::new(|_| ok("Respondent: By tram, mostly.")));
        let session = runner(provider.clone(), InterviewerMode::FixedScript)
            .run(&persona("p-1", "Ana Silva"))
            .await
            .unwrap();

        assert_eq!(session.turns.len(), 6);
        assert_eq!(session.turns[0], Turn::user("How do you get to work?"));
        assert_eq!(session.turns[1], Turn::assistant("By tram, mostly."));
        assert_eq!(session.turns[4].text, "Anything else?");
        assert_eq!(provider.calls(), 3, "one respondent call per step");
        assert!(provider
            .requests()
            .iter()
            .all(|r| r.model.as_str() == "respondent/model"));
    }

    #[tokio::test]
    async fn respondent_sees_persona_and_full_transcript() {
        let provider = Arc::new(FakeProvider::new(|_| ok("Sure.")));
        runner(provider.clone(), InterviewerMode::FixedScript)
            .run(&persona("p-1", "Ana Silva"))
            .await
            .unwrap();

        let last = provider.requests().pop().unwrap();
        assert!(system_text(&last).contains("Ana Silva"));
        assert!(system_text(&last).contains("impatient"));
        // system + 2 completed steps + the third question
        assert_eq!(last.turns.len(), 1 + 4 + 1);
        assert_eq!(last_text(&last), "Anything else?");
    }

    #[tokio::test]
    async fn model_driven_interviewer_paraphrases_with_mirrored_roles() {
        let provider = Arc::new(FakeProvider::new(|req| {
            if req.model.as_str() == "interviewer/model" {
                ok("Interviewer: \"So, what's your commute like?\"")
            } else {
                ok("Long.")
            }
        }));
        let session = runner(provider.clone(), InterviewerMode::ModelDriven)
            .run(&persona("p-1", "Ana Silva"))
            .await
            .unwrap();

        assert_eq!(session.turns[0].text, "So, what's your commute like?");
        assert_eq!(session.turns.len(), 6);

        let second_interviewer_call = provider
            .requests()
            .into_iter()
            .filter(|r| r.model.as_str() == "interviewer/model")
            .nth(1)
            .unwrap();
        // Previous respondent answer is the interviewer model's user input.
        assert_eq!(second_interviewer_call.turns[1].role, Role::Assistant);
        assert_eq!(second_interviewer_call.turns[2].role, Role::User);
        assert!(last_text(&second_interviewer_call).contains("What would make it better?"));
    }

    #[tokio::test]
    async fn interviewer_failure_falls_back_to_script_line() {
        let provider = Arc::new(FakeProvider::new(|req| {
            if req.model.as_str() == "interviewer/model" {
                Err(bad_request())
            } else {
                ok("Fine.")
            }
        }));
        let session = runner(provider, InterviewerMode::ModelDriven)
            .run(&persona("p-1", "Ana Silva"))
            .await
            .unwrap();

        let questions: Vec<_> = session
            .turns
            .iter()
            .filter(|t| t.role == Role::User)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(
            questions,
            vec!["How do you get to work?", "What would make it better?", "Anything else?"]
        );
    }

    #[tokio::test]
    async fn empty_interviewer_output_is_retried_then_abandoned() {
        let provider = Arc::new(FakeProvider::new(|req| {
            if req.model.as_str() == "interviewer/model" {
                ok("<think>hmm</think>   ")
            } else {
                ok("Okay.")
            }
        }));
        let session = runner(provider.clone(), InterviewerMode::ModelDriven)
            .run(&persona("p-1", "Ana Silva"))
            .await
            .unwrap();

        assert_eq!(session.turns[0].text, "How do you get to work?");
        let interviewer_calls = provider
            .requests()
            .iter()
            .filter(|r| r.model.as_str() == "interviewer/model")
            .count();
        assert_eq!(interviewer_calls, 3 * 2, "two attempts per step");
    }

    #[tokio::test(start_paused = true)]
    async fn respondent_retries_with_linear_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let provider = Arc::new(FakeProvider::new(move |_| {
            // Empty, error, then an answer on the first step only.
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => ok(""),
                1 => Err(bad_request()),
                _ => ok("Eventually."),
            }
        }));
        let started = Instant::now();
        let session = runner(provider, InterviewerMode::FixedScript)
            .run(&persona("p-1", "Ana Silva"))
            .await
            .unwrap();

        assert_eq!(session.turns[1].text, "Eventually.");
        // 1s before attempt 2, 2s before attempt 3.
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3 + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn respondent_exhaustion_fails_the_session() {
        let provider = Arc::new(FakeProvider::new(|_| Err(bad_request())));
        let err = runner(provider.clone(), InterviewerMode::FixedScript)
            .run(&persona("p-1", "Ana Silva"))
            .await
            .unwrap_err();

        match err {
            SessionError::RespondentExhausted {
                step,
                attempts,
                last_error,
            } => {
                assert_eq!(step, 0);
                assert_eq!(attempts, 3);
                assert_eq!(last_error.and_then(|e| e.status()), Some(400));
            }
        }
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn respondent_name_label_is_sanitised() {
        let provider = Arc::new(FakeProvider::new(|_| ok("Ana: I walk.")));
        let session = runner(provider, InterviewerMode::FixedScript)
            .run(&persona("p-1", "Ana Silva"))
            .await
            .unwrap();
        assert_eq!(session.turns[1].text, "I walk.");
    }
}
