//! Resumable, bounded-concurrency interview batches.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use pipeline::{Persona, PipelineError, Session, SessionStore};

use crate::interview::SessionRunner;

/// Runs interview sessions for a list of personas.
///
/// Personas that already have a stored session are skipped, so re-running a
/// batch after a crash picks up where it stopped. Each session is persisted
/// by its own task before the task's slot is released.
pub struct BatchScheduler {
    runner: Arc<SessionRunner>,
    store: Arc<dyn SessionStore>,
}

impl BatchScheduler {
    pub fn new(runner: Arc<SessionRunner>, store: Arc<dyn SessionStore>) -> Self {
        Self { runner, store }
    }

    /// Runs every persona without a stored session, at most `concurrency`
    /// (minimum 1) at a time, and returns the sessions produced by this call.
    ///
    /// # Errors
    ///
    /// On the first session or storage failure no further personas are
    /// started. Sessions already in flight run to completion and are
    /// persisted; then the first error is returned.
    #[instrument(skip_all, fields(personas = personas.len(), concurrency = concurrency))]
    pub async fn run_batch(
        &self,
        personas: Vec<Persona>,
        concurrency: usize,
    ) -> Result<Vec<Session>, PipelineError> {
        let concurrency = concurrency.max(1);
        let completed = self.store.completed_personas().await?;

        let requested = personas.len();
        let mut seen = HashSet::new();
        let mut pending: VecDeque<Persona> = personas
            .into_iter()
            .filter(|p| !completed.contains(&p.id) && seen.insert(p.id.clone()))
            .collect();
        info!(
            requested,
            already_completed = completed.len(),
            to_run = pending.len(),
            "starting interview batch"
        );

        let mut tasks = JoinSet::new();
        let mut sessions = Vec::with_capacity(pending.len());
        let mut first_error: Option<PipelineError> = None;

        loop {
            while first_error.is_none() && tasks.len() < concurrency {
                let Some(persona) = pending.pop_front() else {
                    break;
                };
                let runner = Arc::clone(&self.runner);
                let store = Arc::clone(&self.store);
                tasks.spawn(run_and_persist(runner, store, persona));
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
                Ok(session) => sessions.push(session),
                Err(e) if first_error.is_none() => {
                    error!(error = %e, in_flight = tasks.len(), "session failed, draining batch");
                    first_error = Some(e);
                }
                Err(e) => warn!(error = %e, "additional session failure while draining"),
            }
        }

        match first_error {
            Some(e) => {
                info!(finished = sessions.len(), unstarted = pending.len(), "interview batch aborted");
                Err(e)
            }
            None => {
                info!(finished = sessions.len(), "interview batch complete");
                Ok(sessions)
            }
        }
    }
}

async fn run_and_persist(
    runner: Arc<SessionRunner>,
    store: Arc<dyn SessionStore>,
    persona: Persona,
) -> Result<Session, PipelineError> {
    let session = runner
        .run(&persona)
        .await
        .map_err(|source| PipelineError::Session {
            persona_id: persona.id.clone(),
            source,
        })?;
    store.save(&session).await?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pipeline::{InterviewerMode, PersonaId};

    use super::*;
    use crate::testing::{
        bad_request, interview_config, ok, persona, session_for, system_text, FakeProvider,
        MemorySessionStore,
    };

    fn personas() -> Vec<Persona> {
        vec![
            persona("p-1", "Ana Silva"),
            persona("p-2", "Bruno Costa"),
            persona("p-3", "Carla Dias"),
            persona("p-4", "Duarte Reis"),
            persona("p-5", "Eva Lopes"),
        ]
    }

    fn scheduler(
        provider: Arc<FakeProvider>,
        store: Arc<MemorySessionStore>,
        respondent_attempts: u32,
    ) -> BatchScheduler {
        let mut config = interview_config(InterviewerMode::FixedScript);
        config.budgets.respondent_attempts = respondent_attempts;
        let runner = Arc::new(SessionRunner::new(provider, Arc::new(config)));
        BatchScheduler::new(runner, store)
    }

    fn persona_ids(sessions: &[Session]) -> Vec<&str> {
        let mut ids: Vec<&str> = sessions.iter().map(|s| s.persona_id.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    #[tokio::test(start_paused = true)]
    async fn skips_persisted_personas_and_respects_the_concurrency_cap() {
        let all = personas();
        let store = Arc::new(MemorySessionStore::with_sessions(vec![
            session_for(&all[0], "Already done."),
            session_for(&all[3], "Also done."),
        ]));
        let provider = Arc::new(
            FakeProvider::new(|_| ok("An answer.")).with_latency(Duration::from_millis(50)),
        );

        let sessions = scheduler(provider.clone(), store.clone(), 3)
            .run_batch(all, 2)
            .await
            .unwrap();

        assert_eq!(persona_ids(&sessions), vec!["p-2", "p-3", "p-5"]);
        assert_eq!(provider.calls(), 3 * 3, "three runners, three steps each");
        assert!(provider.max_in_flight() <= 2);
        assert_eq!(provider.max_in_flight(), 2);

        let saved = store.saved();
        assert_eq!(saved.len(), 5);
        let unique: HashSet<&PersonaId> = saved.iter().map(|s| &s.persona_id).collect();
        assert_eq!(unique.len(), 5, "no duplicate sessions");
    }

    #[tokio::test]
    async fn second_run_over_the_same_store_does_nothing() {
        let store = Arc::new(MemorySessionStore::default());
        let provider = Arc::new(FakeProvider::new(|_| ok("Yes.")));
        let scheduler = scheduler(provider.clone(), store.clone(), 3);

        assert_eq!(scheduler.run_batch(personas(), 3).await.unwrap().len(), 5);
        let calls = provider.calls();
        assert!(scheduler.run_batch(personas(), 3).await.unwrap().is_empty());
        assert_eq!(provider.calls(), calls);
        assert_eq!(store.saved().len(), 5);
    }

    #[tokio::test]
    async fn duplicate_personas_run_once() {
        let store = Arc::new(MemorySessionStore::default());
        let provider = Arc::new(FakeProvider::new(|_| ok("Yes.")));
        let ana = persona("p-1", "Ana Silva");

        let sessions = scheduler(provider, store.clone(), 3)
            .run_batch(vec![ana.clone(), ana.clone(), ana], 4)
            .await
            .unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(store.saved().len(), 1);
    }

    #[tokio::test]
    async fn zero_concurrency_is_treated_as_one() {
        let store = Arc::new(MemorySessionStore::default());
        let provider = Arc::new(
            FakeProvider::new(|_| ok("Yes.")).with_latency(Duration::from_millis(1)),
        );

        let sessions = scheduler(provider.clone(), store, 3)
            .run_batch(personas(), 0)
            .await
            .unwrap();

        assert_eq!(sessions.len(), 5);
        assert_eq!(provider.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_stops_admission_but_keeps_in_flight_results() {
        let store = Arc::new(MemorySessionStore::default());
        let provider = Arc::new(
            FakeProvider::new(|req| {
                if system_text(req).contains("Bruno") {
                    Err(bad_request())
                } else {
                    ok("Fine.")
                }
            })
            .with_latency(Duration::from_millis(10)),
        );

        let err = scheduler(provider.clone(), store.clone(), 1)
            .run_batch(personas(), 2)
            .await
            .unwrap_err();

        match err {
            PipelineError::Session { persona_id, .. } => assert_eq!(persona_id.as_str(), "p-2"),
            other => panic!("unexpected error: {other}"),
        }
        // Ana was in flight when Bruno failed; she finishes and is kept.
        assert_eq!(persona_ids(&store.saved()), vec!["p-1"]);
        for name in ["Carla", "Duarte", "Eva"] {
            assert!(
                provider.requests().iter().all(|r| !system_text(r).contains(name)),
                "{name} must not be started after the failure"
            );
        }
    }
}
