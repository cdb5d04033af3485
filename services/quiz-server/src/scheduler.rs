//! Quiz Scheduler (C5): one Tokio task per active quiz, holding a
//! `tokio::sync::oneshot` cancellation handle the caller can fire for admin
//! cancel — the same oneshot-reply shape the teacher's
//! `ForwarderCommand::Restart` uses for a request/response round trip,
//! here repurposed for one-shot cancellation instead. A top-level
//! `SchedulerHandle` re-arms timers for all `scheduled` quizzes on boot by
//! querying `QuizRepo::get_scheduled`, the same "repo query feeds an
//! in-memory registry at startup" shape as `main.rs`'s stream-online reset.
//!
//! State machine (spec.md §4.5):
//! `scheduled --(t=scheduled_time-countdown_lead)--> countdown
//!  countdown --(per-second tick)--> countdown (quiz:countdown)
//!  countdown --(seconds_left=0)--> in_progress (quiz:start, schedules Q1)
//!  in_progress --(question sequence done)--> completed (quiz:finish, quiz:results_available)
//!  scheduled|countdown --(admin cancel)--> cancelled (quiz:cancelled)`

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::EngineError;
use crate::hub::ShardedHub;
use crate::models::{QuizRuntime, QuizStatus};
use crate::quiz_runtime;
use crate::repo::{QuestionRepo, QuizRepo, ResultRepo};
use quiz_protocol::{QuizCancelled, QuizCountdown, ServerMessage};

/// A cancellation reason sent down a quiz's control channel. Shared with
/// `quiz_runtime`, which selects on it during the answer window the same
/// way it selects on the per-second timer tick.
pub type CancelReceiver = tokio::sync::mpsc::Receiver<String>;
pub type CancelSender = tokio::sync::mpsc::Sender<String>;

/// The `AppState`-held handle: looks up or creates per-quiz cancellation
/// senders, mirroring `forwarder_command_senders`'s `device_id -> sender` map.
#[derive(Clone)]
pub struct SchedulerHandle {
    config: Config,
    hub: ShardedHub,
    quiz_repo: Arc<dyn QuizRepo>,
    question_repo: Arc<dyn QuestionRepo>,
    result_repo: Arc<dyn ResultRepo>,
    runtimes: Arc<RwLock<HashMap<Uuid, QuizRuntime>>>,
    controls: Arc<RwLock<HashMap<Uuid, CancelSender>>>,
}

impl SchedulerHandle {
    #[must_use]
    pub fn new(
        config: Config,
        hub: ShardedHub,
        quiz_repo: Arc<dyn QuizRepo>,
        question_repo: Arc<dyn QuestionRepo>,
        result_repo: Arc<dyn ResultRepo>,
        runtimes: Arc<RwLock<HashMap<Uuid, QuizRuntime>>>,
    ) -> Self {
        Self {
            config,
            hub,
            quiz_repo,
            question_repo,
            result_repo,
            runtimes,
            controls: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Re-arms timers for every `scheduled` (or `countdown`, if the process
    /// restarted mid-countdown) quiz on boot.
    pub async fn rearm_on_boot(&self) -> Result<(), EngineError> {
        let quizzes = self.quiz_repo.get_scheduled().await?;
        info!(count = quizzes.len(), "re-arming timers for scheduled quizzes");
        for quiz in quizzes {
            self.arm(quiz.id, quiz.scheduled_time).await;
        }
        Ok(())
    }

    /// Arms a single quiz: spawns its driving task.
    pub async fn arm(&self, quiz_id: Uuid, scheduled_time: chrono::DateTime<chrono::Utc>) {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        self.controls.write().await.insert(quiz_id, tx);

        let runner = QuizRunner {
            quiz_id,
            scheduled_time,
            config: self.config.clone(),
            hub: self.hub.clone(),
            quiz_repo: self.quiz_repo.clone(),
            question_repo: self.question_repo.clone(),
            result_repo: self.result_repo.clone(),
            runtimes: self.runtimes.clone(),
        };
        let controls = self.controls.clone();
        tokio::spawn(async move {
            runner.drive(rx).await;
            controls.write().await.remove(&quiz_id);
        });
    }

    /// Admin cancel (§4.5, §5): a control message that preempts pending
    /// timers and transitions the quiz to `cancelled`. A quiz with no armed
    /// timer (already completed, or never scheduled) is `TransitionNotAllowed`.
    pub async fn cancel(&self, quiz_id: Uuid, reason: &str) -> Result<(), EngineError> {
        let control = self.controls.read().await.get(&quiz_id).cloned();
        match control {
            Some(tx) => tx
                .send(reason.to_owned())
                .await
                .map_err(|_| EngineError::TransitionNotAllowed("quiz is no longer schedulable".to_owned())),
            None => Err(EngineError::TransitionNotAllowed("no armed timer for this quiz".to_owned())),
        }
    }

    pub async fn runtime_snapshot(&self, quiz_id: Uuid) -> Option<QuizRuntime> {
        self.runtimes.read().await.get(&quiz_id).cloned()
    }
}

struct QuizRunner {
    quiz_id: Uuid,
    scheduled_time: chrono::DateTime<chrono::Utc>,
    config: Config,
    hub: ShardedHub,
    quiz_repo: Arc<dyn QuizRepo>,
    question_repo: Arc<dyn QuestionRepo>,
    result_repo: Arc<dyn ResultRepo>,
    runtimes: Arc<RwLock<HashMap<Uuid, QuizRuntime>>>,
}

impl QuizRunner {
    async fn drive(&self, mut control: CancelReceiver) {
        if let Some(reason) = self.wait_for_countdown_lead(&mut control).await {
            self.emit_cancelled(&reason).await;
            return;
        }

        if let Err(e) = self.transition(QuizStatus::Countdown).await {
            warn!(quiz_id = %self.quiz_id, error = %e, "failed to transition to countdown");
            return;
        }

        if let Some(reason) = self.run_countdown(&mut control).await {
            self.emit_cancelled(&reason).await;
            return;
        }

        if let Err(e) = self.transition(QuizStatus::InProgress).await {
            warn!(quiz_id = %self.quiz_id, error = %e, "failed to transition to in_progress");
            return;
        }
        self.hub
            .broadcast_room(
                self.quiz_id,
                ServerMessage::QuizStart(quiz_protocol::QuizStart {
                    quiz_id: self.quiz_id,
                    total_questions: self.question_count().await,
                    server_timestamp: chrono::Utc::now().timestamp_millis(),
                }),
            )
            .await;

        let questions = match self.question_repo.list_for_quiz(self.quiz_id).await {
            Ok(q) => q,
            Err(e) => {
                warn!(quiz_id = %self.quiz_id, error = %e, "failed to load questions");
                self.emit_cancelled("failed to load questions").await;
                return;
            }
        };

        self.runtimes.write().await.insert(self.quiz_id, QuizRuntime::default());

        for (index, question) in questions.iter().enumerate() {
            {
                let mut runtimes = self.runtimes.write().await;
                if let Some(rt) = runtimes.get_mut(&self.quiz_id) {
                    rt.current_question_index = index;
                    rt.answered.clear();
                }
            }

            let outcome = quiz_runtime::run_question(
                &self.config,
                &self.hub,
                self.result_repo.as_ref(),
                self.runtimes.clone(),
                self.quiz_id,
                question,
                index + 1,
                questions.len(),
                &mut control,
            )
            .await;

            if let quiz_runtime::QuestionOutcome::Cancelled(reason) = outcome {
                self.emit_cancelled(&reason).await;
                return;
            }
        }

        self.finish(questions.len() as i32).await;
    }

    async fn question_count(&self) -> u32 {
        self.question_repo
            .list_for_quiz(self.quiz_id)
            .await
            .map(|q| q.len() as u32)
            .unwrap_or(0)
    }

    /// `scheduled --(t=scheduled_time-countdown_lead)--> countdown` (§4.5):
    /// stays quietly `scheduled` (no broadcast, no status write) until the
    /// lead window opens, so a quiz scheduled days out doesn't sit in
    /// `countdown` status or spam `quiz:countdown` for the whole wait.
    async fn wait_for_countdown_lead(&self, control: &mut CancelReceiver) -> Option<String> {
        loop {
            let now = chrono::Utc::now();
            let lead = chrono::Duration::from_std(self.config.countdown_lead).unwrap_or_default();
            let remaining = (self.scheduled_time - lead - now).num_milliseconds();
            if remaining <= 0 {
                return None;
            }

            // Re-check in at most 1s increments so a cancel during a long
            // wait is noticed promptly rather than only at the lead boundary.
            let tick = tokio::time::sleep(std::time::Duration::from_millis(remaining.min(1000) as u64));
            tokio::select! {
                () = tick => {}
                Some(reason) = control.recv() => return Some(reason),
            }
        }
    }

    /// Countdown phase: ticks once per second until `scheduled_time`,
    /// emitting `quiz:countdown{seconds_left}`; returns `Some(reason)` if
    /// cancelled mid-countdown.
    async fn run_countdown(&self, control: &mut CancelReceiver) -> Option<String> {
        loop {
            let now = chrono::Utc::now();
            let remaining = (self.scheduled_time - now).num_milliseconds();
            if remaining <= 0 {
                return None;
            }

            let seconds_left = ((remaining + 999) / 1000) as u32;
            self.hub
                .broadcast_room(
                    self.quiz_id,
                    ServerMessage::QuizCountdown(QuizCountdown { quiz_id: self.quiz_id, seconds_left }),
                )
                .await;

            let tick = tokio::time::sleep(std::time::Duration::from_millis(remaining.min(1000) as u64));
            tokio::select! {
                () = tick => {}
                Some(reason) = control.recv() => return Some(reason),
            }
        }
    }

    async fn transition(&self, next: QuizStatus) -> Result<(), EngineError> {
        self.quiz_repo.set_status(self.quiz_id, next).await
    }

    async fn emit_cancelled(&self, reason: &str) {
        let _ = self.quiz_repo.set_status(self.quiz_id, QuizStatus::Cancelled).await;
        self.hub
            .broadcast_room(
                self.quiz_id,
                ServerMessage::QuizCancelled(QuizCancelled {
                    quiz_id: self.quiz_id,
                    reason: reason.to_owned(),
                }),
            )
            .await;
        self.runtimes.write().await.remove(&self.quiz_id);
        info!(quiz_id = %self.quiz_id, reason, "quiz cancelled");
    }

    async fn finish(&self, total_questions: i32) {
        let _ = self.quiz_repo.set_status(self.quiz_id, QuizStatus::Completed).await;
        self.hub
            .broadcast_room(self.quiz_id, ServerMessage::QuizFinish(quiz_protocol::QuizFinish { quiz_id: self.quiz_id }))
            .await;

        if let Err(e) = self.result_repo.calculate_ranks(self.quiz_id, total_questions).await {
            warn!(quiz_id = %self.quiz_id, error = %e, "failed to calculate final ranks");
        }

        self.hub
            .broadcast_room(
                self.quiz_id,
                ServerMessage::QuizResultsAvailable(quiz_protocol::QuizResultsAvailable { quiz_id: self.quiz_id }),
            )
            .await;

        self.runtimes.write().await.remove(&self.quiz_id);
        info!(quiz_id = %self.quiz_id, "quiz finished");
    }
}
