//! Question Runtime (C6): driven by the scheduler task for the broadcast
//! and timer-tick side; the answer-gate side (`submit_answer`) is called
//! directly from the WS read loop (`ws.rs`) against the same shared
//! `QuizRuntime` map, the way the teacher's `handle_event_batch` and
//! `ws_forwarder`'s heartbeat loop both mutate `AppState` concurrently from
//! different call sites without a single owning task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::EngineError;
use crate::hub::ShardedHub;
use crate::models::{ActiveQuestion, Question, QuizRuntime, QuizStatus, UserAnswer};
use crate::repo::{QuizRepo, ResultRepo};
use crate::scheduler::CancelReceiver;
use crate::scoring;
use quiz_protocol::{
    QuestionOption, QuizAnswerReveal, QuizAnswerResult, QuizElimination, QuizQuestion, QuizTimer, ServerMessage,
};

pub enum QuestionOutcome {
    Completed,
    Cancelled(String),
}

type Runtimes = Arc<RwLock<HashMap<Uuid, QuizRuntime>>>;

/// Drives one question through §4.6 steps 1-8: broadcast, per-second timer,
/// answer window, elimination sweep for non-respondents, reveal.
#[allow(clippy::too_many_arguments)]
pub async fn run_question(
    config: &Config,
    hub: &ShardedHub,
    result_repo: &dyn ResultRepo,
    runtimes: Runtimes,
    quiz_id: Uuid,
    question: &Question,
    number: usize,
    total: usize,
    control: &mut CancelReceiver,
) -> QuestionOutcome {
    let started_at = Instant::now();
    let active = ActiveQuestion {
        question_id: question.id,
        correct_option: question.correct_option,
        option_count: question.options.len() as i32,
        point_value: question.point_value,
        time_limit_sec: question.time_limit_sec,
        started_at,
    };

    {
        let mut guard = runtimes.write().await;
        if let Some(rt) = guard.get_mut(&quiz_id) {
            rt.question_started_at = Some(started_at);
            rt.current_question = Some(active);
        }
    }

    hub.broadcast_room(
        quiz_id,
        ServerMessage::QuizQuestion(QuizQuestion {
            quiz_id,
            question_id: question.id,
            number: number as i32,
            total_questions: total as i32,
            text: question.text.clone(),
            options: question
                .options
                .iter()
                .enumerate()
                .map(|(i, text)| QuestionOption { id: (i + 1) as i32, text: text.clone() })
                .collect(),
            time_limit: question.time_limit_sec,
            server_timestamp: chrono::Utc::now().timestamp_millis(),
        }),
    )
    .await;

    let time_limit = Duration::from_secs(question.time_limit_sec as u64);
    let mut remaining = question.time_limit_sec;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await; // first tick fires immediately; consume it before the loop

    while remaining > 0 {
        tokio::select! {
            _ = ticker.tick() => {
                remaining -= 1;
                hub.broadcast_room(
                    quiz_id,
                    ServerMessage::QuizTimer(QuizTimer {
                        question_id: question.id,
                        remaining_seconds: remaining,
                        server_timestamp: chrono::Utc::now().timestamp_millis(),
                    }),
                )
                .await;
            }
            Some(reason) = control.recv() => return QuestionOutcome::Cancelled(reason),
        }
    }

    // §5's answer_grace: a half-second cushion past the nominal deadline
    // before the window is considered closed, absorbing in-flight frames.
    tokio::time::sleep(config.answer_grace).await;
    let _ = time_limit;

    close_answer_window(hub, result_repo, &runtimes, quiz_id, question).await;

    hub.broadcast_room(
        quiz_id,
        ServerMessage::QuizAnswerReveal(QuizAnswerReveal { question_id: question.id, correct_option: question.correct_option }),
    )
    .await;

    QuestionOutcome::Completed
}

/// §4.6 step 5: synthesize a zero-score `UserAnswer` for every room member
/// who has not submitted, mark them eliminated (rule E1), and notify them.
async fn close_answer_window(
    hub: &ShardedHub,
    result_repo: &dyn ResultRepo,
    runtimes: &Runtimes,
    quiz_id: Uuid,
    question: &Question,
) {
    let members = hub.room_members(quiz_id).await;
    let unanswered: Vec<Uuid> = {
        let mut guard = runtimes.write().await;
        let Some(rt) = guard.get_mut(&quiz_id) else { return };
        rt.current_question = None;
        members.into_iter().filter(|c| !rt.answered.contains(c)).collect()
    };

    for user_id in unanswered {
        let time_limit_ms = i64::from(question.time_limit_sec) * 1000;
        let answer = UserAnswer {
            user_id,
            quiz_id,
            question_id: question.id,
            selected_option: 0,
            is_correct: false,
            response_time_ms: time_limit_ms,
            score_earned: 0,
            submitted_at: chrono::Utc::now(),
        };
        if let Err(e) = result_repo.save_user_answer(&answer).await {
            warn!(quiz_id = %quiz_id, user_id = %user_id, error = %e, "failed to persist synthesized timeout answer");
        }

        {
            let mut guard = runtimes.write().await;
            if let Some(rt) = guard.get_mut(&quiz_id) {
                rt.eliminated.insert(user_id);
                rt.answered.insert(user_id);
            }
        }

        hub.send_direct_to_user(
            user_id,
            ServerMessage::QuizElimination(QuizElimination {
                quiz_id,
                message: "You ran out of time to answer.".to_owned(),
                reason: "no_answer".to_owned(),
            }),
        )
        .await;
    }
}

/// Called from the WS read loop on an inbound `user:answer` frame
/// (§4.6 step 4). Idempotent per (user, question): the first accepted
/// submission wins; later ones are rejected with `DuplicateAnswer`.
/// Eliminated players are rejected with `PlayerEliminated` (invariant 4).
pub async fn submit_answer(
    result_repo: &dyn ResultRepo,
    runtimes: &Runtimes,
    quiz_id: Uuid,
    user_id: Uuid,
    question_id: Uuid,
    selected_option: i32,
    client_timestamp_ms: i64,
) -> Result<QuizAnswerResult, EngineError> {
    let active = {
        let guard = runtimes.read().await;
        let rt = guard.get(&quiz_id).ok_or(EngineError::QuizNotJoinable)?;
        if rt.eliminated.contains(&user_id) {
            return Err(EngineError::PlayerEliminated);
        }
        if rt.answered.contains(&user_id) {
            return Err(EngineError::DuplicateAnswer);
        }
        rt.current_question.clone().filter(|q| q.question_id == question_id).ok_or(EngineError::AnswerWindowClosed)?
    };

    let time_limit_ms = i64::from(active.time_limit_sec) * 1000;
    let server_elapsed_ms = active.started_at.elapsed().as_millis() as i64;
    if server_elapsed_ms > time_limit_ms {
        // E1: arrival after the window closed eliminates the player for the
        // rest of the quiz, the same as a synthesized no-answer.
        let mut guard = runtimes.write().await;
        if let Some(rt) = guard.get_mut(&quiz_id) {
            rt.eliminated.insert(user_id);
        }
        return Err(EngineError::AnswerWindowClosed);
    }
    if !(1..=active.option_count).contains(&selected_option) {
        return Err(EngineError::InvalidOption);
    }

    // Mark answered before any I/O so a racing duplicate sees it immediately.
    {
        let mut guard = runtimes.write().await;
        let Some(rt) = guard.get_mut(&quiz_id) else { return Err(EngineError::QuizNotJoinable) };
        if rt.answered.contains(&user_id) {
            return Err(EngineError::DuplicateAnswer);
        }
        rt.answered.insert(user_id);
    }

    // The server's own elapsed time is authoritative (§4.6 step 4); the
    // client timestamp only orders answers within the window, which this
    // single-writer-per-question path doesn't need.
    let _ = client_timestamp_ms;
    let effective_rt_ms = scoring::effective_response_time_ms(server_elapsed_ms, time_limit_ms);
    let is_correct = selected_option == active.correct_option;
    let score = scoring::score_for_answer(is_correct, active.point_value, effective_rt_ms, time_limit_ms);

    let answer = UserAnswer {
        user_id,
        quiz_id,
        question_id,
        selected_option,
        is_correct,
        response_time_ms: effective_rt_ms,
        score_earned: score,
        submitted_at: chrono::Utc::now(),
    };
    result_repo.save_user_answer(&answer).await?;

    info!(quiz_id = %quiz_id, user_id = %user_id, is_correct, score, "answer recorded");

    Ok(QuizAnswerResult {
        question_id,
        correct_option: active.correct_option,
        your_answer: selected_option,
        is_correct,
        points_earned: score,
        time_taken_ms: effective_rt_ms,
        is_eliminated: false,
        time_limit_exceeded: false,
    })
}

/// §4.7 E2: called from the WS read loop on a successful `user:ready` join.
/// Bumps the user's connection epoch and returns it, so the caller can arm
/// a disconnect-grace timer that becomes a no-op if the user reconnects
/// (and bumps the epoch again) before the timer fires.
pub async fn note_connected(runtimes: &Runtimes, quiz_id: Uuid, user_id: Uuid) -> u64 {
    let mut guard = runtimes.write().await;
    let rt = guard.entry(quiz_id).or_default();
    let epoch = rt.connection_epoch.entry(user_id).or_insert(0);
    *epoch += 1;
    *epoch
}

/// §4.7 E2: a hard-quit timer. Sleeps `reconnect_grace`, then eliminates the
/// user iff the quiz is still `in_progress` and the user hasn't reconnected
/// (the epoch still matches what it was right after the disconnect this
/// timer was armed for).
pub fn spawn_disconnect_grace(
    runtimes: Runtimes,
    quiz_repo: Arc<dyn QuizRepo>,
    grace: Duration,
    quiz_id: Uuid,
    user_id: Uuid,
    epoch_at_disconnect: u64,
) {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;

        let still_pending = {
            let guard = runtimes.read().await;
            guard.get(&quiz_id).is_some_and(|rt| {
                !rt.eliminated.contains(&user_id) && rt.connection_epoch.get(&user_id).copied() == Some(epoch_at_disconnect)
            })
        };
        if !still_pending {
            return;
        }

        let in_progress = matches!(quiz_repo.get(quiz_id).await, Ok(Some(q)) if q.status == QuizStatus::InProgress);
        if !in_progress {
            return;
        }

        let mut guard = runtimes.write().await;
        if let Some(rt) = guard.get_mut(&quiz_id) {
            if rt.connection_epoch.get(&user_id).copied() == Some(epoch_at_disconnect) && !rt.eliminated.contains(&user_id) {
                rt.eliminated.insert(user_id);
                info!(quiz_id = %quiz_id, user_id = %user_id, "eliminated for exceeding the reconnect grace period");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuizResult};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeResults {
        saved: StdMutex<Vec<UserAnswer>>,
    }

    #[async_trait]
    impl ResultRepo for FakeResults {
        async fn save_user_answer(&self, answer: &UserAnswer) -> Result<(), EngineError> {
            let mut saved = self.saved.lock().unwrap();
            if saved.iter().any(|a| a.user_id == answer.user_id && a.question_id == answer.question_id) {
                return Err(EngineError::DuplicateAnswer);
            }
            saved.push(answer.clone());
            Ok(())
        }
        async fn list_answers(&self, _quiz_id: Uuid) -> Result<Vec<UserAnswer>, EngineError> {
            Ok(self.saved.lock().unwrap().clone())
        }
        async fn save_result(&self, _result: &QuizResult) -> Result<(), EngineError> {
            Ok(())
        }
        async fn get_leaderboard(&self, _quiz_id: Uuid) -> Result<Vec<QuizResult>, EngineError> {
            Ok(vec![])
        }
        async fn calculate_ranks(&self, _quiz_id: Uuid, _total_questions: i32) -> Result<Vec<QuizResult>, EngineError> {
            Ok(vec![])
        }
    }

    struct FakeQuizzes {
        status: QuizStatus,
    }

    #[async_trait]
    impl QuizRepo for FakeQuizzes {
        async fn get(&self, id: Uuid) -> Result<Option<crate::models::Quiz>, EngineError> {
            Ok(Some(crate::models::Quiz {
                id,
                title: String::new(),
                description: String::new(),
                scheduled_time: chrono::Utc::now(),
                status: self.status,
            }))
        }
        async fn create(&self, quiz: &crate::models::Quiz) -> Result<crate::models::Quiz, EngineError> {
            Ok(quiz.clone())
        }
        async fn update(&self, _quiz: &crate::models::Quiz) -> Result<(), EngineError> {
            Ok(())
        }
        async fn get_scheduled(&self) -> Result<Vec<crate::models::Quiz>, EngineError> {
            Ok(vec![])
        }
        async fn set_status(&self, _id: Uuid, _status: QuizStatus) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn runtime_with_active_question(quiz_id: Uuid, question_id: Uuid) -> Runtimes {
        let mut rt = QuizRuntime::default();
        rt.current_question = Some(ActiveQuestion {
            question_id,
            correct_option: 2,
            option_count: 3,
            point_value: 100,
            time_limit_sec: 10,
            started_at: Instant::now(),
        });
        let mut map = HashMap::new();
        map.insert(quiz_id, rt);
        Arc::new(RwLock::new(map))
    }

    #[tokio::test]
    async fn s1_correct_answer_scores_and_is_not_eliminated() {
        let quiz_id = Uuid::new_v4();
        let question_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let runtimes = runtime_with_active_question(quiz_id, question_id);
        let repo = FakeResults { saved: StdMutex::new(vec![]) };

        let now_ms = chrono::Utc::now().timestamp_millis();
        let result = submit_answer(&repo, &runtimes, quiz_id, user_id, question_id, 2, now_ms).await.unwrap();

        assert!(result.is_correct);
        assert!(!result.is_eliminated);
    }

    #[tokio::test]
    async fn s3_duplicate_answer_is_rejected_without_a_second_row() {
        let quiz_id = Uuid::new_v4();
        let question_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let runtimes = runtime_with_active_question(quiz_id, question_id);
        let repo = FakeResults { saved: StdMutex::new(vec![]) };

        let now_ms = chrono::Utc::now().timestamp_millis();
        submit_answer(&repo, &runtimes, quiz_id, user_id, question_id, 2, now_ms).await.unwrap();
        let second = submit_answer(&repo, &runtimes, quiz_id, user_id, question_id, 2, now_ms).await;

        assert!(matches!(second, Err(EngineError::DuplicateAnswer)));
        assert_eq!(repo.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn s2_eliminated_user_is_rejected_with_player_eliminated() {
        let quiz_id = Uuid::new_v4();
        let question_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let runtimes = runtime_with_active_question(quiz_id, question_id);
        runtimes.write().await.get_mut(&quiz_id).unwrap().eliminated.insert(user_id);
        let repo = FakeResults { saved: StdMutex::new(vec![]) };

        let now_ms = chrono::Utc::now().timestamp_millis();
        let result = submit_answer(&repo, &runtimes, quiz_id, user_id, question_id, 2, now_ms).await;

        assert!(matches!(result, Err(EngineError::PlayerEliminated)));
    }

    #[tokio::test]
    async fn invalid_option_out_of_range_is_rejected() {
        let quiz_id = Uuid::new_v4();
        let question_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let runtimes = runtime_with_active_question(quiz_id, question_id);
        let repo = FakeResults { saved: StdMutex::new(vec![]) };

        let now_ms = chrono::Utc::now().timestamp_millis();
        let result = submit_answer(&repo, &runtimes, quiz_id, user_id, question_id, 42, now_ms).await;

        assert!(matches!(result, Err(EngineError::InvalidOption)));
    }

    #[tokio::test]
    async fn e2_reconnecting_before_grace_expires_cancels_the_elimination() {
        let quiz_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let runtimes: Runtimes = Arc::new(RwLock::new(HashMap::new()));

        let epoch = note_connected(&runtimes, quiz_id, user_id).await;
        assert_eq!(epoch, 1);
        let epoch_again = note_connected(&runtimes, quiz_id, user_id).await;
        assert_eq!(epoch_again, 2);

        spawn_disconnect_grace(
            runtimes.clone(),
            Arc::new(FakeQuizzes { status: QuizStatus::InProgress }),
            Duration::from_millis(10),
            quiz_id,
            user_id,
            epoch, // stale epoch: a reconnect already bumped it to 2
        );
        tokio::time::sleep(Duration::from_millis(30)).await;

        let guard = runtimes.read().await;
        assert!(!guard.get(&quiz_id).unwrap().eliminated.contains(&user_id));
    }

    #[tokio::test]
    async fn e2_no_reconnect_within_grace_eliminates_the_user() {
        let quiz_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let runtimes: Runtimes = Arc::new(RwLock::new(HashMap::new()));

        let epoch = note_connected(&runtimes, quiz_id, user_id).await;

        spawn_disconnect_grace(
            runtimes.clone(),
            Arc::new(FakeQuizzes { status: QuizStatus::InProgress }),
            Duration::from_millis(10),
            quiz_id,
            user_id,
            epoch,
        );
        tokio::time::sleep(Duration::from_millis(30)).await;

        let guard = runtimes.read().await;
        assert!(guard.get(&quiz_id).unwrap().eliminated.contains(&user_id));
    }

    #[tokio::test]
    async fn e2_grace_timer_is_a_noop_when_the_quiz_is_not_in_progress() {
        let quiz_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let runtimes: Runtimes = Arc::new(RwLock::new(HashMap::new()));

        let epoch = note_connected(&runtimes, quiz_id, user_id).await;

        spawn_disconnect_grace(
            runtimes.clone(),
            Arc::new(FakeQuizzes { status: QuizStatus::Completed }),
            Duration::from_millis(10),
            quiz_id,
            user_id,
            epoch,
        );
        tokio::time::sleep(Duration::from_millis(30)).await;

        let guard = runtimes.read().await;
        assert!(!guard.get(&quiz_id).unwrap().eliminated.contains(&user_id));
    }
}
