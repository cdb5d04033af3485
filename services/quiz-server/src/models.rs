use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::hub::session::PriorityQueues;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub quizzes_played: i32,
    pub total_score: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum QuizStatus {
    Scheduled,
    Countdown,
    InProgress,
    Completed,
    Cancelled,
}

impl QuizStatus {
    /// §4.5's transition graph: only these edges are legal.
    #[must_use]
    pub fn can_transition_to(self, next: QuizStatus) -> bool {
        matches!(
            (self, next),
            (QuizStatus::Scheduled, QuizStatus::Countdown)
                | (QuizStatus::Scheduled, QuizStatus::Cancelled)
                | (QuizStatus::Countdown, QuizStatus::InProgress)
                | (QuizStatus::Countdown, QuizStatus::Cancelled)
                | (QuizStatus::InProgress, QuizStatus::Completed)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Quiz {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: QuizStatus,
}

#[derive(Debug, Clone)]
pub struct Question {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub position: i32,
    pub text: String,
    pub options: Vec<String>,
    pub correct_option: i32,
    pub time_limit_sec: i32,
    pub point_value: i32,
}

impl Question {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let n = self.options.len();
        (2..=10).contains(&n)
            && self.correct_option >= 1
            && (self.correct_option as usize) <= n
            && self.time_limit_sec > 0
            && self.point_value > 0
    }
}

#[derive(Debug, Clone)]
pub struct UserAnswer {
    pub user_id: Uuid,
    pub quiz_id: Uuid,
    pub question_id: Uuid,
    pub selected_option: i32,
    pub is_correct: bool,
    pub response_time_ms: i64,
    pub score_earned: i32,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct QuizResult {
    pub user_id: Uuid,
    pub quiz_id: Uuid,
    pub username: String,
    pub score: i64,
    pub correct_answers: i32,
    pub total_questions: i32,
    pub rank: i32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub token: String,
    pub user_id: Uuid,
    pub device_id: String,
    pub ip: String,
    pub user_agent: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
}

impl RefreshTokenRecord {
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired && now < self.expires_at
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UserInvalidation {
    pub user_id: Uuid,
    pub invalidated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AccessClaims {
    pub user_id: Uuid,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct WsTicketClaims {
    pub user_id: Uuid,
    pub iat: i64,
    pub exp: i64,
}

pub type ClientId = Uuid;

/// A connected client's hub-facing handle: per-priority outbound queues and
/// the membership/elimination bookkeeping the hub and scheduler need. Mirrors
/// spec.md §3's `ClientSession`; the shard id is implicit in which shard's
/// map this lives in (never stored as a back-reference, per §9's
/// cyclic-reference note).
pub struct ClientSession {
    pub client_id: ClientId,
    pub user_id: Uuid,
    pub queues: Arc<PriorityQueues>,
    pub rooms: HashSet<Uuid>,
    pub last_pong: DateTime<Utc>,
    pub eliminated_in: HashSet<Uuid>,
}

/// The question currently open for answers, cached on `QuizRuntime` so the
/// WS read loop can score an inbound `user:answer` without re-querying
/// `QuestionRepo` on every submission.
#[derive(Debug, Clone)]
pub struct ActiveQuestion {
    pub question_id: Uuid,
    pub correct_option: i32,
    pub option_count: i32,
    pub point_value: i32,
    pub time_limit_sec: i32,
    pub started_at: std::time::Instant,
}

/// Per-active-quiz runtime state the scheduler and question runtime share:
/// current question, who has answered it, and who is out for the rest of
/// the quiz. Spec.md §3's `QuizRuntime`.
#[derive(Debug, Clone, Default)]
pub struct QuizRuntime {
    pub current_question_index: usize,
    pub question_started_at: Option<std::time::Instant>,
    pub current_question: Option<ActiveQuestion>,
    pub answered: HashSet<Uuid>,
    pub eliminated: HashSet<Uuid>,
    /// Bumped on every `user:ready` join for this user (§4.7 E2); a grace
    /// timer armed on disconnect captures the epoch at disconnect time and
    /// only eliminates if it still matches after `reconnect_grace` — a
    /// reconnect in between bumps it again and the stale timer becomes a
    /// no-op.
    pub connection_epoch: HashMap<Uuid, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct PerIpCounters {
    pub counts: HashMap<IpAddr, usize>,
}
