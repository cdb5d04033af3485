// quiz-protocol: WebSocket and HTTP wire types for the real-time quiz engine.
//
// Every client/server WS frame is a JSON object `{type, data}`. Server-side
// payload enums use `#[serde(tag = "type", content = "data")]` so that shape
// falls out of serde directly. Client-side frames are decoded in two steps
// (see `ClientEnvelope`) because an unrecognized `type` must produce a
// protocol-level `error` reply instead of failing the whole decode.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Client -> Server payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReady {
    pub quiz_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAnswer {
    pub question_id: Uuid,
    /// 0 means "no answer chosen"; otherwise 1-based index into the options list.
    pub selected_option: i32,
    /// Client-reported milliseconds since Unix epoch; a tie-breaker only, never authoritative.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserHeartbeat {}

/// A decoded, recognized client -> server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "user:ready")]
    UserReady(UserReady),
    #[serde(rename = "user:answer")]
    UserAnswer(UserAnswer),
    #[serde(rename = "user:heartbeat")]
    UserHeartbeat(UserHeartbeat),
}

/// Raw envelope used for the first decode pass: extracts `type` without
/// committing to a known variant, so unknown types can be answered with a
/// protocol error instead of a hard decode failure closing the socket.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ClientEnvelope {
    /// Attempt to resolve this envelope into a typed `ClientMessage`.
    ///
    /// Returns `Ok(None)` for a syntactically well-formed but unrecognized
    /// `type` (the `unknown_type` error path), and `Err` only when a
    /// recognized type carries a malformed `data` payload.
    pub fn into_message(self) -> Result<Option<ClientMessage>, serde_json::Error> {
        let msg = match self.kind.as_str() {
            "user:ready" => ClientMessage::UserReady(serde_json::from_value(self.data)?),
            "user:answer" => ClientMessage::UserAnswer(serde_json::from_value(self.data)?),
            "user:heartbeat" => ClientMessage::UserHeartbeat(serde_json::from_value(self.data)?),
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }
}

// ---------------------------------------------------------------------------
// Server -> Client payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizAnnouncement {
    pub quiz_id: Uuid,
    pub title: String,
    pub scheduled_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizWaitingRoom {
    pub quiz_id: Uuid,
    pub participant_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizCountdown {
    pub quiz_id: Uuid,
    pub seconds_left: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizStart {
    pub quiz_id: Uuid,
    pub total_questions: u32,
    pub server_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: i32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub quiz_id: Uuid,
    pub question_id: Uuid,
    pub number: i32,
    pub total_questions: i32,
    pub text: String,
    pub options: Vec<QuestionOption>,
    pub time_limit: i32,
    pub server_timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizTimer {
    pub question_id: Uuid,
    pub remaining_seconds: i32,
    pub server_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAnswerResult {
    pub question_id: Uuid,
    pub correct_option: i32,
    pub your_answer: i32,
    pub is_correct: bool,
    pub points_earned: i32,
    pub time_taken_ms: i64,
    pub is_eliminated: bool,
    pub time_limit_exceeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAnswerReveal {
    pub question_id: Uuid,
    pub correct_option: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizElimination {
    pub quiz_id: Uuid,
    pub message: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizEliminationReminder {
    pub quiz_id: Uuid,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizUserReady {
    pub quiz_id: Uuid,
    pub user_id: Uuid,
    pub ready_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: Uuid,
    pub username: String,
    pub score: i32,
    pub rank: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizLeaderboard {
    pub quiz_id: Uuid,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizFinish {
    pub quiz_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizResultsAvailable {
    pub quiz_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizCancelled {
    pub quiz_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHeartbeat {
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical: Option<bool>,
}

/// All server -> client WS message kinds, tagged by `type` with the payload
/// nested under `data` -- the wire shape spec.md §6 fixes for every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "quiz:announcement")]
    QuizAnnouncement(QuizAnnouncement),
    #[serde(rename = "quiz:waiting_room")]
    QuizWaitingRoom(QuizWaitingRoom),
    #[serde(rename = "quiz:countdown")]
    QuizCountdown(QuizCountdown),
    #[serde(rename = "quiz:start")]
    QuizStart(QuizStart),
    #[serde(rename = "quiz:question")]
    QuizQuestion(QuizQuestion),
    #[serde(rename = "quiz:timer")]
    QuizTimer(QuizTimer),
    #[serde(rename = "quiz:answer_result")]
    QuizAnswerResult(QuizAnswerResult),
    #[serde(rename = "quiz:answer_reveal")]
    QuizAnswerReveal(QuizAnswerReveal),
    #[serde(rename = "quiz:elimination")]
    QuizElimination(QuizElimination),
    #[serde(rename = "quiz:elimination_reminder")]
    QuizEliminationReminder(QuizEliminationReminder),
    #[serde(rename = "quiz:user_ready")]
    QuizUserReady(QuizUserReady),
    #[serde(rename = "quiz:leaderboard")]
    QuizLeaderboard(QuizLeaderboard),
    #[serde(rename = "quiz:finish")]
    QuizFinish(QuizFinish),
    #[serde(rename = "quiz:results_available")]
    QuizResultsAvailable(QuizResultsAvailable),
    #[serde(rename = "quiz:cancelled")]
    QuizCancelled(QuizCancelled),
    #[serde(rename = "server:heartbeat")]
    ServerHeartbeat(ServerHeartbeat),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

/// Send priority, §4.2/§4.3: high is strictly drained before normal; low
/// is lowest and first to be dropped under back-pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl ServerMessage {
    /// The send priority a message of this kind is broadcast/enqueued at,
    /// per spec.md §4.2/§4.3/§4.6 ("high priority" broadcasts, "normal
    /// priority" timers/heartbeats).
    #[must_use]
    pub fn priority(&self) -> Priority {
        match self {
            ServerMessage::QuizQuestion(_)
            | ServerMessage::QuizStart(_)
            | ServerMessage::QuizCountdown(_)
            | ServerMessage::QuizCancelled(_) => Priority::High,
            ServerMessage::QuizTimer(_)
            | ServerMessage::ServerHeartbeat(_)
            | ServerMessage::QuizAnswerResult(_)
            | ServerMessage::QuizAnswerReveal(_)
            | ServerMessage::QuizElimination(_)
            | ServerMessage::QuizEliminationReminder(_)
            | ServerMessage::QuizUserReady(_)
            | ServerMessage::QuizWaitingRoom(_)
            | ServerMessage::QuizAnnouncement(_)
            | ServerMessage::QuizLeaderboard(_)
            | ServerMessage::QuizFinish(_)
            | ServerMessage::QuizResultsAvailable(_)
            | ServerMessage::Error(_) => Priority::Normal,
        }
    }
}

/// Frozen WS-level error codes (distinct from the HTTP `HttpErrorEnvelope`
/// codes below).
pub mod error_codes {
    pub const UNKNOWN_TYPE: &str = "unknown_type";
    pub const DUPLICATE_ANSWER: &str = "duplicate_answer";
    pub const ANSWER_WINDOW_CLOSED: &str = "answer_window_closed";
    pub const PLAYER_ELIMINATED: &str = "player_eliminated";
    pub const INVALID_OPTION: &str = "invalid_option";
    pub const QUIZ_NOT_JOINABLE: &str = "quiz_not_joinable";
    pub const QUIZ_NOT_FOUND: &str = "quiz_not_found";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
}

// ---------------------------------------------------------------------------
// Cross-instance pub/sub envelope (C1, spec.md §4.1)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterTarget {
    Broadcast,
    /// `room_or_client` is a `client_id`: deliver to that exact connection.
    Direct,
    /// `room_or_client` is a `user_id`: deliver to whichever connection that
    /// user currently holds on the receiving instance, if any.
    DirectUser,
    Room,
}

/// A self-describing cross-instance fan-out envelope. Consumers must ignore
/// envelopes whose `origin_instance_id` equals their own (spec.md §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEnvelope {
    pub origin_instance_id: Uuid,
    pub target: ClusterTarget,
    /// Room (quiz) id or client id, depending on `target`; empty for `Broadcast`.
    pub room_or_client: String,
    pub message: ServerMessage,
}

// ---------------------------------------------------------------------------
// HTTP error envelope (frozen schema, analogous to the teacher's HttpErrorEnvelope)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_envelope_resolves_known_types() {
        let raw = serde_json::json!({"type": "user:ready", "data": {"quiz_id": Uuid::nil()}});
        let envelope: ClientEnvelope = serde_json::from_value(raw).unwrap();
        let msg = envelope.into_message().unwrap().unwrap();
        assert_eq!(msg, ClientMessage::UserReady(UserReady { quiz_id: Uuid::nil() }));
    }

    #[test]
    fn client_envelope_reports_unknown_type_without_erroring() {
        let raw = serde_json::json!({"type": "user:teleport", "data": {}});
        let envelope: ClientEnvelope = serde_json::from_value(raw).unwrap();
        assert!(envelope.into_message().unwrap().is_none());
    }

    #[test]
    fn client_envelope_errors_on_malformed_known_payload() {
        let raw = serde_json::json!({"type": "user:answer", "data": {"question_id": "not-a-uuid"}});
        let envelope: ClientEnvelope = serde_json::from_value(raw).unwrap();
        assert!(envelope.into_message().is_err());
    }

    #[test]
    fn server_message_round_trips_through_tagged_envelope() {
        let msg = ServerMessage::QuizCountdown(QuizCountdown {
            quiz_id: Uuid::nil(),
            seconds_left: 9,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "quiz:countdown");
        assert_eq!(json["data"]["seconds_left"], 9);
        let round_tripped: ServerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(round_tripped, msg);
    }

    #[test]
    fn priority_ordering_matches_spec() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn question_broadcast_is_high_priority_and_timer_is_normal() {
        let question = ServerMessage::QuizQuestion(QuizQuestion {
            quiz_id: Uuid::nil(),
            question_id: Uuid::nil(),
            number: 1,
            total_questions: 1,
            text: "2+2?".to_owned(),
            options: vec![],
            time_limit: 10,
            server_timestamp: 0,
        });
        assert_eq!(question.priority(), Priority::High);

        let timer = ServerMessage::QuizTimer(QuizTimer {
            question_id: Uuid::nil(),
            remaining_seconds: 5,
            server_timestamp: 0,
        });
        assert_eq!(timer.priority(), Priority::Normal);
    }
}
