//! WS connection handler (C3): one reader task, one writer task, per
//! connection — the split the teacher's `ws_forwarder_handler` doesn't need
//! (it reads and writes off the same `select!` loop) but which this engine
//! does, since the writer has to drain three priority queues on its own
//! schedule independent of whatever the client happens to send.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::admission::{self, AdmittedIdentity};
use crate::hub::session::PriorityQueues;
use crate::models::{ClientSession, QuizStatus};
use crate::quiz_runtime;
use crate::state::AppState;
use quiz_protocol::{error_codes, ClientEnvelope, ClientMessage, ErrorPayload, QuizUserReady, ServerMessage};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let ip = admission::client_ip(&headers, remote.ip());
    let identity = match admission::admit(&state.token_service, query.token.as_deref(), &headers).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "ws admission rejected");
            return (axum::http::StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    let max_per_ip = admission::max_connections_per_ip(&state.config);
    if !state.per_ip.try_acquire(ip, max_per_ip).await {
        return (axum::http::StatusCode::TOO_MANY_REQUESTS, "too many connections from this address").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity, ip))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: AdmittedIdentity, ip: std::net::IpAddr) {
    let client_id = Uuid::new_v4();
    let queues = Arc::new(PriorityQueues::new(
        state.config.client_queue_high,
        state.config.client_queue_normal,
        state.config.client_queue_low,
    ));

    let session = ClientSession {
        client_id,
        user_id: identity.user_id,
        queues: queues.clone(),
        rooms: HashSet::new(),
        last_pong: chrono::Utc::now(),
        eliminated_in: HashSet::new(),
    };

    if let Err(e) = state.hub.register(session).await {
        warn!(client_id = %client_id, error = %e, "registration rejected");
        state.per_ip.release(ip).await;
        return;
    }

    info!(client_id = %client_id, user_id = %identity.user_id, "client connected");

    let (mut sink, mut stream) = socket.split();
    let writer_queues = queues.clone();
    let ping_interval = state.config.ping_interval;
    let write_wait = state.config.write_wait;
    let writer = tokio::spawn(async move { run_writer(&mut sink, writer_queues, ping_interval, write_wait).await });

    let mut joined_rooms: HashSet<Uuid> = HashSet::new();
    let mut connection_epochs: std::collections::HashMap<Uuid, u64> = std::collections::HashMap::new();
    let mut last_pong = Instant::now();
    let pong_wait = state.config.pong_wait;

    loop {
        let remaining = pong_wait.saturating_sub(last_pong.elapsed());
        match tokio::time::timeout(remaining, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                if text.len() > state.config.max_message_size {
                    send_error(&queues, error_codes::PAYLOAD_TOO_LARGE, "message exceeds the size limit").await;
                    continue;
                }
                handle_frame(&state, client_id, identity.user_id, &text, &queues, &mut joined_rooms, &mut connection_epochs).await;
            }
            Ok(Some(Ok(Message::Pong(_)))) => last_pong = Instant::now(),
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                warn!(client_id = %client_id, error = %e, "ws read error");
                break;
            }
            Err(_) => {
                warn!(client_id = %client_id, "pong timeout, disconnecting");
                break;
            }
        }
    }

    for quiz_id in &joined_rooms {
        state.hub.leave_room(client_id, *quiz_id).await;
        // §4.7 E2: arm a hard-quit timer for every room this client was in;
        // it only eliminates the user if they haven't reconnected to that
        // quiz (bumping the epoch again) before `reconnect_grace` elapses.
        if let Some(&epoch) = connection_epochs.get(quiz_id) {
            quiz_runtime::spawn_disconnect_grace(
                state.runtimes.clone(),
                state.quiz_repo.clone(),
                state.config.reconnect_grace,
                *quiz_id,
                identity.user_id,
                epoch,
            );
        }
    }
    state.hub.unregister(client_id).await;
    state.per_ip.release(ip).await;
    writer.abort();
    info!(client_id = %client_id, "client disconnected");
}

async fn handle_frame(
    state: &AppState,
    client_id: Uuid,
    user_id: Uuid,
    text: &str,
    queues: &Arc<PriorityQueues>,
    joined_rooms: &mut HashSet<Uuid>,
    connection_epochs: &mut std::collections::HashMap<Uuid, u64>,
) {
    let envelope: ClientEnvelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(_) => {
            send_error(queues, error_codes::UNKNOWN_TYPE, "malformed frame").await;
            return;
        }
    };

    let message = match envelope.into_message() {
        Ok(Some(m)) => m,
        Ok(None) => {
            send_error(queues, error_codes::UNKNOWN_TYPE, "unrecognized message type").await;
            return;
        }
        Err(e) => {
            send_error(queues, error_codes::UNKNOWN_TYPE, &format!("invalid payload: {e}")).await;
            return;
        }
    };

    match message {
        ClientMessage::UserReady(ready) => {
            handle_ready(state, client_id, user_id, ready.quiz_id, queues, joined_rooms, connection_epochs).await;
        }
        ClientMessage::UserAnswer(answer) => {
            handle_answer(state, client_id, user_id, answer, queues).await;
        }
        ClientMessage::UserHeartbeat(_) => {
            let reply = ServerMessage::ServerHeartbeat(quiz_protocol::ServerHeartbeat { timestamp: chrono::Utc::now().timestamp_millis() });
            let _ = queues.enqueue(reply.clone(), reply.priority()).await;
        }
    }
}

/// `user:ready{quiz_id}` (§4.6/§4.8): join is rejected unless the quiz is
/// `scheduled` or `in_progress`.
async fn handle_ready(
    state: &AppState,
    client_id: Uuid,
    user_id: Uuid,
    quiz_id: Uuid,
    queues: &Arc<PriorityQueues>,
    joined_rooms: &mut HashSet<Uuid>,
    connection_epochs: &mut std::collections::HashMap<Uuid, u64>,
) {
    let quiz = match state.quiz_repo.get(quiz_id).await {
        Ok(Some(q)) => q,
        Ok(None) => {
            send_error(queues, error_codes::QUIZ_NOT_FOUND, "quiz not found").await;
            return;
        }
        Err(_) => {
            send_error(queues, error_codes::QUIZ_NOT_FOUND, "failed to look up quiz").await;
            return;
        }
    };

    if !matches!(quiz.status, QuizStatus::Scheduled | QuizStatus::InProgress) {
        send_error(queues, error_codes::QUIZ_NOT_JOINABLE, "quiz is not joinable right now").await;
        return;
    }

    if state.hub.join_room(client_id, quiz_id).await {
        joined_rooms.insert(quiz_id);
        let epoch = quiz_runtime::note_connected(&state.runtimes, quiz_id, user_id).await;
        connection_epochs.insert(quiz_id, epoch);
        let count = state.hub.room_member_count(quiz_id).await as u32;
        state
            .hub
            .broadcast_room(quiz_id, ServerMessage::QuizUserReady(QuizUserReady { quiz_id, user_id, ready_count: count }))
            .await;
    }
}

async fn handle_answer(state: &AppState, _client_id: Uuid, user_id: Uuid, answer: quiz_protocol::UserAnswer, queues: &Arc<PriorityQueues>) {
    let runtimes = state.runtimes.clone();
    let quiz_id = match find_quiz_for_question(state, answer.question_id).await {
        Some(id) => id,
        None => {
            send_error(queues, error_codes::QUIZ_NOT_JOINABLE, "no active question for this id").await;
            return;
        }
    };

    let result = quiz_runtime::submit_answer(
        state.result_repo.as_ref(),
        &runtimes,
        quiz_id,
        user_id,
        answer.question_id,
        answer.selected_option,
        answer.timestamp,
    )
    .await;

    match result {
        Ok(payload) => {
            let _ = queues.enqueue(ServerMessage::QuizAnswerResult(payload), quiz_protocol::Priority::Normal).await;
        }
        Err(e) => {
            send_error(queues, protocol_error_code(&e), &e.to_string()).await;
        }
    }
}

/// Maps the subset of `EngineError` reachable from an inbound WS frame to
/// the lowercase wire codes in `quiz_protocol::error_codes`; anything else
/// (database failure, for instance) is surfaced as `unknown_type` rather
/// than leaking an HTTP-shaped code onto the wire.
fn protocol_error_code(err: &crate::error::EngineError) -> &'static str {
    use crate::error::EngineError;
    match err {
        EngineError::DuplicateAnswer => error_codes::DUPLICATE_ANSWER,
        EngineError::AnswerWindowClosed => error_codes::ANSWER_WINDOW_CLOSED,
        EngineError::PlayerEliminated => error_codes::PLAYER_ELIMINATED,
        EngineError::InvalidOption => error_codes::INVALID_OPTION,
        EngineError::QuizNotJoinable => error_codes::QUIZ_NOT_JOINABLE,
        EngineError::QuizNotFound => error_codes::QUIZ_NOT_FOUND,
        EngineError::PayloadTooLarge => error_codes::PAYLOAD_TOO_LARGE,
        _ => error_codes::UNKNOWN_TYPE,
    }
}

/// Looks at the quiz whose runtime currently has this question open. Linear
/// in the number of live quizzes, which §5 bounds to a small admin-scheduled
/// set, not per-connection traffic.
async fn find_quiz_for_question(state: &AppState, question_id: Uuid) -> Option<Uuid> {
    let runtimes = state.runtimes.read().await;
    runtimes
        .iter()
        .find(|(_, rt)| rt.current_question.as_ref().is_some_and(|q| q.question_id == question_id))
        .map(|(quiz_id, _)| *quiz_id)
}

async fn send_error(queues: &Arc<PriorityQueues>, code: &str, message: &str) {
    let _ = queues
        .enqueue(
            ServerMessage::Error(ErrorPayload { message: message.to_owned(), code: Some(code.to_owned()), critical: None }),
            quiz_protocol::Priority::Normal,
        )
        .await;
}

/// Writer half: drains high before normal before low, enforces
/// `write_wait`, and pings on `ping_interval` to keep the pong clock fed.
async fn run_writer(
    sink: &mut (impl futures_util::Sink<Message, Error = axum::Error> + Unpin),
    queues: Arc<PriorityQueues>,
    ping_interval: std::time::Duration,
    write_wait: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if tokio::time::timeout(write_wait, sink.send(Message::Ping(Vec::new()))).await.is_err() {
                    break;
                }
            }
            () = queues.wait_for_message() => {
                while let Some(message) = queues.dequeue().await {
                    let Ok(json) = serde_json::to_string(&message) else { continue };
                    if tokio::time::timeout(write_wait, sink.send(Message::Text(json))).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}
