use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::admission::PerIpCounter;
use crate::config::Config;
use crate::hub::ShardedHub;
use crate::models::QuizRuntime;
use crate::repo::{QuestionRepo, QuizRepo, ResultRepo, UserRepo};
use crate::scheduler::SchedulerHandle;
use crate::token::TokenService;

/// Everything an HTTP handler or WS connection needs, the same shape as the
/// teacher's `AppState`: a database-backed pool of services plus in-memory
/// registries, all `Clone`-able handles around `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub instance_id: Uuid,
    pub hub: ShardedHub,
    pub token_service: Arc<TokenService>,
    pub scheduler: SchedulerHandle,
    pub user_repo: Arc<dyn UserRepo>,
    pub quiz_repo: Arc<dyn QuizRepo>,
    pub question_repo: Arc<dyn QuestionRepo>,
    pub result_repo: Arc<dyn ResultRepo>,
    pub per_ip: Arc<PerIpCounter>,
    /// Live `QuizRuntime` snapshots for the admin introspection endpoint
    /// (§6.1); the scheduler/question-runtime tasks are the only writers.
    pub runtimes: Arc<RwLock<HashMap<Uuid, QuizRuntime>>>,
}
