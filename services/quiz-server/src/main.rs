//! Process entry point: load config, stand up the database pool and
//! repos, arm the scheduler for anything already `scheduled`, then serve.
//! The boot sequence mirrors the teacher's original (tracing init -> pool
//! -> migrations -> `AppState` -> router -> graceful-shutdown serve), with
//! the teacher's on-boot stream-reset SQL replaced by
//! `SchedulerHandle::rearm_on_boot`.

use quiz_server::admission::PerIpCounter;
use quiz_server::config::Config;
use quiz_server::hub::ShardedHub;
use quiz_server::pubsub::{self, LocalPubSub, PubSub, RedisPubSub};
use quiz_server::repo::pg::{PgInvalidTokenRepo, PgQuestionRepo, PgQuizRepo, PgRefreshTokenRepo, PgResultRepo, PgUserRepo};
use quiz_server::repo::{QuestionRepo, QuizRepo, ResultRepo, UserRepo};
use quiz_server::scheduler::SchedulerHandle;
use quiz_server::token::TokenService;
use quiz_server::{db, AppState};
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let config = Config::from_env();
    let instance_id = Uuid::new_v4();

    info!("connecting to database...");
    let pool = db::create_pool(&database_url).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    let user_repo: Arc<dyn UserRepo> = Arc::new(PgUserRepo::new(pool.clone()));
    let quiz_repo: Arc<dyn QuizRepo> = Arc::new(PgQuizRepo::new(pool.clone()));
    let question_repo: Arc<dyn QuestionRepo> = Arc::new(PgQuestionRepo::new(pool.clone()));
    let result_repo: Arc<dyn ResultRepo> = Arc::new(PgResultRepo::new(pool.clone()));
    let invalid_token_repo = Arc::new(PgInvalidTokenRepo::new(pool.clone()));
    let refresh_token_repo = Arc::new(PgRefreshTokenRepo::new(pool.clone()));

    let pubsub: Arc<dyn PubSub> = match env::var("REDIS_URL") {
        Ok(url) => {
            info!("REDIS_URL set, fanning out over redis pub/sub for multi-instance deployments");
            Arc::new(RedisPubSub::connect(&url).await.expect("failed to connect to redis"))
        }
        Err(_) => {
            info!("REDIS_URL not set, running single-instance with a local no-op pub/sub");
            Arc::new(LocalPubSub)
        }
    };

    let hub = ShardedHub::spawn(config.clone(), instance_id, pubsub.clone());
    spawn_cluster_fanout(hub.clone(), pubsub.clone()).await;

    let token_service = Arc::new(TokenService::new(config.clone(), invalid_token_repo, refresh_token_repo));
    spawn_invalidation_cleanup(token_service.clone(), config.cleanup_interval);

    let runtimes = Arc::new(RwLock::new(HashMap::new()));
    let scheduler = SchedulerHandle::new(config.clone(), hub.clone(), quiz_repo.clone(), question_repo.clone(), result_repo.clone(), runtimes.clone());
    scheduler.rearm_on_boot().await.expect("failed to re-arm scheduled quizzes");

    let state = AppState {
        config: config.clone(),
        instance_id,
        hub,
        token_service,
        scheduler,
        user_repo,
        quiz_repo,
        question_repo,
        result_repo,
        per_ip: Arc::new(PerIpCounter::new()),
        runtimes,
    };

    let router = quiz_server::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind");
    info!(addr = %bind_addr, "server listening");
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(config.shutdown_grace))
        .await
        .expect("server error");
    info!("server shut down gracefully");
}

/// Feeds cross-instance envelopes from the broker back into the local hub
/// (§4.1): one forwarding task per channel, each a `subscribe().recv()`
/// loop handing everything it sees to `ShardedHub::receive_cluster`.
async fn spawn_cluster_fanout(hub: ShardedHub, pubsub: Arc<dyn PubSub>) {
    for channel in [pubsub::CHANNEL_BROADCAST, pubsub::CHANNEL_DIRECT] {
        let mut rx = pubsub.subscribe(channel).await;
        let hub = hub.clone();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                hub.receive_cluster(envelope).await;
            }
        });
    }
}

/// Periodically prunes invalidation records past their retention window.
fn spawn_invalidation_cleanup(token_service: Arc<TokenService>, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = token_service.cleanup_invalidations().await {
                tracing::warn!(error = %e, "invalidation cleanup failed");
            }
        }
    });
}

/// Waits for SIGTERM or Ctrl-C (SIGINT), then gives in-flight WS frames
/// `shutdown_grace` to drain before the listener actually stops.
async fn shutdown_signal(shutdown_grace: std::time::Duration) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
    tokio::time::sleep(shutdown_grace).await;
}
