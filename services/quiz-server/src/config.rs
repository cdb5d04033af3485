use std::env;
use std::time::Duration;

/// Every tunable named in the configuration table: shard/queue sizing, WS
/// timing, admission limits, and token lifetimes. Loaded from env vars the
/// same way `main.rs` reads `DATABASE_URL`/`BIND_ADDR`/`LOG_LEVEL` — no
/// config-parsing crate, just `env::var(...).ok().and_then(parse).unwrap_or(default)`
/// per field.
#[derive(Debug, Clone)]
pub struct Config {
    pub shard_count: usize,
    pub max_clients_per_shard: usize,
    pub client_queue_high: usize,
    pub client_queue_normal: usize,
    pub client_queue_low: usize,
    pub broadcast_buffer: usize,

    pub ping_interval: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub max_message_size: usize,

    pub max_connections_per_ip: usize,

    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub ws_ticket_ttl: Duration,
    pub max_refresh_per_user: i64,
    pub invalidation_retention: Duration,
    pub cleanup_interval: Duration,

    pub countdown_lead: Duration,
    pub reconnect_grace: Duration,
    pub answer_grace: Duration,
    pub shutdown_grace: Duration,

    pub jwt_secret: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_parse(key, default_secs))
}

fn env_millis(key: &str, default_millis: u64) -> Duration {
    Duration::from_millis(env_parse(key, default_millis))
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            shard_count: env_parse("SHARD_COUNT", 4),
            max_clients_per_shard: env_parse("MAX_CLIENTS_PER_SHARD", 5000),
            client_queue_high: env_parse("CLIENT_QUEUE_HIGH", 256),
            client_queue_normal: env_parse("CLIENT_QUEUE_NORMAL", 128),
            client_queue_low: env_parse("CLIENT_QUEUE_LOW", 64),
            broadcast_buffer: env_parse("BROADCAST_BUFFER", 128),

            ping_interval: env_secs("PING_INTERVAL_SECS", 30),
            pong_wait: env_secs("PONG_WAIT_SECS", 60),
            write_wait: env_secs("WRITE_WAIT_SECS", 10),
            max_message_size: env_parse("MAX_MESSAGE_SIZE", 65536),

            max_connections_per_ip: env_parse("MAX_CONNECTIONS_PER_IP", 100),

            access_ttl: env_secs("ACCESS_TTL_SECS", 24 * 3600),
            refresh_ttl: env_secs("REFRESH_TTL_SECS", 720 * 3600),
            ws_ticket_ttl: env_secs("WS_TICKET_TTL_SECS", 30),
            max_refresh_per_user: env_parse("MAX_REFRESH_PER_USER", 10),
            invalidation_retention: env_secs("INVALIDATION_RETENTION_SECS", 48 * 3600),
            cleanup_interval: env_secs("CLEANUP_INTERVAL_SECS", 30 * 60),

            countdown_lead: env_secs("COUNTDOWN_LEAD_SECS", 10),
            reconnect_grace: env_secs("RECONNECT_GRACE_SECS", 15),
            answer_grace: env_millis("ANSWER_GRACE_MILLIS", 500),
            shutdown_grace: env_secs("SHUTDOWN_GRACE_SECS", 10),

            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_to_default_when_unset_or_invalid() {
        assert_eq!(env_parse::<usize>("QUIZ_SERVER_TEST_UNSET_VAR", 4), 4);
    }
}
