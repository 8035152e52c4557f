// src/config.rs

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use dotenvy::dotenv;

use crate::controller::{feed::ReconnectPolicy, outbox::BackoffPolicy};

/// Registration opens this many minutes before the scheduled start.
pub const ADMISSION_LEAD_MINUTES: i64 = 15;

/// Prize money (currency units) per final rank.
pub const PRIZE_TABLE: [(u32, u32); 3] = [(1, 1000), (2, 750), (3, 500)];

/// Civil timezone of the portal when none is configured (UTC+06:00).
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 360;

/// How early a session start is accepted, to absorb clock skew between a
/// terminal and the portal. Questions are never served before this.
pub const START_SKEW_GRACE_SECONDS: i64 = 2;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const FEED_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Server configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub bind_addr: SocketAddr,
    pub utc_offset: FixedOffset,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://exam_portal.db".to_string());

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600);

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            bind_addr,
            utc_offset: utc_offset_from_env(),
        }
    }
}

/// Client-side settings for the admission controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Base HTTP URL of the portal backend, e.g. `http://127.0.0.1:3000`.
    pub portal_url: String,
    pub utc_offset: FixedOffset,
    pub tick_interval: Duration,
    pub feed_retry: ReconnectPolicy,
    pub submission_retry: BackoffPolicy,
    /// Where undelivered submissions are kept. `None` keeps them in memory only.
    pub outbox_path: Option<PathBuf>,
    /// Per-terminal attempt limit (`EXAM_TIME_LIMIT_SECS`). The session ends
    /// at this limit or the exam's end time, whichever comes first.
    pub time_limit: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            portal_url: "http://127.0.0.1:3000".to_string(),
            utc_offset: default_utc_offset(),
            tick_interval: TICK_INTERVAL,
            feed_retry: ReconnectPolicy::default(),
            submission_retry: BackoffPolicy::default(),
            outbox_path: None,
            time_limit: None,
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        dotenv().ok();

        let mut config = Self::default();
        if let Ok(url) = env::var("PORTAL_URL") {
            config.portal_url = url;
        }
        config.utc_offset = utc_offset_from_env();
        if let Some(secs) = env::var("FEED_RETRY_SECS").ok().and_then(|v| v.parse().ok()) {
            config.feed_retry = ReconnectPolicy {
                delay: Duration::from_secs(secs),
            };
        }
        config.outbox_path = env::var("OUTBOX_PATH").ok().map(PathBuf::from);
        config.time_limit = env::var("EXAM_TIME_LIMIT_SECS")
            .ok()
            .and_then(|v| parse_time_limit(&v));
        config
    }
}

fn default_utc_offset() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60).unwrap_or_else(|| Utc.fix())
}

fn utc_offset_from_env() -> FixedOffset {
    env::var("PORTAL_UTC_OFFSET_MINUTES")
        .ok()
        .and_then(|v| parse_utc_offset(&v))
        .unwrap_or_else(default_utc_offset)
}

/// Minutes east of UTC. `None` when unparsable or out of range.
fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    raw.trim()
        .parse::<i32>()
        .ok()
        .and_then(|minutes| minutes.checked_mul(60))
        .and_then(FixedOffset::east_opt)
}

/// Whole seconds; zero means no limit.
fn parse_time_limit(raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(secs) => Some(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_offset_rejects_values_that_overflow() {
        assert_eq!(parse_utc_offset("360"), FixedOffset::east_opt(6 * 3600));
        assert_eq!(parse_utc_offset("-300"), FixedOffset::east_opt(-5 * 3600));
        assert_eq!(parse_utc_offset("99999999"), None);
        assert_eq!(parse_utc_offset("-99999999"), None);
        // In range for i32 seconds but beyond a day.
        assert_eq!(parse_utc_offset("1500"), None);
        assert_eq!(parse_utc_offset("six"), None);
    }

    #[test]
    fn time_limit_is_read_in_seconds() {
        assert_eq!(parse_time_limit("1800"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_time_limit(" 90 "), Some(Duration::from_secs(90)));
        assert_eq!(parse_time_limit("0"), None);
        assert_eq!(parse_time_limit("-5"), None);
        assert_eq!(parse_time_limit("soon"), None);
    }
}
