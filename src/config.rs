// src/config.rs

use std::env;
use std::net::SocketAddr;

use dotenvy::dotenv;

/// Grace period added on top of an exam's estimated duration.
pub const SESSION_GRACE_MINUTES: i64 = 30;

/// Session lifetime for exams that declare no estimated duration.
pub const DEFAULT_SESSION_HOURS: i64 = 24;

/// Tab switches tolerated before every further switch raises a warning.
pub const TAB_SWITCH_THRESHOLD: u32 = 3;

/// Submissions faster than this share of the estimated duration are flagged.
pub const FAST_SUBMIT_RATIO: f64 = 0.30;

/// Buffered messages per realtime topic before slow observers start lagging.
pub const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub rust_log: String,
    pub bind_addr: SocketAddr,
    pub require_license: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let require_license = env::var("REQUIRE_LICENSE")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Self {
            database_url,
            jwt_secret,
            rust_log,
            bind_addr,
            require_license,
        }
    }
}
