//! Environment-driven configuration.

use std::time::Duration;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    /// Bound on waiting for a per-group lock before failing retryably.
    pub lock_timeout_ms: u64,
    /// Contributions unmoved at least this long count as idle cash.
    pub idle_cash_threshold_days: i64,
    pub credit_score_interval_secs: u64,
    pub idle_cash_interval_secs: u64,
    pub auto_reject_on_majority: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let database_path = std::env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "./chamaledger.db".to_string());

        let lock_timeout_ms = env_parse("LOCK_TIMEOUT_MS", 2_000);
        let idle_cash_threshold_days = env_parse("IDLE_CASH_THRESHOLD_DAYS", 30);
        // Weekly scoring, monthly idle-cash scan by default.
        let credit_score_interval_secs = env_parse("CREDIT_SCORE_INTERVAL_SECS", 7 * 24 * 3600);
        let idle_cash_interval_secs = env_parse("IDLE_CASH_INTERVAL_SECS", 30 * 24 * 3600);

        let auto_reject_on_majority = std::env::var("AUTO_REJECT_ON_MAJORITY")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(true);

        Self {
            database_path,
            lock_timeout_ms,
            idle_cash_threshold_days,
            credit_score_interval_secs,
            idle_cash_interval_secs,
            auto_reject_on_majority,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
