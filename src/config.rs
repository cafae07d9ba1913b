use std::{env, error::Error, str::FromStr, time::Duration};

use crate::replay::backoff::BackoffPolicy;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Memory-backed storage is used when unset.
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub public_api_base: String,
    pub max_webhook_size_bytes: usize,
    pub replay_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub max_concurrent_runs: usize,
    pub auto_run: bool,
}

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_MAX_WEBHOOK_SIZE_BYTES: usize = 5_242_880;
const DEFAULT_REPLAY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_CONCURRENT_RUNS: usize = 16;

fn optional_var(name: &str) -> Result<Option<String>, Box<dyn Error>> {
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => Ok(Some(raw.trim().to_owned())),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(Box::new(err)),
    }
}

fn parsed_var<T>(name: &str, default: T) -> Result<T, Box<dyn Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name)? {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|err| format!("{name}: {err}").into()),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        let database_url = optional_var("DATABASE_URL")?;
        let bind_addr = optional_var("BIND_ADDR")?.unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned());
        let public_api_base = optional_var("PUBLIC_API_BASE")?
            .map(|base| base.trim_end_matches('/').to_owned())
            .unwrap_or_else(|| format!("http://{bind_addr}"));
        let max_webhook_size_bytes =
            parsed_var("MAX_WEBHOOK_SIZE_BYTES", DEFAULT_MAX_WEBHOOK_SIZE_BYTES)?;
        let replay_timeout = Duration::from_millis(parsed_var(
            "REPLAY_TIMEOUT_MS",
            DEFAULT_REPLAY_TIMEOUT_MS,
        )?);
        let backoff = parsed_var("REPLAY_BACKOFF", BackoffPolicy::default())?;
        let max_concurrent_runs =
            parsed_var("REPLAY_MAX_CONCURRENT_RUNS", DEFAULT_MAX_CONCURRENT_RUNS)?;
        let auto_run = parsed_var("REPLAY_AUTO_RUN", true)?;

        Ok(Self {
            database_url,
            bind_addr,
            public_api_base,
            max_webhook_size_bytes,
            replay_timeout,
            backoff,
            max_concurrent_runs,
            auto_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const VARS: [&str; 8] = [
        "DATABASE_URL",
        "BIND_ADDR",
        "PUBLIC_API_BASE",
        "MAX_WEBHOOK_SIZE_BYTES",
        "REPLAY_TIMEOUT_MS",
        "REPLAY_BACKOFF",
        "REPLAY_MAX_CONCURRENT_RUNS",
        "REPLAY_AUTO_RUN",
    ];

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_env() {
        for name in VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let _guard = env_lock().lock().expect("env lock should be acquired");
        clear_env();

        let config = AppConfig::from_env().expect("config should parse");

        assert_eq!(config.database_url, None);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.public_api_base, "http://127.0.0.1:8787");
        assert_eq!(config.max_webhook_size_bytes, DEFAULT_MAX_WEBHOOK_SIZE_BYTES);
        assert_eq!(config.replay_timeout, Duration::from_secs(10));
        assert_eq!(config.backoff, BackoffPolicy::Schedule);
        assert_eq!(config.max_concurrent_runs, DEFAULT_MAX_CONCURRENT_RUNS);
        assert!(config.auto_run);
    }

    #[test]
    fn reads_overrides_from_env() {
        let _guard = env_lock().lock().expect("env lock should be acquired");
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/replay");
        env::set_var("BIND_ADDR", "0.0.0.0:3000");
        env::set_var("PUBLIC_API_BASE", "https://hooks.example.com/");
        env::set_var("REPLAY_TIMEOUT_MS", "2500");
        env::set_var("REPLAY_BACKOFF", "linear");
        env::set_var("REPLAY_MAX_CONCURRENT_RUNS", "2");
        env::set_var("REPLAY_AUTO_RUN", "false");

        let config = AppConfig::from_env().expect("config should parse");

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/replay"));
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.public_api_base, "https://hooks.example.com");
        assert_eq!(config.replay_timeout, Duration::from_millis(2500));
        assert_eq!(config.backoff, BackoffPolicy::Linear);
        assert_eq!(config.max_concurrent_runs, 2);
        assert!(!config.auto_run);
        clear_env();
    }

    #[test]
    fn rejects_unparseable_values() {
        let _guard = env_lock().lock().expect("env lock should be acquired");
        clear_env();
        env::set_var("REPLAY_BACKOFF", "exponential");

        let err = AppConfig::from_env().expect_err("config should fail");

        assert!(err.to_string().contains("REPLAY_BACKOFF"));
        clear_env();
    }
}
