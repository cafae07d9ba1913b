use std::{str::FromStr, time::Duration};

/// Fixed delays (ms) before attempts 2, 3, 4 and 5.
pub const BACKOFF_SCHEDULE_MS: [u64; 4] = [200, 600, 1_400, 3_000];

/// Delay applied between failed attempts of one run. Chosen once per process
/// and used by every run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// `BACKOFF_SCHEDULE_MS[attempt_no - 1]`, clamped to the last entry.
    #[default]
    Schedule,
    /// `base_delay_ms * attempt_no`.
    Linear,
}

impl BackoffPolicy {
    /// Delay to wait after failed attempt `attempt_no` (1-based).
    pub fn delay(self, base_delay_ms: u32, attempt_no: u32) -> Duration {
        let attempt_no = attempt_no.max(1);
        let millis = match self {
            Self::Schedule => {
                let idx = (attempt_no - 1) as usize;
                BACKOFF_SCHEDULE_MS
                    .get(idx)
                    .copied()
                    .unwrap_or(BACKOFF_SCHEDULE_MS[BACKOFF_SCHEDULE_MS.len() - 1])
            }
            Self::Linear => u64::from(base_delay_ms) * u64::from(attempt_no),
        };
        Duration::from_millis(millis)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Linear => "linear",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown backoff policy `{0}` (expected `schedule` or `linear`)")]
pub struct UnknownBackoffPolicy(String);

impl FromStr for BackoffPolicy {
    type Err = UnknownBackoffPolicy;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "schedule" | "fixed" => Ok(Self::Schedule),
            "linear" => Ok(Self::Linear),
            other => Err(UnknownBackoffPolicy(other.to_owned())),
        }
    }
}
