use std::time::Duration;

const DEFAULT_SLOW_WAIT_MS: u64 = 1_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockManagerConfig {
    /// Deadline applied by the blocking wrappers (`None` waits indefinitely).
    pub wait_timeout: Option<Duration>,
    /// Waits longer than this are logged at `warn`.
    pub slow_wait: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            wait_timeout: None,
            slow_wait: Duration::from_millis(DEFAULT_SLOW_WAIT_MS),
        }
    }
}

impl LockManagerConfig {
    /// Read overrides from `SATORI_LOCK_WAIT_TIMEOUT_MS` (0 disables the
    /// timeout) and `SATORI_LOCK_SLOW_WAIT_MS`. Unparsable values fall back to
    /// the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let wait_timeout = match env_millis("SATORI_LOCK_WAIT_TIMEOUT_MS") {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.wait_timeout,
        };
        let slow_wait = env_millis("SATORI_LOCK_SLOW_WAIT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.slow_wait);
        Self {
            wait_timeout,
            slow_wait,
        }
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    pub fn with_slow_wait(mut self, threshold: Duration) -> Self {
        self.slow_wait = threshold;
        self
    }
}

fn env_millis(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}
