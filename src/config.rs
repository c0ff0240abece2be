//! Environment configuration and reconciliation policy.

use std::env;
use std::time::Duration;

use daemon_api::DaemonApiConfig;
use thiserror::Error;

pub const ENV_BASE_URL: &str = "DAEMON_CHAT_BASE_URL";
pub const ENV_PARTICIPANT: &str = "DAEMON_CHAT_PARTICIPANT";
pub const ENV_POLL_INTERVAL_MS: &str = "DAEMON_CHAT_POLL_INTERVAL_MS";
pub const ENV_POLL_CEILING_MS: &str = "DAEMON_CHAT_POLL_CEILING_MS";
pub const ENV_MAX_TRAILING_ASSISTANT: &str = "DAEMON_CHAT_MAX_TRAILING_ASSISTANT";
pub const ENV_LOG: &str = "DAEMON_CHAT_LOG";
pub const ENV_TIMEOUT_MS: &str = "DAEMON_CHAT_TIMEOUT_MS";

pub const DEFAULT_PARTICIPANT: &str = "user";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2_500);
pub const DEFAULT_POLL_CEILING: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_TRAILING_ASSISTANT: usize = 1;

/// Timing and presentation constants for overlay reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Delay between durable-store queries while awaiting confirmation.
    pub poll_interval: Duration,
    /// Wall-clock bound on polling, measured from the first query.
    pub poll_ceiling: Duration,
    /// How many assistant messages after the last user message the overlay
    /// may stand in for.
    pub max_trailing_assistant: usize,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_ceiling: DEFAULT_POLL_CEILING,
            max_trailing_assistant: DEFAULT_MAX_TRAILING_ASSISTANT,
        }
    }
}

impl ReconcilePolicy {
    /// Panics in `tokio::time::interval` are avoided by never handing it zero.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_poll_ceiling(mut self, poll_ceiling: Duration) -> Self {
        self.poll_ceiling = poll_ceiling;
        self
    }

    pub fn with_max_trailing_assistant(mut self, max_trailing_assistant: usize) -> Self {
        self.max_trailing_assistant = max_trailing_assistant;
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub base_url: Option<String>,
    pub participant: String,
    pub policy: ReconcilePolicy,
    pub log_filter: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let string_opt = |key: &str| {
            lookup(key).and_then(|value| {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
        };
        let number_opt = |key: &'static str| -> Result<Option<u64>, ConfigError> {
            string_opt(key)
                .map(|value| {
                    value
                        .parse::<u64>()
                        .map_err(|_| ConfigError::InvalidNumber { key, value })
                })
                .transpose()
        };

        let mut policy = ReconcilePolicy::default();
        if let Some(ms) = number_opt(ENV_POLL_INTERVAL_MS)? {
            if ms == 0 {
                return Err(ConfigError::Zero {
                    key: ENV_POLL_INTERVAL_MS,
                });
            }
            policy = policy.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = number_opt(ENV_POLL_CEILING_MS)? {
            policy = policy.with_poll_ceiling(Duration::from_millis(ms));
        }
        if let Some(count) = number_opt(ENV_MAX_TRAILING_ASSISTANT)? {
            let count = usize::try_from(count).unwrap_or(usize::MAX);
            policy = policy.with_max_trailing_assistant(count);
        }

        let request_timeout = match number_opt(ENV_TIMEOUT_MS)? {
            Some(0) => return Err(ConfigError::Zero { key: ENV_TIMEOUT_MS }),
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        };

        Ok(Self {
            base_url: string_opt(ENV_BASE_URL),
            participant: string_opt(ENV_PARTICIPANT)
                .unwrap_or_else(|| DEFAULT_PARTICIPANT.to_string()),
            policy,
            log_filter: string_opt(ENV_LOG),
            request_timeout,
        })
    }

    /// Transport config. The request timeout applies to connecting only, so
    /// long streamed turns are not cut off.
    pub fn api_config(&self) -> DaemonApiConfig {
        let mut config = DaemonApiConfig::default();
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url);
        }
        if let Some(timeout) = self.request_timeout {
            config = config.with_connect_timeout(timeout);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::env;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use super::{
        ConfigError, EnvConfig, ReconcilePolicy, ENV_BASE_URL, ENV_LOG,
        ENV_MAX_TRAILING_ASSISTANT, ENV_PARTICIPANT, ENV_POLL_CEILING_MS, ENV_POLL_INTERVAL_MS,
        ENV_TIMEOUT_MS,
    };

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_defaults_apply_when_unset() {
        let _lock = env_lock();
        let _g1 = set_env_guard(ENV_BASE_URL, None);
        let _g2 = set_env_guard(ENV_PARTICIPANT, None);
        let _g3 = set_env_guard(ENV_POLL_INTERVAL_MS, None);
        let _g4 = set_env_guard(ENV_POLL_CEILING_MS, None);
        let _g5 = set_env_guard(ENV_MAX_TRAILING_ASSISTANT, None);
        let _g6 = set_env_guard(ENV_LOG, None);
        let _g7 = set_env_guard(ENV_TIMEOUT_MS, None);

        let config = EnvConfig::from_env().expect("defaults");
        assert_eq!(config.base_url, None);
        assert_eq!(config.participant, "user");
        assert_eq!(config.policy, ReconcilePolicy::default());
        assert_eq!(config.policy.poll_interval, Duration::from_millis(2_500));
        assert_eq!(config.policy.poll_ceiling, Duration::from_secs(60));
        assert_eq!(config.policy.max_trailing_assistant, 1);
        assert!(config.log_filter.is_none());
        assert!(config.request_timeout.is_none());
    }

    #[test]
    fn env_values_override_defaults() {
        let _lock = env_lock();
        let _g1 = set_env_guard(ENV_BASE_URL, Some("http://daemon:9000"));
        let _g2 = set_env_guard(ENV_PARTICIPANT, Some("helper"));
        let _g3 = set_env_guard(ENV_POLL_INTERVAL_MS, Some("500"));
        let _g4 = set_env_guard(ENV_POLL_CEILING_MS, Some("10000"));
        let _g5 = set_env_guard(ENV_MAX_TRAILING_ASSISTANT, Some("0"));
        let _g6 = set_env_guard(ENV_LOG, Some("daemon_chat=debug"));
        let _g7 = set_env_guard(ENV_TIMEOUT_MS, Some("3000"));

        let config = EnvConfig::from_env().expect("configured");
        assert_eq!(config.base_url.as_deref(), Some("http://daemon:9000"));
        assert_eq!(config.participant, "helper");
        assert_eq!(config.policy.poll_interval, Duration::from_millis(500));
        assert_eq!(config.policy.poll_ceiling, Duration::from_secs(10));
        assert_eq!(config.policy.max_trailing_assistant, 0);
        assert_eq!(config.log_filter.as_deref(), Some("daemon_chat=debug"));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(3)));

        let api = config.api_config();
        assert_eq!(api.base_url, "http://daemon:9000");
        assert_eq!(api.connect_timeout, Some(Duration::from_secs(3)));
        assert_eq!(api.timeout, None);
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = EnvConfig::from_lookup(lookup(&[
            (ENV_PARTICIPANT, "   "),
            (ENV_POLL_INTERVAL_MS, ""),
        ]))
        .expect("blank values");
        assert_eq!(config.participant, "user");
        assert_eq!(config.policy.poll_interval, Duration::from_millis(2_500));
    }

    #[test]
    fn unparsable_numbers_are_rejected() {
        let error = EnvConfig::from_lookup(lookup(&[(ENV_POLL_CEILING_MS, "soon")]))
            .expect_err("invalid number");
        assert_eq!(
            error,
            ConfigError::InvalidNumber {
                key: ENV_POLL_CEILING_MS,
                value: "soon".to_string(),
            }
        );
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let error = EnvConfig::from_lookup(lookup(&[(ENV_POLL_INTERVAL_MS, "0")]))
            .expect_err("zero interval");
        assert_eq!(
            error,
            ConfigError::Zero {
                key: ENV_POLL_INTERVAL_MS
            }
        );
    }
}
