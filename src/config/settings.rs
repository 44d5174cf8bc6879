use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the broker host.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// What the broker does when a consumer's handler returns an error.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HandlerErrorPolicy {
    /// Abort the dispatch pass and return the error to the caller of
    /// `publish` / `start_consuming`.
    #[default]
    Propagate,
    /// Ack the failed delivery and publish a copy carrying the error to
    /// `<topic>__error`.
    ErrorTopic,
}

/// Configuration settings for the broker.
///
/// Topics listed here are created when the broker is built from settings.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub topics: Vec<String>,
    pub answer_topics: Vec<String>,
    pub default_prefetch: usize,
    pub retry_max_count: u32,
    pub retry_delay_ms: u64,
    pub answer_poll_interval_ms: u64,
    pub handler_error_policy: HandlerErrorPolicy,
}

impl BrokerSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn answer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.answer_poll_interval_ms.max(1))
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            answer_topics: Vec::new(),
            default_prefetch: 1,
            retry_max_count: 3,
            retry_delay_ms: 10_000,
            answer_poll_interval_ms: 10,
            handler_error_policy: HandlerErrorPolicy::Propagate,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub topics: Option<Vec<String>>,
    pub answer_topics: Option<Vec<String>>,
    pub default_prefetch: Option<usize>,
    pub retry_max_count: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub answer_poll_interval_ms: Option<u64>,
    pub handler_error_policy: Option<HandlerErrorPolicy>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Overlay the values that were provided on top of `Settings::default()`.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();
        let broker = self.broker.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            broker: BrokerSettings {
                topics: broker.topics.unwrap_or(default.broker.topics),
                answer_topics: broker.answer_topics.unwrap_or(default.broker.answer_topics),
                default_prefetch: broker
                    .default_prefetch
                    .unwrap_or(default.broker.default_prefetch),
                retry_max_count: broker
                    .retry_max_count
                    .unwrap_or(default.broker.retry_max_count),
                retry_delay_ms: broker
                    .retry_delay_ms
                    .unwrap_or(default.broker.retry_delay_ms),
                answer_poll_interval_ms: broker
                    .answer_poll_interval_ms
                    .unwrap_or(default.broker.answer_poll_interval_ms),
                handler_error_policy: broker
                    .handler_error_policy
                    .unwrap_or(default.broker.handler_error_policy),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }
}
