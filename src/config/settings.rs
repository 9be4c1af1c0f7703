use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Groups the HTTP server, the broker backend, the sent-message history and
/// logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub history: HistorySettings,
    pub log: LogSettings,
}

/// Configuration settings for the HTTP server.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Which broker client implementation backs the service.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    /// In-process broker, nothing leaves the process.
    Memory,
    /// Pub/Sub REST API (emulator or the hosted service).
    Rest,
}

/// Configuration settings for the broker client.
///
/// `subscription_suffix` is appended to the topic name to derive the
/// broker-side subscription name, so one operator always reuses the same
/// durable subscription per topic.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub backend: BrokerBackend,
    pub project_id: String,
    pub endpoint: String,
    pub access_token: Option<String>,
    pub subscription_suffix: String,
    pub request_timeout_secs: u64,
    pub pull_max_messages: u32,
    pub pull_interval_ms: u64,
    pub max_pull_failures: u32,
}

/// Configuration settings for the sent-message history store.
#[derive(Debug, Deserialize, Clone)]
pub struct HistorySettings {
    pub enabled: bool,
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional; missing values are filled in from the defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub history: Option<PartialHistorySettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub backend: Option<BrokerBackend>,
    pub project_id: Option<String>,
    pub endpoint: Option<String>,
    pub access_token: Option<String>,
    pub subscription_suffix: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub pull_max_messages: Option<u32>,
    pub pull_interval_ms: Option<u64>,
    pub max_pull_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialHistorySettings {
    pub enabled: Option<bool>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

/// Name of the user running the process, used in the default subscription suffix.
fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 6969,
            },
            broker: BrokerSettings {
                backend: BrokerBackend::Memory,
                project_id: "local-project".to_string(),
                endpoint: "http://localhost:8085".to_string(),
                access_token: None,
                subscription_suffix: format!("pubsub_ui-{}", current_username()),
                request_timeout_secs: 5,
                pull_max_messages: 100,
                pull_interval_ms: 500,
                max_pull_failures: 5,
            },
            history: HistorySettings {
                enabled: true,
                path: "pubsubui.db".to_string(),
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Overlays whatever `partial` specifies on top of `self`.
    pub fn merge(self, partial: PartialSettings) -> Self {
        let server = partial.server.unwrap_or_default();
        let broker = partial.broker.unwrap_or_default();
        let history = partial.history.unwrap_or_default();
        let log = partial.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(self.server.host),
                port: server.port.unwrap_or(self.server.port),
            },
            broker: BrokerSettings {
                backend: broker.backend.unwrap_or(self.broker.backend),
                project_id: broker.project_id.unwrap_or(self.broker.project_id),
                endpoint: broker.endpoint.unwrap_or(self.broker.endpoint),
                access_token: broker.access_token.or(self.broker.access_token),
                subscription_suffix: broker
                    .subscription_suffix
                    .unwrap_or(self.broker.subscription_suffix),
                request_timeout_secs: broker
                    .request_timeout_secs
                    .unwrap_or(self.broker.request_timeout_secs),
                pull_max_messages: broker
                    .pull_max_messages
                    .unwrap_or(self.broker.pull_max_messages),
                pull_interval_ms: broker
                    .pull_interval_ms
                    .unwrap_or(self.broker.pull_interval_ms),
                max_pull_failures: broker
                    .max_pull_failures
                    .unwrap_or(self.broker.max_pull_failures),
            },
            history: HistorySettings {
                enabled: history.enabled.unwrap_or(self.history.enabled),
                path: history.path.unwrap_or(self.history.path),
            },
            log: LogSettings {
                level: log.level.unwrap_or(self.log.level),
            },
        }
    }
}
