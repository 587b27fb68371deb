//! Configuration for hnc-daemon

use hnc_reconcilers::{Backoff, ControllerConfig, ManagerConfig};
use hnc_types::HncSettings;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Admission webhook server
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Aggregated reader server
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Reconciler worker pools
    #[serde(default)]
    pub controllers: ControllersConfig,

    /// Hierarchy policy
    #[serde(default)]
    pub hnc: HncSettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// YAML or JSON objects loaded into the store at boot
    #[serde(default)]
    pub seed_manifests: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub listen_addr: SocketAddr,

    /// Per-request admission deadline in milliseconds
    #[serde(default = "default_webhook_timeout")]
    pub timeout_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9443)),
            timeout_ms: default_webhook_timeout(),
        }
    }
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub listen_addr: SocketAddr,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Client-certificate common names allowed to read; empty admits nobody
    #[serde(default)]
    pub authorized_users: Vec<String>,

    /// Server identity and client CA; the reader is not served without it
    #[serde(default)]
    pub tls: Option<ReaderTlsConfig>,
}

/// PEM files for the reader's mutual TLS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderTlsConfig {
    pub cert_path: String,
    pub key_path: String,
    /// CA bundle that signs caller certificates
    pub client_ca_path: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7443)),
            enabled: true,
            authorized_users: Vec::new(),
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllersConfig {
    /// Workers per reconciler kind
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Time in-flight reconciliations get to finish at shutdown
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// 0 disables periodic resync
    #[serde(default)]
    pub resync_period_secs: u64,
}

impl Default for ControllersConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_backoff_secs: default_max_backoff(),
            grace_period_secs: default_grace_period(),
            resync_period_secs: 0,
        }
    }
}

impl ControllersConfig {
    pub fn manager_config(&self) -> ManagerConfig {
        let backoff = Backoff {
            max: Duration::from_secs(self.max_backoff_secs),
            ..Backoff::default()
        };
        ManagerConfig {
            controller: ControllerConfig {
                workers: self.workers.max(1),
                grace_period: Duration::from_secs(self.grace_period_secs),
            },
            backoff,
            resync_period: (self.resync_period_secs > 0)
                .then(|| Duration::from_secs(self.resync_period_secs)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_webhook_timeout() -> u64 {
    2_000
}

fn default_workers() -> usize {
    10
}

fn default_max_backoff() -> u64 {
    60
}

fn default_grace_period() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Layers defaults, an optional file and `HNC_`-prefixed environment variables
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // HNC_WEBHOOK__LISTEN_ADDR, HNC_CONTROLLERS__WORKERS, ...
        builder = builder.add_source(
            config::Environment::with_prefix("HNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.webhook.listen_addr.port(), 9443);
        assert_eq!(config.webhook.timeout(), Duration::from_secs(2));
        assert!(config.reader.enabled);
        assert!(config.reader.authorized_users.is_empty());
        assert!(config.reader.tls.is_none());
        assert!(config.seed_manifests.is_none());
        assert_eq!(config.hnc, HncSettings::default());
    }

    #[test]
    fn test_controller_defaults() {
        let manager = ControllersConfig::default().manager_config();
        assert_eq!(manager.controller.workers, 10);
        assert_eq!(manager.controller.grace_period, Duration::from_secs(10));
        assert_eq!(manager.backoff.max, Duration::from_secs(60));
        assert!(manager.resync_period.is_none());

        let resyncing = ControllersConfig {
            resync_period_secs: 30,
            workers: 0,
            ..Default::default()
        }
        .manager_config();
        assert_eq!(resyncing.resync_period, Some(Duration::from_secs(30)));
        assert_eq!(resyncing.controller.workers, 1);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.controllers.workers, 10);
        assert_eq!(config.logging.level, "info");
    }
}
