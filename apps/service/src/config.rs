use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to write config file {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub alerts: AlertsConfig,
    pub retention: RetentionConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Local database file, used when `url` is not set
    pub path: String,
    /// Remote libsql url (`libsql://...`)
    pub url: Option<String>,
    pub auth_token: Option<String>,
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "pulse.db".into(), url: None, auth_token: None, pool_size: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub nats_url: String,
    pub stream: String,
    pub subject: String,
    pub consumer: String,
    /// Deliveries before JetStream stops redelivering a job
    pub max_deliver: i64,
    /// How long an unacknowledged job stays invisible before redelivery
    pub ack_wait_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://127.0.0.1:4222".into(),
            stream: "MONITOR_CHECKS".into(),
            subject: "monitor.checks".into(),
            consumer: "monitor-worker".into(),
            max_deliver: 10,
            ack_wait_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_seconds: u64,
    pub batch_size: u32,
    pub claim_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_seconds: 30, batch_size: 50, claim_timeout_ms: 5_000 }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.max(1))
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Extra time granted on top of a monitor's own timeout before the run is cancelled
    pub timeout_slack_ms: u64,
    /// Packets sent by the ping executor
    pub ping_count: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { timeout_slack_ms: 2_000, ping_count: 3 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub api_version: String,
    pub phone_number_id: String,
    pub access_token: Option<String>,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self { api_version: "v21.0".into(), phone_number_id: String::new(), access_token: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub smtp: Option<SmtpConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
    pub pushover_app_token: Option<String>,
    pub dispatch_interval_seconds: u64,
    pub batch_size: u32,
    pub max_attempts: u32,
    pub base_backoff_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            smtp: None,
            whatsapp: None,
            pushover_app_token: None,
            dispatch_interval_seconds: 5,
            batch_size: 50,
            max_attempts: 5,
            base_backoff_seconds: 10,
            request_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub check_days: u32,
    pub interval_seconds: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { check_days: 30, interval_seconds: 3_600 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1".into(), port: 8080 }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/pulse/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("pulse/config.toml"))
}

fn mask(secret: &Option<String>) -> &'static str {
    match secret {
        Some(value) if !value.is_empty() => "********",
        _ => "<unset>",
    }
}

fn or_unset(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("<unset>")
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_title_2 = write_title_indented(2);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Url", &or_unset(&self.database.url))?;
        write_1(f, "Auth Token", &mask(&self.database.auth_token))?;
        write_1(f, "Pool Size", &self.database.pool_size)?;

        write_title_1(f, "Queue")?;
        write_1(f, "NATS Url", &self.queue.nats_url)?;
        write_1(f, "Stream", &self.queue.stream)?;
        write_1(f, "Subject", &self.queue.subject)?;
        write_1(f, "Consumer", &self.queue.consumer)?;
        write_1(f, "Max Deliver", &self.queue.max_deliver)?;

        write_title_1(f, "Scheduler")?;
        write_1(f, "Tick (s)", &self.scheduler.tick_seconds)?;
        write_1(f, "Batch Size", &self.scheduler.batch_size)?;

        write_title_1(f, "Worker")?;
        write_1(f, "Timeout Slack (ms)", &self.worker.timeout_slack_ms)?;
        write_1(f, "Ping Count", &self.worker.ping_count)?;

        write_title_1(f, "Alerts")?;
        write_1(f, "Dispatch Interval (s)", &self.alerts.dispatch_interval_seconds)?;
        write_1(f, "Max Attempts", &self.alerts.max_attempts)?;
        write_1(f, "Base Backoff (s)", &self.alerts.base_backoff_seconds)?;
        write_1(f, "Pushover Token", &mask(&self.alerts.pushover_app_token))?;
        if let Some(smtp) = &self.alerts.smtp {
            write_title_2(f, "SMTP")?;
            write_2(f, "Host", &format!("{}:{}", smtp.host, smtp.port))?;
            write_2(f, "From", &smtp.from)?;
            write_2(f, "Username", &or_unset(&smtp.username))?;
            write_2(f, "Password", &mask(&smtp.password))?;
        }
        if let Some(whatsapp) = &self.alerts.whatsapp {
            write_title_2(f, "WhatsApp")?;
            write_2(f, "Api Version", &whatsapp.api_version)?;
            write_2(f, "Phone Number Id", &whatsapp.phone_number_id)?;
            write_2(f, "Access Token", &mask(&whatsapp.access_token))?;
        }

        write_title_1(f, "Retention")?;
        write_1(f, "Check Days", &self.retention.check_days)?;

        write_title_1(f, "Server")?;
        write_1(f, "Bind Address", &self.server.bind)?;
        write_1(f, "Port", &self.server.port)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/pulse/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```no_run
    /// use pulse_service::config::Config;
    ///
    /// let cfg = Config::from_config(None::<&std::path::Path>).unwrap();
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_written_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/pulse");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.scheduler.batch_size, 50);
        assert!(dir.path().join("nested/pulse.toml").exists());

        let reloaded = Config::from_config(Some(&path)).unwrap();
        assert_eq!(reloaded.queue.max_deliver, 10);
        assert_eq!(reloaded.retention.check_days, 30);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[scheduler]\ntick_seconds = 5\n").unwrap();
        assert_eq!(config.scheduler.tick_seconds, 5);
        assert_eq!(config.scheduler.batch_size, 50);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_display_masks_secrets() {
        let mut config = Config::default();
        config.database.auth_token = Some("super-secret".into());
        config.alerts.smtp = Some(SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: Some("mailer".into()),
            password: Some("hunter2".into()),
            from: "alerts@example.com".into(),
        });

        let rendered = config.to_string();
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("smtp.example.com:587"));
        assert!(rendered.contains("********"));
    }
}
