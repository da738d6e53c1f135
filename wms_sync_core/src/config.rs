use crate::o11y::{LogConfig, LogFormat};
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Connection parameters for the upstream ERP source.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// ODBC connection string. Only required when a cycle actually runs.
    pub dsn: Option<String>,
    /// Schema selected before every query.
    pub schema: String,
    pub login_timeout: Duration,
    /// File holding the cache extraction query.
    pub query_path: PathBuf,
    /// Rows fetched per round trip.
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct LocalStoreConfig {
    pub path: PathBuf,
    pub busy_timeout: Duration,
    pub max_connections: u32,
}

/// Trailing window replicated into the cache each cycle.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub days: u32,
    pub margin_days: u32,
    /// Delete the window even when the extraction came back empty.
    pub purge_on_empty: bool,
}

impl WindowConfig {
    pub fn span_days(&self) -> i64 {
        i64::from(self.days) + i64::from(self.margin_days)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingSource {
    Disabled,
    Postgres { url: String },
    Local,
}

#[derive(Debug, Clone)]
pub struct MappingConfig {
    pub source: MappingSource,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// Command line of the served foreground process, split on whitespace.
    pub command: String,
    pub working_dir: PathBuf,
    /// Exported to the served process as `PORT`.
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub serve: ServeConfig,
}

/// Everything a sync process needs, built once by the entry point and
/// passed down explicitly.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub remote: RemoteConfig,
    pub store: LocalStoreConfig,
    pub window: WindowConfig,
    pub mapping: MappingConfig,
    pub schedule: ScheduleConfig,
    pub log: LogConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig {
                dsn: None,
                schema: "DBA".to_string(),
                login_timeout: Duration::from_secs(30),
                query_path: PathBuf::from("sql/orcamentos.sql"),
                batch_size: 512,
            },
            store: LocalStoreConfig {
                path: PathBuf::from("database.db"),
                busy_timeout: Duration::from_millis(5_000),
                max_connections: 5,
            },
            window: WindowConfig {
                days: 31,
                margin_days: 1,
                purge_on_empty: false,
            },
            mapping: MappingConfig {
                source: MappingSource::Disabled,
                timeout: Duration::from_millis(5_000),
            },
            schedule: ScheduleConfig {
                interval: Duration::from_secs(300),
                serve: ServeConfig {
                    command: "npm run dev".to_string(),
                    working_dir: PathBuf::from("."),
                    port: 411,
                },
            },
            log: LogConfig::default(),
        }
    }
}

impl SyncConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let dsn = std::env::var("WMS_SYNC_REMOTE_DSN")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let schema =
            std::env::var("WMS_SYNC_REMOTE_SCHEMA").unwrap_or(defaults.remote.schema.clone());
        let login_timeout = env_parse::<u64>("WMS_SYNC_REMOTE_LOGIN_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.remote.login_timeout);
        let query_path = std::env::var("WMS_SYNC_QUERY_PATH")
            .ok()
            .map(PathBuf::from)
            .unwrap_or(defaults.remote.query_path.clone());
        let batch_size =
            env_parse::<usize>("WMS_SYNC_REMOTE_BATCH_SIZE")?.unwrap_or(defaults.remote.batch_size);

        let store_path = std::env::var("WMS_SYNC_DATABASE_PATH")
            .ok()
            .map(PathBuf::from)
            .unwrap_or(defaults.store.path.clone());
        let busy_timeout = env_parse::<u64>("WMS_SYNC_BUSY_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.store.busy_timeout);

        let window_days =
            env_parse::<u32>("WMS_SYNC_WINDOW_DAYS")?.unwrap_or(defaults.window.days);
        let margin_days =
            env_parse::<u32>("WMS_SYNC_WINDOW_MARGIN_DAYS")?.unwrap_or(defaults.window.margin_days);
        let purge_on_empty =
            env_flag("WMS_SYNC_PURGE_ON_EMPTY")?.unwrap_or(defaults.window.purge_on_empty);

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let mapping_source = match std::env::var("WMS_SYNC_MAPPING_SOURCE")
            .unwrap_or_else(|_| "auto".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "auto" => match database_url {
                Some(url) => MappingSource::Postgres { url },
                None => MappingSource::Disabled,
            },
            "postgres" => MappingSource::Postgres {
                url: database_url.ok_or_else(|| {
                    Error::InvalidInput(
                        "DATABASE_URL is required when WMS_SYNC_MAPPING_SOURCE=postgres"
                            .to_string(),
                    )
                })?,
            },
            "local" => MappingSource::Local,
            "disabled" | "none" => MappingSource::Disabled,
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown WMS_SYNC_MAPPING_SOURCE '{other}' (expected auto|postgres|local|disabled)"
                )));
            }
        };
        let mapping_timeout = env_parse::<u64>("WMS_SYNC_MAPPING_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.mapping.timeout);

        let interval = env_parse::<u64>("WMS_SYNC_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.schedule.interval);
        let serve_command = std::env::var("WMS_SYNC_SERVE_COMMAND")
            .unwrap_or(defaults.schedule.serve.command.clone());
        let serve_dir = std::env::var("WMS_SYNC_SERVE_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or(defaults.schedule.serve.working_dir.clone());
        let serve_port =
            env_parse::<u16>("WMS_SYNC_SERVE_PORT")?.unwrap_or(defaults.schedule.serve.port);

        let quiet = env_flag("WMS_SYNC_QUIET")?.unwrap_or(false);
        let format = match std::env::var("WMS_SYNC_LOG_FORMAT") {
            Ok(v) => v.parse::<LogFormat>()?,
            Err(_) => LogFormat::Line,
        };

        let cfg = Self {
            remote: RemoteConfig {
                dsn,
                schema,
                login_timeout,
                query_path,
                batch_size,
            },
            store: LocalStoreConfig {
                path: store_path,
                busy_timeout,
                max_connections: defaults.store.max_connections,
            },
            window: WindowConfig {
                days: window_days,
                margin_days,
                purge_on_empty,
            },
            mapping: MappingConfig {
                source: mapping_source,
                timeout: mapping_timeout,
            },
            schedule: ScheduleConfig {
                interval,
                serve: ServeConfig {
                    command: serve_command,
                    working_dir: serve_dir,
                    port: serve_port,
                },
            },
            log: LogConfig { format, quiet },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn validate(&self) -> Result<()> {
        if self.remote.schema.trim().is_empty() {
            return Err(Error::InvalidInput("remote schema must be non-empty".to_string()));
        }
        if !self
            .remote
            .schema
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::InvalidInput(format!(
                "remote schema '{}' must be a plain identifier",
                self.remote.schema
            )));
        }
        if self.remote.batch_size == 0 {
            return Err(Error::InvalidInput("remote batch size must be > 0".to_string()));
        }
        if self.store.busy_timeout.is_zero() {
            return Err(Error::InvalidInput("busy timeout must be > 0".to_string()));
        }
        if self.store.max_connections == 0 {
            return Err(Error::InvalidInput("max_connections must be > 0".to_string()));
        }
        if self.window.days == 0 {
            return Err(Error::InvalidInput("window days must be > 0".to_string()));
        }
        if self.schedule.interval.is_zero() {
            return Err(Error::InvalidInput("sync interval must be > 0".to_string()));
        }
        if self.schedule.serve.command.split_whitespace().next().is_none() {
            return Err(Error::InvalidInput("serve command must be non-empty".to_string()));
        }
        Ok(())
    }

    /// The ODBC connection string, required before any remote work.
    pub fn require_dsn(&self) -> Result<&str> {
        self.remote.dsn.as_deref().ok_or_else(|| {
            Error::InvalidInput("WMS_SYNC_REMOTE_DSN is required to reach the ERP".to_string())
        })
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{key}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn env_flag(key: &str) -> Result<Option<bool>> {
    match std::env::var(key) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(Error::InvalidInput(format!(
                "{key}: expected a boolean, got '{other}'"
            ))),
        },
        Err(_) => Ok(None),
    }
}
