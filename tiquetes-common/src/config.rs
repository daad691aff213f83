//! Configuration loading and root folder resolution
//!
//! Two tiers:
//! 1. **TOML bootstrap**: host, port, folders, webhook URLs, Roboflow credentials.
//!    Read once at startup.
//! 2. **Database runtime**: timeouts and limits from the `settings` table
//!    (see [`RuntimeSettings`]).

use crate::{Error, Result};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable consulted for the root folder
pub const ROOT_FOLDER_ENV: &str = "TIQUETES_ROOT";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root folder holding the database, uploads and classification results
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Explicit database path (defaults to `<root>/tiquetes.db`)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Externally reachable base URL, used for QR and guide links
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub webhooks: WebhookConfig,

    #[serde(default)]
    pub roboflow: RoboflowConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            root_folder: None,
            database_path: None,
            public_base_url: default_public_base_url(),
            logging: LoggingConfig::default(),
            webhooks: WebhookConfig::default(),
            roboflow: RoboflowConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Outbound webhook endpoints, one per external flow
///
/// An empty URL disables the call: required flows fail with a configuration
/// error, notification flows are skipped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookConfig {
    /// Ticket photo → markdown table
    #[serde(default)]
    pub process: String,
    /// Plate photo → plate text
    #[serde(default)]
    pub placa: String,
    /// Corrected ticket fields → validated record
    #[serde(default)]
    pub revalidation: String,
    /// Final entry registration
    #[serde(default)]
    pub register: String,
    /// Scale photo → gross weight
    #[serde(default)]
    pub pesaje: String,
    /// Manual weighing authorization request
    #[serde(default)]
    pub autorizacion: String,
    /// Gross weight notification
    #[serde(default)]
    pub registro_peso: String,
    /// Classification notification
    #[serde(default)]
    pub registro_clasificacion: String,
    /// Net weight notification
    #[serde(default)]
    pub registro_peso_neto: String,
    /// Administrative notifications
    #[serde(default)]
    pub admin_notification: String,
    /// Bulk-goods vehicle photo validation
    #[serde(default)]
    pub validacion_granel: String,
}

/// Roboflow workflow credentials
#[derive(Debug, Clone, Deserialize)]
pub struct RoboflowConfig {
    #[serde(default = "default_roboflow_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub workflow_id: String,
}

impl Default for RoboflowConfig {
    fn default() -> Self {
        Self {
            api_url: default_roboflow_url(),
            api_key: String::new(),
            workspace: String::new(),
            workflow_id: String::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5002
}

fn default_public_base_url() -> String {
    "http://localhost:5002".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_roboflow_url() -> String {
    "https://detect.roboflow.com".to_string()
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub root_folder: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the platform config file is
    /// used when present, otherwise built-in defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = match explicit_path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_file().filter(|p| p.exists()),
        };

        match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("Failed to read config file {:?}: {}", path, e))
                })?;
                let config = Self::from_toml_str(&content)?;
                info!("Loaded TOML configuration from {:?}", path);
                Ok(config)
            }
            None => {
                info!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Apply command-line overrides in place
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(root) = overrides.root_folder {
            self.root_folder = Some(root);
        }
        if let Some(db) = overrides.database_path {
            self.database_path = Some(db);
        }
    }
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    get_default_root_folder()
}

/// Platform configuration file path (`<config_dir>/tiquetes/config.toml`)
fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tiquetes").join("config.toml"))
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tiquetes"))
        .unwrap_or_else(|| PathBuf::from("./tiquetes_data"))
}

/// Filesystem layout under the root folder
#[derive(Debug, Clone)]
pub struct RootLayout {
    pub root: PathBuf,
    pub database_path: PathBuf,
    pub uploads_dir: PathBuf,
    pub clasificaciones_dir: PathBuf,
}

impl RootLayout {
    pub fn new(root: PathBuf, database_override: Option<PathBuf>) -> Self {
        let database_path = database_override.unwrap_or_else(|| root.join("tiquetes.db"));
        Self {
            uploads_dir: root.join("uploads"),
            clasificaciones_dir: root.join("clasificaciones"),
            database_path,
            root,
        }
    }

    /// Create root, uploads and results directories if missing
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.uploads_dir)?;
        std::fs::create_dir_all(&self.clasificaciones_dir)?;
        Ok(())
    }
}

/// Runtime settings loaded from the `settings` table
///
/// Defaults are written by `init_database`; a missing or unparsable value
/// falls back to the built-in default here as well.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub webhook_timeout_secs: u64,
    pub revalidation_timeout_secs: u64,
    pub authorization_code_ttl_minutes: i64,
    pub max_clasificacion_fotos: usize,
    pub session_timeout_seconds: i64,
    pub upload_max_bytes: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            webhook_timeout_secs: 30,
            revalidation_timeout_secs: 60,
            authorization_code_ttl_minutes: 30,
            max_clasificacion_fotos: 3,
            session_timeout_seconds: 43_200,
            upload_max_bytes: 20 * 1024 * 1024,
        }
    }
}

impl RuntimeSettings {
    /// Load runtime settings from database
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        async fn get_setting<T>(pool: &SqlitePool, key: &str, default: T) -> Result<T>
        where
            T: std::str::FromStr + std::fmt::Display,
        {
            let value: Option<Option<String>> =
                sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
                    .bind(key)
                    .fetch_optional(pool)
                    .await?;

            match value.flatten() {
                Some(raw) => match raw.trim().parse::<T>() {
                    Ok(parsed) => Ok(parsed),
                    Err(_) => {
                        warn!("Setting '{}' has invalid value '{}', using default {}", key, raw, default);
                        Ok(default)
                    }
                },
                None => Ok(default),
            }
        }

        let d = Self::default();
        let settings = Self {
            webhook_timeout_secs: get_setting(pool, "webhook_timeout_secs", d.webhook_timeout_secs).await?,
            revalidation_timeout_secs: get_setting(pool, "revalidation_timeout_secs", d.revalidation_timeout_secs).await?,
            authorization_code_ttl_minutes: get_setting(pool, "authorization_code_ttl_minutes", d.authorization_code_ttl_minutes).await?,
            max_clasificacion_fotos: get_setting(pool, "max_clasificacion_fotos", d.max_clasificacion_fotos).await?,
            session_timeout_seconds: get_setting(pool, "session_timeout_seconds", d.session_timeout_seconds).await?,
            upload_max_bytes: get_setting(pool, "upload_max_bytes", d.upload_max_bytes).await?,
        };

        info!("Loaded runtime settings from database");
        Ok(settings)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn revalidation_timeout(&self) -> Duration {
        Duration::from_secs(self.revalidation_timeout_secs)
    }
}
