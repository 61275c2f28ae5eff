use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use gpkeeper_storage::{ConnectionContext, EnvCredentialStore};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub engine: EngineConfigValues,
    pub connection: ConnectionConfig,
    pub contexts: Vec<ContextConfig>,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfigValues {
    pub deep_revoke: bool,
    pub install_dblink: bool,
    pub grant_with_admin_option: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_secs: u64,
}

/// A named cluster endpoint. The password is read from `password_env`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ContextConfig {
    pub alias: String,
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub role: String,
    #[serde(default = "default_database")]
    pub database: String,
    pub password_env: String,
}

fn default_pg_port() -> u16 {
    5432
}

fn default_database() -> String {
    "postgres".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for EngineConfigValues {
    fn default() -> Self {
        let defaults = gpkeeper_core::engine::EngineConfig::default();
        Self {
            deep_revoke: defaults.deep_revoke,
            install_dblink: defaults.install_dblink,
            grant_with_admin_option: defaults.grant_with_admin_option,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e.to_string()))?;
            toml::from_str::<AppConfig>(&contents)
                .map_err(|e| ConfigError::ParseToml(e.to_string()))?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GPKEEPER_HTTP_HOST") {
            self.http.host = v;
        }
        if let Ok(v) = std::env::var("GPKEEPER_HTTP_PORT")
            && let Ok(port) = v.parse()
        {
            self.http.port = port;
        }
        if let Ok(v) = std::env::var("GPKEEPER_ENGINE_DEEP_REVOKE")
            && let Some(flag) = parse_flag(&v)
        {
            self.engine.deep_revoke = flag;
        }
        if let Ok(v) = std::env::var("GPKEEPER_ENGINE_INSTALL_DBLINK")
            && let Some(flag) = parse_flag(&v)
        {
            self.engine.install_dblink = flag;
        }
        if let Ok(v) = std::env::var("GPKEEPER_ENGINE_GRANT_WITH_ADMIN_OPTION")
            && let Some(flag) = parse_flag(&v)
        {
            self.engine.grant_with_admin_option = flag;
        }
        if let Ok(v) = std::env::var("GPKEEPER_CONNECTION_CONNECT_TIMEOUT_SECS")
            && let Ok(secs) = v.parse()
        {
            self.connection.connect_timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("GPKEEPER_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = std::env::var("GPKEEPER_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.http.port == 0 {
            return Err(ConfigError::Validation(
                "http.port must be non-zero".to_string(),
            ));
        }
        if self.connection.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "connection.connect_timeout_secs must be non-zero".to_string(),
            ));
        }

        let mut aliases = HashSet::new();
        for context in &self.contexts {
            if context.alias.is_empty() {
                return Err(ConfigError::Validation(
                    "contexts.alias must not be empty".to_string(),
                ));
            }
            if !aliases.insert(context.alias.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate context alias '{}'",
                    context.alias
                )));
            }
            if context.port == 0 {
                return Err(ConfigError::Validation(format!(
                    "context '{}' port must be non-zero",
                    context.alias
                )));
            }
        }
        Ok(())
    }

    pub fn to_engine_config(&self) -> gpkeeper_core::engine::EngineConfig {
        gpkeeper_core::engine::EngineConfig {
            deep_revoke: self.engine.deep_revoke,
            install_dblink: self.engine.install_dblink,
            grant_with_admin_option: self.engine.grant_with_admin_option,
        }
    }

    pub fn connection_contexts(&self) -> Vec<ConnectionContext> {
        self.contexts
            .iter()
            .map(|c| ConnectionContext {
                alias: c.alias.clone(),
                host: c.host.clone(),
                port: c.port,
                role: c.role.clone(),
                database: c.database.clone(),
            })
            .collect()
    }

    pub fn credential_store(&self) -> EnvCredentialStore {
        self.contexts
            .iter()
            .fold(EnvCredentialStore::new(), |store, c| {
                store.with_variable(&c.alias, &c.password_env)
            })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.connect_timeout_secs)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    ReadFile(String, String),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn context(alias: &str) -> ContextConfig {
        ContextConfig {
            alias: alias.to_string(),
            host: "gp-master".to_string(),
            port: 5432,
            role: "gpadmin".to_string(),
            database: "postgres".to_string(),
            password_env: "GP_PASSWORD".to_string(),
        }
    }

    #[test]
    fn default_config_has_sensible_values() {
        let config = AppConfig::default();

        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.http.port, 8080);
        assert!(config.engine.deep_revoke);
        assert!(config.engine.install_dblink);
        assert!(!config.engine.grant_with_admin_option);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(config.contexts.is_empty());
    }

    #[test]
    fn load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[http]
host = "127.0.0.1"
port = 9090

[engine]
deep_revoke = false
grant_with_admin_option = true

[connection]
connect_timeout_secs = 12

[[contexts]]
alias = "prod"
host = "gp-master.internal"
role = "gpadmin"
password_env = "GP_PROD_PASSWORD"

[log]
format = "pretty"
level = "debug"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();

        assert_eq!(config.http_addr(), "127.0.0.1:9090");
        assert!(!config.engine.deep_revoke);
        assert!(config.engine.install_dblink);
        assert!(config.to_engine_config().grant_with_admin_option);
        assert_eq!(config.connect_timeout(), Duration::from_secs(12));
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert_eq!(config.log.level, "debug");

        let contexts = config.connection_contexts();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].alias, "prod");
        assert_eq!(contexts[0].port, 5432);
        assert_eq!(contexts[0].database, "postgres");
    }

    #[test]
    fn env_vars_override_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[http]
port = 9090
"#
        )
        .unwrap();

        // SAFETY: test runs single-threaded for this env var
        unsafe { std::env::set_var("GPKEEPER_HTTP_PORT", "8181") };
        let config = AppConfig::load(Some(&path)).unwrap();
        unsafe { std::env::remove_var("GPKEEPER_HTTP_PORT") };

        assert_eq!(config.http.port, 8181);
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/gpkeeper.toml")));
        assert!(matches!(result, Err(ConfigError::ReadFile(..))));
    }

    #[test]
    fn validation_rejects_zero_port() {
        let mut config = AppConfig::default();
        config.http.port = 0;

        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("port")));
    }

    #[test]
    fn validation_rejects_zero_timeout() {
        let mut config = AppConfig::default();
        config.connection.connect_timeout_secs = 0;

        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::Validation(ref msg)) if msg.contains("connect_timeout")
        ));
    }

    #[test]
    fn validation_rejects_duplicate_aliases() {
        let mut config = AppConfig::default();
        config.contexts = vec![context("prod"), context("prod")];

        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("prod")));
    }
}
