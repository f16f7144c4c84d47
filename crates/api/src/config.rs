//! Application configuration management.

use serde::Deserialize;

use branchstock_infra::LedgerConfig;
use branchstock_observability::LogSettings;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// JWT configuration.
    pub jwt: JwtConfig,
    /// Ledger tunables (commit retries, journal page sizes).
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Where the ledger lives.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Postgres instead of the in-memory backend.
    #[serde(default)]
    pub persistent: bool,
    /// Falls back to `DATABASE_URL` when unset.
    #[serde(default)]
    pub database_url: Option<String>,
}

impl StorageConfig {
    pub fn database_url(&self) -> Option<String> {
        self.database_url.clone().or_else(|| std::env::var("DATABASE_URL").ok())
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// JWT configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// HS256 secret shared with the identity provider.
    pub secret: String,
}

impl AppConfig {
    /// Loads configuration from config files and `BRANCHSTOCK__*` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded, e.g. when no JWT
    /// secret is configured.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("BRANCHSTOCK").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Defaults everywhere except the secret.
    pub fn with_jwt_secret(secret: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            jwt: JwtConfig { secret: secret.into() },
            ledger: LedgerConfig::default(),
            log: LogSettings::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_fall_back_to_defaults() {
        let raw = config::Config::builder()
            .set_override("jwt.secret", "s3cret")
            .unwrap()
            .set_override("ledger.max_commit_attempts", 3)
            .unwrap()
            .build()
            .unwrap();

        let cfg: AppConfig = raw.try_deserialize().unwrap();
        assert_eq!(cfg.jwt.secret, "s3cret");
        assert_eq!(cfg.server.bind_address(), "0.0.0.0:8080");
        assert_eq!(cfg.ledger.max_commit_attempts, 3);
        assert_eq!(cfg.ledger.default_page_size, 50);
        assert!(!cfg.storage.persistent);
    }

    #[test]
    fn storage_section_selects_postgres() {
        let raw = config::Config::builder()
            .set_override("jwt.secret", "s3cret")
            .unwrap()
            .set_override("storage.persistent", true)
            .unwrap()
            .set_override("storage.database_url", "postgres://ledger@db/branchstock")
            .unwrap()
            .build()
            .unwrap();

        let cfg: AppConfig = raw.try_deserialize().unwrap();
        assert!(cfg.storage.persistent);
        assert_eq!(
            cfg.storage.database_url().as_deref(),
            Some("postgres://ledger@db/branchstock")
        );
    }
}
