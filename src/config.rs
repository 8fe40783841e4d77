//! Configuration file handling.
//!
//! Looks for, in order: the file named by `QAIL_ETL_CONFIG`, `qail-etl.toml`
//! in the working directory, then `<config dir>/qail-etl/config.toml`.
//!
//! ```toml
//! [limits]
//! default_limit = 50
//! max_limit = 1000
//! batch_size = 5000
//!
//! [[connections]]
//! id = "sales"
//! dialect = "postgres"
//! host = "db.internal"
//! database = "sales"
//! user = "etl"
//! password_env = "SALES_DB_PASSWORD"
//! owners = ["u1"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::{BatchOptions, ConnectionDescriptor, ConnectionResolver, ScopedClient, Secret, Timeouts};
use crate::error::{EtlError, EtlResult};
use crate::transpiler::{Dialect, QueryLimits};

/// Configuration file name looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "qail-etl.toml";

/// Environment variable naming an explicit configuration file
pub const ENV_CONFIG: &str = "QAIL_ETL_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EtlConfig {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
}

/// `[limits]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub default_limit: i64,
    pub max_limit: i64,
    pub batch_size: usize,
    pub preview_max_scanned: usize,
    pub preview_max_emitted: usize,
    pub connect_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let preview = BatchOptions::preview();
        let timeouts = Timeouts::default();
        Self {
            default_limit: QueryLimits::default().default_limit,
            max_limit: QueryLimits::default().max_limit,
            batch_size: preview.batch_size,
            preview_max_scanned: preview.max_scanned.unwrap_or(100_000),
            preview_max_emitted: preview.max_emitted.unwrap_or(1_000),
            connect_timeout_secs: timeouts.connect.as_secs(),
            metadata_timeout_secs: timeouts.metadata.as_secs(),
        }
    }
}

impl LimitsConfig {
    pub fn query_limits(&self) -> QueryLimits {
        QueryLimits {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }

    /// Options for export and other full scans.
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions::default().with_batch_size(self.batch_size)
    }

    pub fn preview_options(&self) -> BatchOptions {
        BatchOptions {
            max_scanned: Some(self.preview_max_scanned),
            max_emitted: Some(self.preview_max_emitted),
            ..self.batch_options()
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            metadata: Duration::from_secs(self.metadata_timeout_secs),
        }
    }
}

/// One `[[connections]]` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: String,
    #[serde(default)]
    pub dialect: Dialect,
    pub host: String,
    /// Defaults to the dialect's standard port
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    pub user: String,
    /// Environment variable holding the password
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    /// Users allowed to resolve this record. Empty means shared.
    #[serde(default)]
    pub owners: Vec<String>,
}

impl ConnectionRecord {
    fn visible_to(&self, client: &ScopedClient) -> bool {
        match client {
            ScopedClient::Elevated { .. } => true,
            ScopedClient::Restricted { user_id } => {
                self.owners.is_empty() || self.owners.iter().any(|o| o == user_id)
            }
        }
    }

    fn default_port(&self) -> u16 {
        match self.dialect {
            Dialect::MySQL => 3306,
            Dialect::Postgres | Dialect::Warehouse => 5432,
        }
    }
}

impl EtlConfig {
    /// `<config dir>/qail-etl/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("qail-etl").join("config.toml"))
    }

    pub fn from_toml_str(content: &str) -> EtlResult<Self> {
        toml::from_str(content).map_err(|e| EtlError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> EtlResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| EtlError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from the first location that exists, or defaults when none do.
    pub fn discover() -> EtlResult<Self> {
        if let Ok(path) = std::env::var(ENV_CONFIG) {
            return Self::load(Path::new(&path));
        }
        let candidates = std::iter::once(PathBuf::from(CONFIG_FILE_NAME)).chain(Self::default_path());
        for path in candidates {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading configuration");
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn resolver(&self) -> ConfigResolver {
        ConfigResolver::new(self.connections.clone())
    }
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves connection ids against configured records.
///
/// Passwords are read from the environment at resolution time and never
/// stored on the resolver.
pub struct ConfigResolver {
    records: Vec<ConnectionRecord>,
    env: EnvLookup,
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

impl ConfigResolver {
    pub fn new(records: Vec<ConnectionRecord>) -> Self {
        Self {
            records,
            env: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replace the environment lookup.
    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env = Box::new(env);
        self
    }
}

#[async_trait]
impl ConnectionResolver for ConfigResolver {
    async fn resolve(&self, client: &ScopedClient, connection_id: &str) -> EtlResult<ConnectionDescriptor> {
        // Records the client may not see are reported as missing
        let record = self
            .records
            .iter()
            .find(|r| r.id == connection_id && r.visible_to(client))
            .ok_or_else(|| EtlError::NotFound(format!("connection '{}'", connection_id)))?;

        let password = match &record.password_env {
            Some(var) => (self.env)(var).ok_or_else(|| {
                EtlError::Config(format!(
                    "connection '{}': environment variable '{}' is not set",
                    record.id, var
                ))
            })?,
            None => String::new(),
        };

        Ok(ConnectionDescriptor {
            dialect: record.dialect,
            host: record.host.clone(),
            port: record.port.unwrap_or_else(|| record.default_port()),
            database: record.database.clone(),
            user: record.user.clone(),
            password: Secret::new(password),
            schema: record.schema.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Principal;

    const SAMPLE: &str = r#"
[limits]
max_limit = 500
batch_size = 2000

[[connections]]
id = "sales"
dialect = "mysql"
host = "db.internal"
database = "sales"
user = "etl"
password_env = "SALES_DB_PASSWORD"
owners = ["u1"]

[[connections]]
id = "shared"
host = "warehouse.internal"
database = "dw"
user = "reader"
"#;

    fn resolver() -> ConfigResolver {
        EtlConfig::from_toml_str(SAMPLE)
            .unwrap()
            .resolver()
            .with_env(|name| (name == "SALES_DB_PASSWORD").then(|| "s3cret".to_string()))
    }

    #[test]
    fn test_parse_limits_with_defaults() {
        let config = EtlConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.limits.max_limit, 500);
        assert_eq!(config.limits.default_limit, 50);
        assert_eq!(config.limits.batch_options().batch_size, 2000);
        assert_eq!(config.limits.preview_options().max_scanned, Some(100_000));
        assert_eq!(config.limits.timeouts(), Timeouts::default());
        assert_eq!(config.connections.len(), 2);
        assert_eq!(config.connections[1].dialect, Dialect::Postgres);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        assert!(matches!(EtlConfig::from_toml_str("[limits"), Err(EtlError::Config(_))));
    }

    #[tokio::test]
    async fn test_owner_resolves_with_password() {
        let client = ScopedClient::for_principal(&Principal::new("u1", "analyst"));
        let descriptor = resolver().resolve(&client, "sales").await.unwrap();
        assert_eq!(descriptor.dialect, Dialect::MySQL);
        assert_eq!(descriptor.port, 3306);
        assert_eq!(descriptor.password.expose(), "s3cret");
    }

    #[tokio::test]
    async fn test_restricted_client_cannot_see_foreign_record() {
        let client = ScopedClient::for_principal(&Principal::new("u2", "analyst"));
        assert!(matches!(
            resolver().resolve(&client, "sales").await,
            Err(EtlError::NotFound(_))
        ));
        // Shared records stay visible
        assert_eq!(resolver().resolve(&client, "shared").await.unwrap().port, 5432);

        let admin = ScopedClient::for_principal(&Principal::new("u2", "admin"));
        assert!(resolver().resolve(&admin, "sales").await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_password_variable() {
        let client = ScopedClient::for_principal(&Principal::new("u1", "admin"));
        let resolver = EtlConfig::from_toml_str(SAMPLE).unwrap().resolver().with_env(|_| None);
        assert!(matches!(resolver.resolve(&client, "sales").await, Err(EtlError::Config(_))));
    }
}
