//! Execution engine: connections, capabilities and row streaming.

pub mod batch;
pub mod connection;
pub mod export;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EtlResult;
use crate::transpiler::Dialect;

pub use self::batch::{BatchExecutor, BatchOptions, RowSource};
pub use self::connection::{DbConnection, SqlxConnector, Timeouts};
pub use self::export::{CsvSink, ExportPayload, TabularSink};

/// One decoded row, columns in SELECT order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// Everything needed to open one connection. Resolved per request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDescriptor {
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Secret,
    /// Schema for unqualified table names
    pub schema: Option<String>,
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    #[serde(default)]
    pub role: String,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: role.into(),
        }
    }
}

/// Roles whose requests may see every connection record.
const ELEVATED_ROLES: &[&str] = &["admin", "service"];

/// The data-access capability of one request.
///
/// Built once from the principal and handed to collaborators explicitly,
/// never stored globally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopedClient {
    /// Sees only connection records the user owns or that are shared
    Restricted { user_id: String },
    /// Sees every connection record
    Elevated { user_id: String },
}

impl ScopedClient {
    pub fn for_principal(principal: &Principal) -> Self {
        let user_id = principal.user_id.clone();
        if ELEVATED_ROLES.contains(&principal.role.as_str()) {
            ScopedClient::Elevated { user_id }
        } else {
            ScopedClient::Restricted { user_id }
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            ScopedClient::Restricted { user_id } | ScopedClient::Elevated { user_id } => user_id,
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, ScopedClient::Elevated { .. })
    }
}

/// Resolves a connection id to credentials on behalf of a client.
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    async fn resolve(&self, client: &ScopedClient, connection_id: &str) -> EtlResult<ConnectionDescriptor>;
}

/// Opens a [`RowSource`] for a descriptor.
#[async_trait]
pub trait Connector: Send + Sync {
    type Source: RowSource;

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> EtlResult<Self::Source>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted() {
        let descriptor = ConnectionDescriptor {
            dialect: Dialect::Postgres,
            host: "db".into(),
            port: 5432,
            database: "sales".into(),
            user: "etl".into(),
            password: Secret::new("hunter2"),
            schema: None,
        };
        let debug = format!("{:?}", descriptor);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("Secret(***)"));
    }

    #[test]
    fn test_scoped_client_from_role() {
        assert!(ScopedClient::for_principal(&Principal::new("u1", "admin")).is_elevated());
        let client = ScopedClient::for_principal(&Principal::new("u2", "analyst"));
        assert!(!client.is_elevated());
        assert_eq!(client.user_id(), "u2");
    }
}
