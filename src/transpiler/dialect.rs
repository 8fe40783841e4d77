use serde::{Deserialize, Serialize};

use crate::transpiler::sql::mysql::MysqlGenerator;
use crate::transpiler::sql::postgres::PostgresGenerator;
use crate::transpiler::sql::warehouse::WarehouseGenerator;
use crate::transpiler::traits::SqlGenerator;

/// Supported SQL Dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    #[serde(alias = "mariadb")]
    MySQL,
    /// Internal warehouse (Postgres protocol)
    Warehouse,
}

impl Dialect {
    pub fn generator(&self) -> Box<dyn SqlGenerator> {
        match self {
            Dialect::Postgres => Box::new(PostgresGenerator),
            Dialect::MySQL => Box::new(MysqlGenerator),
            Dialect::Warehouse => Box::new(WarehouseGenerator),
        }
    }

    /// Whether connections go through the Postgres driver.
    pub fn uses_postgres_protocol(&self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Warehouse)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::MySQL => write!(f, "mysql"),
            Dialect::Warehouse => write!(f, "warehouse"),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySQL),
            "warehouse" => Ok(Dialect::Warehouse),
            other => Err(format!("unsupported dialect '{}'", other)),
        }
    }
}
