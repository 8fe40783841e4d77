//! # qail-etl
//!
//! Declarative row selection and transformation compiled to dialect-correct,
//! parameterized SQL for PostgreSQL, MySQL and the internal warehouse.
//!
//! A [`TransformSpec`](ast::TransformSpec) names a table or a star join plus
//! optional filters, casts, arithmetic derivations and CASE rules. The
//! compiler splits it into a base subquery (projection, casts, joins) and an
//! outer query (derivations, filters, ordering), so every filter can see
//! every alias.
//!
//! ## Quick Example
//!
//! ```
//! use qail_etl::prelude::*;
//!
//! let spec = TransformSpec {
//!     table: Some("sales".into()),
//!     columns: vec!["id".into(), "amount".into()],
//!     conditions: vec![FilterCondition::new("amount", FilterOperator::Gt, "1000")],
//!     ..Default::default()
//! };
//! let plan = spec.to_plan().unwrap();
//! assert_eq!(
//!     plan.sql,
//!     "SELECT sub.* FROM (SELECT \"id\", \"amount\" FROM \"sales\") AS sub \
//!      WHERE sub.\"amount\" > $1 ORDER BY sub.\"id\" LIMIT $2 OFFSET $3"
//! );
//! ```
//!
//! ## Layout
//!
//! | Module         | Role                                              |
//! |----------------|---------------------------------------------------|
//! | [`ast`]        | Request types and the SQL expression tree         |
//! | [`transpiler`] | Compilers and per-dialect rendering               |
//! | [`engine`]     | Connections, batch streaming, CSV export          |
//! | [`pipeline`]   | In-process preview over fetched rows              |
//! | [`service`]    | Request boundary and error conversion             |
//! | [`config`]     | TOML limits and connection records                |

pub mod ast;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod sanitize;
pub mod service;
pub mod transpiler;

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::config::{ConfigResolver, EtlConfig};
    pub use crate::engine::{
        BatchExecutor, BatchOptions, ConnectionDescriptor, ConnectionResolver, Connector, CsvSink, DbConnection,
        ExportPayload, Principal, Row, RowSource, ScopedClient, SqlxConnector, TabularSink,
    };
    pub use crate::error::*;
    pub use crate::pipeline::PipelineExecutor;
    pub use crate::service::{EtlService, TransformResponse};
    pub use crate::transpiler::{ColumnType, Dialect, QueryCompiler, QueryPlan, SourceColumn, SourceSchema, ToPlan};
}

/// Compile a request for `dialect`.
///
/// # Example
///
/// ```
/// use qail_etl::{ast::TransformSpec, transpiler::Dialect};
///
/// let spec = TransformSpec { table: Some("sales".into()), ..Default::default() };
/// let plan = qail_etl::compile(&spec, Dialect::MySQL).unwrap();
/// assert!(plan.sql.starts_with("SELECT sub.* FROM (SELECT * FROM `sales`) AS sub"));
/// ```
pub fn compile(spec: &ast::TransformSpec, dialect: transpiler::Dialect) -> error::EtlResult<transpiler::QueryPlan> {
    transpiler::plan::compile(spec, dialect)
}
