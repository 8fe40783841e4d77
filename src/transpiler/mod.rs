//! Transformation request → dialect SQL.

pub mod alias;
pub mod arithmetic;
pub mod casts;
pub mod dialect;
pub mod filters;
pub mod joins;
pub mod plan;
pub mod render;
pub mod rules;
pub mod sql;
pub mod traits;

#[cfg(test)]
mod tests;

pub use self::dialect::Dialect;
pub use self::plan::{ColumnType, QueryCompiler, QueryLimits, QueryPlan, SourceColumn, SourceSchema};
pub use self::traits::SqlGenerator;

use crate::ast::TransformSpec;
use crate::error::EtlResult;

/// Compile a request into a [`QueryPlan`].
pub trait ToPlan {
    /// Compile for Postgres.
    fn to_plan(&self) -> EtlResult<QueryPlan> {
        self.to_plan_with_dialect(Dialect::default())
    }

    fn to_plan_with_dialect(&self, dialect: Dialect) -> EtlResult<QueryPlan>;
}

impl ToPlan for TransformSpec {
    fn to_plan_with_dialect(&self, dialect: Dialect) -> EtlResult<QueryPlan> {
        plan::compile(self, dialect)
    }
}
