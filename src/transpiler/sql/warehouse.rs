use crate::ast::{Func, SqlType};
use crate::transpiler::sql::postgres::PostgresGenerator;
use crate::transpiler::traits::SqlGenerator;

/// Internal warehouse generator.
///
/// The warehouse speaks the Postgres protocol and syntax; decimals use a
/// fixed precision so exported files keep a stable scale.
pub struct WarehouseGenerator;

impl SqlGenerator for WarehouseGenerator {
    fn quote_identifier(&self, name: &str) -> String {
        PostgresGenerator.quote_identifier(name)
    }

    fn placeholder(&self, index: usize) -> String {
        PostgresGenerator.placeholder(index)
    }

    fn fuzzy_operator(&self) -> &str {
        "ILIKE"
    }

    fn type_name(&self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::Numeric => "NUMERIC(38, 10)",
            other => PostgresGenerator.type_name(other),
        }
    }

    fn power(&self, base: &str, exponent: &str) -> String {
        PostgresGenerator.power(base, exponent)
    }

    fn function_call(&self, func: Func, args: &[String]) -> String {
        PostgresGenerator.function_call(func, args)
    }
}
