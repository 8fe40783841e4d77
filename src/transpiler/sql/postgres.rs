use crate::ast::{Func, SqlType};
use crate::transpiler::traits::{SqlGenerator, ansi_function_call, escape_identifier};

/// PostgreSQL Generator.
pub struct PostgresGenerator;

impl SqlGenerator for PostgresGenerator {
    fn quote_identifier(&self, name: &str) -> String {
        escape_identifier(name)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn fuzzy_operator(&self) -> &str {
        "ILIKE"
    }

    fn type_name(&self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::Text => "TEXT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Numeric => "NUMERIC",
            SqlType::BigInt => "BIGINT",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Date => "DATE",
            SqlType::Timestamp => "TIMESTAMP",
        }
    }

    fn power(&self, base: &str, exponent: &str) -> String {
        format!("POWER({}, {})", base, exponent)
    }

    fn function_call(&self, func: Func, args: &[String]) -> String {
        match (func, args) {
            // Replace every occurrence, not just the first
            (Func::RegexReplace, [source, pattern, replacement]) => {
                format!("REGEXP_REPLACE({}, {}, {}, 'g')", source, pattern, replacement)
            }
            (Func::RegexMatch, [source, pattern]) => format!("({} ~ {})", source, pattern),
            _ => ansi_function_call(func, args),
        }
    }
}
