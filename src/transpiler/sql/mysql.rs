use crate::ast::{Func, SqlType};
use crate::transpiler::traits::{SqlGenerator, ansi_function_call};

/// MySQL Generator.
pub struct MysqlGenerator;

impl SqlGenerator for MysqlGenerator {
    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn fuzzy_operator(&self) -> &str {
        // Default collations are case-insensitive
        "LIKE"
    }

    fn string_literal(&self, s: &str) -> String {
        // Backslash is an escape character in MySQL string literals
        format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn type_name(&self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::Text => "CHAR",
            SqlType::Double => "DOUBLE",
            SqlType::Numeric => "DECIMAL(65, 10)",
            SqlType::BigInt => "SIGNED",
            SqlType::Boolean => "SIGNED",
            SqlType::Date => "DATE",
            SqlType::Timestamp => "DATETIME",
        }
    }

    fn power(&self, base: &str, exponent: &str) -> String {
        format!("POW({}, {})", base, exponent)
    }

    fn function_call(&self, func: Func, args: &[String]) -> String {
        match (func, args) {
            (Func::Truncate, [value]) => format!("TRUNCATE({}, 0)", value),
            _ => ansi_function_call(func, args),
        }
    }
}
