//! CastConversion compiler.
//!
//! Numeric targets go through the same sanitizer as
//! [`sanitize_numeric`](crate::sanitize::sanitize_numeric), expressed as SQL:
//! whitespace is stripped, the last of `.`/`,` is taken as the decimal
//! separator, leftover symbols are removed and anything that is not a
//! well-formed number becomes NULL.

use std::collections::HashMap;

use crate::ast::{BinaryOp, CastConversion, Expr, Func, Literal, SqlType, TargetType};
use crate::sanitize::{FALSY, NON_NUMERIC_PATTERN, NUMBER_PATTERN, TRUTHY, WHITESPACE_PATTERN};

/// One honored conversion per column, in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CastRegistry {
    order: Vec<String>,
    targets: HashMap<String, TargetType>,
}

impl CastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry; a later conversion for the same column replaces the
    /// earlier one.
    pub fn from_conversions(conversions: &[CastConversion]) -> Self {
        let mut registry = Self::new();
        for conversion in conversions {
            registry.register(&conversion.column, conversion.target_type);
        }
        registry
    }

    pub fn register(&mut self, column: &str, target: TargetType) {
        let column = column.trim();
        match self.targets.insert(column.to_string(), target) {
            Some(previous) if previous != target => {
                tracing::warn!(
                    column,
                    %previous,
                    %target,
                    "duplicate cast conversion, keeping the last one"
                );
            }
            Some(_) => {}
            None => self.order.push(column.to_string()),
        }
    }

    pub fn get(&self, column: &str) -> Option<TargetType> {
        self.targets.get(column.trim()).copied()
    }

    /// `(column, target)` pairs in first-registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, TargetType)> + '_ {
        self.order
            .iter()
            .map(move |column| (column.as_str(), self.targets[column]))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Coerce `source` to `target`.
pub fn cast_expr(source: Expr, target: TargetType) -> Expr {
    match target {
        TargetType::String => source.cast(SqlType::Text),
        TargetType::Number => guarded_numeric(source, |clean| clean.cast(SqlType::Double)),
        TargetType::Decimal => guarded_numeric(source, |clean| clean.cast(SqlType::Numeric)),
        TargetType::Integer => guarded_numeric(source, |clean| {
            Expr::call(Func::Truncate, vec![clean.cast(SqlType::Numeric)]).cast(SqlType::BigInt)
        }),
        TargetType::Boolean => boolean_expr(source),
        TargetType::Date => source.cast(SqlType::Date),
        TargetType::Datetime => source.cast(SqlType::Timestamp),
    }
}

/// `CASE WHEN <clean> matches NUMBER THEN <convert(clean)> ELSE NULL END`
fn guarded_numeric(source: Expr, convert: impl FnOnce(Expr) -> Expr) -> Expr {
    let clean = sanitized_text(source);
    let is_number = Expr::call(Func::RegexMatch, vec![clean.clone(), Expr::text(NUMBER_PATTERN)]);
    Expr::Case {
        when_clauses: vec![(is_number, convert(clean))],
        else_value: Some(Box::new(Expr::null())),
    }
}

/// The textual sanitizer: canonical `[-]digits[.digits]` or garbage.
pub fn sanitized_text(source: Expr) -> Expr {
    let s = Expr::call(
        Func::RegexReplace,
        vec![source.cast(SqlType::Text), Expr::text(WHITESPACE_PATTERN), Expr::text("")],
    );

    let dots = occurrences(&s, ".");
    let commas = occurrences(&s, ",");
    let zero = || Expr::Literal(Literal::Int(0));
    let one = || Expr::Literal(Literal::Int(1));
    let both = Expr::binary(
        Expr::binary(dots.clone(), BinaryOp::Gt, zero()),
        BinaryOp::And,
        Expr::binary(commas.clone(), BinaryOp::Gt, zero()),
    );
    // Reversed, the separator that occurs last comes first
    let reversed = Expr::call(Func::Reverse, vec![s.clone()]);
    let dot_is_last = Expr::binary(
        Expr::call(Func::Position, vec![Expr::text("."), reversed.clone()]),
        BinaryOp::Lt,
        Expr::call(Func::Position, vec![Expr::text(","), reversed]),
    );

    let normalized = Expr::Case {
        when_clauses: vec![
            (
                Expr::binary(both.clone(), BinaryOp::And, dot_is_last),
                replace(s.clone(), ",", ""),
            ),
            (both, replace(replace(s.clone(), ".", ""), ",", ".")),
            (Expr::binary(dots, BinaryOp::Gt, one()), replace(s.clone(), ".", "")),
            (Expr::binary(commas.clone(), BinaryOp::Gt, one()), replace(s.clone(), ",", "")),
            (Expr::binary(commas, BinaryOp::Eq, one()), replace(s.clone(), ",", ".")),
        ],
        else_value: Some(Box::new(s)),
    };

    Expr::call(
        Func::RegexReplace,
        vec![normalized, Expr::text(NON_NUMERIC_PATTERN), Expr::text("")],
    )
}

fn boolean_expr(source: Expr) -> Expr {
    let normalized = Expr::call(
        Func::Lower,
        vec![Expr::call(Func::Trim, vec![source.cast(SqlType::Text)])],
    );
    let spellings = |set: &[&str]| set.iter().map(|s| Expr::text(*s)).collect::<Vec<_>>();
    Expr::Case {
        when_clauses: vec![
            (
                Expr::InList {
                    expr: Box::new(normalized.clone()),
                    list: spellings(TRUTHY),
                    negated: false,
                },
                Expr::Literal(Literal::Bool(true)),
            ),
            (
                Expr::InList {
                    expr: Box::new(normalized),
                    list: spellings(FALSY),
                    negated: false,
                },
                Expr::Literal(Literal::Bool(false)),
            ),
        ],
        else_value: Some(Box::new(Expr::null())),
    }
}

/// `CHAR_LENGTH(s) - CHAR_LENGTH(REPLACE(s, needle, ''))`
fn occurrences(s: &Expr, needle: &str) -> Expr {
    Expr::binary(
        Expr::call(Func::Length, vec![s.clone()]),
        BinaryOp::Sub,
        Expr::call(Func::Length, vec![replace(s.clone(), needle, "")]),
    )
}

fn replace(s: Expr, from: &str, to: &str) -> Expr {
    Expr::call(Func::Replace, vec![s, Expr::text(from), Expr::text(to)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transpiler::Dialect;
    use crate::transpiler::render::render_standalone;

    fn render(expr: &Expr, dialect: Dialect) -> String {
        render_standalone(expr, dialect.generator().as_ref()).0
    }

    #[test]
    fn test_duplicate_cast_keeps_last() {
        let registry = CastRegistry::from_conversions(&[
            CastConversion {
                column: "amount".into(),
                target_type: TargetType::Integer,
            },
            CastConversion {
                column: "amount".into(),
                target_type: TargetType::Decimal,
            },
        ]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("amount"), Some(TargetType::Decimal));
    }

    #[test]
    fn test_string_and_date_casts_are_native() {
        assert_eq!(
            render(&cast_expr(Expr::column("d"), TargetType::Date), Dialect::Postgres),
            "CAST(\"d\" AS DATE)"
        );
        assert_eq!(
            render(&cast_expr(Expr::column("d"), TargetType::Datetime), Dialect::MySQL),
            "CAST(`d` AS DATETIME)"
        );
        assert_eq!(
            render(&cast_expr(Expr::column("s"), TargetType::String), Dialect::MySQL),
            "CAST(`s` AS CHAR)"
        );
    }

    #[test]
    fn test_decimal_cast_is_guarded() {
        let sql = render(&cast_expr(Expr::column("amount"), TargetType::Decimal), Dialect::Postgres);
        assert!(sql.starts_with("CASE WHEN (REGEXP_REPLACE("));
        assert!(sql.contains("'[[:space:]]'"));
        assert!(sql.contains("'[^0-9.-]'"));
        assert!(sql.contains("POSITION('.' IN REVERSE("));
        assert!(sql.ends_with("AS NUMERIC) ELSE NULL END"));
    }

    #[test]
    fn test_integer_cast_truncates() {
        let pg = render(&cast_expr(Expr::column("n"), TargetType::Integer), Dialect::Postgres);
        assert!(pg.contains("CAST(TRUNC(CAST("));
        assert!(pg.ends_with("AS BIGINT) ELSE NULL END"));

        let my = render(&cast_expr(Expr::column("n"), TargetType::Integer), Dialect::MySQL);
        assert!(my.contains("CAST(TRUNCATE(CAST("));
        assert!(my.contains("REGEXP_LIKE("));
        assert!(my.ends_with("AS SIGNED) ELSE NULL END"));
    }

    #[test]
    fn test_boolean_cast() {
        let sql = render(&cast_expr(Expr::column("flag"), TargetType::Boolean), Dialect::Postgres);
        assert_eq!(
            sql,
            "CASE WHEN LOWER(TRIM(CAST(\"flag\" AS TEXT))) IN ('true', 't', '1', 'yes', 'y', 'si', 'sí') THEN TRUE \
             WHEN LOWER(TRIM(CAST(\"flag\" AS TEXT))) IN ('false', 'f', '0', 'no', 'n') THEN FALSE ELSE NULL END"
        );
    }
}
