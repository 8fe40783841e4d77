//! FilterCondition compiler.
//!
//! Conditions compile against a [`Scope`], so the same list can target raw
//! table columns or the outer query's `sub.` aliases.

use chrono::{NaiveDate, NaiveDateTime};

use crate::ast::{BinaryOp, Expr, FilterCondition, FilterOperator, SqlType, TargetType, Value};
use crate::error::{EtlError, EtlResult};
use crate::sanitize::{parse_boolean, sanitize_numeric};
use crate::transpiler::alias::Scope;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// AND of all conditions, `None` for an empty list.
pub fn compile_filters(conditions: &[FilterCondition], scope: &Scope) -> EtlResult<Option<Expr>> {
    let predicates = conditions
        .iter()
        .map(|c| compile_condition(c, scope))
        .collect::<EtlResult<Vec<_>>>()?;
    Ok(Expr::and_all(predicates))
}

/// Compile one condition into a predicate.
pub fn compile_condition(condition: &FilterCondition, scope: &Scope) -> EtlResult<Expr> {
    let column = scope.resolve(&condition.column)?;

    let predicate = match condition.operator {
        FilterOperator::IsNull => Expr::IsNull {
            expr: Box::new(column),
            negated: false,
        },
        FilterOperator::IsNotNull => Expr::IsNull {
            expr: Box::new(column),
            negated: true,
        },
        FilterOperator::Contains | FilterOperator::StartsWith | FilterOperator::EndsWith => {
            let value = condition.value_text()?;
            let pattern = match condition.operator {
                FilterOperator::Contains => format!("%{}%", value),
                FilterOperator::StartsWith => format!("{}%", value),
                _ => format!("%{}", value),
            };
            Expr::Like {
                expr: Box::new(column.cast(SqlType::Text)),
                pattern: Box::new(Expr::Param(Value::Text(pattern))),
            }
        }
        FilterOperator::In | FilterOperator::NotIn => {
            let (column, hint) = scope.resolve_comparable(&condition.column)?;
            let list = condition
                .value_list()?
                .iter()
                .map(|token| typed_param(token, hint).map(Expr::Param))
                .collect::<EtlResult<Vec<_>>>()?;
            Expr::InList {
                expr: Box::new(column),
                list,
                negated: condition.operator == FilterOperator::NotIn,
            }
        }
        op => {
            let (column, hint) = scope.resolve_comparable(&condition.column)?;
            let comparator = op
                .comparator()
                .ok_or_else(|| EtlError::Compilation(format!("unsupported operator '{}'", op)))?;
            let value = typed_param(&condition.value_text()?, hint)?;
            Expr::binary(column, BinaryOp::from(comparator), Expr::Param(value))
        }
    };
    Ok(predicate)
}

/// Type a caller-supplied value for binding.
///
/// With a hint (the column's cast or source type) the value must be valid
/// for it; without one the type is inferred from the text.
pub fn typed_param(raw: &str, hint: Option<TargetType>) -> EtlResult<Value> {
    let invalid = |kind: &str| EtlError::Validation(format!("'{}' is not a valid {}", raw, kind));
    match hint {
        None => Ok(Value::infer(raw)),
        Some(TargetType::String) => Ok(Value::Text(raw.to_string())),
        Some(TargetType::Number | TargetType::Decimal | TargetType::Integer) => {
            let canonical = sanitize_numeric(raw).ok_or_else(|| invalid("number"))?;
            match canonical.parse::<i64>() {
                Ok(n) => Ok(Value::Int(n)),
                Err(_) => canonical
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| invalid("number")),
            }
        }
        Some(TargetType::Boolean) => parse_boolean(raw).map(Value::Bool).ok_or_else(|| invalid("boolean")),
        Some(TargetType::Date) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|_| invalid("date")),
        Some(TargetType::Datetime) => parse_datetime(raw.trim())
            .map(Value::DateTime)
            .ok_or_else(|| invalid("datetime")),
    }
}

pub(crate) fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transpiler::Dialect;
    use crate::transpiler::alias::AliasMap;
    use crate::transpiler::plan::ColumnType;
    use crate::transpiler::render::render_standalone;

    fn scope() -> Scope {
        let mut aliases = AliasMap::new();
        for column in ["amount", "name", "region", "deleted_at"] {
            aliases.register(column).unwrap();
        }
        Scope::outer(aliases, false).with_casts([("amount", TargetType::Decimal)])
    }

    fn render(conditions: &[FilterCondition], dialect: Dialect) -> (String, Vec<Value>) {
        let expr = compile_filters(conditions, &scope()).unwrap().unwrap();
        render_standalone(&expr, dialect.generator().as_ref())
    }

    #[test]
    fn test_empty_list_has_no_clause() {
        assert_eq!(compile_filters(&[], &scope()).unwrap(), None);
    }

    #[test]
    fn test_comparison_binds_value() {
        let (sql, params) = render(
            &[FilterCondition::new("amount", FilterOperator::Gt, "1000")],
            Dialect::Postgres,
        );
        assert_eq!(sql, "sub.\"amount\" > $1");
        assert_eq!(params, vec![Value::Int(1000)]);
    }

    #[test]
    fn test_contains_wildcards() {
        let (pg, params) = render(
            &[FilterCondition::new("name", FilterOperator::StartsWith, "Ana")],
            Dialect::Postgres,
        );
        assert_eq!(pg, "CAST(sub.\"name\" AS TEXT) ILIKE $1");
        assert_eq!(params, vec![Value::Text("Ana%".into())]);

        let (my, params) = render(
            &[FilterCondition::new("name", FilterOperator::Contains, "50%")],
            Dialect::MySQL,
        );
        assert_eq!(my, "CAST(sub.`name` AS CHAR) LIKE ?");
        assert_eq!(params, vec![Value::Text("%50%%".into())]);
    }

    #[test]
    fn test_in_binds_each_token() {
        let (sql, params) = render(
            &[FilterCondition::new("region", FilterOperator::NotIn, "north, south")],
            Dialect::MySQL,
        );
        assert_eq!(sql, "sub.`region` NOT IN (?, ?)");
        assert_eq!(params, vec![Value::Text("north".into()), Value::Text("south".into())]);
    }

    #[test]
    fn test_null_checks_bind_nothing() {
        let condition = FilterCondition {
            column: "deleted_at".into(),
            operator: FilterOperator::IsNull,
            value: None,
        };
        let (sql, params) = render(
            &[condition, FilterCondition::new("amount", FilterOperator::Lte, "5,5")],
            Dialect::Postgres,
        );
        assert_eq!(sql, "sub.\"deleted_at\" IS NULL AND sub.\"amount\" <= $1");
        assert_eq!(params, vec![Value::Float(5.5)]);
    }

    #[test]
    fn test_unresolved_column_is_error() {
        let err = compile_filters(
            &[FilterCondition::new("missing", FilterOperator::Eq, "1")],
            &scope(),
        )
        .unwrap_err();
        assert!(matches!(err, EtlError::Compilation(_)));
    }

    fn typed_scope() -> Scope {
        let mut aliases = AliasMap::new();
        for column in ["id", "zip", "created_at", "uid"] {
            aliases.register(column).unwrap();
        }
        Scope::outer(aliases, false).with_column_types([
            ("id", ColumnType::Integer),
            ("zip", ColumnType::Text),
            ("created_at", ColumnType::Timestamp),
            ("uid", ColumnType::Other),
        ])
    }

    fn render_typed(condition: FilterCondition) -> (String, Vec<Value>) {
        let expr = compile_condition(&condition, &typed_scope()).unwrap();
        render_standalone(&expr, Dialect::Postgres.generator().as_ref())
    }

    #[test]
    fn test_digits_against_text_column_bind_as_text() {
        let (sql, params) = render_typed(FilterCondition::new("zip", FilterOperator::Eq, "12345"));
        assert_eq!(sql, "sub.\"zip\" = $1");
        assert_eq!(params, vec![Value::Text("12345".into())]);

        let (sql, params) = render_typed(FilterCondition::new("zip", FilterOperator::In, "5,99999"));
        assert_eq!(sql, "sub.\"zip\" IN ($1, $2)");
        assert_eq!(params, vec![Value::Text("5".into()), Value::Text("99999".into())]);
    }

    #[test]
    fn test_date_against_timestamp_column_binds_timestamp() {
        let (sql, params) = render_typed(FilterCondition::new("created_at", FilterOperator::Gte, "2024-01-01"));
        assert_eq!(sql, "sub.\"created_at\" >= $1");
        assert_eq!(
            params,
            vec![Value::DateTime(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap())]
        );
    }

    #[test]
    fn test_source_types_drive_binding() {
        let (_, params) = render_typed(FilterCondition::new("id", FilterOperator::Eq, "42"));
        assert_eq!(params, vec![Value::Int(42)]);

        let err = compile_condition(&FilterCondition::new("id", FilterOperator::Eq, "abc"), &typed_scope()).unwrap_err();
        assert!(matches!(err, EtlError::Validation(_)));

        // No parameter type for uuid and friends: compare as text
        let (sql, params) = render_typed(FilterCondition::new("uid", FilterOperator::Eq, "1"));
        assert_eq!(sql, "CAST(sub.\"uid\" AS TEXT) = $1");
        assert_eq!(params, vec![Value::Text("1".into())]);
    }

    #[test]
    fn test_typed_param_hints() {
        assert_eq!(typed_param("1.234,5", Some(TargetType::Decimal)).unwrap(), Value::Float(1234.5));
        assert_eq!(typed_param("Sí", Some(TargetType::Boolean)).unwrap(), Value::Bool(true));
        assert_eq!(typed_param("007", Some(TargetType::String)).unwrap(), Value::Text("007".into()));
        assert!(typed_param("abc", Some(TargetType::Number)).is_err());
        assert!(matches!(
            typed_param("2024-02-30", Some(TargetType::Date)),
            Err(EtlError::Validation(_))
        ));
        assert_eq!(
            typed_param("2024-01-31", Some(TargetType::Datetime)).unwrap(),
            Value::DateTime(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
    }
}
