//! Row-level evaluation of each step kind.
//!
//! Every function here mirrors a SQL compiler: casts follow
//! `transpiler::casts`, comparisons bind constants with the same
//! [`typed_param`] rules, CASE outputs go through [`output_literal`].
//! Errors are plain causes; the executor attaches the step name.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use chrono::NaiveDate;
use serde_json::Value as Json;

use crate::ast::values::json_to_text;
use crate::ast::{
    ArithOp, ArithmeticOperation, Comparator, ConditionRule, FilterCondition, FilterOperator, Operand,
    OperandKind, OutputType, TargetType, Value,
};
use crate::engine::Row;
use crate::sanitize::{is_numeric_literal, output_literal, parse_boolean, sanitize_numeric};
use crate::transpiler::alias::resolve_alias;
use crate::transpiler::filters::{parse_datetime, typed_param};

/// Cast hints by row key, as set by earlier cast steps.
pub(crate) type Hints = HashMap<String, TargetType>;

pub(crate) type StepResult<T> = Result<T, String>;

fn lookup<'r>(row: &'r Row, reference: &str) -> StepResult<&'r Json> {
    row.get(&resolve_alias(reference))
        .ok_or_else(|| format!("unknown column '{}'", reference.trim()))
}

/// Trim strings, turn empty strings into null and drop all-null rows.
pub(crate) fn clean(rows: Vec<Row>, trim: bool, empty_as_null: bool, drop_empty_rows: bool) -> Vec<Row> {
    rows.into_iter()
        .map(|mut row| {
            for value in row.values_mut() {
                let blank = match value {
                    Json::String(s) => {
                        if trim && s.trim().len() != s.len() {
                            *s = s.trim().to_string();
                        }
                        empty_as_null && s.trim().is_empty()
                    }
                    _ => false,
                };
                if blank {
                    *value = Json::Null;
                }
            }
            row
        })
        .filter(|row| !drop_empty_rows || row.values().any(|v| !v.is_null()))
        .collect()
}

/// Coerce one cell the way the SQL cast does.
///
/// Unparseable numbers and booleans become null; malformed dates are an
/// error, like a native CAST on the engine.
pub(crate) fn cast_value(value: &Json, target: TargetType) -> StepResult<Json> {
    let Some(text) = json_to_text(value) else {
        return Ok(Json::Null);
    };
    let cast = match target {
        TargetType::String => Json::String(text),
        TargetType::Number => match sanitize_numeric(&text).and_then(|c| c.parse::<f64>().ok()) {
            Some(n) => float(n),
            None => Json::Null,
        },
        TargetType::Integer => match sanitize_numeric(&text).and_then(|c| c.parse::<f64>().ok()) {
            Some(n) => {
                let truncated = n.trunc();
                if truncated < i64::MIN as f64 || truncated > i64::MAX as f64 {
                    return Err(format!("'{}' is out of range for integer", text));
                }
                Json::from(truncated as i64)
            }
            None => Json::Null,
        },
        // Decimals stay text, the same shape the row decoders produce
        TargetType::Decimal => match sanitize_numeric(&text) {
            Some(canonical) => Json::String(
                rust_decimal::Decimal::from_str(&canonical)
                    .map(|d| d.to_string())
                    .unwrap_or(canonical),
            ),
            None => Json::Null,
        },
        TargetType::Boolean => parse_boolean(&text).map(Json::Bool).unwrap_or(Json::Null),
        TargetType::Date => {
            let trimmed = text.trim();
            let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .or_else(|| parse_datetime(trimmed).map(|dt| dt.date()))
                .ok_or_else(|| format!("invalid date '{}'", text))?;
            Json::String(date.to_string())
        }
        TargetType::Datetime => {
            let datetime = parse_datetime(text.trim()).ok_or_else(|| format!("invalid datetime '{}'", text))?;
            Json::String(datetime.to_string())
        }
    };
    Ok(cast)
}

fn float(n: f64) -> Json {
    serde_json::Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
}

/// A numeric result as JSON: integral values as integers, otherwise floats.
pub(crate) fn numeric_json(n: f64) -> Json {
    if !n.is_finite() {
        return Json::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Json::from(n as i64)
    } else {
        float(n)
    }
}

/// Evaluate a filter condition against one row. NULL never matches a
/// comparison, as in SQL.
pub(crate) fn matches_condition(row: &Row, condition: &FilterCondition, hints: &Hints) -> StepResult<bool> {
    let cell = lookup(row, &condition.column)?;
    let hint = hints.get(&resolve_alias(&condition.column)).copied();

    let matched = match condition.operator {
        FilterOperator::IsNull => cell.is_null(),
        FilterOperator::IsNotNull => !cell.is_null(),
        FilterOperator::Contains | FilterOperator::StartsWith | FilterOperator::EndsWith => {
            let needle = condition.value_text().map_err(|e| e.to_string())?.to_lowercase();
            match json_to_text(cell) {
                None => false,
                Some(text) => {
                    let text = text.to_lowercase();
                    match condition.operator {
                        FilterOperator::Contains => text.contains(&needle),
                        FilterOperator::StartsWith => text.starts_with(&needle),
                        _ => text.ends_with(&needle),
                    }
                }
            }
        }
        FilterOperator::In | FilterOperator::NotIn => {
            if cell.is_null() {
                return Ok(false);
            }
            let left = Value::from_json(cell);
            let mut found = false;
            for token in condition.value_list().map_err(|e| e.to_string())? {
                let right = typed_param(&token, hint).map_err(|e| e.to_string())?;
                if compare(&left, &right) == Some(Ordering::Equal) {
                    found = true;
                    break;
                }
            }
            found != (condition.operator == FilterOperator::NotIn)
        }
        op => {
            let comparator = op
                .comparator()
                .ok_or_else(|| format!("unsupported operator '{}'", op))?;
            let text = condition.value_text().map_err(|e| e.to_string())?;
            let right = typed_param(&text, hint).map_err(|e| e.to_string())?;
            satisfies(compare(&Value::from_json(cell), &right), comparator)
        }
    };
    Ok(matched)
}

fn satisfies(ordering: Option<Ordering>, comparator: Comparator) -> bool {
    let Some(ordering) = ordering else {
        return false;
    };
    match comparator {
        Comparator::Eq => ordering == Ordering::Equal,
        Comparator::Ne => ordering != Ordering::Equal,
        Comparator::Gt => ordering == Ordering::Greater,
        Comparator::Gte => ordering != Ordering::Less,
        Comparator::Lt => ordering == Ordering::Less,
        Comparator::Lte => ordering != Ordering::Greater,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(n) => Some(*n),
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Date(d) => d.to_string(),
        Value::DateTime(dt) => dt.to_string(),
        other => other.to_string(),
    }
}

/// Three-valued comparison: `None` when either side is NULL.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Text(t)) => parse_boolean(t).map(|b| a.cmp(&b)),
        (Value::Text(t), Value::Bool(b)) => parse_boolean(t).map(|a| a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::DateTime(b)) => a.and_hms_opt(0, 0, 0).map(|a| a.cmp(b)),
        (Value::DateTime(a), Value::Date(b)) => b.and_hms_opt(0, 0, 0).map(|b| a.cmp(&b)),
        (Value::Text(t), Value::Date(_) | Value::DateTime(_)) => {
            parse_datetime(t.trim()).and_then(|dt| compare(&Value::DateTime(dt), right))
        }
        (Value::Date(_) | Value::DateTime(_), Value::Text(t)) => {
            parse_datetime(t.trim()).and_then(|dt| compare(left, &Value::DateTime(dt)))
        }
        _ => match (as_f64(left), as_f64(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => Some(plain_text(left).cmp(&plain_text(right))),
        },
    }
}

fn numeric_operand(row: &Row, operand: &Operand) -> StepResult<Option<f64>> {
    match operand.kind {
        OperandKind::Column => {
            let reference = operand.text();
            let cell = lookup(row, &reference)?;
            match cell {
                Json::Null => Ok(None),
                Json::Number(n) => Ok(n.as_f64()),
                Json::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| format!("column '{}' holds non-numeric value '{}'", reference, s)),
                other => Err(format!("column '{}' holds non-numeric value {}", reference, other)),
            }
        }
        OperandKind::Constant => {
            let text = operand.text();
            if !is_numeric_literal(&text) {
                return Err(format!("constant '{}' is not a number", text));
            }
            text.trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| format!("constant '{}' is not a number", text))
        }
    }
}

/// Evaluate an arithmetic operation. NULL operands and zero divisors give
/// NULL.
pub(crate) fn evaluate_operation(row: &Row, operation: &ArithmeticOperation) -> StepResult<Json> {
    let left = numeric_operand(row, &operation.left_operand)?;
    let right = numeric_operand(row, &operation.right_operand)?;
    let (Some(l), Some(r)) = (left, right) else {
        return Ok(Json::Null);
    };
    let result = match operation.operator {
        ArithOp::Add => l + r,
        ArithOp::Sub => l - r,
        ArithOp::Mul => l * r,
        ArithOp::Div | ArithOp::Rem if r == 0.0 => return Ok(Json::Null),
        ArithOp::Div => l / r,
        ArithOp::Rem => l % r,
        ArithOp::Pow => l.powf(r),
    };
    Ok(numeric_json(result))
}

fn rule_operand(row: &Row, operand: &Operand, other: &Operand, hints: &Hints) -> StepResult<Value> {
    match operand.kind {
        OperandKind::Column => Ok(Value::from_json(lookup(row, &operand.text())?)),
        OperandKind::Constant => {
            let hint = match other.kind {
                OperandKind::Column => hints.get(&resolve_alias(&other.text())).copied(),
                OperandKind::Constant => None,
            };
            typed_param(&operand.text(), hint).map_err(|e| e.to_string())
        }
    }
}

/// Outcome of one rule on one row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RuleOutcome {
    /// `false` when the rule filters and the predicate did not hold
    pub keep: bool,
    pub projection: Option<(String, Json)>,
}

/// Evaluate a rule: the CASE projection and/or the row filter.
pub(crate) fn evaluate_rule(row: &Row, rule: &ConditionRule, hints: &Hints) -> StepResult<RuleOutcome> {
    let left = rule_operand(row, &rule.left_operand, &rule.right_operand, hints)?;
    let right = rule_operand(row, &rule.right_operand, &rule.left_operand, hints)?;
    let holds = satisfies(compare(&left, &right), rule.comparator);

    let projection = rule
        .result_column
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|column| {
            let chosen = if holds { &rule.then_value } else { &rule.else_value };
            (column.to_string(), output_json(chosen, rule.output_type))
        });

    Ok(RuleOutcome {
        keep: !rule.should_filter || holds,
        projection,
    })
}

/// THEN/ELSE value typed per the rule's output type.
pub(crate) fn output_json(value: &Json, output_type: OutputType) -> Json {
    let literal = output_literal(value, output_type);
    match output_type {
        OutputType::Boolean => Json::Bool(literal == "true"),
        OutputType::Number => match literal.parse::<i64>() {
            Ok(n) => Json::from(n),
            Err(_) => literal.parse::<f64>().map(float).unwrap_or(Json::Null),
        },
        OutputType::String => Json::String(literal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Json)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_clean_trims_and_drops_empty_rows() {
        let rows = vec![
            row(&[("name", json!("  Ana ")), ("city", json!(""))]),
            row(&[("name", json!(" ")), ("city", json!(null))]),
        ];
        let cleaned = clean(rows, true, true, true);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0]["name"], json!("Ana"));
        assert_eq!(cleaned[0]["city"], Json::Null);
    }

    #[test]
    fn test_cast_matches_sql_sanitizer() {
        for raw in ["1.234.567,89", "1,234,567.89", "27.201.643", "1,5", " $ 1 200 ", "-3,75 €"] {
            let expected = sanitize_numeric(raw).and_then(|c| c.parse::<f64>().ok()).unwrap();
            assert_eq!(cast_value(&json!(raw), TargetType::Number).unwrap(), float(expected));
        }
        assert_eq!(cast_value(&json!("abc"), TargetType::Number).unwrap(), Json::Null);
        assert_eq!(cast_value(&json!(""), TargetType::Decimal).unwrap(), Json::Null);
    }

    #[test]
    fn test_cast_integer_truncates_toward_zero() {
        assert_eq!(cast_value(&json!("-3,75"), TargetType::Integer).unwrap(), json!(-3));
        assert_eq!(cast_value(&json!("1.234,99"), TargetType::Integer).unwrap(), json!(1234));
    }

    #[test]
    fn test_cast_decimal_and_boolean() {
        assert_eq!(cast_value(&json!("1.000,50"), TargetType::Decimal).unwrap(), json!("1000.50"));
        assert_eq!(cast_value(&json!("Sí"), TargetType::Boolean).unwrap(), json!(true));
        assert_eq!(cast_value(&json!("maybe"), TargetType::Boolean).unwrap(), Json::Null);
    }

    #[test]
    fn test_cast_malformed_date_is_error() {
        assert_eq!(cast_value(&json!("2024-01-05"), TargetType::Date).unwrap(), json!("2024-01-05"));
        assert_eq!(
            cast_value(&json!("2024-01-05T10:30:00"), TargetType::Datetime).unwrap(),
            json!("2024-01-05 10:30:00")
        );
        assert!(cast_value(&json!("05/01/2024"), TargetType::Date).is_err());
    }

    #[test]
    fn test_conditions_follow_sql_null_semantics() {
        let r = row(&[("amount", json!(1500)), ("region", json!(null)), ("city", json!("Madrid"))]);
        let hints = Hints::new();
        let check = |c: FilterCondition| matches_condition(&r, &c, &hints).unwrap();

        assert!(check(FilterCondition::new("amount", FilterOperator::Gt, "1000")));
        assert!(!check(FilterCondition::new("region", FilterOperator::Ne, "north")));
        assert!(check(FilterCondition::new("city", FilterOperator::StartsWith, "mad")));
        assert!(check(FilterCondition::new("city", FilterOperator::In, "Paris, Madrid")));
        assert!(!check(FilterCondition::new("region", FilterOperator::NotIn, "north")));
        assert!(check(FilterCondition {
            column: "region".into(),
            operator: FilterOperator::IsNull,
            value: None,
        }));
    }

    #[test]
    fn test_condition_uses_cast_hint() {
        let r = row(&[("amount", json!(1000.5))]);
        let mut hints = Hints::new();
        hints.insert("amount".into(), TargetType::Number);
        let cond = FilterCondition::new("amount", FilterOperator::Lt, "1.000,75");
        assert!(matches_condition(&r, &cond, &hints).unwrap());
    }

    #[test]
    fn test_unknown_column() {
        let r = row(&[("amount", json!(1))]);
        let cond = FilterCondition::new("total", FilterOperator::Eq, "1");
        assert_eq!(
            matches_condition(&r, &cond, &Hints::new()),
            Err("unknown column 'total'".to_string())
        );
    }

    #[test]
    fn test_operation_division_by_zero_is_null() {
        let r = row(&[("amount", json!(10)), ("qty", json!(0))]);
        let op = |operator, right: Operand| ArithmeticOperation {
            id: "op".into(),
            left_operand: Operand::column("amount"),
            operator,
            right_operand: right,
            result_column: "out".into(),
        };
        assert_eq!(evaluate_operation(&r, &op(ArithOp::Div, Operand::column("qty"))).unwrap(), Json::Null);
        assert_eq!(evaluate_operation(&r, &op(ArithOp::Rem, Operand::constant("0"))).unwrap(), Json::Null);
        assert_eq!(evaluate_operation(&r, &op(ArithOp::Mul, Operand::constant("1.5"))).unwrap(), json!(15));
        assert_eq!(evaluate_operation(&r, &op(ArithOp::Pow, Operand::constant("2"))).unwrap(), json!(100));
        assert!(evaluate_operation(&r, &op(ArithOp::Add, Operand::constant("1; DROP"))).is_err());
    }

    #[test]
    fn test_rule_projects_and_filters() {
        let rule = ConditionRule {
            id: "tier".into(),
            left_operand: Operand::column("amount"),
            comparator: Comparator::Gte,
            right_operand: Operand::constant("1000"),
            result_column: Some("tier".into()),
            output_type: OutputType::String,
            then_value: json!("high"),
            else_value: json!("low"),
            should_filter: true,
        };
        let high = evaluate_rule(&row(&[("amount", json!(1200))]), &rule, &Hints::new()).unwrap();
        assert!(high.keep);
        assert_eq!(high.projection, Some(("tier".to_string(), json!("high"))));

        let low = evaluate_rule(&row(&[("amount", json!(null))]), &rule, &Hints::new()).unwrap();
        assert!(!low.keep);
        assert_eq!(low.projection, Some(("tier".to_string(), json!("low"))));
    }

    #[test]
    fn test_output_json_types() {
        assert_eq!(output_json(&json!("abc"), OutputType::Number), json!(0));
        assert_eq!(output_json(&json!("2.5"), OutputType::Number), json!(2.5));
        assert_eq!(output_json(&json!("yes"), OutputType::Boolean), json!(true));
    }
}
