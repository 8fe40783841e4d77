//! Declarative transformation request.
//!
//! Everything except the source (`table` or `join`) is optional; an absent
//! field skips its stage.

use serde::{Deserialize, Serialize};

use crate::ast::{
    ArithOp, Comparator, FilterOperator, JoinType, OutputType, SortOrder, TargetType,
};
use crate::ast::values::json_to_text;
use crate::error::{EtlError, EtlResult};

/// A complete transformation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSpec {
    /// Connection id, resolved by a [`ConnectionResolver`](crate::engine::ConnectionResolver).
    #[serde(default)]
    pub connection: Option<String>,
    /// Single source table (`schema.table` or `table`).
    #[serde(default)]
    pub table: Option<String>,
    /// Star join source.
    #[serde(default)]
    pub join: Option<JoinSpec>,
    /// Projected columns (logical references). Empty means "all".
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
    #[serde(default)]
    pub conversions: Vec<CastConversion>,
    #[serde(default)]
    pub operations: Vec<ArithmeticOperation>,
    #[serde(default)]
    pub rules: Vec<ConditionRule>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    /// Explicit preview pipeline. Empty selects the legacy sequence.
    #[serde(default)]
    pub pipeline: Vec<PipelineStep>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    /// Also compute the total row count.
    #[serde(default)]
    pub count: bool,
}

/// The row source of a request.
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    Table(&'a str),
    Join(&'a JoinSpec),
}

impl TransformSpec {
    /// Source table or join. Exactly one must be present.
    pub fn source(&self) -> EtlResult<Source<'_>> {
        match (&self.table, &self.join) {
            (Some(_), Some(_)) => Err(EtlError::Validation(
                "specify either 'table' or 'join', not both".to_string(),
            )),
            (Some(table), None) if !table.trim().is_empty() => Ok(Source::Table(table.trim())),
            (None, Some(join)) => Ok(Source::Join(join)),
            _ => Err(EtlError::Validation("missing 'table' or 'join'".to_string())),
        }
    }

    /// Connection id of the request, falling back to the join's primary.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection
            .as_deref()
            .or_else(|| self.join.as_ref().and_then(|j| j.primary.connection.as_deref()))
    }

    /// Name used for export files.
    pub fn source_name(&self) -> String {
        let raw = match (&self.table, &self.join) {
            (Some(table), _) => table.as_str(),
            (None, Some(join)) => join.primary.table.as_str(),
            (None, None) => "export",
        };
        raw.rsplit('.').next().unwrap_or(raw).to_string()
    }
}

/// A WHERE-clause condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl FilterCondition {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: Some(serde_json::Value::String(value.into())),
        }
    }

    /// The value as text, or a validation error when a value is required.
    pub fn value_text(&self) -> EtlResult<String> {
        self.value
            .as_ref()
            .and_then(json_to_text)
            .ok_or_else(|| {
                EtlError::Validation(format!(
                    "condition on '{}' with operator '{}' requires a value",
                    self.column, self.operator
                ))
            })
    }

    /// Comma-separated tokens for `in` / `not-in`.
    pub fn value_list(&self) -> EtlResult<Vec<String>> {
        let tokens: Vec<String> = match &self.value {
            Some(serde_json::Value::Array(items)) => items.iter().filter_map(json_to_text).collect(),
            _ => self.value_text()?.split(',').map(|t| t.to_string()).collect(),
        };
        let tokens: Vec<String> = tokens
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return Err(EtlError::Validation(format!(
                "condition on '{}' has an empty value list",
                self.column
            )));
        }
        Ok(tokens)
    }
}

/// A type coercion for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastConversion {
    pub column: String,
    pub target_type: TargetType,
}

/// Operand kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperandKind {
    Column,
    Constant,
}

/// Left or right side of an operation or rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operand {
    pub kind: OperandKind,
    pub value: serde_json::Value,
}

impl Operand {
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            kind: OperandKind::Column,
            value: serde_json::Value::String(name.into()),
        }
    }

    pub fn constant(value: impl Into<String>) -> Self {
        Self {
            kind: OperandKind::Constant,
            value: serde_json::Value::String(value.into()),
        }
    }

    /// Operand value as text. Null constants render as an empty string.
    pub fn text(&self) -> String {
        json_to_text(&self.value).unwrap_or_default()
    }
}

/// A binary derivation producing `result_column`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArithmeticOperation {
    #[serde(default)]
    pub id: String,
    pub left_operand: Operand,
    pub operator: ArithOp,
    pub right_operand: Operand,
    pub result_column: String,
}

/// A CASE-WHEN projection and/or row filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionRule {
    #[serde(default)]
    pub id: String,
    pub left_operand: Operand,
    pub comparator: Comparator,
    pub right_operand: Operand,
    #[serde(default)]
    pub result_column: Option<String>,
    #[serde(default)]
    pub output_type: OutputType,
    #[serde(default)]
    pub then_value: serde_json::Value,
    #[serde(default)]
    pub else_value: serde_json::Value,
    #[serde(default)]
    pub should_filter: bool,
}

/// Star join: one primary table and ordered edges to secondaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub primary: JoinPrimary,
    #[serde(default)]
    pub joins: Vec<JoinEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPrimary {
    #[serde(default)]
    pub connection: Option<String>,
    pub table: String,
    /// Primary columns to project (physical names).
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinEdge {
    #[serde(default)]
    pub secondary_connection: Option<String>,
    pub secondary_table: String,
    #[serde(default)]
    pub join_type: JoinType,
    pub primary_column: String,
    pub secondary_column: String,
    /// Secondary columns to project (physical names).
    #[serde(default)]
    pub projected_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: SortOrder,
}

/// One step of an explicit preview pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineStep {
    Clean {
        #[serde(default = "default_true")]
        trim: bool,
        #[serde(default = "default_true", rename = "emptyAsNull")]
        empty_as_null: bool,
        #[serde(default = "default_true", rename = "dropEmptyRows")]
        drop_empty_rows: bool,
    },
    Cast {
        conversions: Vec<CastConversion>,
    },
    Filter {
        conditions: Vec<FilterCondition>,
    },
    Arithmetic {
        operations: Vec<ArithmeticOperation>,
    },
    Condition {
        rules: Vec<ConditionRule>,
    },
    Count,
}

fn default_true() -> bool {
    true
}

impl PipelineStep {
    /// A clean step with every option enabled.
    pub fn clean() -> Self {
        PipelineStep::Clean {
            trim: true,
            empty_as_null: true,
            drop_empty_rows: true,
        }
    }

    /// Short name used in logs and step-scoped errors.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStep::Clean { .. } => "clean",
            PipelineStep::Cast { .. } => "cast",
            PipelineStep::Filter { .. } => "filter",
            PipelineStep::Arithmetic { .. } => "arithmetic",
            PipelineStep::Condition { .. } => "condition",
            PipelineStep::Count => "count",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_request() {
        let spec: TransformSpec = serde_json::from_value(serde_json::json!({
            "table": "public.sales",
            "conditions": [{"column": "amount", "operator": ">", "value": "1000"}],
            "conversions": [{"column": "amount", "targetType": "decimal"}],
            "operations": [{
                "leftOperand": {"kind": "column", "value": "amount"},
                "operator": "*",
                "rightOperand": {"kind": "constant", "value": "1.21"},
                "resultColumn": "amount_with_tax"
            }],
            "limit": 10
        }))
        .unwrap();
        assert!(matches!(spec.source().unwrap(), Source::Table("public.sales")));
        assert_eq!(spec.conversions[0].target_type, TargetType::Decimal);
        assert_eq!(spec.operations[0].operator, ArithOp::Mul);
        assert_eq!(spec.limit, Some(10));
        assert_eq!(spec.source_name(), "sales");
    }

    #[test]
    fn test_missing_source() {
        let spec = TransformSpec::default();
        assert!(matches!(spec.source(), Err(EtlError::Validation(_))));
    }

    #[test]
    fn test_value_list_trims_tokens() {
        let cond = FilterCondition::new("region", FilterOperator::In, " north, south ,,east");
        assert_eq!(cond.value_list().unwrap(), vec!["north", "south", "east"]);
    }

    #[test]
    fn test_pipeline_step_tags() {
        let steps: Vec<PipelineStep> = serde_json::from_value(serde_json::json!([
            {"type": "clean"},
            {"type": "cast", "conversions": [{"column": "a", "targetType": "integer"}]},
            {"type": "count"}
        ]))
        .unwrap();
        assert_eq!(steps[0], PipelineStep::clean());
        assert_eq!(steps[2].name(), "count");
    }
}
