//! ConditionRule compiler: CASE projections and row-filter predicates.

use crate::ast::{BinaryOp, ConditionRule, Expr, Literal, Operand, OperandKind, OutputType, TargetType};
use crate::error::{EtlError, EtlResult};
use crate::sanitize::output_literal;
use crate::transpiler::alias::Scope;
use crate::transpiler::casts::{CastRegistry, cast_expr};
use crate::transpiler::filters::typed_param;

/// The two independent effects of a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    /// `CASE WHEN .. END AS "<resultColumn>"`
    pub projection: Option<Expr>,
    /// Row filter, present when `shouldFilter` is set
    pub predicate: Option<Expr>,
}

/// Compile the comparison `<left> <cmp> <right>`.
///
/// Constant operands are bound, typed by the cast of the column on the
/// other side when there is one.
pub fn compile_comparison(
    rule: &ConditionRule,
    scope: &Scope,
    casts: Option<&CastRegistry>,
) -> EtlResult<Expr> {
    let left_hint = column_hint(&rule.left_operand, scope);
    let right_hint = column_hint(&rule.right_operand, scope);
    let left = operand_expr(&rule.left_operand, scope, casts, right_hint)?;
    let right = operand_expr(&rule.right_operand, scope, casts, left_hint)?;
    Ok(Expr::binary(left, BinaryOp::from(rule.comparator), right))
}

/// Compile one rule.
pub fn compile_rule(rule: &ConditionRule, scope: &Scope, casts: Option<&CastRegistry>) -> EtlResult<CompiledRule> {
    let result_column = rule
        .result_column
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    if result_column.is_none() && !rule.should_filter {
        return Err(EtlError::Validation(format!(
            "rule '{}' needs a result column or shouldFilter",
            rule.id
        )));
    }

    let comparison = compile_comparison(rule, scope, casts)?;
    let projection = result_column.map(|column| {
        Expr::Case {
            when_clauses: vec![(comparison.clone(), output_expr(&rule.then_value, rule.output_type))],
            else_value: Some(Box::new(output_expr(&rule.else_value, rule.output_type))),
        }
        .alias(column)
    });
    let predicate = rule.should_filter.then_some(comparison);
    Ok(CompiledRule { projection, predicate })
}

/// Compile rules in order. Projected columns are registered in `scope`.
pub fn compile_rules(
    rules: &[ConditionRule],
    scope: &mut Scope,
    casts: Option<&CastRegistry>,
) -> EtlResult<Vec<CompiledRule>> {
    let mut compiled = Vec::with_capacity(rules.len());
    for rule in rules {
        let c = compile_rule(rule, scope, casts)?;
        if let Some(Expr::Aliased { expr, alias }) = &c.projection {
            scope.add_derived(alias, (**expr).clone(), Some(output_hint(rule.output_type)))?;
        }
        compiled.push(c);
    }
    Ok(compiled)
}

/// THEN/ELSE literal typed per `output_type`.
pub fn output_expr(value: &serde_json::Value, output_type: OutputType) -> Expr {
    let text = output_literal(value, output_type);
    Expr::Literal(match output_type {
        OutputType::Boolean => Literal::Bool(text == "true"),
        OutputType::Number => Literal::Number(text),
        OutputType::String => Literal::Text(text),
    })
}

fn output_hint(output_type: OutputType) -> TargetType {
    match output_type {
        OutputType::Boolean => TargetType::Boolean,
        OutputType::Number => TargetType::Number,
        OutputType::String => TargetType::String,
    }
}

fn column_hint(operand: &Operand, scope: &Scope) -> Option<TargetType> {
    match operand.kind {
        OperandKind::Column => scope.param_hint(&operand.text()),
        OperandKind::Constant => None,
    }
}

fn operand_expr(
    operand: &Operand,
    scope: &Scope,
    casts: Option<&CastRegistry>,
    hint: Option<TargetType>,
) -> EtlResult<Expr> {
    match operand.kind {
        OperandKind::Column => {
            let name = operand.text();
            let target = casts
                .filter(|_| !scope.is_derived(name.trim()))
                .and_then(|registry| registry.get(&name));
            match target {
                Some(target) => Ok(cast_expr(scope.resolve(&name)?, target)),
                None => Ok(scope.resolve_comparable(&name)?.0),
            }
        }
        OperandKind::Constant => match &operand.value {
            serde_json::Value::Null => Ok(Expr::null()),
            _ => typed_param(&operand.text(), hint).map(Expr::Param),
        },
    }
}
