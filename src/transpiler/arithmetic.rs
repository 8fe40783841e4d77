//! ArithmeticExpression compiler.

use crate::ast::{ArithOp, ArithmeticOperation, BinaryOp, Expr, Func, Literal, Operand, OperandKind, TargetType};
use crate::error::{EtlError, EtlResult};
use crate::sanitize::is_numeric_literal;
use crate::transpiler::alias::Scope;
use crate::transpiler::casts::{CastRegistry, cast_expr};

/// Compile `operation` into `(<left> <op> <right>)`.
///
/// With `casts`, column operands are wrapped in their registered cast; pass
/// `None` when the scope's columns are already cast. Divisors are wrapped
/// in `NULLIF(.., 0)` so division by zero yields NULL.
pub fn compile_operation(
    operation: &ArithmeticOperation,
    scope: &Scope,
    casts: Option<&CastRegistry>,
) -> EtlResult<Expr> {
    let result = operation.result_column.trim();
    if result.is_empty() {
        return Err(EtlError::Validation(format!(
            "operation '{}' has no result column",
            operation.id
        )));
    }

    let left = operand_expr(&operation.left_operand, scope, casts)?;
    let mut right = operand_expr(&operation.right_operand, scope, casts)?;
    if matches!(operation.operator, ArithOp::Div | ArithOp::Rem) {
        right = Expr::call(Func::NullIf, vec![right, Expr::Literal(Literal::Int(0))]);
    }
    Ok(Expr::binary(left, BinaryOp::from(operation.operator), right))
}

/// Compile operations in order, registering each result in `scope` so later
/// operations can reference it. Returns the aliased projections.
pub fn compile_operations(
    operations: &[ArithmeticOperation],
    scope: &mut Scope,
    casts: Option<&CastRegistry>,
) -> EtlResult<Vec<Expr>> {
    let mut projections = Vec::with_capacity(operations.len());
    for operation in operations {
        let expr = compile_operation(operation, scope, casts)?;
        let result = operation.result_column.trim();
        scope.add_derived(result, expr.clone(), Some(TargetType::Number))?;
        projections.push(expr.alias(result));
    }
    Ok(projections)
}

fn operand_expr(operand: &Operand, scope: &Scope, casts: Option<&CastRegistry>) -> EtlResult<Expr> {
    let text = operand.text();
    match operand.kind {
        OperandKind::Column => {
            let resolved = scope.resolve(&text)?;
            let target = casts
                .filter(|_| !scope.is_derived(text.trim()))
                .and_then(|registry| registry.get(&text));
            Ok(match target {
                Some(target) => cast_expr(resolved, target),
                None => resolved,
            })
        }
        OperandKind::Constant => {
            let constant = text.trim();
            if !is_numeric_literal(constant) {
                return Err(EtlError::Compilation(format!(
                    "constant operand '{}' is not a number",
                    text
                )));
            }
            // Inlined as SQL text; only canonical numbers get this far
            Ok(Expr::Literal(Literal::Number(constant.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transpiler::Dialect;
    use crate::transpiler::alias::AliasMap;
    use crate::transpiler::render::render_standalone;

    fn op(left: Operand, operator: ArithOp, right: Operand, result: &str) -> ArithmeticOperation {
        ArithmeticOperation {
            id: result.to_string(),
            left_operand: left,
            operator,
            right_operand: right,
            result_column: result.to_string(),
        }
    }

    fn scope() -> Scope {
        let mut aliases = AliasMap::new();
        aliases.register("price").unwrap();
        aliases.register("qty").unwrap();
        Scope::outer(aliases, false)
    }

    #[test]
    fn test_multiply_by_constant() {
        let mut scope = scope();
        let projections = compile_operations(
            &[op(Operand::column("price"), ArithOp::Mul, Operand::constant("1.21"), "gross")],
            &mut scope,
            None,
        )
        .unwrap();
        let (sql, params) = render_standalone(&projections[0], Dialect::Postgres.generator().as_ref());
        assert_eq!(sql, "(sub.\"price\" * 1.21) AS \"gross\"");
        assert!(params.is_empty());
    }

    #[test]
    fn test_division_guards_zero() {
        let expr = compile_operation(
            &op(Operand::column("price"), ArithOp::Div, Operand::column("qty"), "unit"),
            &scope(),
            None,
        )
        .unwrap();
        let (sql, _) = render_standalone(&expr, Dialect::MySQL.generator().as_ref());
        assert_eq!(sql, "(sub.`price` / NULLIF(sub.`qty`, 0))");
    }

    #[test]
    fn test_power_and_chained_results() {
        let mut scope = scope();
        let projections = compile_operations(
            &[
                op(Operand::column("qty"), ArithOp::Pow, Operand::constant("2"), "qty_sq"),
                op(Operand::column("qty_sq"), ArithOp::Add, Operand::constant("1"), "qty_sq1"),
            ],
            &mut scope,
            None,
        )
        .unwrap();
        let (sql, _) = render_standalone(&projections[1], Dialect::MySQL.generator().as_ref());
        assert_eq!(sql, "(POW(sub.`qty`, 2) + 1) AS `qty_sq1`");
    }

    #[test]
    fn test_casts_applied_on_request() {
        let mut casts = CastRegistry::new();
        casts.register("qty", TargetType::String);
        let operation = op(Operand::column("qty"), ArithOp::Sub, Operand::constant("1"), "less");
        let with = compile_operation(&operation, &scope(), Some(&casts)).unwrap();
        let without = compile_operation(&operation, &scope(), None).unwrap();
        let generator = Dialect::Postgres.generator();
        assert_eq!(
            render_standalone(&with, generator.as_ref()).0,
            "(CAST(sub.\"qty\" AS TEXT) - 1)"
        );
        assert_eq!(render_standalone(&without, generator.as_ref()).0, "(sub.\"qty\" - 1)");
    }

    #[test]
    fn test_constant_must_be_numeric() {
        let err = compile_operation(
            &op(Operand::column("qty"), ArithOp::Add, Operand::constant("1; DROP TABLE x"), "bad"),
            &scope(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EtlError::Compilation(_)));
    }

    #[test]
    fn test_result_column_collision() {
        let mut scope = scope();
        let err = compile_operations(
            &[op(Operand::column("qty"), ArithOp::Add, Operand::constant("1"), "price")],
            &mut scope,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EtlError::Compilation(_)));
    }
}
