mod dialects;
mod joins;

use crate::ast::{
    ArithOp, ArithmeticOperation, CastConversion, FilterCondition, FilterOperator, Operand, TargetType,
    TransformSpec,
};

/// The canonical sales request: filter, decimal cast and a derived column.
pub(super) fn sales_spec() -> TransformSpec {
    TransformSpec {
        table: Some("public.sales".into()),
        conditions: vec![FilterCondition::new("amount", FilterOperator::Gt, "1000")],
        conversions: vec![CastConversion {
            column: "amount".into(),
            target_type: TargetType::Decimal,
        }],
        operations: vec![ArithmeticOperation {
            id: "op1".into(),
            left_operand: Operand::column("amount"),
            operator: ArithOp::Mul,
            right_operand: Operand::constant("1.21"),
            result_column: "amount_with_tax".into(),
        }],
        limit: Some(10),
        ..Default::default()
    }
}
