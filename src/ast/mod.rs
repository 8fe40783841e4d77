pub mod expr;
pub mod operators;
pub mod request;
pub mod values;

pub use self::expr::{BinaryOp, Expr, Func, Literal, SqlType};
pub use self::operators::{
    ArithOp, Comparator, FilterOperator, JoinType, OutputType, SortOrder, TargetType,
};
pub use self::request::{
    ArithmeticOperation, CastConversion, ConditionRule, FilterCondition, JoinEdge, JoinPrimary,
    JoinSpec, Operand, OperandKind, OrderBy, PipelineStep, Source, TransformSpec,
};
pub use self::values::Value;
