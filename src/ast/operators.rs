use serde::{Deserialize, Serialize};

/// Operator of a [`FilterCondition`](crate::ast::FilterCondition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    /// Case-insensitive `%value%`
    #[serde(rename = "contains")]
    Contains,
    /// Case-insensitive `value%`
    #[serde(rename = "startsWith")]
    StartsWith,
    /// Case-insensitive `%value`
    #[serde(rename = "endsWith")]
    EndsWith,
    /// Comma-separated list membership
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "is-null")]
    IsNull,
    #[serde(rename = "is-not-null")]
    IsNotNull,
}

impl FilterOperator {
    /// Null checks are the only operators that take no value.
    pub fn takes_value(&self) -> bool {
        !matches!(self, FilterOperator::IsNull | FilterOperator::IsNotNull)
    }

    /// The comparison part of this operator, if it is a plain comparison.
    pub fn comparator(&self) -> Option<Comparator> {
        match self {
            FilterOperator::Eq => Some(Comparator::Eq),
            FilterOperator::Ne => Some(Comparator::Ne),
            FilterOperator::Gt => Some(Comparator::Gt),
            FilterOperator::Gte => Some(Comparator::Gte),
            FilterOperator::Lt => Some(Comparator::Lt),
            FilterOperator::Lte => Some(Comparator::Lte),
            _ => None,
        }
    }
}

impl std::fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterOperator::Eq => write!(f, "="),
            FilterOperator::Ne => write!(f, "!="),
            FilterOperator::Gt => write!(f, ">"),
            FilterOperator::Gte => write!(f, ">="),
            FilterOperator::Lt => write!(f, "<"),
            FilterOperator::Lte => write!(f, "<="),
            FilterOperator::Contains => write!(f, "contains"),
            FilterOperator::StartsWith => write!(f, "startsWith"),
            FilterOperator::EndsWith => write!(f, "endsWith"),
            FilterOperator::In => write!(f, "in"),
            FilterOperator::NotIn => write!(f, "not-in"),
            FilterOperator::IsNull => write!(f, "is-null"),
            FilterOperator::IsNotNull => write!(f, "is-not-null"),
        }
    }
}

/// Comparator of a [`ConditionRule`](crate::ast::ConditionRule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparator::Eq => write!(f, "="),
            Comparator::Ne => write!(f, "!="),
            Comparator::Gt => write!(f, ">"),
            Comparator::Gte => write!(f, ">="),
            Comparator::Lt => write!(f, "<"),
            Comparator::Lte => write!(f, "<="),
        }
    }
}

/// Arithmetic operator of an [`ArithmeticOperation`](crate::ast::ArithmeticOperation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Rem,
    /// Exponentiation, compiled to `POWER`/`POW`
    #[serde(rename = "^")]
    Pow,
}

impl std::fmt::Display for ArithOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArithOp::Add => write!(f, "+"),
            ArithOp::Sub => write!(f, "-"),
            ArithOp::Mul => write!(f, "*"),
            ArithOp::Div => write!(f, "/"),
            ArithOp::Rem => write!(f, "%"),
            ArithOp::Pow => write!(f, "^"),
        }
    }
}

/// Target type of a [`CastConversion`](crate::ast::CastConversion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    String,
    Number,
    Integer,
    Decimal,
    Boolean,
    Date,
    Datetime,
}

impl TargetType {
    /// Types whose input goes through the numeric sanitizer.
    pub fn is_numeric(&self) -> bool {
        matches!(self, TargetType::Number | TargetType::Integer | TargetType::Decimal)
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetType::String => write!(f, "string"),
            TargetType::Number => write!(f, "number"),
            TargetType::Integer => write!(f, "integer"),
            TargetType::Decimal => write!(f, "decimal"),
            TargetType::Boolean => write!(f, "boolean"),
            TargetType::Date => write!(f, "date"),
            TargetType::Datetime => write!(f, "datetime"),
        }
    }
}

/// Output type of a CASE projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Boolean,
    #[default]
    String,
    Number,
}

/// Join type of a star-join edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl std::fmt::Display for JoinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT"),
            JoinType::Right => write!(f, "RIGHT"),
            JoinType::Full => write!(f, "FULL"),
        }
    }
}

/// Sort order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}
