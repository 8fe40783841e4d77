use crate::ast::Value;

/// Binary operators for SQL expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition (+)
    Add,
    /// Subtraction (-)
    Sub,
    /// Multiplication (*)
    Mul,
    /// Division (/)
    Div,
    /// Modulo (%)
    Rem,
    /// Exponentiation, rendered as a dialect function
    Pow,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem | BinaryOp::Pow
        )
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Rem => write!(f, "%"),
            BinaryOp::Pow => write!(f, "^"),
            BinaryOp::Eq => write!(f, "="),
            BinaryOp::Ne => write!(f, "!="),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::Gte => write!(f, ">="),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::Lte => write!(f, "<="),
            BinaryOp::And => write!(f, "AND"),
            BinaryOp::Or => write!(f, "OR"),
        }
    }
}

impl From<crate::ast::ArithOp> for BinaryOp {
    fn from(op: crate::ast::ArithOp) -> Self {
        use crate::ast::ArithOp;
        match op {
            ArithOp::Add => BinaryOp::Add,
            ArithOp::Sub => BinaryOp::Sub,
            ArithOp::Mul => BinaryOp::Mul,
            ArithOp::Div => BinaryOp::Div,
            ArithOp::Rem => BinaryOp::Rem,
            ArithOp::Pow => BinaryOp::Pow,
        }
    }
}

impl From<crate::ast::Comparator> for BinaryOp {
    fn from(cmp: crate::ast::Comparator) -> Self {
        use crate::ast::Comparator;
        match cmp {
            Comparator::Eq => BinaryOp::Eq,
            Comparator::Ne => BinaryOp::Ne,
            Comparator::Gt => BinaryOp::Gt,
            Comparator::Gte => BinaryOp::Gte,
            Comparator::Lt => BinaryOp::Lt,
            Comparator::Lte => BinaryOp::Lte,
        }
    }
}

/// SQL types a cast can target. Each dialect names them differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Double,
    Numeric,
    BigInt,
    Boolean,
    Date,
    Timestamp,
}

/// Functions whose spelling differs between dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Lower,
    Trim,
    Length,
    Replace,
    Reverse,
    NullIf,
    Truncate,
    /// 1-based position of needle in haystack, 0 when absent: `(needle, haystack)`
    Position,
    /// Replace every match: `(source, pattern, replacement)`
    RegexReplace,
    /// Boolean pattern match: `(source, pattern)`
    RegexMatch,
    Count,
}

/// Inline literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    /// Pre-validated numeric text
    Number(String),
    Text(String),
}

/// Typed SQL expression, rendered per dialect by
/// [`Renderer`](crate::transpiler::render::Renderer).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `*` or `qualifier.*`
    Star(Option<String>),
    /// Column reference, optionally qualified by an internal table alias (`p`, `j1`, `sub`)
    Column {
        qualifier: Option<String>,
        name: String,
    },
    /// Inline literal
    Literal(Literal),
    /// Raw SQL text, inlined verbatim
    Raw(String),
    /// Bound parameter
    Param(Value),
    /// Binary expression (left op right)
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// `expr IS [NOT] NULL`
    IsNull { expr: Box<Expr>, negated: bool },
    /// `expr [NOT] IN (list)`
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// Case-insensitive pattern match (ILIKE/LIKE)
    Like { expr: Box<Expr>, pattern: Box<Expr> },
    /// CASE WHEN ... THEN ... ELSE ... END
    Case {
        when_clauses: Vec<(Expr, Expr)>,
        else_value: Option<Box<Expr>>,
    },
    /// CAST(expr AS type)
    Cast { expr: Box<Expr>, target: SqlType },
    /// Function call
    Call { func: Func, args: Vec<Expr> },
    /// expr AS "alias"
    Aliased { expr: Box<Expr>, alias: String },
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column {
            qualifier: None,
            name: name.into(),
        }
    }

    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Column {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Expr::Literal(Literal::Text(s.into()))
    }

    pub fn null() -> Self {
        Expr::Literal(Literal::Null)
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn call(func: Func, args: Vec<Expr>) -> Self {
        Expr::Call { func, args }
    }

    pub fn cast(self, target: SqlType) -> Self {
        Expr::Cast {
            expr: Box::new(self),
            target,
        }
    }

    pub fn alias(self, alias: impl Into<String>) -> Self {
        Expr::Aliased {
            expr: Box::new(self),
            alias: alias.into(),
        }
    }

    /// Fold a list of predicates with AND. `None` for an empty list.
    pub fn and_all(predicates: Vec<Expr>) -> Option<Expr> {
        predicates
            .into_iter()
            .reduce(|acc, p| Expr::binary(acc, BinaryOp::And, p))
    }

    /// Strip an outer alias.
    pub fn unaliased(&self) -> &Expr {
        match self {
            Expr::Aliased { expr, .. } => expr,
            other => other,
        }
    }
}
