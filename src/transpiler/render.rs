//! Dialect rendering of [`Expr`] trees.

use crate::ast::*;
use super::traits::SqlGenerator;

/// Context for parameterized query building.
#[derive(Debug, Default)]
pub struct ParamContext {
    /// Current parameter index (1-based for Postgres $1, $2, etc.)
    pub index: usize,
    /// Collected parameter values in placeholder order
    pub params: Vec<Value>,
}

impl ParamContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value and return the placeholder for it.
    pub fn add_param(&mut self, value: Value, generator: &dyn SqlGenerator) -> String {
        self.index += 1;
        self.params.push(value);
        generator.placeholder(self.index)
    }

    pub fn into_params(self) -> Vec<Value> {
        self.params
    }
}

/// Renders expressions for one SQL statement.
///
/// Children are rendered left to right so parameters are collected in the
/// order their placeholders appear in the text, which positional `?`
/// placeholders depend on.
pub struct Renderer<'a> {
    generator: &'a dyn SqlGenerator,
    params: &'a mut ParamContext,
}

impl<'a> Renderer<'a> {
    pub fn new(generator: &'a dyn SqlGenerator, params: &'a mut ParamContext) -> Self {
        Self { generator, params }
    }

    pub fn generator(&self) -> &dyn SqlGenerator {
        self.generator
    }

    /// Render a comma-separated list.
    pub fn render_list(&mut self, exprs: &[Expr]) -> String {
        exprs
            .iter()
            .map(|e| self.render(e))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn render(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Star(None) => "*".to_string(),
            Expr::Star(Some(q)) => format!("{}.*", q),
            Expr::Column { qualifier, name } => {
                let col = self.generator.quote_identifier(name);
                match qualifier {
                    Some(q) => format!("{}.{}", q, col),
                    None => col,
                }
            }
            Expr::Literal(lit) => self.render_literal(lit),
            Expr::Raw(sql) => sql.clone(),
            Expr::Param(value) => match value {
                Value::Null => "NULL".to_string(),
                other => self.params.add_param(other.clone(), self.generator),
            },
            Expr::Binary { left, op, right } => self.render_binary(left, *op, right),
            Expr::IsNull { expr, negated } => {
                let inner = self.render(expr);
                if *negated {
                    format!("{} IS NOT NULL", inner)
                } else {
                    format!("{} IS NULL", inner)
                }
            }
            Expr::InList { expr, list, negated } => {
                let inner = self.render(expr);
                let items = self.render_list(list);
                let kw = if *negated { "NOT IN" } else { "IN" };
                format!("{} {} ({})", inner, kw, items)
            }
            Expr::Like { expr, pattern } => {
                let inner = self.render(expr);
                let pat = self.render(pattern);
                format!("{} {} {}", inner, self.generator.fuzzy_operator(), pat)
            }
            Expr::Case { when_clauses, else_value } => {
                let mut sql = String::from("CASE");
                for (cond, val) in when_clauses {
                    let c = self.render(cond);
                    let v = self.render(val);
                    sql.push_str(&format!(" WHEN {} THEN {}", c, v));
                }
                if let Some(e) = else_value {
                    let v = self.render(e);
                    sql.push_str(&format!(" ELSE {}", v));
                }
                sql.push_str(" END");
                sql
            }
            Expr::Cast { expr, target } => {
                let inner = self.render(expr);
                format!("CAST({} AS {})", inner, self.generator.type_name(*target))
            }
            Expr::Call { func, args } => {
                let rendered: Vec<String> = args.iter().map(|a| self.render(a)).collect();
                self.generator.function_call(*func, &rendered)
            }
            Expr::Aliased { expr, alias } => {
                let inner = self.render(expr);
                format!("{} AS {}", inner, self.generator.quote_identifier(alias))
            }
        }
    }

    fn render_literal(&self, lit: &Literal) -> String {
        match lit {
            Literal::Null => "NULL".to_string(),
            Literal::Bool(b) => self.generator.bool_literal(*b),
            Literal::Int(n) => n.to_string(),
            Literal::Number(n) => n.clone(),
            Literal::Text(s) => self.generator.string_literal(s),
        }
    }

    fn render_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> String {
        let l = self.render(left);
        let r = self.render(right);
        match op {
            BinaryOp::Pow => self.generator.power(&l, &r),
            BinaryOp::Or => format!("({} OR {})", l, r),
            op if op.is_arithmetic() => format!("({} {} {})", l, op, r),
            op => format!("{} {} {}", l, op, r),
        }
    }
}

/// Render a single expression with a fresh parameter context.
pub fn render_standalone(expr: &Expr, generator: &dyn SqlGenerator) -> (String, Vec<Value>) {
    let mut params = ParamContext::new();
    let sql = Renderer::new(generator, &mut params).render(expr);
    (sql, params.into_params())
}
