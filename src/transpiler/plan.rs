//! Query orchestrator.
//!
//! A request compiles to a base subquery (projection, casts, joins) wrapped
//! by an outer query that holds everything referring to the subquery's
//! aliases: derived columns, filters, rule predicates and ordering.
//!
//! ```text
//! SELECT sub.*, <derived> FROM (<subquery>) AS sub
//! WHERE <filters AND rule predicates> ORDER BY <order> LIMIT $n OFFSET $n+1
//! ```

use std::collections::HashMap;

use crate::ast::{Expr, OutputType, SortOrder, Source, TargetType, TransformSpec, Value};
use crate::engine::Row;
use crate::error::{EtlError, EtlResult};
use crate::transpiler::Dialect;
use crate::transpiler::alias::{AliasMap, SUBQUERY_ALIAS, Scope, quote_qualified};
use crate::transpiler::arithmetic::compile_operations;
use crate::transpiler::casts::{CastRegistry, cast_expr};
use crate::transpiler::filters::compile_filters;
use crate::transpiler::joins::{from_clause, join_projection, validate_join};
use crate::transpiler::render::{ParamContext, Renderer};
use crate::transpiler::rules::compile_rules;

/// Bounds applied to caller-supplied LIMIT/OFFSET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 1000,
        }
    }
}

impl QueryLimits {
    /// Clamp to `[1, max_limit]`, `default_limit` when absent.
    pub fn limit(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }

    pub fn offset(&self, requested: Option<i64>) -> i64 {
        requested.unwrap_or(0).max(0)
    }
}

/// Type family of a source column, from `information_schema.columns.data_type`.
///
/// Only the families that decide how a compared value is bound are told
/// apart; everything else is [`ColumnType::Other`] and compares as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Numeric,
    Boolean,
    Date,
    Timestamp,
    Other,
}

impl ColumnType {
    /// Classify a Postgres or MySQL `data_type`.
    pub fn from_data_type(data_type: &str) -> Self {
        let t = data_type.trim().to_ascii_lowercase();
        match t.as_str() {
            "integer" | "int" | "smallint" | "bigint" | "tinyint" | "mediumint" | "year" => Self::Integer,
            "numeric" | "decimal" | "real" | "double precision" | "double" | "float" => Self::Numeric,
            "boolean" | "bool" => Self::Boolean,
            "date" => Self::Date,
            "datetime" => Self::Timestamp,
            "name" | "enum" | "set" => Self::Text,
            t if t.starts_with("timestamp") => Self::Timestamp,
            t if t.contains("char") || t.ends_with("text") => Self::Text,
            _ => Self::Other,
        }
    }

    /// How a value compared against this column is typed for binding.
    pub fn param_hint(self) -> TargetType {
        match self {
            Self::Integer | Self::Numeric => TargetType::Number,
            Self::Boolean => TargetType::Boolean,
            Self::Date => TargetType::Date,
            Self::Timestamp => TargetType::Datetime,
            Self::Text | Self::Other => TargetType::String,
        }
    }
}

/// One discovered column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub name: String,
    /// `None` when metadata carried no type
    pub column_type: Option<ColumnType>,
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, data_type: &str) -> Self {
        Self {
            name: name.into(),
            column_type: Some(ColumnType::from_data_type(data_type)),
        }
    }

    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: None,
        }
    }
}

impl From<&str> for SourceColumn {
    fn from(name: &str) -> Self {
        Self::untyped(name)
    }
}

/// Columns per source table, from metadata discovery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceSchema {
    tables: HashMap<String, Vec<SourceColumn>>,
}

impl SourceSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table by column names only.
    pub fn with_table(mut self, table: impl Into<String>, columns: Vec<String>) -> Self {
        self.insert(table, columns.into_iter().map(SourceColumn::untyped).collect());
        self
    }

    pub fn with_columns(mut self, table: impl Into<String>, columns: Vec<SourceColumn>) -> Self {
        self.insert(table, columns);
        self
    }

    pub fn insert(&mut self, table: impl Into<String>, columns: Vec<SourceColumn>) {
        self.tables.insert(table.into(), columns);
    }

    /// Column names of `table` in ordinal order, `None` when unknown.
    pub fn columns(&self, table: &str) -> Option<Vec<String>> {
        self.tables
            .get(table)
            .filter(|c| !c.is_empty())
            .map(|columns| columns.iter().map(|c| c.name.clone()).collect())
    }

    pub fn column_type(&self, table: &str, column: &str) -> Option<ColumnType> {
        self.tables
            .get(table)?
            .iter()
            .find(|c| c.name == column)
            .and_then(|c| c.column_type)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// SELECT list of the base subquery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub select: Vec<Expr>,
    pub aliases: AliasMap,
    /// Contains a `*`, so the column set is unknown
    pub open: bool,
    /// Source type per logical reference, where metadata knew it
    pub types: HashMap<String, ColumnType>,
}

/// A compiled request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub dialect: Dialect,
    /// Base query the outer query selects from
    pub subquery: String,
    /// Bounded query, LIMIT/OFFSET bound last
    pub sql: String,
    pub params: Vec<Value>,
    /// Same query without LIMIT/OFFSET, for batching
    pub stream_sql: String,
    pub stream_params: Vec<Value>,
    /// `SELECT COUNT(*) AS total ...` when the request asked for a count
    pub count_sql: Option<String>,
    pub count_params: Vec<Value>,
    pub aliases: AliasMap,
    /// Output columns holding booleans (boolean casts and rule results)
    pub boolean_columns: Vec<String>,
    pub limit: i64,
    pub offset: i64,
}

impl QueryPlan {
    /// Restore booleans the engine returned as `0`/`1` (MySQL has no
    /// boolean type).
    pub fn normalize_rows(&self, rows: &mut [Row]) {
        normalize_booleans(rows, &self.boolean_columns);
    }
}

pub(crate) fn normalize_booleans(rows: &mut [Row], columns: &[String]) {
    if columns.is_empty() {
        return;
    }
    for row in rows {
        for column in columns {
            if let Some(value) = row.get_mut(column) {
                if let Some(n) = value.as_i64() {
                    *value = serde_json::Value::Bool(n != 0);
                }
            }
        }
    }
}

/// Compiles [`TransformSpec`]s for one dialect.
#[derive(Debug, Clone, Default)]
pub struct QueryCompiler {
    dialect: Dialect,
    schema: SourceSchema,
    limits: QueryLimits,
}

struct OuterQuery {
    select: Vec<Expr>,
    filter: Option<Expr>,
    order: Vec<(Expr, Option<SortOrder>)>,
}

impl QueryCompiler {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    pub fn with_schema(mut self, schema: SourceSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_limits(mut self, limits: QueryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Compile `spec` into a [`QueryPlan`].
    pub fn compile(&self, spec: &TransformSpec) -> EtlResult<QueryPlan> {
        let casts = CastRegistry::from_conversions(&spec.conversions);

        let (projection, from) = match spec.source()? {
            Source::Table(table) => (
                table_projection(table, &spec.columns, &self.schema, &casts)?,
                format!("FROM {}", quote_qualified(table, self.dialect)),
            ),
            Source::Join(join) => {
                validate_join(join, spec.connection.as_deref())?;
                let projection = join_projection(join, &spec.columns, &self.schema, &casts)?;
                let references = !spec.conditions.is_empty()
                    || !spec.operations.is_empty()
                    || !spec.rules.is_empty()
                    || !spec.order_by.is_empty();
                if projection.open && references {
                    return Err(EtlError::Compilation(
                        "filters, operations and rules over a join need a known column list".to_string(),
                    ));
                }
                (projection, from_clause(join, self.dialect))
            }
        };

        for (column, _) in casts.iter() {
            if projection.aliases.alias_of(column).is_none() {
                return Err(EtlError::Compilation(if projection.open {
                    format!("conversion on '{}' requires a known column list", column)
                } else {
                    format!("conversion on '{}' references a column outside the projection", column)
                }));
            }
        }

        let outer = self.outer_query(spec, &projection, &casts)?;
        let generator = self.dialect.generator();
        let limit = self.limits.limit(spec.limit);
        let offset = self.limits.offset(spec.offset);

        let subquery = {
            let mut params = ParamContext::new();
            let mut renderer = Renderer::new(generator.as_ref(), &mut params);
            format!("SELECT {} {}", renderer.render_list(&projection.select), from)
        };

        let mut params = ParamContext::new();
        let stream_sql = {
            let mut renderer = Renderer::new(generator.as_ref(), &mut params);
            let mut sql = format!(
                "SELECT {} FROM ({}) AS {}",
                renderer.render_list(&outer.select),
                subquery,
                SUBQUERY_ALIAS
            );
            if let Some(filter) = &outer.filter {
                sql.push_str(&format!(" WHERE {}", renderer.render(filter)));
            }
            let order = outer
                .order
                .iter()
                .map(|(expr, direction)| {
                    let rendered = renderer.render(expr);
                    match direction {
                        Some(SortOrder::Asc) => format!("{} ASC", rendered),
                        Some(SortOrder::Desc) => format!("{} DESC", rendered),
                        None => rendered,
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ORDER BY {}", order));
            sql
        };
        let stream_params = params.params.clone();

        let limit_ph = params.add_param(Value::Int(limit), generator.as_ref());
        let offset_ph = params.add_param(Value::Int(offset), generator.as_ref());
        let sql = format!("{}{}", stream_sql, generator.limit_offset(&limit_ph, &offset_ph));

        let (count_sql, count_params) = if spec.count {
            let mut params = ParamContext::new();
            let mut renderer = Renderer::new(generator.as_ref(), &mut params);
            let mut sql = format!("SELECT COUNT(*) AS total FROM ({}) AS {}", subquery, SUBQUERY_ALIAS);
            if let Some(filter) = &outer.filter {
                sql.push_str(&format!(" WHERE {}", renderer.render(filter)));
            }
            (Some(sql), params.into_params())
        } else {
            (None, Vec::new())
        };

        let boolean_columns = casts
            .iter()
            .filter(|(_, target)| *target == TargetType::Boolean)
            .filter_map(|(column, _)| projection.aliases.alias_of(column).map(str::to_string))
            .chain(
                spec.rules
                    .iter()
                    .filter(|rule| rule.output_type == OutputType::Boolean)
                    .filter_map(|rule| rule.result_column.as_deref().map(str::trim))
                    .filter(|column| !column.is_empty())
                    .map(str::to_string),
            )
            .collect();

        tracing::debug!(dialect = %self.dialect, %sql, params = params.params.len(), "compiled query plan");

        Ok(QueryPlan {
            dialect: self.dialect,
            subquery,
            sql,
            params: params.into_params(),
            stream_sql,
            stream_params,
            count_sql,
            count_params,
            aliases: projection.aliases,
            boolean_columns,
            limit,
            offset,
        })
    }

    fn outer_query(&self, spec: &TransformSpec, projection: &Projection, casts: &CastRegistry) -> EtlResult<OuterQuery> {
        // Casts already happened in the subquery; here they only type parameters
        let mut scope = Scope::outer(projection.aliases.clone(), projection.open)
            .with_casts(casts.iter())
            .with_column_types(projection.types.iter().map(|(r, t)| (r.as_str(), *t)));

        let mut select = vec![Expr::Star(Some(SUBQUERY_ALIAS.to_string()))];
        select.extend(compile_operations(&spec.operations, &mut scope, None)?);

        let rules = compile_rules(&spec.rules, &mut scope, None)?;
        let mut predicates = Vec::new();
        if let Some(filters) = compile_filters(&spec.conditions, &scope)? {
            predicates.push(filters);
        }
        for rule in rules {
            select.extend(rule.projection);
            predicates.extend(rule.predicate);
        }

        let order = if spec.order_by.is_empty() {
            // OFFSET pagination needs a deterministic order
            let first = match projection.aliases.first_alias() {
                Some(alias) => Expr::qualified(SUBQUERY_ALIAS, alias),
                None => Expr::Raw("1".to_string()),
            };
            vec![(first, None)]
        } else {
            spec.order_by
                .iter()
                .map(|o| Ok((scope.resolve(&o.column)?, Some(o.direction))))
                .collect::<EtlResult<Vec<_>>>()?
        };

        Ok(OuterQuery {
            select,
            filter: Expr::and_all(predicates),
            order,
        })
    }
}

/// Single-table projection: explicit columns, then discovered metadata,
/// then `*`. Cast columns keep their name as alias.
fn table_projection(
    table: &str,
    columns: &[String],
    schema: &SourceSchema,
    casts: &CastRegistry,
) -> EtlResult<Projection> {
    let known = if columns.is_empty() {
        schema.columns(table)
    } else {
        Some(columns.to_vec())
    };
    let mut projection = Projection::default();
    match known {
        None => {
            projection.select.push(Expr::Star(None));
            projection.open = true;
        }
        Some(columns) => {
            for column in columns {
                let column = column.trim();
                let alias = projection.aliases.register(column)?;
                if let Some(column_type) = schema.column_type(table, column) {
                    projection.types.insert(column.to_string(), column_type);
                }
                let source = Expr::column(column);
                projection.select.push(match casts.get(column) {
                    Some(target) => cast_expr(source, target).alias(alias),
                    None if alias != column => source.alias(alias),
                    None => source,
                });
            }
        }
    }
    Ok(projection)
}

/// Compile `spec` for `dialect` with default limits and no metadata.
pub fn compile(spec: &TransformSpec, dialect: Dialect) -> EtlResult<QueryPlan> {
    QueryCompiler::new(dialect).compile(spec)
}
