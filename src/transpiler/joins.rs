//! Star-join compiler.
//!
//! Every edge joins a secondary table to the primary alias `p`; edge `i`
//! (1-based) gets alias `j<i>` and logical prefix `join_<i>`.

use crate::ast::{Expr, JoinSpec};
use crate::error::{EtlError, EtlResult};
use crate::transpiler::Dialect;
use crate::transpiler::alias::{
    PRIMARY_ALIAS, join_alias, join_prefix, quote_ident, quote_qualified, split_join_reference,
};
use crate::transpiler::casts::{CastRegistry, cast_expr};
use crate::transpiler::plan::{Projection, SourceSchema};

/// Reject edges that point at another connection.
pub fn validate_join(join: &JoinSpec, connection: Option<&str>) -> EtlResult<()> {
    let primary = join.primary.connection.as_deref().or(connection);
    if join.primary.table.trim().is_empty() {
        return Err(EtlError::Validation("join primary table is empty".to_string()));
    }
    for (i, edge) in join.joins.iter().enumerate() {
        if edge.secondary_table.trim().is_empty() {
            return Err(EtlError::Validation(format!("join {} has no secondary table", i + 1)));
        }
        if let (Some(secondary), Some(primary)) = (edge.secondary_connection.as_deref(), primary) {
            if secondary != primary {
                return Err(EtlError::Validation(format!(
                    "join {} uses connection '{}' but the primary uses '{}'; all joined tables must share one connection",
                    i + 1,
                    secondary,
                    primary
                )));
            }
        }
    }
    Ok(())
}

/// `FROM <primary> AS p <TYPE> JOIN <secondary> AS j1 ON p."a" = j1."b" ...`
pub fn from_clause(join: &JoinSpec, dialect: Dialect) -> String {
    let mut sql = format!(
        "FROM {} AS {}",
        quote_qualified(join.primary.table.trim(), dialect),
        PRIMARY_ALIAS
    );
    for (i, edge) in join.joins.iter().enumerate() {
        let alias = join_alias(i + 1);
        sql.push_str(&format!(
            " {} JOIN {} AS {} ON {}.{} = {}.{}",
            edge.join_type,
            quote_qualified(edge.secondary_table.trim(), dialect),
            alias,
            PRIMARY_ALIAS,
            quote_ident(edge.primary_column.trim(), dialect),
            alias,
            quote_ident(edge.secondary_column.trim(), dialect),
        ));
    }
    sql
}

/// SELECT list of the join subquery.
///
/// Explicit `columns` (logical references) win; otherwise each table uses
/// its own column list, then discovered metadata, then `alias.*`.
pub fn join_projection(
    join: &JoinSpec,
    columns: &[String],
    schema: &SourceSchema,
    casts: &CastRegistry,
) -> EtlResult<Projection> {
    let mut projection = Projection::default();
    let edges = join.joins.len();

    if !columns.is_empty() {
        for reference in columns {
            push_column(&mut projection, reference.trim(), join, schema, casts)?;
        }
        return Ok(projection);
    }

    let mut tables: Vec<(String, String, Option<Vec<String>>)> = Vec::with_capacity(edges + 1);
    let primary_columns = Some(join.primary.columns.clone()).filter(|c| !c.is_empty());
    tables.push(("primary".to_string(), PRIMARY_ALIAS.to_string(), primary_columns));
    for (i, edge) in join.joins.iter().enumerate() {
        let listed = edge.projected_columns.clone().filter(|c| !c.is_empty());
        tables.push((join_prefix(i + 1), join_alias(i + 1), listed));
    }

    let table_names = std::iter::once(join.primary.table.trim())
        .chain(join.joins.iter().map(|e| e.secondary_table.trim()));
    for ((prefix, alias, listed), table) in tables.into_iter().zip(table_names) {
        let known = listed.or_else(|| schema.columns(table));
        match known {
            Some(cols) => {
                for column in cols {
                    push_column(&mut projection, &format!("{}.{}", prefix, column.trim()), join, schema, casts)?;
                }
            }
            None => {
                projection.select.push(Expr::Star(Some(alias)));
                projection.open = true;
            }
        }
    }
    Ok(projection)
}

fn push_column(
    projection: &mut Projection,
    reference: &str,
    join: &JoinSpec,
    schema: &SourceSchema,
    casts: &CastRegistry,
) -> EtlResult<()> {
    let (qualifier, column) = split_join_reference(reference, join.joins.len())?;
    let alias = projection.aliases.register(reference)?;
    if let Some(column_type) = table_of(join, &qualifier).and_then(|table| schema.column_type(table, &column)) {
        projection.types.insert(reference.to_string(), column_type);
    }
    let source = Expr::qualified(qualifier, column);
    let expr = match casts.get(reference) {
        Some(target) => cast_expr(source, target),
        None => source,
    };
    projection.select.push(expr.alias(alias));
    Ok(())
}

/// Source table behind a join alias (`p`, `j1`, ...).
fn table_of<'a>(join: &'a JoinSpec, qualifier: &str) -> Option<&'a str> {
    if qualifier == PRIMARY_ALIAS {
        return Some(join.primary.table.trim());
    }
    let index: usize = qualifier.strip_prefix('j')?.parse().ok()?;
    join.joins
        .get(index.checked_sub(1)?)
        .map(|edge| edge.secondary_table.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{JoinEdge, JoinPrimary, JoinType};
    use crate::transpiler::plan::{ColumnType, SourceColumn};

    fn edge(table: &str, on: (&str, &str)) -> JoinEdge {
        JoinEdge {
            secondary_connection: None,
            secondary_table: table.to_string(),
            join_type: JoinType::Inner,
            primary_column: on.0.to_string(),
            secondary_column: on.1.to_string(),
            projected_columns: None,
        }
    }

    fn star() -> JoinSpec {
        JoinSpec {
            primary: JoinPrimary {
                connection: Some("crm".into()),
                table: "orders".into(),
                columns: vec!["id".into()],
            },
            joins: vec![edge("customers", ("customer_id", "id")), edge("stores", ("store_id", "id"))],
        }
    }

    #[test]
    fn test_from_clause_chains_edges() {
        let sql = from_clause(&star(), Dialect::Postgres);
        assert_eq!(
            sql,
            "FROM \"orders\" AS p INNER JOIN \"customers\" AS j1 ON p.\"customer_id\" = j1.\"id\" \
             INNER JOIN \"stores\" AS j2 ON p.\"store_id\" = j2.\"id\""
        );
    }

    #[test]
    fn test_cross_connection_edge_rejected() {
        let mut join = star();
        join.joins[1].secondary_connection = Some("billing".into());
        assert!(matches!(validate_join(&join, None), Err(EtlError::Validation(_))));
    }

    #[test]
    fn test_projection_falls_back_to_star() {
        let projection =
            join_projection(&star(), &[], &SourceSchema::default(), &CastRegistry::new()).unwrap();
        assert!(projection.open);
        assert_eq!(projection.select.len(), 3);
        assert_eq!(projection.select[1], Expr::Star(Some("j1".into())));
    }

    #[test]
    fn test_explicit_columns_are_aliased() {
        let columns = vec!["primary.id".to_string(), "join_2.city".to_string()];
        let projection = join_projection(&star(), &columns, &SourceSchema::default(), &CastRegistry::new()).unwrap();
        assert!(!projection.open);
        assert_eq!(
            projection.select[1],
            Expr::qualified("j2", "city").alias("join_2_city")
        );
        assert_eq!(projection.aliases.first_alias(), Some("primary_id"));
    }

    #[test]
    fn test_projection_records_source_types() {
        let schema = SourceSchema::new()
            .with_columns("orders", vec![SourceColumn::new("id", "integer")])
            .with_columns("stores", vec![SourceColumn::new("city", "character varying")]);
        let columns = vec!["primary.id".to_string(), "join_2.city".to_string()];
        let projection = join_projection(&star(), &columns, &schema, &CastRegistry::new()).unwrap();
        assert_eq!(projection.types.get("primary.id"), Some(&ColumnType::Integer));
        assert_eq!(projection.types.get("join_2.city"), Some(&ColumnType::Text));
    }
}
