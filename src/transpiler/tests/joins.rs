//! Star join tests.

use pretty_assertions::assert_eq;

use crate::ast::*;
use crate::error::EtlError;
use crate::transpiler::{Dialect, QueryCompiler, SourceSchema, ToPlan};

fn edge(table: &str, primary_column: &str, join_type: JoinType) -> JoinEdge {
    JoinEdge {
        secondary_connection: Some("crm".into()),
        secondary_table: table.into(),
        join_type,
        primary_column: primary_column.into(),
        secondary_column: "id".into(),
        projected_columns: None,
    }
}

fn star_spec() -> TransformSpec {
    TransformSpec {
        connection: Some("crm".into()),
        join: Some(JoinSpec {
            primary: JoinPrimary {
                connection: Some("crm".into()),
                table: "orders".into(),
                columns: vec![],
            },
            joins: vec![
                edge("customers", "customer_id", JoinType::Inner),
                edge("stores", "store_id", JoinType::Inner),
            ],
        }),
        columns: vec![
            "primary.id".into(),
            "primary.amount".into(),
            "join_1.name".into(),
            "join_2.city".into(),
        ],
        conditions: vec![FilterCondition::new("join_2.city", FilterOperator::Eq, "Madrid")],
        ..Default::default()
    }
}

#[test]
fn test_two_edge_star_join() {
    let plan = star_spec().to_plan().unwrap();
    assert_eq!(
        plan.subquery,
        "SELECT p.\"id\" AS \"primary_id\", p.\"amount\" AS \"primary_amount\", \
         j1.\"name\" AS \"join_1_name\", j2.\"city\" AS \"join_2_city\" \
         FROM \"orders\" AS p \
         INNER JOIN \"customers\" AS j1 ON p.\"customer_id\" = j1.\"id\" \
         INNER JOIN \"stores\" AS j2 ON p.\"store_id\" = j2.\"id\""
    );
    assert_eq!(plan.subquery.matches(" JOIN ").count(), 2);
    assert_eq!(plan.subquery.matches(" ON p.").count(), 2);

    // Filters run outside the join
    assert!(plan.sql.ends_with(
        ") AS sub WHERE sub.\"join_2_city\" = $1 ORDER BY sub.\"primary_id\" LIMIT $2 OFFSET $3"
    ));
    assert_eq!(plan.params[0], Value::Text("Madrid".into()));
}

#[test]
fn test_join_casts_apply_inside_subquery() {
    let spec = TransformSpec {
        conversions: vec![CastConversion {
            column: "primary.amount".into(),
            target_type: TargetType::Number,
        }],
        conditions: vec![FilterCondition::new("primary.amount", FilterOperator::Lt, "1.000,50")],
        ..star_spec()
    };
    let plan = spec.to_plan_with_dialect(Dialect::MySQL).unwrap();
    assert!(plan.subquery.contains("AS DOUBLE) ELSE NULL END AS `primary_amount`"));
    assert!(plan.sql.contains("WHERE sub.`primary_amount` < ?"));
    assert_eq!(plan.params[0], Value::Float(1000.5));
}

#[test]
fn test_left_join_with_discovered_columns() {
    let mut spec = star_spec();
    spec.columns.clear();
    spec.conditions.clear();
    if let Some(join) = spec.join.as_mut() {
        join.joins.truncate(1);
        join.joins[0].join_type = JoinType::Left;
        join.joins[0].projected_columns = Some(vec!["name".into()]);
    }
    let plan = QueryCompiler::new(Dialect::Postgres)
        .with_schema(SourceSchema::new().with_table("orders", vec!["id".into(), "customer_id".into()]))
        .compile(&spec)
        .unwrap();
    assert_eq!(
        plan.subquery,
        "SELECT p.\"id\" AS \"primary_id\", p.\"customer_id\" AS \"primary_customer_id\", \
         j1.\"name\" AS \"join_1_name\" \
         FROM \"orders\" AS p LEFT JOIN \"customers\" AS j1 ON p.\"customer_id\" = j1.\"id\""
    );
}

#[test]
fn test_open_join_projection() {
    let mut spec = star_spec();
    spec.columns.clear();
    spec.conditions.clear();
    let plan = spec.to_plan().unwrap();
    assert!(plan.subquery.starts_with("SELECT p.*, j1.*, j2.* FROM"));
    assert!(plan.sql.contains("ORDER BY 1 LIMIT"));
}

#[test]
fn test_open_join_rejects_filters() {
    let mut spec = star_spec();
    spec.columns.clear();
    assert!(matches!(spec.to_plan(), Err(EtlError::Compilation(_))));
}

#[test]
fn test_cross_connection_join_rejected() {
    let mut spec = star_spec();
    if let Some(join) = spec.join.as_mut() {
        join.joins[0].secondary_connection = Some("billing".into());
    }
    assert!(matches!(spec.to_plan(), Err(EtlError::Validation(_))));
}

#[test]
fn test_unqualified_join_reference_rejected() {
    let mut spec = star_spec();
    spec.conditions = vec![FilterCondition::new("city", FilterOperator::Eq, "Madrid")];
    assert!(matches!(spec.to_plan(), Err(EtlError::Compilation(_))));
}
