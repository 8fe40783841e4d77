//! SQL Dialect tests.

use pretty_assertions::assert_eq;

use super::sales_spec;
use crate::ast::*;
use crate::transpiler::{Dialect, QueryCompiler, SourceSchema, ToPlan};

fn spec() -> TransformSpec {
    TransformSpec {
        table: Some("shop.orders".into()),
        columns: vec!["id".into(), "region".into(), "qty".into()],
        conditions: vec![
            FilterCondition::new("region", FilterOperator::In, "north,south"),
            FilterCondition::new("region", FilterOperator::EndsWith, "th"),
        ],
        operations: vec![ArithmeticOperation {
            id: "sq".into(),
            left_operand: Operand::column("qty"),
            operator: ArithOp::Pow,
            right_operand: Operand::constant("2"),
            result_column: "qty_sq".into(),
        }],
        ..Default::default()
    }
}

#[test]
fn test_mysql_dialect() {
    let plan = spec().to_plan_with_dialect(Dialect::MySQL).unwrap();
    assert_eq!(
        plan.sql,
        "SELECT sub.*, POW(sub.`qty`, 2) AS `qty_sq` \
         FROM (SELECT `id`, `region`, `qty` FROM `shop`.`orders`) AS sub \
         WHERE sub.`region` IN (?, ?) AND CAST(sub.`region` AS CHAR) LIKE ? \
         ORDER BY sub.`id` LIMIT ? OFFSET ?"
    );
    assert_eq!(
        plan.params,
        vec![
            Value::Text("north".into()),
            Value::Text("south".into()),
            Value::Text("%th".into()),
            Value::Int(50),
            Value::Int(0),
        ]
    );
}

#[test]
fn test_postgres_dialect() {
    let plan = spec().to_plan_with_dialect(Dialect::Postgres).unwrap();
    assert_eq!(
        plan.sql,
        "SELECT sub.*, POWER(sub.\"qty\", 2) AS \"qty_sq\" \
         FROM (SELECT \"id\", \"region\", \"qty\" FROM \"shop\".\"orders\") AS sub \
         WHERE sub.\"region\" IN ($1, $2) AND CAST(sub.\"region\" AS TEXT) ILIKE $3 \
         ORDER BY sub.\"id\" LIMIT $4 OFFSET $5"
    );
}

#[test]
fn test_warehouse_matches_postgres_syntax() {
    let pg = spec().to_plan_with_dialect(Dialect::Postgres).unwrap();
    let wh = spec().to_plan_with_dialect(Dialect::Warehouse).unwrap();
    assert_eq!(pg.sql, wh.sql);
    assert_eq!(pg.params, wh.params);
}

#[test]
fn test_decimal_type_per_dialect() {
    let schema = || SourceSchema::new().with_table("public.sales", vec!["amount".into()]);
    let compile = |dialect| {
        QueryCompiler::new(dialect)
            .with_schema(schema())
            .compile(&sales_spec())
            .unwrap()
    };
    assert!(compile(Dialect::Postgres).subquery.contains("AS NUMERIC) ELSE NULL END"));
    assert!(compile(Dialect::Warehouse).subquery.contains("AS NUMERIC(38, 10)) ELSE NULL END"));
    let mysql = compile(Dialect::MySQL);
    assert!(mysql.subquery.contains("AS DECIMAL(65, 10)) ELSE NULL END"));
    assert!(mysql.sql.ends_with("WHERE sub.`amount` > ? ORDER BY sub.`amount` LIMIT ? OFFSET ?"));
}

#[test]
fn test_quoting_escapes_embedded_quotes() {
    let spec = TransformSpec {
        table: Some("odd\"table".into()),
        columns: vec!["we`ird".into()],
        ..Default::default()
    };
    let pg = spec.to_plan_with_dialect(Dialect::Postgres).unwrap();
    assert_eq!(pg.subquery, "SELECT \"we`ird\" FROM \"odd\"\"table\"");
    let my = spec.to_plan_with_dialect(Dialect::MySQL).unwrap();
    assert_eq!(my.subquery, "SELECT `we``ird` FROM `odd\"table`");
}
