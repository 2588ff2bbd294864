//! Integration tests for the query pipeline.
//!
//! These tests drive the public API end to end: a model registry, descriptors
//! refined through builder calls, and compilation for each built-in dialect.

use std::sync::Arc;

use sqlcraft_core::settings_loader::from_toml_str;
use sqlcraft_core::{EmptyResultMode, ErrorCategory, QueryError};
use sqlcraft_db::dialect::{dialect_for, Dialect, MySqlDialect, PostgresDialect, SqliteDialect};
use sqlcraft_db::fields::{FieldDef, FieldType};
use sqlcraft_db::model::{ModelMeta, ModelRegistry};
use sqlcraft_db::query::{
    Compilation, CompileOptions, Expression, Lookup, OrderBy, Query, SqlCompiler, Q,
};
use sqlcraft_db::value::Value;

// ── Test schema ───────────────────────────────────────────────────────

fn registry() -> Arc<ModelRegistry> {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            ModelMeta::new("customer", "customer")
                .field(FieldDef::new("id", FieldType::BigAutoField).primary_key())
                .field(FieldDef::new("country", FieldType::CharField))
                .field(FieldDef::new("vip", FieldType::BooleanField)),
        )
        .unwrap();
    registry
        .register(
            ModelMeta::new("order", "order")
                .field(FieldDef::new("id", FieldType::BigAutoField).primary_key())
                .field(FieldDef::new("status", FieldType::CharField))
                .field(FieldDef::new("total", FieldType::IntegerField))
                .field(FieldDef::new("created_at", FieldType::DateTimeField))
                .field(
                    FieldDef::new("customer", FieldType::foreign_key("customer"))
                        .column("customer_id")
                        .nullable()
                        .related_name("orders"),
                ),
        )
        .unwrap();
    Arc::new(registry)
}

fn orders() -> Query {
    Query::new(registry(), "order").unwrap()
}

fn compile(query: &Query, dialect: &dyn Dialect) -> (String, Vec<Value>) {
    let compiled = SqlCompiler::new(query, dialect)
        .compile()
        .unwrap()
        .into_sql()
        .unwrap();
    (compiled.sql, compiled.params)
}

fn placeholder_count(sql: &str) -> usize {
    sql.matches('?').count()
}

// ── Scenarios ─────────────────────────────────────────────────────────

#[test]
fn test_paid_orders_scenario() {
    let query = orders()
        .filter(Q::filter("status", Lookup::exact("paid")) & Q::filter("total", Lookup::gt(100)))
        .unwrap()
        .order_by(&["-created_at"])
        .unwrap()
        .set_limit(10)
        .unwrap();

    let (sql, params) = compile(&query, &SqliteDialect);
    assert_eq!(
        sql,
        "SELECT \"order\".\"id\", \"order\".\"status\", \"order\".\"total\", \
         \"order\".\"created_at\", \"order\".\"customer_id\" FROM \"order\" \
         WHERE \"order\".\"status\" = ? AND \"order\".\"total\" > ? \
         ORDER BY \"order\".\"created_at\" DESC LIMIT 10"
    );
    assert_eq!(params, vec![Value::from("paid"), Value::from(100)]);

    let (pg, _) = compile(&query, &PostgresDialect);
    assert!(pg.contains("WHERE \"order\".\"status\" = $1 AND \"order\".\"total\" > $2"));
    let (mysql, _) = compile(&query, &MySqlDialect);
    assert!(mysql.contains("FROM `order` WHERE `order`.`status` = ?"));
}

#[test]
fn test_or_over_nullable_relation_is_left_join() {
    let query = orders()
        .values(&["id"])
        .unwrap()
        .filter(
            Q::filter("customer__country", Lookup::exact("US"))
                | Q::filter("customer__vip", Lookup::exact(true)),
        )
        .unwrap();
    let (sql, params) = compile(&query, &PostgresDialect);
    assert_eq!(
        sql,
        "SELECT \"order\".\"id\" FROM \"order\" \
         LEFT OUTER JOIN \"customer\" ON (\"order\".\"customer_id\" = \"customer\".\"id\") \
         WHERE \"customer\".\"country\" = $1 OR \"customer\".\"vip\" = $2"
    );
    assert_eq!(params, vec![Value::from("US"), Value::from(true)]);
}

#[test]
fn test_negative_limit_leaves_query_usable() {
    let query = orders()
        .filter(Q::filter("status", Lookup::exact("paid")))
        .unwrap();
    let before = compile(&query, &SqliteDialect);

    let err = query.set_limit(-1).unwrap_err();
    assert!(matches!(err, QueryError::InvalidRange(_)));
    assert_eq!(err.category(), ErrorCategory::Builder);
    assert_eq!(compile(&query, &SqliteDialect), before);
}

// ── Properties ────────────────────────────────────────────────────────

#[test]
fn test_derived_descriptor_does_not_affect_parent() {
    let base = orders().values(&["id"]).unwrap();
    let before = compile(&base, &PostgresDialect);

    let _narrowed = base
        .filter(Q::filter("customer__country", Lookup::exact("NL")))
        .unwrap()
        .order_by(&["-total"])
        .unwrap()
        .slice(0, Some(3))
        .unwrap();
    let _other = base.exclude(Q::filter("status", Lookup::exact("void"))).unwrap();

    assert_eq!(compile(&base, &PostgresDialect), before);
    assert_eq!(before.0, "SELECT \"order\".\"id\" FROM \"order\"");
}

#[test]
fn test_compilation_is_deterministic_across_threads() {
    let query = orders()
        .filter(Q::filter("customer__country", Lookup::in_values(["NL", "BE"])))
        .unwrap()
        .order_by(&["total"])
        .unwrap();
    let expected = compile(&query, &PostgresDialect);

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| compile(&query, &PostgresDialect)))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    });
}

#[test]
fn test_repeated_relation_shares_one_join() {
    let query = orders()
        .values(&["id"])
        .unwrap()
        .filter(Q::filter("customer__country", Lookup::exact("NL")))
        .unwrap()
        .filter(Q::filter("customer__vip", Lookup::exact(true)))
        .unwrap()
        .order_by(&["customer__country"])
        .unwrap();
    let (sql, _) = compile(&query, &PostgresDialect);
    assert_eq!(sql.matches("JOIN").count(), 1);
    assert_eq!(query.alias_map().len(), 2);
}

#[test]
fn test_empty_condition_tree_omits_where() {
    let query = orders()
        .values(&["id"])
        .unwrap()
        .filter(Q::And(Vec::new()))
        .unwrap();
    let (sql, params) = compile(&query, &SqliteDialect);
    assert!(!sql.contains("WHERE"));
    assert!(params.is_empty());
}

#[test]
fn test_placeholders_match_parameters() {
    let inner = Query::new(registry(), "customer")
        .unwrap()
        .filter(Q::filter("vip", Lookup::exact(true)))
        .unwrap();
    let query = orders()
        .annotate("doubled", Expression::f("total") * Expression::value(2))
        .unwrap()
        .filter(Q::filter("customer", Lookup::InSubquery(inner.as_subquery())))
        .unwrap()
        .filter(Q::filter("status", Lookup::in_values(["a", "b", "c"])))
        .unwrap();

    let (sql, params) = compile(&query, &SqliteDialect);
    assert_eq!(placeholder_count(&sql), params.len());
    assert_eq!(
        params,
        vec![
            Value::from(2),
            Value::from(true),
            Value::from("a"),
            Value::from("b"),
            Value::from("c"),
        ]
    );

    let (pg, _) = compile(&query, &PostgresDialect);
    let positions: Vec<usize> = (1..=5).map(|n| pg.find(&format!("${n}")).unwrap()).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));

    // A WHERE that folds to "always true" after a sibling bound a value.
    let folded = orders()
        .values(&["id"])
        .unwrap()
        .filter(Q::filter("total", Lookup::gt(1)) | !Q::filter("id", Lookup::In(Vec::new())))
        .unwrap();
    for dialect in [&SqliteDialect as &dyn Dialect, &MySqlDialect] {
        let (sql, params) = compile(&folded, dialect);
        assert!(!sql.contains("WHERE"));
        assert!(params.is_empty());
        assert_eq!(placeholder_count(&sql), params.len());
    }

    // A parameterized leaf over an empty subquery, rendered as `1=0`.
    let impossible = orders()
        .values(&["id"])
        .unwrap()
        .filter(Q::compare(
            Expression::f("total") + Expression::value(7),
            Lookup::InSubquery(orders().none().as_subquery()),
        ))
        .unwrap();
    let literal = CompileOptions {
        empty_result_mode: EmptyResultMode::Literal,
        ..CompileOptions::default()
    };
    for dialect in [&SqliteDialect as &dyn Dialect, &MySqlDialect] {
        let compiled = SqlCompiler::new(&impossible, dialect)
            .with_options(literal)
            .compile()
            .unwrap()
            .into_sql()
            .unwrap();
        assert!(compiled.sql.ends_with(" WHERE 1=0"));
        assert!(compiled.params.is_empty());
        assert_eq!(placeholder_count(&compiled.sql), compiled.params.len());
    }

    // Emulated NULLS LAST repeats the sort expression and its values.
    let sorted = orders()
        .values(&["id"])
        .unwrap()
        .add_order_by(OrderBy::asc(Expression::f("total") + Expression::value(1)).nulls_last())
        .unwrap();
    let (sql, params) = compile(&sorted, &MySqlDialect);
    assert_eq!(placeholder_count(&sql), 2);
    assert_eq!(params, vec![Value::from(1), Value::from(1)]);
}

#[test]
fn test_combinator_requires_matching_shape() {
    let ids = orders().values(&["id"]).unwrap();
    let pairs = orders().values(&["id", "status"]).unwrap();
    let err = ids.union(&pairs).unwrap_err();
    assert!(matches!(err, QueryError::IncompatibleShape(_)));

    let statuses = orders().values(&["status"]).unwrap();
    assert!(ids.union(&statuses).is_ok());
}

#[test]
fn test_impossible_query_signals_empty_result() {
    let query = orders()
        .filter(Q::filter("id", Lookup::In(Vec::new())))
        .unwrap();
    let outcome = SqlCompiler::new(&query, &PostgresDialect).compile().unwrap();
    assert_eq!(outcome, Compilation::EmptyResultSet);
}

// ── Settings ──────────────────────────────────────────────────────────

#[test]
fn test_settings_drive_compile_options() {
    let settings = from_toml_str(
        r#"
        dialect = "sqlite"
        positional_column_aliases = true
        empty_result_mode = "literal"
        "#,
    )
    .unwrap();
    let dialect = dialect_for(&settings.dialect).unwrap();
    let options = CompileOptions::from_settings(&settings);

    let query = orders().values(&["id", "status"]).unwrap().none();
    let compiled = SqlCompiler::new(&query, dialect)
        .with_options(options)
        .compile()
        .unwrap();
    let sql = compiled.sql().unwrap();
    assert_eq!(
        sql.sql,
        "SELECT \"order\".\"id\" AS \"col1\", \"order\".\"status\" AS \"col2\" \
         FROM \"order\" WHERE 1=0"
    );
}
