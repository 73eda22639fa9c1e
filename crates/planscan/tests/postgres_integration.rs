//! Integration tests against real PostgreSQL.
//!
//! These tests verify that:
//! 1. An indexed lookup on a populated, analyzed table passes the plan check
//! 2. Equality on an unindexed timestamp column is flagged as a full scan
//! 3. Registered queries go through the tap, get substituted and explained
//!
//! The activity log is not an alternating LOGIN/LOGOUT table. With half the
//! rows matching, Postgres prefers a sequential scan even with an index on
//! `action`, so LOGIN is one row in a hundred here.
//!
//! Run with: cargo nextest run -p planscan --features test-postgres --test postgres_integration
//!
//! Note: Requires Docker to be running.

#![cfg(feature = "test-postgres")]

use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta, Utc};
use planscan::{
    CaptureSession, Config, ConnectionExt, ExplainOptions, Parameters, PlanEvaluator, QueryDef,
    QueryFuture, QueryRegistry, Scanner, SqlParam, TappedConn, Thresholds, Value, Violation,
    analyze, explain,
};
use rust_decimal::Decimal;
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::ContainerAsync;
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use tokio_postgres::{Client, NoTls};

const ACTIVITY_LOGS: usize = 10_000;

struct Database {
    _container: ContainerAsync<Postgres>,
    host: String,
    port: u16,
}

impl Database {
    fn conn_str(&self) -> String {
        format!(
            "host={} port={} user=postgres password=postgres dbname=postgres",
            self.host, self.port
        )
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start a PostgreSQL container and return a connected client.
async fn setup_postgres() -> (Database, Client) {
    init_tracing();

    let container = Postgres::default()
        .start()
        .await
        .expect("failed to start postgres container");
    let host = container
        .get_host()
        .await
        .expect("container host")
        .to_string();
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("postgres port not available");
    let db = Database {
        _container: container,
        host,
        port,
    };

    // Postgres may not accept connections right after the ready log line.
    let mut attempts = 0;
    let (client, connection) = loop {
        attempts += 1;
        match tokio_postgres::connect(&db.conn_str(), NoTls).await {
            Ok(result) => break result,
            Err(e) if attempts < 10 => {
                tracing::debug!("Connection attempt {} failed: {}, retrying...", attempts, e);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Err(e) => panic!(
                "failed to connect to postgres after {} attempts: {}",
                attempts, e
            ),
        }
    };

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("connection error: {}", e);
        }
    });

    create_tables(&client).await;
    (db, client)
}

async fn create_tables(client: &Client) {
    client
        .batch_execute(
            r#"
            CREATE TABLE person (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT
            );

            CREATE TABLE address (
                id BIGSERIAL PRIMARY KEY,
                city TEXT NOT NULL,
                postal_code TEXT,
                person_id BIGINT REFERENCES person(id)
            );
            CREATE INDEX idx_address_city ON address (city);

            CREATE TABLE activity_log (
                id BIGSERIAL PRIMARY KEY,
                action TEXT,
                "timestamp" TIMESTAMP,
                person_id BIGINT REFERENCES person(id)
            );
            CREATE INDEX idx_activitylog_action ON activity_log (action);
            "#,
        )
        .await
        .expect("failed to create tables");
}

/// Insert `count` activity logs. One in a hundred is a LOGIN, the rest spread
/// over fifty other actions, so an equality on `action` stays selective.
/// Timestamps go back up to 300 days.
async fn insert_activity_logs(client: &Client, count: usize) {
    client
        .batch_execute(&format!(
            r#"
            INSERT INTO activity_log (action, "timestamp")
            SELECT
                CASE WHEN i % 100 = 0 THEN 'LOGIN' ELSE 'EVENT_' || (i % 50) END,
                localtimestamp - (i % 300) * interval '1 day'
            FROM generate_series(1, {count}) AS i;
            "#
        ))
        .await
        .expect("failed to insert activity logs");
}

fn thirty_days_ago() -> NaiveDateTime {
    Utc::now().naive_utc() - TimeDelta::days(30)
}

#[tokio::test]
async fn test_sparse_login_index_lookup_and_timestamp_full_scan() {
    let (_db, client) = setup_postgres().await;
    let options = ExplainOptions::default();
    let max_cost = Thresholds::default().max_cost;

    insert_activity_logs(&client, ACTIVITY_LOGS).await;
    analyze(&client).await.unwrap();

    let good = explain(
        &client,
        "SELECT * FROM activity_log WHERE action = 'LOGIN'",
        &options,
    )
    .await
    .unwrap();
    assert!(!good.has_full_scan, "unexpected full scan: {good:?}");
    assert!(good.estimated_cost <= max_cost, "too expensive: {good:?}");

    insert_activity_logs(&client, ACTIVITY_LOGS * 10).await;
    analyze(&client).await.unwrap();

    let bad_sql = format!(
        "SELECT * FROM activity_log WHERE timestamp = {}",
        Value::from(thirty_days_ago()).to_literal()
    );
    let bad = explain(&client, &bad_sql, &options).await.unwrap();
    assert!(bad.has_full_scan, "expected full scan: {bad:?}");
    assert!(bad.estimated_cost > max_cost, "expected cost > {max_cost}: {bad:?}");
}

#[tokio::test]
async fn test_plan_evaluator_uses_pool() {
    let (db, client) = setup_postgres().await;
    insert_activity_logs(&client, ACTIVITY_LOGS).await;

    let config = Config {
        database_url: Some(db.conn_str()),
        ..Config::default()
    };
    let evaluator = PlanEvaluator::from_config(&config).expect("failed to create pool");
    evaluator.analyze().await.unwrap();

    let verdict = evaluator
        .evaluate("SELECT * FROM activity_log WHERE action = 'LOGIN'")
        .await
        .unwrap();
    assert!(!verdict.has_full_scan);
    assert!(verdict.estimated_cost > Decimal::ZERO);

    let status = evaluator.inner().status();
    assert_eq!(status.size, status.available);
}

fn activity_by_action<'a>(conn: &'a TappedConn<'a>, params: &'a Parameters) -> QueryFuture<'a> {
    Box::pin(async move {
        let action = SqlParam(&params["action"]);
        conn.query(
            "/* SELECT a FROM ActivityLog a WHERE a.action = :action */ \
             select a1_0.id,a1_0.action,a1_0.timestamp,a1_0.person_id from activity_log a1_0 where a1_0.action=$1",
            &[&action],
        )
        .await?;
        Ok(())
    })
}

fn activity_by_actions<'a>(conn: &'a TappedConn<'a>, params: &'a Parameters) -> QueryFuture<'a> {
    Box::pin(async move {
        let actions = params["action"].as_list().unwrap_or_default();
        let bound: Vec<SqlParam<'_>> = actions.iter().map(SqlParam).collect();
        let placeholders = (1..=bound.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(",");
        let refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = bound
            .iter()
            .map(|p| p as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect();
        let sql = format!(
            "/* SELECT a FROM ActivityLog a WHERE a.action IN :action */ \
             select a1_0.id,a1_0.action from activity_log a1_0 where a1_0.action in ({placeholders})"
        );
        conn.query(&sql, &refs).await?;
        Ok(())
    })
}

fn activity_by_timestamp<'a>(conn: &'a TappedConn<'a>, params: &'a Parameters) -> QueryFuture<'a> {
    Box::pin(async move {
        let timestamp = SqlParam(&params["timestamp"]);
        conn.query(
            "/* SELECT a FROM ActivityLog a WHERE a.timestamp = :timestamp */ \
             select a1_0.id,a1_0.action,a1_0.timestamp,a1_0.person_id from activity_log a1_0 where a1_0.timestamp=$1",
            &[&timestamp],
        )
        .await?;
        Ok(())
    })
}

static BY_ACTION: QueryDef = QueryDef::new(
    "activity.by_action",
    "SELECT a FROM ActivityLog a WHERE a.action = :action",
    || vec![("action", "LOGIN".into())],
    activity_by_action,
);

static BY_ACTIONS: QueryDef = QueryDef::new(
    "activity.by_actions",
    "SELECT a FROM ActivityLog a WHERE a.action IN :action",
    || vec![("action", ["LOGIN", "LOGOUT"].into())],
    activity_by_actions,
);

static BY_TIMESTAMP: QueryDef = QueryDef::new(
    "activity.by_timestamp",
    "SELECT a FROM ActivityLog a WHERE a.timestamp = :timestamp",
    || vec![("timestamp", thirty_days_ago().into()), ("unused", 1i64.into())],
    activity_by_timestamp,
);

#[tokio::test]
async fn test_registry_scan_reports_violations() {
    let (_db, client) = setup_postgres().await;
    insert_activity_logs(&client, ACTIVITY_LOGS).await;
    analyze(&client).await.unwrap();

    let registry = QueryRegistry::new()
        .with(&BY_ACTION)
        .with(&BY_ACTIONS)
        .with(&BY_TIMESTAMP);
    let scanner = Scanner::new(&client);
    let report = scanner.scan_all(&registry).await.unwrap();
    println!("{report}");

    assert_eq!(report.len(), 3);
    assert!(!report.passed());

    let by_action = &report.outcomes[0];
    assert_eq!(
        by_action.verdict.sql,
        "select a1_0.id,a1_0.action,a1_0.timestamp,a1_0.person_id from activity_log a1_0 where a1_0.action = 'LOGIN'"
    );
    assert_eq!(
        by_action.execution.statement.template.as_deref(),
        Some("/* SELECT a FROM ActivityLog a WHERE a.action = :action */")
    );
    assert!(by_action.passed(), "{:?}", by_action.violations);

    let by_actions = &report.outcomes[1];
    assert_eq!(
        by_actions.verdict.sql,
        "select a1_0.id,a1_0.action from activity_log a1_0 where a1_0.action IN ('LOGIN', 'LOGOUT')"
    );
    assert!(!by_actions.verdict.has_full_scan);

    let by_timestamp = &report.outcomes[2];
    assert!(!by_timestamp.execution.parameters.contains_key("unused"));
    assert!(by_timestamp.violations.contains(&Violation::FullScan));

    let failed: Vec<_> = report.failures().map(|o| o.name).collect();
    assert_eq!(failed, vec!["activity.by_timestamp"]);
}

#[tokio::test]
async fn test_tapped_client_captures_and_forwards() {
    let (_db, client) = setup_postgres().await;
    let session = CaptureSession::new();
    let tapped = client.tapped(&session);
    let rows = tapped
        .query("/* count */ SELECT count(*) FROM person", &[])
        .await
        .unwrap();
    let count: i64 = rows[0].get(0);
    assert_eq!(count, 0);

    assert_eq!(session.templates(), vec!["/* count */"]);
    assert_eq!(session.issued(), vec!["SELECT count(*) FROM person"]);
}
