//! Telemetry pipeline integration tests against a file-backed SQLite store

use redrx::geo::GeoDirectory;
use redrx::models::{AccessEvent, DeviceClass, EnrichedAccessRecord, ShortLinkRecord};
use redrx::storage::{SqliteStorage, Storage};
use redrx::telemetry::{AccessPipeline, AuditPipeline, PipelineStats};
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

struct Db {
    _dir: TempDir,
    storage: Arc<dyn Storage>,
    pool: SqlitePool,
}

async fn db() -> Db {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("telemetry.db").display());

    let storage = SqliteStorage::new(&url, 2).await.unwrap();
    storage.init().await.unwrap();
    let pool = SqlitePoolOptions::new().connect(&url).await.unwrap();

    Db {
        _dir: dir,
        storage: Arc::new(storage),
        pool,
    }
}

fn access_event(link_id: i64, client_ip: &str) -> AccessEvent {
    AccessEvent {
        link_id,
        short_code: "ABC123".to_string(),
        timestamp: 1_700_000_000,
        client_ip: client_ip.to_string(),
        user_agent: "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)"
            .to_string(),
        referrer: "https://news.example.com/".to_string(),
    }
}

async fn wait_until(stats: impl Fn() -> PipelineStats, handled: u64) {
    for _ in 0..200 {
        let s = stats();
        if s.persisted + s.failed >= handled {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pipeline did not handle {handled} events");
}

#[tokio::test]
async fn test_full_access_queue_drops_excess_events() {
    let db = db().await;
    let access = Arc::new(AccessPipeline::access(
        1,
        Arc::new(GeoDirectory::disabled()),
        Arc::clone(&db.storage),
    ));

    assert!(access.submit(access_event(1, "203.0.113.9")));
    assert!(!access.submit(access_event(2, "203.0.113.10")));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = access.start(shutdown_rx);
    wait_until(|| access.stats(), 1).await;
    shutdown_tx.send(true).unwrap();
    consumer.await.unwrap();

    let rows: Vec<(i64, String, String, String)> = sqlx::query_as(
        "SELECT link_id, ip_address, device_type, referrer FROM access_events",
    )
    .fetch_all(&db.pool)
    .await
    .unwrap();

    assert_eq!(
        rows,
        vec![(
            1,
            "203.0.113.0".to_string(),
            "Bot".to_string(),
            "https://news.example.com/".to_string()
        )]
    );

    let stats = access.stats();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.persisted, 1);
}

#[tokio::test]
async fn test_ipv6_client_is_masked_with_label() {
    let db = db().await;
    let access = Arc::new(AccessPipeline::access(
        8,
        Arc::new(GeoDirectory::disabled()),
        Arc::clone(&db.storage),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = access.start(shutdown_rx);
    access.submit(access_event(7, "2001:db8::42"));
    wait_until(|| access.stats(), 1).await;
    shutdown_tx.send(true).unwrap();
    consumer.await.unwrap();

    let (ip, country): (String, String) =
        sqlx::query_as("SELECT ip_address, country FROM access_events WHERE link_id = 7")
            .fetch_one(&db.pool)
            .await
            .unwrap();

    assert_eq!(ip, "IPv6 (Masked)");
    assert_eq!(country, "Unknown");
}

#[tokio::test]
async fn test_audit_log_action_is_persisted() {
    let db = db().await;
    let stored = db
        .storage
        .insert_link(&ShortLinkRecord::new("audited", "https://example.com"))
        .await
        .unwrap();

    let audit = Arc::new(AuditPipeline::audit(4, Arc::clone(&db.storage)));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = audit.start(shutdown_rx);

    assert!(audit.log_action(
        Some(42),
        "DISABLE_LINK",
        &stored.short_code,
        &json!({ "reason": "abuse report" }),
        "198.51.100.4",
    ));
    wait_until(|| audit.stats(), 1).await;
    shutdown_tx.send(true).unwrap();
    consumer.await.unwrap();

    let (user_id, action, entity_id, details, ip): (Option<i64>, String, String, String, String) =
        sqlx::query_as(
            "SELECT user_id, action, entity_id, details, ip_address FROM audit_log",
        )
        .fetch_one(&db.pool)
        .await
        .unwrap();

    assert_eq!(user_id, Some(42));
    assert_eq!(action, "DISABLE_LINK");
    assert_eq!(entity_id, "audited");
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&details).unwrap(),
        json!({ "reason": "abuse report" })
    );
    assert_eq!(ip, "198.51.100.4");
}

#[tokio::test]
async fn test_audit_queue_resumes_after_restart() {
    let db = db().await;
    let audit = Arc::new(AuditPipeline::audit(4, Arc::clone(&db.storage)));

    // First consumer is stopped before anything is queued
    let (tx, rx) = watch::channel(false);
    let first = audit.start(rx);
    tx.send(true).unwrap();
    first.await.unwrap();

    audit.log_action(None, "CREATE_LINK", "later", &json!({}), "");
    assert_eq!(audit.queued(), 1);

    let (tx, rx) = watch::channel(false);
    let second = audit.start(rx);
    wait_until(|| audit.stats(), 1).await;
    tx.send(true).unwrap();
    second.await.unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_log")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_recent_access_is_newest_first_and_limited() {
    let db = db().await;

    let stored = |short_code: &str, timestamp: i64| EnrichedAccessRecord {
        link_id: 1,
        short_code: short_code.to_string(),
        timestamp,
        ip_address: "203.0.113.0".to_string(),
        country: "Unknown".to_string(),
        region: String::new(),
        city: String::new(),
        browser: "Firefox 121.0".to_string(),
        os: "Linux".to_string(),
        device_type: DeviceClass::Bot,
        user_agent: "Mozilla/5.0".to_string(),
        referrer: "Direct".to_string(),
    };

    for (code, ts) in [("ABC123", 100), ("ABC123", 300), ("other", 400), ("ABC123", 200)] {
        db.storage.insert_access(&stored(code, ts)).await.unwrap();
    }

    let events = db.storage.recent_access("ABC123", 2).await.unwrap();
    assert_eq!(events, vec![stored("ABC123", 300), stored("ABC123", 200)]);

    assert!(db.storage.recent_access("missing", 10).await.unwrap().is_empty());
}
