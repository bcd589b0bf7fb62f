use std::collections::BTreeMap;
use std::time::Duration;

use sieve_core::models::{FetchRequest, FetchResult, NewFetchRecord, RecordStatus, Strategy};
use sieve_core::traits::ResultStore;
use sieve_db::{Database, FetchRecordRepository};

use crate::integration::common::setup_test_db;

fn success(title: &str) -> FetchResult {
    let mut elements = BTreeMap::new();
    elements.insert("title".to_string(), serde_json::json!(title));
    elements.insert("links".to_string(), serde_json::Value::Null);
    FetchResult::success(elements, Strategy::Static, Duration::from_millis(42))
}

#[tokio::test]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn save_and_get_roundtrips_record() {
    let (pool, _container) = setup_test_db().await;
    let repo = FetchRecordRepository::new(pool);

    let request = FetchRequest::new("https://example.com").with_strategy(Strategy::Static);
    let record = NewFetchRecord::from_result("alice", &request, &success("Example"));

    let id = repo.save(&record).await.unwrap();
    assert!(!id.is_nil());

    let stored = repo.get(id).await.unwrap().expect("record should exist");
    assert_eq!(stored.owner, "alice");
    assert_eq!(stored.url, "https://example.com");
    assert_eq!(stored.strategy, Strategy::Static);
    assert_eq!(stored.status, RecordStatus::Success);
    assert_eq!(stored.elapsed_ms, 42);
    assert_eq!(stored.data_hash, record.data_hash);
    assert_eq!(stored.result.elements["title"], serde_json::json!("Example"));
    assert!(stored.result.elements["links"].is_null());
    assert_eq!(stored.elements, record.elements);
}

#[tokio::test]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn failed_fetch_is_stored_with_error() {
    let (pool, _container) = setup_test_db().await;
    let repo = FetchRecordRepository::new(pool);

    let request = FetchRequest::new("https://unreachable.invalid");
    let result = FetchResult::failure("Fetch error: DNS failure", Duration::from_millis(5));
    let id = repo
        .save(&NewFetchRecord::from_result("alice", &request, &result))
        .await
        .unwrap();

    let stored = repo.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Error);
    assert_eq!(stored.error_message.as_deref(), Some("Fetch error: DNS failure"));
    assert!(stored.result.elements.is_empty());
}

#[tokio::test]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn history_is_owner_scoped_newest_first_and_paged() {
    let (pool, _container) = setup_test_db().await;
    let repo = FetchRecordRepository::new(pool);

    for i in 0..5 {
        let request = FetchRequest::new(format!("https://example.com/{i}"));
        repo.save(&NewFetchRecord::from_result("alice", &request, &success("a")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let request = FetchRequest::new("https://example.com/bob");
    repo.save(&NewFetchRecord::from_result("bob", &request, &success("b")))
        .await
        .unwrap();

    let page = ResultStore::history(&repo, "alice", 2, 0).await.unwrap();
    let urls: Vec<_> = page.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, ["https://example.com/4", "https://example.com/3"]);

    let page = ResultStore::history(&repo, "alice", 10, 3).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[1].url, "https://example.com/0");

    assert!(repo.history("nobody", 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn get_unknown_returns_none() {
    let (pool, _container) = setup_test_db().await;
    let repo = FetchRecordRepository::new(pool);

    assert!(repo.get(uuid::Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn attach_to_migrated_pool_is_idempotent() {
    let (pool, _container) = setup_test_db().await;

    let db = Database::attach(pool).await.unwrap();
    let repo = db.fetch_records();
    let request = FetchRequest::new("https://example.com").with_strategy(Strategy::Static);
    repo.save(&NewFetchRecord::from_result("alice", &request, &success("Again")))
        .await
        .unwrap();
    assert_eq!(repo.history("alice", 10, 0).await.unwrap().len(), 1);
}
