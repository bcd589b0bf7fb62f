use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{NaiveTime, TimeZone, Utc};
use sieve_core::job::{ExecutionOutcome, Frequency, JobState, NewJobExecution, NewScheduledJob};
use sieve_core::models::{
    ElementKind, ElementSet, FetchRequest, FetchResult, NewFetchRecord, Strategy,
};
use sieve_core::traits::JobStore;
use sieve_db::{FetchRecordRepository, ScheduledJobRepository};

use crate::integration::common::setup_test_db;

fn nine() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap()
}

#[tokio::test]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn create_and_get_job() {
    let (pool, _container) = setup_test_db().await;
    let repo = ScheduledJobRepository::new(pool);
    let next_run = Utc.with_ymd_and_hms(2024, 6, 14, 9, 0, 0).unwrap();

    let new_job = NewScheduledJob::new("alice", "https://example.com", Frequency::Weekly, nine())
        .on_weekday(4)
        .with_strategy(Strategy::Dynamic)
        .with_elements(ElementSet::Kinds(vec![ElementKind::Title, ElementKind::Links]))
        .with_notify(true);

    let job = repo.create_job(&new_job, Some(next_run)).await.unwrap();
    assert_eq!(job.status, JobState::Active);
    assert_eq!(job.next_run, Some(next_run));
    assert!(job.last_run.is_none());

    let fetched = repo.get_job(job.id).await.unwrap().expect("job should exist");
    assert_eq!(fetched, job);
    assert_eq!(fetched.day_of_week, Some(4));
    assert_eq!(fetched.strategy, Strategy::Dynamic);
    assert!(fetched.notify);
}

#[tokio::test]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn custom_selectors_survive_storage() {
    let (pool, _container) = setup_test_db().await;
    let repo = ScheduledJobRepository::new(pool);

    let mut selectors = BTreeMap::new();
    selectors.insert("price".to_string(), "span.price".to_string());
    let new_job = NewScheduledJob::new("alice", "https://shop.test", Frequency::Monthly, nine())
        .on_day_of_month(31)
        .with_elements(ElementSet::Custom(selectors.clone()));

    let job = repo.create_job(&new_job, None).await.unwrap();
    assert_eq!(job.elements, ElementSet::Custom(selectors));
    assert_eq!(job.day_of_month, Some(31));
}

#[tokio::test]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn invalid_rule_is_rejected_before_insert() {
    let (pool, _container) = setup_test_db().await;
    let repo = ScheduledJobRepository::new(pool);

    let bad = NewScheduledJob::new("alice", "https://example.com", Frequency::Weekly, nine())
        .on_weekday(9);
    assert!(repo.create_job(&bad, None).await.is_err());
    assert!(repo.list_by_owner("alice").await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn status_changes_drive_active_listing() {
    let (pool, _container) = setup_test_db().await;
    let repo = ScheduledJobRepository::new(pool);

    let a = repo
        .create_job(
            &NewScheduledJob::new("alice", "https://a.test", Frequency::Daily, nine()),
            None,
        )
        .await
        .unwrap();
    let b = repo
        .create_job(
            &NewScheduledJob::new("bob", "https://b.test", Frequency::Hourly, nine()),
            None,
        )
        .await
        .unwrap();

    assert_eq!(repo.list_active().await.unwrap().len(), 2);

    repo.set_status(a.id, JobState::Paused).await.unwrap();
    let active = repo.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, b.id);

    let owned = repo.list_by_owner("alice").await.unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].status, JobState::Paused);

    assert!(repo.set_status(uuid::Uuid::new_v4(), JobState::Active).await.is_err());
}

#[tokio::test]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn mark_run_and_next_run_updates() {
    let (pool, _container) = setup_test_db().await;
    let repo = ScheduledJobRepository::new(pool);

    let job = repo
        .create_job(
            &NewScheduledJob::new("alice", "https://a.test", Frequency::Daily, nine()),
            None,
        )
        .await
        .unwrap();

    let ran = Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 3).unwrap();
    let next = Utc.with_ymd_and_hms(2024, 6, 11, 9, 0, 0).unwrap();
    repo.mark_run(job.id, ran, Some(next)).await.unwrap();

    let stored = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.last_run, Some(ran));
    assert_eq!(stored.next_run, Some(next));

    repo.update_next_run(job.id, None).await.unwrap();
    assert!(repo.get_job(job.id).await.unwrap().unwrap().next_run.is_none());
}

#[tokio::test]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn executions_are_listed_newest_first() {
    let (pool, _container) = setup_test_db().await;
    let jobs = ScheduledJobRepository::new(pool.clone());
    let records = FetchRecordRepository::new(pool);

    let job = jobs
        .create_job(
            &NewScheduledJob::new("alice", "https://a.test", Frequency::Hourly, nine()),
            None,
        )
        .await
        .unwrap();

    let request = FetchRequest::new("https://a.test");
    let result = FetchResult::success(BTreeMap::new(), Strategy::Static, Duration::ZERO);
    let record_id = records
        .save(&NewFetchRecord::from_result("alice", &request, &result))
        .await
        .unwrap();

    let first = Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2024, 6, 10, 10, 0, 0).unwrap();
    jobs.record_execution(&NewJobExecution::success(job.id, first, record_id))
        .await
        .unwrap();
    let failed = jobs
        .record_execution(&NewJobExecution::failed(job.id, second, "Fetch error: HTTP 404"))
        .await
        .unwrap();
    assert_eq!(failed.outcome, ExecutionOutcome::Failed);

    let history = jobs.list_executions(job.id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].executed_at, second);
    assert_eq!(history[0].error_message.as_deref(), Some("Fetch error: HTTP 404"));
    assert_eq!(history[1].result_id, Some(record_id));

    assert_eq!(jobs.list_executions(job.id, 1).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn delete_cascades_executions() {
    let (pool, _container) = setup_test_db().await;
    let repo = ScheduledJobRepository::new(pool);

    let job = repo
        .create_job(
            &NewScheduledJob::new("alice", "https://a.test", Frequency::Daily, nine()),
            None,
        )
        .await
        .unwrap();
    repo.record_execution(&NewJobExecution::failed(job.id, Utc::now(), "boom"))
        .await
        .unwrap();

    assert!(repo.delete_job(job.id).await.unwrap());
    assert!(!repo.delete_job(job.id).await.unwrap());
    assert!(repo.get_job(job.id).await.unwrap().is_none());
    assert!(repo.list_executions(job.id, 10).await.unwrap().is_empty());
}
