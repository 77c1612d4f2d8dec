mod common;

use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use vin_appraiser::core::errors::AppraisalError;
use vin_appraiser::core::models::AppraisalStatus;
use vin_appraiser::core::pipeline::run_appraisals;
use vin_appraiser::run_state::RunTracker;

#[tokio::test]
async fn test_timeout_is_skipped_and_run_continues() {
    let driver = FakeDriver::new()
        .script(VIN_A, Ok(portal_responses(10000.0, 1.35)))
        .script(VIN_C, Ok(portal_responses(9000.0, 1.35)));
    let stats = driver.stats.clone();
    let sink = Arc::new(MemorySink::default());
    let tracker = RunTracker::new();

    let status = run_appraisals(
        tracker.try_begin().unwrap(),
        Arc::new(driver),
        sink.clone(),
        vec![vehicle(VIN_A, 10000.0), vehicle(VIN_B, 8000.0), vehicle(VIN_C, 14000.0)],
        options(),
    )
    .await;

    assert!(!status.is_running);
    assert_eq!(status.total, 3);
    assert_eq!(status.processed, 3);
    assert_eq!(status.persisted, 2);
    assert_eq!(status.failed, 1);
    assert_eq!(sink.stored(), 2);

    let statuses: Vec<_> = status.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![AppraisalStatus::Profit, AppraisalStatus::Timeout, AppraisalStatus::Loss]
    );
    assert_eq!(status.results[0].profit, Some(3500.0));
    assert_eq!(status.results[2].profit, Some(12150.0 - 14000.0));
    assert!(status.last_error.unwrap().starts_with(VIN_B));

    assert_eq!(stats.opened.load(Ordering::SeqCst), 1);
    assert_eq!(stats.closed.load(Ordering::SeqCst), 1);
    assert_eq!(stats.logins.load(Ordering::SeqCst), 1);
    assert!(!tracker.is_running());
}

#[tokio::test]
async fn test_malformed_response_records_no_data() {
    let driver = FakeDriver::new().script(VIN_A, Ok(malformed_responses()));
    let sink = Arc::new(MemorySink::default());

    let status = run_appraisals(
        RunTracker::new().try_begin().unwrap(),
        Arc::new(driver),
        sink.clone(),
        vec![vehicle(VIN_A, 10000.0)],
        options(),
    )
    .await;

    assert_eq!(status.processed, 1);
    assert_eq!(status.persisted, 0);
    assert_eq!(status.results[0].status, AppraisalStatus::NoData);
    assert!(status.results[0].export_value.is_none());
    assert_eq!(sink.stored(), 0);
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_authentication_failure_aborts_and_closes_session() {
    let driver = FakeDriver::new()
        .script(VIN_A, Ok(portal_responses(10000.0, 1.35)))
        .fail_login(1);
    let stats = driver.stats.clone();
    let sink = Arc::new(MemorySink::default());

    let status = run_appraisals(
        RunTracker::new().try_begin().unwrap(),
        Arc::new(driver),
        sink.clone(),
        vec![vehicle(VIN_A, 10000.0), vehicle(VIN_B, 10000.0)],
        options(),
    )
    .await;

    assert!(!status.is_running);
    assert_eq!(status.total, 2);
    assert_eq!(status.processed, 0);
    assert!(status.last_error.unwrap().contains("Authentication failure"));
    assert!(stats.appraised.lock().unwrap().is_empty());
    assert_eq!(stats.closed.load(Ordering::SeqCst), 1);
    assert_eq!(sink.stored(), 0);
}

#[tokio::test]
async fn test_expired_session_logs_in_again() {
    let driver = FakeDriver::new()
        .script(VIN_A, Err(AppraisalError::SessionExpired))
        .script(VIN_A, Ok(portal_responses(10000.0, 1.35)));
    let stats = driver.stats.clone();
    let sink = Arc::new(MemorySink::default());

    let status = run_appraisals(
        RunTracker::new().try_begin().unwrap(),
        Arc::new(driver),
        sink.clone(),
        vec![vehicle(VIN_A, 10000.0)],
        options(),
    )
    .await;

    assert_eq!(stats.logins.load(Ordering::SeqCst), 2);
    assert_eq!(status.persisted, 1);
    assert_eq!(status.results[0].status, AppraisalStatus::Profit);
}

#[tokio::test]
async fn test_failed_relogin_is_fatal() {
    let driver = FakeDriver::new()
        .script(VIN_A, Err(AppraisalError::SessionExpired))
        .script(VIN_B, Ok(portal_responses(10000.0, 1.35)))
        .fail_login(2);
    let stats = driver.stats.clone();

    let status = run_appraisals(
        RunTracker::new().try_begin().unwrap(),
        Arc::new(driver),
        Arc::new(MemorySink::default()),
        vec![vehicle(VIN_A, 10000.0), vehicle(VIN_B, 10000.0)],
        options(),
    )
    .await;

    assert_eq!(status.processed, 0);
    assert!(status.last_error.unwrap().contains("Authentication failure"));
    assert_eq!(*stats.appraised.lock().unwrap(), vec![VIN_A.to_string()]);
    assert_eq!(stats.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_store_write_retried_once() {
    let driver = FakeDriver::new().script(VIN_A, Ok(portal_responses(10000.0, 1.35)));
    let sink = Arc::new(MemorySink::failing(VIN_A, 1));

    let status = run_appraisals(
        RunTracker::new().try_begin().unwrap(),
        Arc::new(driver),
        sink.clone(),
        vec![vehicle(VIN_A, 10000.0)],
        options(),
    )
    .await;

    assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(status.persisted, 1);
    assert_eq!(status.failed, 0);
    assert_eq!(status.results[0].status, AppraisalStatus::Profit);
}

#[tokio::test]
async fn test_store_failure_after_retry_is_recorded() {
    let driver = FakeDriver::new()
        .script(VIN_A, Ok(portal_responses(10000.0, 1.35)))
        .script(VIN_B, Ok(portal_responses(10000.0, 1.35)));
    let sink = Arc::new(MemorySink::failing(VIN_A, 2));

    let status = run_appraisals(
        RunTracker::new().try_begin().unwrap(),
        Arc::new(driver),
        sink.clone(),
        vec![vehicle(VIN_A, 10000.0), vehicle(VIN_B, 10000.0)],
        options(),
    )
    .await;

    assert_eq!(status.processed, 2);
    assert_eq!(status.persisted, 1);
    assert_eq!(status.failed, 1);

    let first = &status.results[0];
    assert_eq!(first.status, AppraisalStatus::StoreFailed);
    assert!(!first.persisted);
    assert_eq!(first.export_value, Some(13500.0));
    assert!(first.error.as_deref().unwrap().contains("Store write failure"));
}

#[tokio::test]
async fn test_unpriced_vehicle_keeps_export_value() {
    let driver = FakeDriver::new().script(VIN_A, Ok(portal_responses(10000.0, 1.35)));
    let sink = Arc::new(MemorySink::default());

    let status = run_appraisals(
        RunTracker::new().try_begin().unwrap(),
        Arc::new(driver),
        sink.clone(),
        vec![vehicle(VIN_A, 0.0)],
        options(),
    )
    .await;

    let outcome = &status.results[0];
    assert_eq!(outcome.status, AppraisalStatus::Unpriced);
    assert_eq!(outcome.profit, None);
    assert!(outcome.persisted);

    let stored = sink.rows.lock().unwrap().get(VIN_A).cloned().unwrap();
    assert_eq!(stored.export_value, 13500.0);
    assert!(!stored.is_profitable);
    assert_eq!(stored.trim, "EX-L");
}

#[tokio::test]
async fn test_duplicate_vins_processed_once() {
    let driver = FakeDriver::new().script(VIN_A, Ok(portal_responses(10000.0, 1.35)));
    let stats = driver.stats.clone();

    let status = run_appraisals(
        RunTracker::new().try_begin().unwrap(),
        Arc::new(driver),
        Arc::new(MemorySink::default()),
        vec![vehicle(VIN_A, 10000.0), vehicle(VIN_A, 5000.0)],
        options(),
    )
    .await;

    assert_eq!(status.total, 1);
    assert_eq!(status.processed, 1);
    assert_eq!(status.results[0].profit, Some(3500.0));
    assert_eq!(stats.appraised.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rerun_overwrites_instead_of_duplicating() {
    let sink = Arc::new(MemorySink::default());
    let tracker = RunTracker::new();

    for rate in [1.35, 1.40] {
        let driver = FakeDriver::new()
            .script(VIN_A, Ok(portal_responses(10000.0, rate)))
            .script(VIN_B, Ok(portal_responses(10000.0, rate)));
        run_appraisals(
            tracker.try_begin().unwrap(),
            Arc::new(driver),
            sink.clone(),
            vec![vehicle(VIN_A, 10000.0), vehicle(VIN_B, 10000.0)],
            options(),
        )
        .await;
    }

    assert_eq!(sink.stored(), 2);
    assert_eq!(sink.rows.lock().unwrap()[VIN_A].export_value, 14000.0);
}

#[tokio::test]
async fn test_browser_unavailable_aborts_run() {
    let driver = FakeDriver {
        fail_open: true,
        ..FakeDriver::default()
    };
    let stats = driver.stats.clone();
    let tracker = RunTracker::new();

    let status = run_appraisals(
        tracker.try_begin().unwrap(),
        Arc::new(driver),
        Arc::new(MemorySink::default()),
        vec![vehicle(VIN_A, 10000.0)],
        options(),
    )
    .await;

    assert!(!status.is_running);
    assert!(status.finished_at.is_some());
    assert_eq!(status.processed, 0);
    assert!(status.last_error.unwrap().contains("chromedriver not reachable"));
    assert_eq!(stats.closed.load(Ordering::SeqCst), 0);
    assert!(tracker.try_begin().is_ok());
}
