
use jobflow::clock;
use jobflow::store::{JobResult, NetworkResult, ResultDb, Status};

use test_harness::temp_db_file;

async fn open_store(tag: &str) -> ResultDb {
    ResultDb::open(&temp_db_file(tag)).await.unwrap()
}

#[tokio::test]
async fn test_network_insert_assigns_monotonic_ids() {
    let db = open_store("net-ids").await;

    let mut first = NetworkResult::started("nightly", clock::now_string());
    db.insert_network(&mut first).await.unwrap();
    let mut second = NetworkResult::started("nightly", clock::now_string());
    db.insert_network(&mut second).await.unwrap();

    assert!(first.id > 0);
    assert!(second.id > first.id);
    assert_eq!(first.create_date, first.update_date);

    let loaded = db.get_network(first.id).await.unwrap().unwrap();
    assert_eq!(loaded.jobnetwork, "nightly");
    assert_eq!(loaded.status, Status::Running);
    assert!(loaded.end_date.is_empty());

    db.close().await;
}

#[tokio::test]
async fn test_network_update_preserves_create_date() {
    let db = open_store("net-update").await;

    let mut network = NetworkResult::started("nightly", clock::now_string());
    db.insert_network(&mut network).await.unwrap();
    let created = network.create_date.clone();

    network.status = Status::Warn;
    network.end_date = clock::now_string();
    db.update_network(&mut network).await.unwrap();

    let loaded = db.get_network(network.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, Status::Warn);
    assert_eq!(loaded.create_date, created);
    assert!(loaded.update_date >= loaded.create_date);
    assert!(!loaded.end_date.is_empty());

    db.close().await;
}

#[tokio::test]
async fn test_job_lifecycle_timestamps_are_monotone() {
    let db = open_store("job-life").await;

    let mut network = NetworkResult::started("nightly", clock::now_string());
    db.insert_network(&mut network).await.unwrap();

    let mut job = JobResult::started(
        network.id,
        "j1",
        "backup",
        "host1:2015".to_string(),
        clock::now_string(),
    );
    db.insert_job(&mut job).await.unwrap();
    assert_eq!(job.create_date, job.update_date);

    // Heartbeat path: only update_date moves.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    db.touch_job(network.id, "j1").await.unwrap();
    let touched = db.get_job(network.id, "j1").await.unwrap().unwrap();
    assert!(touched.update_date > job.create_date);
    assert_eq!(touched.status, Status::Running);
    assert_eq!(touched.start_date, job.start_date);
    assert!(touched.end_date.is_empty());

    // Finalization.
    job.status = Status::Normal;
    job.rc = 0;
    job.end_date = clock::now_string();
    db.update_job(&mut job).await.unwrap();

    let done = db.get_job(network.id, "j1").await.unwrap().unwrap();
    assert_eq!(done.status, Status::Normal);
    assert_eq!(done.create_date, job.create_date);
    assert!(done.create_date <= done.start_date);
    assert!(done.start_date <= done.end_date);
    assert!(done.update_date >= done.end_date);

    db.close().await;
}

#[tokio::test]
async fn test_status_encoding_round_trips() {
    let db = open_store("status-codes").await;

    let mut network = NetworkResult::started("nightly", clock::now_string());
    db.insert_network(&mut network).await.unwrap();

    for (job_id, status) in [
        ("n", Status::Normal),
        ("w", Status::Warn),
        ("r", Status::Running),
        ("a", Status::Abnormal),
    ] {
        let mut job = JobResult::started(
            network.id,
            job_id,
            job_id,
            "host1:2015".to_string(),
            clock::now_string(),
        );
        job.status = status;
        db.insert_job(&mut job).await.unwrap();
        let loaded = db.get_job(network.id, job_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, status);
    }

    db.close().await;
}

#[tokio::test]
async fn test_list_jobs_scoped_to_instance() {
    let db = open_store("list-jobs").await;

    let mut first = NetworkResult::started("nightly", clock::now_string());
    db.insert_network(&mut first).await.unwrap();
    let mut second = NetworkResult::started("nightly", clock::now_string());
    db.insert_network(&mut second).await.unwrap();

    for (instance, job_id) in [(first.id, "j1"), (first.id, "j2"), (second.id, "j1")] {
        let mut job = JobResult::started(
            instance,
            job_id,
            job_id,
            "host1:2015".to_string(),
            clock::now_string(),
        );
        db.insert_job(&mut job).await.unwrap();
    }

    let jobs = db.list_jobs(first.id).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.instance_id == first.id));

    let jobs = db.list_jobs(second.id).await.unwrap();
    assert_eq!(jobs.len(), 1);

    db.close().await;
}

#[tokio::test]
async fn test_missing_rows_read_as_none() {
    let db = open_store("missing").await;
    assert!(db.get_network(99).await.unwrap().is_none());
    assert!(db.get_job(99, "ghost").await.unwrap().is_none());
    assert!(db.list_jobs(99).await.unwrap().is_empty());
    db.close().await;
}
