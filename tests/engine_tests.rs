
use std::collections::HashMap;
use std::time::Duration;

use jobflow::error::MasterError;
use jobflow::jobnet::Jobnet;
use jobflow::store::Status;

use test_harness::{
    exclusive_graph, linear_graph, parallel_graph, test_config, MockServant, Script,
};

#[tokio::test]
async fn test_single_job_normal_end_to_end() {
    let servant = MockServant::start(HashMap::from([("j1".to_string(), Script::normal())])).await;
    let graph = linear_graph("nightly", &["j1"], servant.port);
    let mut jobnet = Jobnet::new(graph, test_config("s1")).await.unwrap();

    jobnet.detect_flow_error().unwrap();
    jobnet.run().await.unwrap();

    let instance_id = jobnet.instance_id.unwrap();
    let network = jobnet.store().get_network(instance_id).await.unwrap().unwrap();
    assert_eq!(network.status, Status::Normal);
    assert!(!network.end_date.is_empty());
    assert!(network.detail.is_empty());

    let job = jobnet.store().get_job(instance_id, "j1").await.unwrap().unwrap();
    assert_eq!(job.status, Status::Normal);
    assert_eq!(job.rc, 0);
    assert_eq!(job.node, format!("127.0.0.1:{}", servant.port));
    assert!(!job.start_date.is_empty());
    assert!(!job.end_date.is_empty());
    assert!(job.start_date <= job.end_date);

    jobnet.terminate().await;
}

#[tokio::test]
async fn test_connection_lost_marks_job_abnormal() {
    let servant = MockServant::start(HashMap::from([("j1".to_string(), Script::Hangup)])).await;
    let graph = linear_graph("nightly", &["j1"], servant.port);
    let mut jobnet = Jobnet::new(graph, test_config("s2")).await.unwrap();

    let err = jobnet.run().await.unwrap_err();
    assert!(matches!(err, MasterError::JobAbnormal(_)));

    let instance_id = jobnet.instance_id.unwrap();
    let network = jobnet.store().get_network(instance_id).await.unwrap().unwrap();
    assert_eq!(network.status, Status::Abnormal);
    assert!(!network.detail.is_empty());

    let job = jobnet.store().get_job(instance_id, "j1").await.unwrap().unwrap();
    assert_eq!(job.status, Status::Abnormal);
    assert_eq!(job.rc, -1);
    assert_eq!(job.detail, "connection lost");

    jobnet.terminate().await;
}

#[tokio::test]
async fn test_malformed_frame_is_protocol_error() {
    let servant = MockServant::start(HashMap::from([("j1".to_string(), Script::Garbage)])).await;
    let graph = linear_graph("nightly", &["j1"], servant.port);
    let mut jobnet = Jobnet::new(graph, test_config("garbage")).await.unwrap();

    assert!(jobnet.run().await.is_err());

    let instance_id = jobnet.instance_id.unwrap();
    let job = jobnet.store().get_job(instance_id, "j1").await.unwrap().unwrap();
    assert_eq!(job.status, Status::Abnormal);
    assert_eq!(job.detail, "protocol error");

    jobnet.terminate().await;
}

#[tokio::test]
async fn test_parallel_fan_out_overlaps() {
    // Both jobs stall on heartbeats long enough that their executions must
    // overlap if they were dispatched concurrently.
    let stall = Script::slow(3, Duration::from_millis(100));
    let servant = MockServant::start(HashMap::from([
        ("j1".to_string(), stall.clone()),
        ("j2".to_string(), stall),
    ]))
    .await;
    let graph = parallel_graph("fanout", &["j1", "j2"], servant.port);
    let mut jobnet = Jobnet::new(graph, test_config("s3")).await.unwrap();

    jobnet.detect_flow_error().unwrap();
    jobnet.run().await.unwrap();

    let instance_id = jobnet.instance_id.unwrap();
    let network = jobnet.store().get_network(instance_id).await.unwrap().unwrap();
    assert_eq!(network.status, Status::Normal);

    let j1 = jobnet.store().get_job(instance_id, "j1").await.unwrap().unwrap();
    let j2 = jobnet.store().get_job(instance_id, "j2").await.unwrap().unwrap();
    assert_eq!(j1.status, Status::Normal);
    assert_eq!(j2.status, Status::Normal);
    // The timestamp format sorts lexicographically.
    assert!(j2.start_date < j1.end_date, "executions did not overlap");
    assert!(j1.start_date < j2.end_date, "executions did not overlap");

    jobnet.terminate().await;
}

#[tokio::test]
async fn test_exclusive_routing_skips_untaken_branch() {
    let servant = MockServant::start(HashMap::from([
        ("probe".to_string(), Script::normal()),
        ("j1".to_string(), Script::normal()),
        ("j2".to_string(), Script::normal()),
    ]))
    .await;
    let graph = exclusive_graph(
        "branchy",
        "probe",
        &[("j1", "rc==0"), ("j2", "rc!=0")],
        servant.port,
    );
    let mut jobnet = Jobnet::new(graph, test_config("s4")).await.unwrap();

    jobnet.detect_flow_error().unwrap();
    jobnet.run().await.unwrap();

    let instance_id = jobnet.instance_id.unwrap();
    let network = jobnet.store().get_network(instance_id).await.unwrap().unwrap();
    assert_eq!(network.status, Status::Normal);

    let j1 = jobnet.store().get_job(instance_id, "j1").await.unwrap().unwrap();
    assert_eq!(j1.status, Status::Normal);

    // The untaken branch leaves no trace: no row, no dispatch.
    assert!(jobnet.store().get_job(instance_id, "j2").await.unwrap().is_none());
    assert_eq!(servant.request_count("j2").await, 0);
    assert_eq!(servant.request_count("j1").await, 1);

    jobnet.terminate().await;
}

#[tokio::test]
async fn test_warn_status_rolls_up() {
    let servant = MockServant::start(HashMap::from([
        ("j1".to_string(), Script::normal()),
        ("j2".to_string(), Script::with_stat(2, 4)),
    ]))
    .await;
    let graph = linear_graph("warned", &["j1", "j2"], servant.port);
    let mut jobnet = Jobnet::new(graph, test_config("warn")).await.unwrap();

    // WARN still counts as a successful run.
    jobnet.run().await.unwrap();

    let instance_id = jobnet.instance_id.unwrap();
    let network = jobnet.store().get_network(instance_id).await.unwrap().unwrap();
    assert_eq!(network.status, Status::Warn);

    let j2 = jobnet.store().get_job(instance_id, "j2").await.unwrap().unwrap();
    assert_eq!(j2.status, Status::Warn);
    assert_eq!(j2.rc, 4);

    jobnet.terminate().await;
}

#[tokio::test]
async fn test_error_branch_recovers_abnormal_job() {
    let servant = MockServant::start(HashMap::from([
        ("probe".to_string(), Script::with_stat(9, 8)),
        ("happy".to_string(), Script::normal()),
        ("fix".to_string(), Script::normal()),
    ]))
    .await;
    let graph = exclusive_graph(
        "recovery",
        "probe",
        &[("happy", "rc==0"), ("fix", "rc!=0")],
        servant.port,
    );
    let mut jobnet = Jobnet::new(graph, test_config("recover")).await.unwrap();

    // The probe fails but the graph routes the failure into the fix branch,
    // so the instance still ends NORMAL.
    jobnet.run().await.unwrap();

    let instance_id = jobnet.instance_id.unwrap();
    let network = jobnet.store().get_network(instance_id).await.unwrap().unwrap();
    assert_eq!(network.status, Status::Normal);

    let probe = jobnet.store().get_job(instance_id, "probe").await.unwrap().unwrap();
    assert_eq!(probe.status, Status::Abnormal);
    let fix = jobnet.store().get_job(instance_id, "fix").await.unwrap().unwrap();
    assert_eq!(fix.status, Status::Normal);
    assert!(jobnet.store().get_job(instance_id, "happy").await.unwrap().is_none());

    jobnet.terminate().await;
}

#[tokio::test]
async fn test_abnormal_without_error_branch_drains_sibling() {
    // j1 fails fast while j2 is still streaming; the engine must record
    // j2's final result before finishing ABNORMAL.
    let servant = MockServant::start(HashMap::from([
        ("j1".to_string(), Script::with_stat(9, 1)),
        ("j2".to_string(), Script::slow(3, Duration::from_millis(100))),
    ]))
    .await;
    let graph = parallel_graph("halffail", &["j1", "j2"], servant.port);
    let mut jobnet = Jobnet::new(graph, test_config("drain")).await.unwrap();

    let err = jobnet.run().await.unwrap_err();
    assert!(matches!(err, MasterError::JobAbnormal(_)));

    let instance_id = jobnet.instance_id.unwrap();
    let network = jobnet.store().get_network(instance_id).await.unwrap().unwrap();
    assert_eq!(network.status, Status::Abnormal);
    assert!(network.detail.contains("j1"));

    let j1 = jobnet.store().get_job(instance_id, "j1").await.unwrap().unwrap();
    assert_eq!(j1.status, Status::Abnormal);
    let j2 = jobnet.store().get_job(instance_id, "j2").await.unwrap().unwrap();
    assert_eq!(j2.status, Status::Normal, "in-flight job must drain to completion");

    jobnet.terminate().await;
}

#[tokio::test]
async fn test_heartbeats_keep_slow_job_alive() {
    // heartbeat_span_sec is 1 in the test config; a silent 2.5s job would be
    // cut off, but one heartbeat every 500ms keeps the connection alive.
    let servant = MockServant::start(HashMap::from([(
        "j1".to_string(),
        Script::slow(5, Duration::from_millis(500)),
    )]))
    .await;
    let graph = linear_graph("slowpoke", &["j1"], servant.port);
    let mut jobnet = Jobnet::new(graph, test_config("liveness")).await.unwrap();

    jobnet.run().await.unwrap();

    let instance_id = jobnet.instance_id.unwrap();
    let job = jobnet.store().get_job(instance_id, "j1").await.unwrap().unwrap();
    assert_eq!(job.status, Status::Normal);
    assert!(job.update_date >= job.start_date);

    jobnet.terminate().await;
}

#[tokio::test]
async fn test_silent_servant_is_cut_off() {
    let servant = MockServant::start(HashMap::from([("j1".to_string(), Script::Silent)])).await;
    let graph = linear_graph("mute", &["j1"], servant.port);
    let mut jobnet = Jobnet::new(graph, test_config("silence")).await.unwrap();

    let started = std::time::Instant::now();
    assert!(jobnet.run().await.is_err());
    // Cut off after 2 × heartbeat_span (2s), well before any minute-scale hang.
    assert!(started.elapsed() < Duration::from_secs(10));

    let instance_id = jobnet.instance_id.unwrap();
    let job = jobnet.store().get_job(instance_id, "j1").await.unwrap().unwrap();
    assert_eq!(job.status, Status::Abnormal);
    assert_eq!(job.detail, "connection lost");

    jobnet.terminate().await;
}

#[tokio::test]
async fn test_per_job_timeout_tears_down() {
    let servant = MockServant::start(HashMap::from([(
        "j1".to_string(),
        // Heartbeats keep the connection alive far past the job timeout.
        Script::slow(20, Duration::from_millis(500)),
    )]))
    .await;
    let mut graph = jobflow::graph::Graph::new("capped");
    let start = graph.add_node(jobflow::graph::NodeKind::Start);
    let mut spec = test_harness::job_spec("j1", servant.port);
    spec.timeout_sec = Some(1);
    let job = graph.add_node(jobflow::graph::NodeKind::Job(Box::new(spec)));
    let end = graph.add_node(jobflow::graph::NodeKind::End);
    graph.connect(start, job);
    graph.connect(job, end);

    let mut jobnet = Jobnet::new(graph, test_config("timeout")).await.unwrap();

    assert!(jobnet.run().await.is_err());

    let instance_id = jobnet.instance_id.unwrap();
    let job = jobnet.store().get_job(instance_id, "j1").await.unwrap().unwrap();
    assert_eq!(job.status, Status::Abnormal);
    assert_eq!(job.detail, "timeout");

    jobnet.terminate().await;
}
