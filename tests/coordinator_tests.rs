// tests/coordinator_tests.rs
//
// Coordinator state machine: registration, the two barriers and result
// aggregation, exercised with scripted workers over localhost TCP.

use std::time::{Duration as StdDuration, Instant};

use gosbench::config::{
    Buckets, Duration, Objects, S3Configuration, TestCaseConfiguration, Testconf,
};
use gosbench::coordinator::{self, aggregate_results};
use gosbench::distribution::Distribution;
use gosbench::protocol::{Connection, WorkerMessage, READY_FOR_WORK};
use gosbench::stats::BenchmarkResult;
use tokio::net::{TcpListener, TcpStream};

fn two_worker_plan() -> Testconf {
    Testconf {
        s3_config: vec![
            S3Configuration {
                endpoint: "https://s3-a.example.com".into(),
                ..S3Configuration::default()
            },
            S3Configuration {
                endpoint: "https://s3-b.example.com".into(),
                ..S3Configuration::default()
            },
        ],
        grafana_config: None,
        tests: vec![TestCaseConfiguration {
            name: "barrier".into(),
            objects: Objects {
                size_min: 1,
                size_max: 1,
                part_size: 0,
                size_distribution: Distribution::Constant,
                number_min: 1,
                number_max: 1,
                number_distribution: Distribution::Constant,
                unit: "B".into(),
            },
            buckets: Buckets {
                number_min: 1,
                number_max: 1,
                number_distribution: Distribution::Constant,
            },
            bucket_prefix: "bench-".into(),
            object_prefix: "obj".into(),
            runtime: Duration::default(),
            ops_deadline: 1,
            workers: 2,
            workers_share_buckets: false,
            parallel_clients: 1,
            clean_after: false,
            read_weight: 1,
            existing_read_weight: 0,
            write_weight: 0,
            list_weight: 0,
            delete_weight: 0,
            barrier_timeout: None,
        }],
    }
}

fn sample_result(operations: f64) -> BenchmarkResult {
    BenchmarkResult {
        test_name: "barrier".into(),
        operations,
        bytes: operations * 100.0,
        bandwidth: operations * 50.0,
        latency_avg: 10.0,
        duration: Duration::from_secs(1),
    }
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// One scripted worker serving exactly one test over a fresh connection.
async fn scripted_worker(address: String) -> (String, String, Instant) {
    let stream = TcpStream::connect(&address).await.unwrap();
    let mut connection = Connection::new(stream);
    connection.send(&READY_FOR_WORK).await.unwrap();

    let (worker_id, endpoint) = match connection.recv::<WorkerMessage>().await.unwrap() {
        WorkerMessage::Init { config } => {
            assert_eq!(config.test.name, "barrier");
            (config.worker_id.clone(), config.s3_config.endpoint.clone())
        }
        other => panic!("expected init, got {other:?}"),
    };

    connection.send(&WorkerMessage::PreparationsDone).await.unwrap();
    match connection.recv::<WorkerMessage>().await.unwrap() {
        WorkerMessage::StartWork => {}
        other => panic!("expected start work, got {other:?}"),
    }
    let released = Instant::now();

    connection
        .send(&WorkerMessage::WorkDone {
            bench_result: sample_result(1.0),
        })
        .await
        .unwrap();
    (worker_id, endpoint, released)
}

#[tokio::test]
async fn coordinator_runs_a_two_worker_test() {
    let port = free_port().await;
    let address = format!("127.0.0.1:{port}");
    let server = tokio::spawn(coordinator::run(two_worker_plan(), port));
    tokio::time::sleep(StdDuration::from_millis(200)).await;

    // Register sequentially so worker IDs are assigned deterministically.
    let first = tokio::spawn(scripted_worker(address.clone()));
    tokio::time::sleep(StdDuration::from_millis(200)).await;
    let second = tokio::spawn(scripted_worker(address.clone()));

    let barrier_wait = Instant::now();
    let (first_id, first_endpoint, first_release) = first.await.unwrap();
    let (second_id, second_endpoint, second_release) = second.await.unwrap();

    assert_eq!(first_id, "w0");
    assert_eq!(second_id, "w1");
    assert_eq!(first_endpoint, "https://s3-a.example.com");
    assert_eq!(second_endpoint, "https://s3-b.example.com");

    // The coordinator quiesces for 5 s between the preparation barrier and
    // the release, and releases every worker within the same instant.
    assert!(
        barrier_wait.elapsed() >= StdDuration::from_secs(4),
        "start barrier released too early"
    );
    let skew = if first_release > second_release {
        first_release - second_release
    } else {
        second_release - first_release
    };
    assert!(
        skew < StdDuration::from_millis(100),
        "start barrier releases diverged by {skew:?}"
    );

    // Once results are in, idle workers that re-register get told to stop.
    let stream = TcpStream::connect(&address).await.unwrap();
    let mut connection = Connection::new(stream);
    connection.send(&READY_FOR_WORK).await.unwrap();
    let shutdown = tokio::time::timeout(
        StdDuration::from_secs(20),
        connection.recv::<WorkerMessage>(),
    )
    .await
    .expect("coordinator should send shutdown to idle workers")
    .unwrap();
    assert!(matches!(shutdown, WorkerMessage::Shutdown));

    server.abort();
}

#[tokio::test]
async fn workers_with_a_bad_greeting_are_dropped() {
    let port = free_port().await;
    let address = format!("127.0.0.1:{port}");
    let server = tokio::spawn(coordinator::run(two_worker_plan(), port));
    tokio::time::sleep(StdDuration::from_millis(200)).await;

    let stream = TcpStream::connect(&address).await.unwrap();
    let mut connection = Connection::new(stream);
    connection.send(&"hello there").await.unwrap();

    // The coordinator closes the connection instead of treating it as ready.
    let closed = tokio::time::timeout(StdDuration::from_secs(5), connection.recv::<WorkerMessage>())
        .await
        .expect("connection should be closed promptly");
    assert!(closed.is_err());

    server.abort();
}

#[test]
fn aggregation_sums_rates_and_averages_latencies() {
    let results = vec![
        BenchmarkResult {
            test_name: "barrier".into(),
            operations: 100.0,
            bytes: 1000.0,
            bandwidth: 500.0,
            latency_avg: 10.0,
            duration: Duration::from_secs(2),
        },
        BenchmarkResult {
            test_name: "barrier".into(),
            operations: 300.0,
            bytes: 3000.0,
            bandwidth: 1500.0,
            latency_avg: 30.0,
            duration: Duration::from_secs(2),
        },
    ];
    let summary = aggregate_results(&results, StdDuration::from_secs(4));
    assert_eq!(summary.test_name, "barrier");
    assert_eq!(summary.operations, 400.0);
    assert_eq!(summary.bytes, 4000.0);
    assert_eq!(summary.bandwidth, 2000.0, "bandwidths add up, they are not averaged");
    assert_eq!(summary.latency_avg, 20.0);
    assert_eq!(summary.duration, Duration::from_secs(4));
}

#[test]
fn aggregation_of_a_single_result_is_identity_up_to_duration() {
    let result = sample_result(42.0);
    let summary = aggregate_results(std::slice::from_ref(&result), StdDuration::from_secs(3));
    assert_eq!(summary.operations, result.operations);
    assert_eq!(summary.bytes, result.bytes);
    assert_eq!(summary.bandwidth, result.bandwidth);
    assert_eq!(summary.latency_avg, result.latency_avg);
    assert_eq!(summary.duration, Duration::from_secs(3));
}
