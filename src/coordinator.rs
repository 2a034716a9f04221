// src/coordinator.rs
//
// The coordinator: accepts worker registrations, walks the test plan one
// test at a time, synchronizes the preparation and start barriers and
// aggregates the per-worker results.

use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{Duration, TestCaseConfiguration, Testconf, WorkerConf};
use crate::protocol::{Connection, WorkerMessage, READY_FOR_WORK};
use crate::stats::BenchmarkResult;

// Lets the backend quiesce between preparations and the start barrier.
const QUIESCE_DELAY: StdDuration = StdDuration::from_secs(5);
// Default slack on top of the runtime before a barrier gives up.
const BARRIER_GRACE: StdDuration = StdDuration::from_secs(30);
// Finished workers linger for a final scrape before they reconnect, so keep
// draining late registrations for a while when sending the final shutdown.
const SHUTDOWN_LINGER: StdDuration = StdDuration::from_secs(15);

/// Listens for workers and runs every test in the plan in order.
pub async fn run(config: Testconf, port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("could not open port {port}"))?;
    info!("ready to accept connections on port {port}");

    let (ready_tx, ready_rx) = mpsc::unbounded_channel();
    tokio::spawn(accept_workers(listener, ready_tx));
    schedule_tests(config, ready_rx).await
}

// Accept loop: authenticates each connection with the handshake string and
// queues it as a ready worker. Anything else is dropped.
async fn accept_workers(
    listener: TcpListener,
    ready_tx: mpsc::UnboundedSender<Connection<TcpStream>>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, address)) => {
                debug!(%address, "connected to us");
                let ready_tx = ready_tx.clone();
                tokio::spawn(async move {
                    let mut connection = Connection::new(stream);
                    match connection.recv::<String>().await {
                        Ok(greeting) if greeting == READY_FOR_WORK => {
                            debug!(%address, "we have a new worker");
                            let _ = ready_tx.send(connection);
                        }
                        Ok(greeting) => {
                            warn!(%address, message = %greeting, "could not understand greeting - closing connection");
                        }
                        Err(err) => {
                            warn!(%address, "could not decode message - closing connection: {err:#}");
                        }
                    }
                });
            }
            Err(err) => {
                error!("issue when waiting for connection of clients: {err}");
                return;
            }
        }
    }
}

async fn schedule_tests(
    config: Testconf,
    mut ready_rx: mpsc::UnboundedReceiver<Connection<TcpStream>>,
) -> Result<()> {
    if let Some(grafana) = &config.grafana_config {
        info!(endpoint = %grafana.endpoint, "Grafana annotations configured");
    }
    for test in &config.tests {
        run_test_case(test, &config, &mut ready_rx).await?;
    }

    info!("all tests finished - sending shutdown to remaining workers");
    let deadline = Instant::now() + SHUTDOWN_LINGER;
    while let Ok(Some(mut connection)) = timeout_at(deadline, ready_rx.recv()).await {
        let _ = connection.send(&WorkerMessage::Shutdown).await;
    }
    Ok(())
}

async fn run_test_case(
    test: &TestCaseConfiguration,
    config: &Testconf,
    ready_rx: &mut mpsc::UnboundedReceiver<Connection<TcpStream>>,
) -> Result<()> {
    let workers = test.workers;
    info!(test = %test.name, workers, "waiting for workers to register");

    let (prepared_tx, mut prepared_rx) = mpsc::channel::<String>(workers.max(1));
    let (result_tx, mut result_rx) = mpsc::channel::<BenchmarkResult>(workers.max(1));
    let (start_tx, _) = broadcast::channel::<()>(workers.max(1));

    for index in 0..workers {
        let connection = ready_rx
            .recv()
            .await
            .context("worker acceptor stopped unexpectedly")?;
        let worker_conf = WorkerConf {
            s3_config: config.s3_config[index % config.s3_config.len()].clone(),
            test: test.clone(),
            worker_id: format!("w{index}"),
        };
        let prepared_tx = prepared_tx.clone();
        let result_tx = result_tx.clone();
        let start_rx = start_tx.subscribe();
        tokio::spawn(async move {
            let worker_id = worker_conf.worker_id.clone();
            if let Err(err) = drive_worker(connection, worker_conf, prepared_tx, start_rx, result_tx).await
            {
                error!(worker = %worker_id, "worker responded unusually - dropping: {err:#}");
            }
        });
    }
    drop(prepared_tx);
    drop(result_tx);

    let barrier_timeout = test
        .barrier_timeout
        .map(|timeout| timeout.as_std())
        .unwrap_or(test.runtime.as_std() + BARRIER_GRACE);

    // Preparation barrier: count to N or give up after the timeout.
    let deadline = Instant::now() + barrier_timeout;
    let mut prepared = 0usize;
    while prepared < workers {
        match timeout_at(deadline, prepared_rx.recv()).await {
            Ok(Some(worker_id)) => {
                prepared += 1;
                debug!(worker = %worker_id, "{prepared}/{workers} workers prepared");
            }
            Ok(None) => break,
            Err(_) => {
                error!(
                    test = %test.name,
                    "preparation barrier timed out after {barrier_timeout:?} with {prepared}/{workers} \
                     workers ready - continuing with the workers that responded"
                );
                break;
            }
        }
    }
    if prepared == 0 {
        error!(test = %test.name, "no workers finished preparations - skipping test");
        return Ok(());
    }

    sleep(QUIESCE_DELAY).await;
    let start_time = SystemTime::now();
    let _ = start_tx.send(());
    info!(test = %test.name, "released {prepared} workers to start work");

    // Result barrier: the runtime itself plus the barrier slack.
    let deadline = Instant::now() + test.runtime.as_std() + barrier_timeout;
    let mut results = Vec::with_capacity(prepared);
    while results.len() < prepared {
        match timeout_at(deadline, result_rx.recv()).await {
            Ok(Some(result)) => results.push(result),
            Ok(None) => break,
            Err(_) => {
                error!(
                    test = %test.name,
                    "result barrier timed out with {}/{prepared} results - aggregating what arrived",
                    results.len()
                );
                break;
            }
        }
    }
    let stop_time = SystemTime::now();

    if results.is_empty() {
        error!(test = %test.name, "no results received - nothing to aggregate");
        return Ok(());
    }
    let received = results.len();
    let duration = stop_time.duration_since(start_time).unwrap_or_default();
    let summary = aggregate_results(&results, duration);
    info!(
        test = %test.name,
        "summary: {:.0} operations, {:.0} bytes, {:.2} B/s bandwidth, {:.2} ms average latency, {} duration",
        summary.operations,
        summary.bytes,
        summary.bandwidth,
        summary.latency_avg,
        summary.duration
    );
    info!(
        "to see these results in Grafana, add this suffix to your dashboard URL: ?from={}&to={}",
        epoch_ms(start_time),
        epoch_ms(stop_time)
    );
    if received < workers {
        warn!(
            test = %test.name,
            "summary is partial: {received}/{workers} recruited workers reported results"
        );
    }
    Ok(())
}

// Drives one worker through one test: init, preparation report, barrier
// release, result collection. Any protocol error drops just this worker.
async fn drive_worker(
    mut connection: Connection<TcpStream>,
    worker_conf: WorkerConf,
    prepared_tx: mpsc::Sender<String>,
    mut start_rx: broadcast::Receiver<()>,
    result_tx: mpsc::Sender<BenchmarkResult>,
) -> Result<()> {
    let worker_id = worker_conf.worker_id.clone();
    connection
        .send(&WorkerMessage::Init {
            config: Box::new(worker_conf),
        })
        .await?;

    loop {
        match connection.recv::<WorkerMessage>().await? {
            WorkerMessage::PreparationsDone => break,
            other => {
                warn!(worker = %worker_id, ?other, "unexpected message while waiting for preparations")
            }
        }
    }
    let _ = prepared_tx.send(worker_id.clone()).await;

    start_rx
        .recv()
        .await
        .context("test scheduler went away before releasing the start barrier")?;
    connection.send(&WorkerMessage::StartWork).await?;

    loop {
        match connection.recv::<WorkerMessage>().await? {
            WorkerMessage::WorkDone { bench_result } => {
                let _ = result_tx.send(bench_result).await;
                return Ok(());
            }
            other => warn!(worker = %worker_id, ?other, "unexpected message while waiting for results"),
        }
    }
}

/// Folds the per-worker results of one test into the fleet summary:
/// operations, bytes and bandwidths add up, latencies average. Expects at
/// least one result.
pub fn aggregate_results(results: &[BenchmarkResult], duration: StdDuration) -> BenchmarkResult {
    let operations = results.iter().map(|result| result.operations).sum();
    let bytes = results.iter().map(|result| result.bytes).sum();
    let bandwidth = results.iter().map(|result| result.bandwidth).sum();
    let latency_avg = results
        .iter()
        .map(|result| result.latency_avg)
        .sum::<f64>()
        / results.len() as f64;
    BenchmarkResult {
        test_name: results[0].test_name.clone(),
        operations,
        bytes,
        bandwidth,
        latency_avg,
        duration: Duration(duration),
    }
}

fn epoch_ms(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}
