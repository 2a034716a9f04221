// src/worker.rs
//
// The worker process: dials the coordinator, serves one test per connection
// and reconnects for the next. The executor drives a prepared workqueue with
// a pool of parallel clients until the runtime or ops deadline.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant as TokioInstant};
use tracing::{debug, info, warn};

use crate::config::{TestCaseConfiguration, WorkerConf};
use crate::protocol::{Connection, WorkerMessage, READY_FOR_WORK};
use crate::queue::{bucket_name, fill_workqueue, Workqueue};
use crate::s3::{connect_pair, ObjectBackend};
use crate::stats::{BenchmarkResult, TestStats};
use crate::workitem::WorkItem;

const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(1);
// Keeps the exporter up long enough for one final scrape after a test.
const SCRAPE_GRACE: std::time::Duration = std::time::Duration::from_secs(10);

/// Outer connection loop: dial, serve, reconnect. Only a `shutdown` message
/// from the coordinator ends the process.
pub async fn run(server_address: &str) -> Result<()> {
    loop {
        match TcpStream::connect(server_address).await {
            Ok(stream) => {
                let mut connection = Connection::new(stream);
                match serve(&mut connection).await {
                    Ok(()) => {
                        info!("test finished - waiting for a final scrape before reconnecting");
                        sleep(SCRAPE_GRACE).await;
                    }
                    Err(err) => {
                        warn!("server connection ended unusually - reconnecting: {err:#}");
                        sleep(RECONNECT_DELAY).await;
                    }
                }
            }
            Err(err) => {
                debug!("could not reach coordinator at {server_address}: {err}");
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

// State built during `init` and consumed by `start work`.
struct PreparedTest {
    conf: WorkerConf,
    queue: Workqueue,
    svc: Arc<dyn ObjectBackend>,
    housekeeping: Arc<dyn ObjectBackend>,
}

/// Serves a single registration: handshake, then one test to completion.
async fn serve(connection: &mut Connection<TcpStream>) -> Result<()> {
    connection.send(&READY_FOR_WORK).await?;

    let mut prepared: Option<PreparedTest> = None;
    loop {
        let message: WorkerMessage = connection.recv().await?;
        match message {
            WorkerMessage::Init { config } => {
                info!(worker = %config.worker_id, "got config from server - starting preparations now");
                let (svc, housekeeping) = connect_pair(&config.s3_config).await?;
                let queue = fill_workqueue(
                    &config.test,
                    housekeeping.as_ref(),
                    &config.worker_id,
                    config.test.workers_share_buckets,
                )
                .await?;
                for item in &queue.items {
                    if let Err(err) = item.prepare(housekeeping.as_ref()).await {
                        warn!("error during work preparation - ignoring: {err:#}");
                    }
                }
                info!("preparations finished - waiting on server to start work");
                connection.send(&WorkerMessage::PreparationsDone).await?;
                prepared = Some(PreparedTest {
                    conf: *config,
                    queue,
                    svc,
                    housekeeping,
                });
            }
            WorkerMessage::StartWork => {
                let Some(test) = prepared.take() else {
                    bail!("was instructed to start work - but the preparation step is incomplete");
                };
                info!("starting to work");
                let result = run_test(
                    &test.conf.test,
                    test.queue,
                    &test.conf.worker_id,
                    test.svc,
                    test.housekeeping,
                )
                .await?;
                connection
                    .send(&WorkerMessage::WorkDone {
                        bench_result: result,
                    })
                    .await?;
                return Ok(());
            }
            WorkerMessage::Shutdown => {
                info!("server told us to shut down - all work is done for today");
                std::process::exit(0);
            }
            other => warn!(?other, "unexpected message from server - ignoring"),
        }
    }
}

/// Runs one prepared workqueue to its deadline and returns the worker's
/// result for it.
pub async fn run_test(
    test: &TestCaseConfiguration,
    queue: Workqueue,
    worker_id: &str,
    svc: Arc<dyn ObjectBackend>,
    housekeeping: Arc<dyn ObjectBackend>,
) -> Result<BenchmarkResult> {
    let stats = Arc::new(TestStats::new(&test.name));
    stats.test_started();

    let parallel_clients = test.parallel_clients.max(1);
    let (work_tx, work_rx) = async_channel::bounded::<WorkItem>(queue.len().max(1));
    let (stop_tx, stop_rx) = watch::channel(false);
    // Kept alive here so clients never observe a dropped sender mid-test.
    let stop_tx = Arc::new(stop_tx);

    let mut clients = Vec::with_capacity(parallel_clients);
    for _ in 0..parallel_clients {
        let work_rx = work_rx.clone();
        let stop_rx = stop_rx.clone();
        let svc = svc.clone();
        let stats = stats.clone();
        clients.push(tokio::spawn(do_work(work_rx, stop_rx, svc, stats)));
    }
    info!("started {parallel_clients} parallel clients");

    let started = Instant::now();
    if !test.runtime.is_zero() {
        work_until_timeout(
            &queue,
            &work_tx,
            stop_tx.clone(),
            test.runtime.as_std(),
            housekeeping.as_ref(),
        )
        .await;
    } else {
        work_until_ops(
            &queue,
            &work_tx,
            test.ops_deadline,
            parallel_clients,
            housekeeping.as_ref(),
        )
        .await;
    }
    work_tx.close();
    for client in clients {
        let _ = client.await;
    }
    let elapsed = started.elapsed();
    info!("all clients finished");
    stats.test_ended();

    if test.clean_after {
        info!("housekeeping started");
        for item in &queue.items {
            if let Err(err) = item.clean(housekeeping.as_ref()).await {
                warn!("error during cleanup - ignoring: {err:#}");
            }
        }
        for bucket in 0..test.buckets.number_max {
            let name = bucket_name(
                &test.bucket_prefix,
                worker_id,
                bucket,
                test.workers_share_buckets,
            );
            if let Err(err) = housekeeping.delete_bucket(&name).await {
                warn!(bucket = %name, "error during bucket deleting - ignoring: {err:#}");
            }
        }
        info!("housekeeping finished");
    }

    Ok(stats.to_result(elapsed))
}

/// Streams the queue cyclically until the runtime elapses, then flips the
/// stop flag so clients return after their in-flight item.
async fn work_until_timeout(
    queue: &Workqueue,
    work_tx: &async_channel::Sender<WorkItem>,
    stop_tx: Arc<watch::Sender<bool>>,
    runtime: std::time::Duration,
    housekeeping: &dyn ObjectBackend,
) {
    let deadline = TokioInstant::now() + runtime;
    if queue.is_empty() {
        warn!("workqueue is empty - idling until the runtime elapses");
        sleep_until(deadline).await;
        let _ = stop_tx.send(true);
        return;
    }
    loop {
        for item in &queue.items {
            tokio::select! {
                biased;
                _ = sleep_until(deadline) => {
                    debug!("reached runtime end");
                    let _ = stop_tx.send(true);
                    return;
                }
                sent = work_tx.send(item.clone()) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
        refresh_delete_items(queue, housekeeping).await;
    }
}

/// Streams the queue cyclically until `max_ops` items were dispatched, then
/// hands every client a stopper.
async fn work_until_ops(
    queue: &Workqueue,
    work_tx: &async_channel::Sender<WorkItem>,
    max_ops: u64,
    parallel_clients: usize,
    housekeeping: &dyn ObjectBackend,
) {
    let mut current_ops = 0u64;
    loop {
        if queue.is_empty() {
            warn!("workqueue is empty - nothing to dispatch");
            break;
        }
        for item in &queue.items {
            if current_ops >= max_ops {
                debug!("reached ops deadline - waiting for clients to finish");
                send_stoppers(work_tx, parallel_clients).await;
                return;
            }
            current_ops += 1;
            if work_tx.send(item.clone()).await.is_err() {
                return;
            }
        }
        refresh_delete_items(queue, housekeeping).await;
    }
    send_stoppers(work_tx, parallel_clients).await;
}

async fn send_stoppers(work_tx: &async_channel::Sender<WorkItem>, parallel_clients: usize) {
    for _ in 0..parallel_clients {
        if work_tx.send(WorkItem::Stopper).await.is_err() {
            return;
        }
    }
}

// Deleted objects have to come back before the queue can be replayed.
async fn refresh_delete_items(queue: &Workqueue, housekeeping: &dyn ObjectBackend) {
    for item in &queue.items {
        if item.is_delete() {
            debug!("re-running work preparation for delete job");
            if let Err(err) = item.prepare(housekeeping).await {
                warn!("error during work preparation - ignoring: {err:#}");
            }
        }
    }
}

/// One parallel client: executes items from the channel until the stop flag
/// flips or a stopper arrives.
async fn do_work(
    work_rx: async_channel::Receiver<WorkItem>,
    mut stop_rx: watch::Receiver<bool>,
    svc: Arc<dyn ObjectBackend>,
    stats: Arc<TestStats>,
) {
    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                match changed {
                    Ok(()) if *stop_rx.borrow() => {
                        debug!("runtime over - stopping client");
                        return;
                    }
                    Ok(()) => continue,
                    Err(_) => return,
                }
            }
            received = work_rx.recv() => {
                let Ok(item) = received else { return };
                if item.is_stopper() {
                    debug!("found the end of the work queue - stopping");
                    return;
                }
                let Some(method) = item.method() else { continue };
                let begin = Instant::now();
                match item.execute(svc.as_ref()).await {
                    Ok(transfer) => {
                        stats.record_success(method, begin.elapsed(), transfer.uploaded, transfer.downloaded);
                    }
                    Err(err) => {
                        warn!("operation failed: {err:#}");
                        stats.record_failure(method, begin.elapsed());
                    }
                }
            }
        }
    }
}
