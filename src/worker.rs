//! Concurrency mode: a fixed pool of workers issuing requests back-to-back.
//!
//! Each worker loops until the test scope is canceled, pausing briefly between
//! requests and backing off longer after a failed one. Workers never close the
//! result channel; that happens once every worker has exited.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::channel::{ResultChannel, SendStatus};
use crate::client::RequestClient;

/// Pause between two requests from the same worker.
pub const IDLE_DELAY: Duration = Duration::from_millis(10);
/// Pause after a request that failed without a response.
pub const ERROR_BACKOFF: Duration = Duration::from_millis(100);
/// Result buffer size when the number of requests can't be known in advance.
pub const POOL_BUFFER_SIZE: usize = 10_000;

/// Summary of what the worker pool did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PoolReport {
    /// Requests issued by each worker, indexed by worker number.
    pub requests_per_worker: Vec<usize>,
}
impl PoolReport {
    pub fn requests(&self) -> usize {
        self.requests_per_worker.iter().sum()
    }
}

/// Start `workers` workers and wait for all of them to exit.
///
/// Workers run until `canceled` fires, which the orchestrator arranges at the
/// end of the run time. The caller closes the result channel after this returns.
pub async fn run_pool(
    client: RequestClient,
    results: Arc<ResultChannel>,
    workers: usize,
    canceled: &CancellationToken,
) -> PoolReport {
    info!("launching {} workers...", workers);

    let mut handles = Vec::with_capacity(workers);
    for index in 0..workers {
        handles.push(tokio::spawn(worker_main(
            index,
            client.clone(),
            Arc::clone(&results),
            canceled.clone(),
        )));
    }

    let mut report = PoolReport {
        requests_per_worker: Vec::with_capacity(workers),
    };
    for (index, joined) in join_all(handles).await.into_iter().enumerate() {
        match joined {
            Ok(requests) => report.requests_per_worker.push(requests),
            Err(e) => {
                warn!("worker {} failed: {}", index, e);
                report.requests_per_worker.push(0);
            }
        }
    }
    info!(
        "all {} workers exited after {} requests",
        workers,
        report.requests()
    );

    report
}

/// One worker's request loop. Returns the number of requests it issued.
async fn worker_main(
    index: usize,
    client: RequestClient,
    results: Arc<ResultChannel>,
    canceled: CancellationToken,
) -> usize {
    debug!("worker {} started", index);
    let mut requests = 0;

    loop {
        if canceled.is_cancelled() {
            break;
        }

        let outcome = client.fetch(&canceled).await;
        requests += 1;

        let delay = if outcome.error.is_some() {
            ERROR_BACKOFF
        } else {
            IDLE_DELAY
        };
        match results.send(outcome) {
            SendStatus::Delivered | SendStatus::Backpressure => (),
            // The test is over, nothing more will be recorded.
            SendStatus::Canceled | SendStatus::Closed => break,
        }

        tokio::select! {
            _ = canceled.cancelled() => break,
            _ = time::sleep(delay) => (),
        }
    }

    debug!("worker {} exiting after {} requests", index, requests);
    requests
}
