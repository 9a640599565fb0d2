//! Rate mode: dispatches requests at a fixed number per second.
//!
//! One request is launched per tick, each in its own task, regardless of how
//! long earlier requests take. The total is capped at `floor(rps * run_time)`
//! requests. Once that many have been launched the dispatcher waits for every
//! in-flight request and then ends the load test, which can happen before the
//! run time elapses.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::channel::{ResultChannel, SendStatus};
use crate::client::RequestClient;

/// Lifecycle of a [`RateDispatcher`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchState {
    Idle,
    /// Launching one request per tick.
    Running,
    /// No more requests are launched, waiting for in-flight ones.
    Draining,
    /// Every launched request has finished and the result channel is closed.
    Done,
}

/// Summary of what a dispatcher did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DispatchReport {
    /// Number of requests launched.
    pub launched: usize,
    /// Number of requests the run time allowed for.
    pub planned: usize,
    /// Whether the dispatcher stopped because it launched all planned requests.
    pub plan_reached: bool,
    /// Most requests observed in flight at once.
    pub max_in_flight: usize,
}

/// Total number of requests `rps` requests per second add up to over `run_time`.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use rightsizer::dispatcher::planned_requests;
///
/// assert_eq!(planned_requests(10, Duration::from_secs(2)), 20);
/// assert_eq!(planned_requests(3, Duration::from_millis(500)), 1);
/// ```
pub fn planned_requests(rps: usize, run_time: Duration) -> usize {
    (rps as f64 * run_time.as_secs_f64()).floor() as usize
}

/// Join every request task that already finished, without waiting.
///
/// A finished task keeps its slot in the set until joined, so this runs on
/// every tick to keep the set as large as the requests actually in flight.
fn reap_finished(in_flight: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(joined) = in_flight.try_join_next() {
        if let Err(e) = joined {
            warn!("request task failed: {}", e);
        }
        reaped += 1;
    }
    reaped
}

/// Launches requests on a fixed schedule until the plan is reached or the test
/// scope is canceled.
#[derive(Debug)]
pub struct RateDispatcher {
    client: RequestClient,
    results: Arc<ResultChannel>,
    rps: usize,
    planned: usize,
    state: DispatchState,
}
impl RateDispatcher {
    pub fn new(
        client: RequestClient,
        results: Arc<ResultChannel>,
        rps: usize,
        run_time: Duration,
    ) -> Self {
        RateDispatcher {
            client,
            results,
            rps,
            planned: planned_requests(rps, run_time),
            state: DispatchState::Idle,
        }
    }

    pub fn planned(&self) -> usize {
        self.planned
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    fn transition(&mut self, state: DispatchState) {
        debug!("rate dispatcher: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Run the dispatcher to completion.
    ///
    /// `canceled` is the test scope. It is canceled here once every planned
    /// request has completed, and fires from outside when the run time elapses
    /// or the load test is interrupted. The result channel is closed before
    /// returning, only after every launched request has finished.
    pub async fn run(&mut self, canceled: &CancellationToken) -> DispatchReport {
        let mut report = DispatchReport {
            planned: self.planned,
            ..Default::default()
        };
        let mut in_flight = JoinSet::new();

        self.transition(DispatchState::Running);

        if self.planned == 0 {
            info!(
                "{} requests per second over the run time rounds down to 0 requests",
                self.rps
            );
        } else {
            let period = Duration::from_secs_f64(1.0 / self.rps as f64);
            let mut ticker = time::interval_at(Instant::now() + period, period);
            // A late tick fires once, it doesn't cause a burst.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = canceled.cancelled() => {
                        debug!("rate dispatcher canceled after {} requests", report.launched);
                        break;
                    }
                    _ = ticker.tick() => {
                        let client = self.client.clone();
                        let results = Arc::clone(&self.results);
                        let scope = canceled.clone();
                        in_flight.spawn(async move {
                            let outcome = client.fetch(&scope).await;
                            if results.send(outcome) == SendStatus::Closed {
                                trace!("outcome arrived after the result channel closed");
                            }
                        });

                        report.launched += 1;
                        reap_finished(&mut in_flight);
                        report.max_in_flight = report.max_in_flight.max(in_flight.len());
                        if report.launched >= self.planned {
                            report.plan_reached = true;
                            info!("all {} planned requests launched", self.planned);
                            break;
                        }
                    }
                }
            }
        }

        self.transition(DispatchState::Draining);
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!("request task failed: {}", e);
            }
        }

        if report.plan_reached {
            // Everything planned has completed, there's no reason to wait out
            // the rest of the run time.
            canceled.cancel();
        }

        self.results.close();
        self.transition(DispatchState::Done);

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use url::Url;

    #[test]
    fn plan_sizes() {
        assert_eq!(planned_requests(50, Duration::from_secs(300)), 15_000);
        assert_eq!(planned_requests(1, Duration::from_millis(999)), 0);
        assert_eq!(planned_requests(4, Duration::from_millis(1_250)), 5);
        assert_eq!(planned_requests(1_000_000, Duration::from_secs(1)), 1_000_000);
    }

    fn client_for(server: &MockServer) -> RequestClient {
        let target = Url::parse(&server.url("/")).unwrap();
        RequestClient::new(target, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn launches_planned_requests_then_ends_the_test() {
        let server = MockServer::start_async().await;
        let index = server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200);
            })
            .await;

        let canceled = CancellationToken::new();
        let (results, receiver) = ResultChannel::bounded(10, canceled.clone());
        let mut dispatcher = RateDispatcher::new(
            client_for(&server),
            Arc::clone(&results),
            20,
            Duration::from_millis(500),
        );
        assert_eq!(dispatcher.planned(), 10);
        assert_eq!(dispatcher.state(), DispatchState::Idle);

        let report = dispatcher.run(&canceled).await;
        assert_eq!(report.launched, 10);
        assert!(report.plan_reached);
        // Ticks are 50ms apart and the mock answers in a few, so finished
        // requests don't accumulate.
        assert!(report.max_in_flight >= 1);
        assert!(report.max_in_flight < 10);
        assert_eq!(dispatcher.state(), DispatchState::Done);
        assert!(canceled.is_cancelled());
        assert!(results.is_closed());

        // Every launched request finished before the channel closed.
        assert_eq!(receiver.drain().count(), 10);
        index.assert_calls_async(10).await;
    }

    #[tokio::test]
    async fn finished_tasks_are_reaped() {
        let mut in_flight = JoinSet::new();
        for _ in 0..100 {
            in_flight.spawn(async {});
        }
        // One request that stays in flight.
        let (_release, wait) = tokio::sync::oneshot::channel::<()>();
        in_flight.spawn(async move {
            let _ = wait.await;
        });

        // Give the trivial tasks a chance to complete.
        while in_flight.len() > 1 {
            let reaped = reap_finished(&mut in_flight);
            if reaped == 0 {
                tokio::task::yield_now().await;
            }
        }
        assert_eq!(in_flight.len(), 1);
        assert_eq!(reap_finished(&mut in_flight), 0);

        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn zero_plan_fires_nothing() {
        let canceled = CancellationToken::new();
        let (results, receiver) = ResultChannel::bounded(1, canceled.clone());
        let target = Url::parse("http://127.0.0.1:9/").unwrap();
        let client = RequestClient::new(target, Duration::from_secs(1)).unwrap();
        let mut dispatcher =
            RateDispatcher::new(client, Arc::clone(&results), 1, Duration::from_millis(500));

        let report = dispatcher.run(&canceled).await;
        assert_eq!(report.launched, 0);
        assert!(!report.plan_reached);
        assert!(results.is_closed());
        assert!(receiver.recv_async().await.is_err());
    }

    #[tokio::test]
    async fn stops_when_canceled() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200);
            })
            .await;

        let canceled = CancellationToken::new();
        let (results, receiver) = ResultChannel::bounded(1_000, canceled.clone());
        // 100 requests per second for 10 seconds, canceled after about 200ms.
        let mut dispatcher = RateDispatcher::new(
            client_for(&server),
            Arc::clone(&results),
            100,
            Duration::from_secs(10),
        );
        let timer = canceled.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(200)).await;
            timer.cancel();
        });

        let report = dispatcher.run(&canceled).await;
        assert!(!report.plan_reached);
        assert!(report.launched > 0);
        assert!(report.launched < dispatcher.planned());
        assert!(results.is_closed());
        assert!(receiver.drain().count() <= report.launched);
    }
}
