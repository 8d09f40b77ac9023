//! Bounded execution context for network exchanges.
//!
//! Every exchange runs on its own tokio task, never on the caller's. A fair
//! semaphore caps how many run at once and hands out permits in arrival
//! order. Background refreshes may ask for a random start delay so many
//! clients polling on the same schedule do not hit the server together.

use crate::coalescer::PendingExchange;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub max_concurrent_exchanges: usize,
    pub jitter_default_max: Duration,
    pub jitter_long_max: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_exchanges: 8,
            jitter_default_max: Duration::from_millis(5_000),
            jitter_long_max: Duration::from_millis(10_000),
        }
    }
}

/// Start delay requested for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchDelay {
    /// User-initiated work such as posting a purchase.
    #[default]
    None,
    /// Opportunistic refresh while the app is in the foreground.
    Default,
    /// Refresh the user will not notice being late.
    Long,
}

impl DispatchDelay {
    /// Upper bound of the random delay for this class.
    pub fn max_delay(self, config: &DispatchConfig) -> Duration {
        match self {
            DispatchDelay::None => Duration::ZERO,
            DispatchDelay::Default => config.jitter_default_max,
            DispatchDelay::Long => config.jitter_long_max,
        }
    }

    /// Draw a delay uniformly from `0..=max_delay`.
    pub fn sample(self, config: &DispatchConfig) -> Duration {
        let max_ms = u64::try_from(self.max_delay(config).as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

#[derive(Debug, Clone)]
pub struct OperationDispatcher {
    config: DispatchConfig,
    permits: Arc<Semaphore>,
}

impl OperationDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_exchanges.max(1)));
        Self { config, permits }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Exchanges that could start right now without waiting.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `work` on a new task after the requested delay, once a permit is
    /// free. Must be called from within a tokio runtime.
    ///
    /// The delay elapses before queueing for a permit, so a delayed exchange
    /// never holds a slot while sleeping.
    pub fn schedule<F>(&self, delay: DispatchDelay, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_delayed(delay, None, work)
    }

    fn spawn_delayed<F>(
        &self,
        delay: DispatchDelay,
        expedite: Option<Arc<Notify>>,
        work: F,
    ) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let wait = delay.sample(&self.config);
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            if !wait.is_zero() {
                debug!(delay_ms = wait.as_millis() as u64, ?delay, "delaying exchange start");
                match expedite {
                    Some(signal) => {
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = signal.notified() => debug!("start delay skipped"),
                        }
                    }
                    None => tokio::time::sleep(wait).await,
                }
            }

            let Ok(_permit) = permits.acquire_owned().await else {
                warn!("dispatcher closed; dropping exchange");
                return;
            };
            work.await;
        })
    }

    /// Run `work` for a coalesced exchange and deliver its result to every
    /// waiter. The task is attached to the exchange, so it is aborted if all
    /// waiters leave before it finishes. A joining waiter may cut the start
    /// delay short through [`Waiter::expedite`](crate::Waiter::expedite).
    pub fn dispatch<R, F, Fut>(&self, exchange: PendingExchange<R>, delay: DispatchDelay, work: F)
    where
        R: Clone + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let (handoff, handed) = oneshot::channel::<PendingExchange<R>>();
        let expedite = exchange.expedite_signal();
        let task = self.spawn_delayed(delay, expedite, async move {
            let Ok(exchange) = handed.await else {
                return;
            };
            let result = work().await;
            exchange.complete(result);
        });

        exchange.attach(task.abort_handle());
        // Only fails when the task was aborted because every waiter already left.
        let _ = handoff.send(exchange);
    }
}

impl Default for OperationDispatcher {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coalescer::{CallbackCoalescer, ExchangeAbandoned};
    use futures::future::join_all;
    use purchases_core::RequestSignature;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn short_jitter() -> DispatchConfig {
        DispatchConfig {
            max_concurrent_exchanges: 4,
            jitter_default_max: Duration::from_millis(50),
            jitter_long_max: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_delay_bounds() {
        let config = DispatchConfig::default();
        assert_eq!(DispatchDelay::None.max_delay(&config), Duration::ZERO);
        assert_eq!(DispatchDelay::Default.max_delay(&config), Duration::from_secs(5));
        assert_eq!(DispatchDelay::Long.max_delay(&config), Duration::from_secs(10));
    }

    #[test]
    fn test_samples_stay_in_range() {
        let config = short_jitter();
        assert_eq!(DispatchDelay::None.sample(&config), Duration::ZERO);
        for _ in 0..200 {
            assert!(DispatchDelay::Default.sample(&config) <= Duration::from_millis(50));
            assert!(DispatchDelay::Long.sample(&config) <= Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn test_scheduled_work_runs_to_completion() {
        let dispatcher = OperationDispatcher::default();
        let (tx, rx) = oneshot::channel();

        dispatcher
            .schedule(DispatchDelay::None, async move {
                let _ = tx.send(42);
            })
            .await
            .unwrap();

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jittered_start_is_bounded() {
        let dispatcher = OperationDispatcher::new(short_jitter());
        let started = tokio::time::Instant::now();

        dispatcher
            .schedule(DispatchDelay::Long, async {})
            .await
            .unwrap();

        assert!(started.elapsed() <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let dispatcher = OperationDispatcher::new(DispatchConfig {
            max_concurrent_exchanges: 2,
            ..DispatchConfig::default()
        });
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                dispatcher.schedule(DispatchDelay::None, async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for result in join_all(handles).await {
            result.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(dispatcher.available_permits(), 2);
    }

    #[test]
    fn test_zero_concurrency_still_makes_progress() {
        let dispatcher = OperationDispatcher::new(DispatchConfig {
            max_concurrent_exchanges: 0,
            ..DispatchConfig::default()
        });
        assert_eq!(dispatcher.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_completes_coalesced_exchange() {
        let dispatcher = OperationDispatcher::default();
        let coalescer = CallbackCoalescer::<u32>::new();
        let signature = RequestSignature::get("/products_entitlement_mapping");
        let runs = Arc::new(AtomicUsize::new(0));

        let (exchange, first) = coalescer.register(&signature).into_parts();
        let (none, second) = coalescer.register(&signature).into_parts();
        assert!(none.is_none());

        let counter = Arc::clone(&runs);
        dispatcher.dispatch(exchange.unwrap(), DispatchDelay::None, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            5
        });

        assert_eq!(first.wait().await, Ok(5));
        assert_eq!(second.wait().await, Ok(5));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!coalescer.is_in_flight(&signature));
    }

    #[tokio::test]
    async fn test_dispatch_aborted_when_every_waiter_leaves() {
        let dispatcher = OperationDispatcher::default();
        let coalescer = CallbackCoalescer::<u32>::new();
        let signature = RequestSignature::get("/subscribers/a");
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let finished = Arc::new(AtomicUsize::new(0));

        let (exchange, waiter) = coalescer.register(&signature).into_parts();
        let done = Arc::clone(&finished);
        dispatcher.dispatch(exchange.unwrap(), DispatchDelay::None, move || async move {
            let _ = started_tx.send(());
            tokio::time::sleep(Duration::from_secs(3600)).await;
            done.fetch_add(1, Ordering::SeqCst);
            1
        });

        started_rx.await.unwrap();
        drop(waiter);
        assert!(!coalescer.is_in_flight(&signature));
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        // The next caller starts a fresh exchange instead of joining the aborted one.
        let (next, next_waiter) = coalescer.register(&signature).into_parts();
        dispatcher.dispatch(next.unwrap(), DispatchDelay::None, || async { 2 });
        assert_eq!(next_waiter.wait().await, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_joiner_without_delay_skips_jitter() {
        let dispatcher = OperationDispatcher::new(DispatchConfig {
            jitter_long_max: Duration::from_secs(3600),
            ..DispatchConfig::default()
        });
        let coalescer = CallbackCoalescer::<u32>::new();
        let signature = RequestSignature::get("/subscribers/c");
        let started = tokio::time::Instant::now();

        let (exchange, background) = coalescer.register(&signature).into_parts();
        dispatcher.dispatch(exchange.unwrap(), DispatchDelay::Long, || async { 3 });

        let (none, urgent) = coalescer.register(&signature).into_parts();
        assert!(none.is_none());
        urgent.expedite();

        assert_eq!(urgent.wait().await, Ok(3));
        assert_eq!(background.wait().await, Ok(3));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_abandoned_when_work_panics() {
        let dispatcher = OperationDispatcher::default();
        let coalescer = CallbackCoalescer::<u32>::new();
        let signature = RequestSignature::get("/subscribers/b");

        let (exchange, waiter) = coalescer.register(&signature).into_parts();
        dispatcher.dispatch(exchange.unwrap(), DispatchDelay::None, || async {
            let value: Option<u32> = None;
            value.expect("exchange blew up")
        });

        assert_eq!(waiter.wait().await, Err(ExchangeAbandoned));
    }
}
