//! Fan-out of one exchange result to every caller that asked for it.
//!
//! `register` is an atomic check-and-insert on the signature map. The first
//! registrant gets a [`PendingExchange`] it must complete; everyone gets a
//! [`Waiter`]. Completion removes the pending operation under the lock and
//! then delivers outside it, in registration order, so a registration
//! either joins the running operation or starts the next one. None are lost.
//!
//! Cancellation is per listener: dropping a waiter only detaches it, unless
//! it was the last one, in which case the running exchange is aborted.

use parking_lot::Mutex;
use purchases_core::RequestSignature;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    FirstRequest,
    AddedToExistingRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("coalesced exchange was dropped before producing a result")]
pub struct ExchangeAbandoned;

type Shared<R> = Arc<Mutex<Registry<R>>>;

struct Registry<R> {
    next_generation: u64,
    pending: HashMap<RequestSignature, PendingOperation<R>>,
}

struct PendingOperation<R> {
    /// Distinguishes successive operations for the same signature.
    generation: u64,
    next_listener: u64,
    listeners: Vec<(u64, oneshot::Sender<R>)>,
    running: Option<AbortHandle>,
    /// Signalled when a caller that cannot wait joins a delayed start.
    expedite: Arc<Notify>,
}

impl<R> PendingOperation<R> {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            next_listener: 0,
            listeners: Vec::new(),
            running: None,
            expedite: Arc::new(Notify::new()),
        }
    }

    fn add_listener(&mut self) -> (u64, oneshot::Receiver<R>) {
        let (sender, receiver) = oneshot::channel();
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, sender));
        (id, receiver)
    }
}

/// Thread-safe registry of in-flight operations, shared by every caller.
pub struct CallbackCoalescer<R> {
    registry: Shared<R>,
}

impl<R> Clone for CallbackCoalescer<R> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<R: Clone> Default for CallbackCoalescer<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Clone> CallbackCoalescer<R> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_generation: 0,
                pending: HashMap::new(),
            })),
        }
    }

    /// Join the in-flight operation for `signature`, or start a new one.
    pub fn register(&self, signature: &RequestSignature) -> Registration<R> {
        let mut guard = self.registry.lock();
        let registry = &mut *guard;

        if let Some(operation) = registry.pending.get_mut(signature) {
            let generation = operation.generation;
            let (id, receiver) = operation.add_listener();
            let waiters = operation.listeners.len();
            drop(guard);

            debug!(%signature, waiters, "joined in-flight exchange");
            return Registration::AddedToExistingRequest {
                waiter: self.waiter(signature, generation, id, receiver),
            };
        }

        let generation = registry.next_generation;
        registry.next_generation += 1;
        let mut operation = PendingOperation::new(generation);
        let (id, receiver) = operation.add_listener();
        registry.pending.insert(signature.clone(), operation);
        drop(guard);

        debug!(%signature, generation, "starting new exchange");
        Registration::FirstRequest {
            exchange: PendingExchange {
                signature: signature.clone(),
                generation,
                registry: Arc::clone(&self.registry),
                settled: false,
            },
            waiter: self.waiter(signature, generation, id, receiver),
        }
    }

    pub fn is_in_flight(&self, signature: &RequestSignature) -> bool {
        self.registry.lock().pending.contains_key(signature)
    }

    /// Number of callers currently waiting on `signature`.
    pub fn waiter_count(&self, signature: &RequestSignature) -> usize {
        self.registry
            .lock()
            .pending
            .get(signature)
            .map_or(0, |operation| operation.listeners.len())
    }

    pub fn in_flight_count(&self) -> usize {
        self.registry.lock().pending.len()
    }

    fn waiter(
        &self,
        signature: &RequestSignature,
        generation: u64,
        id: u64,
        receiver: oneshot::Receiver<R>,
    ) -> Waiter<R> {
        Waiter {
            signature: signature.clone(),
            generation,
            id,
            receiver,
            registry: Arc::clone(&self.registry),
            settled: false,
        }
    }
}

/// Outcome of [`CallbackCoalescer::register`].
#[must_use = "a registration must be awaited, and a first request must also be dispatched"]
pub enum Registration<R> {
    /// No operation was in flight. The caller owns the exchange and must
    /// run it; dropping the [`PendingExchange`] abandons every waiter.
    FirstRequest {
        exchange: PendingExchange<R>,
        waiter: Waiter<R>,
    },
    /// Joined an operation someone else is running.
    AddedToExistingRequest { waiter: Waiter<R> },
}

impl<R> Registration<R> {
    pub fn status(&self) -> CacheStatus {
        match self {
            Registration::FirstRequest { .. } => CacheStatus::FirstRequest,
            Registration::AddedToExistingRequest { .. } => CacheStatus::AddedToExistingRequest,
        }
    }

    pub fn into_parts(self) -> (Option<PendingExchange<R>>, Waiter<R>) {
        match self {
            Registration::FirstRequest { exchange, waiter } => (Some(exchange), waiter),
            Registration::AddedToExistingRequest { waiter } => (None, waiter),
        }
    }
}

/// The obligation to run one exchange and report its result.
#[must_use = "dropping a PendingExchange without completing it abandons every waiter"]
pub struct PendingExchange<R> {
    signature: RequestSignature,
    generation: u64,
    registry: Shared<R>,
    settled: bool,
}

impl<R> PendingExchange<R> {
    pub fn signature(&self) -> &RequestSignature {
        &self.signature
    }

    /// Record the task running this exchange so the last departing waiter
    /// can abort it. Aborts immediately if every waiter is already gone.
    pub fn attach(&self, handle: AbortHandle) {
        let unattached = {
            let mut guard = self.registry.lock();
            match guard.pending.get_mut(&self.signature) {
                Some(operation) if operation.generation == self.generation => {
                    operation.running = Some(handle);
                    None
                }
                _ => Some(handle),
            }
        };

        if let Some(handle) = unattached {
            debug!(signature = %self.signature, "no waiters left; aborting exchange before it starts");
            handle.abort();
        }
    }

    /// Signal that fires when a joining caller asks for the exchange to
    /// start without its remaining delay.
    pub fn expedite_signal(&self) -> Option<Arc<Notify>> {
        let guard = self.registry.lock();
        guard
            .pending
            .get(&self.signature)
            .filter(|operation| operation.generation == self.generation)
            .map(|operation| Arc::clone(&operation.expedite))
    }

    fn take_operation(&self) -> Option<PendingOperation<R>> {
        let mut guard = self.registry.lock();
        let current = guard
            .pending
            .get(&self.signature)
            .is_some_and(|operation| operation.generation == self.generation);
        if current {
            guard.pending.remove(&self.signature)
        } else {
            None
        }
    }
}

impl<R: Clone> PendingExchange<R> {
    /// Deliver `result` to every waiter in registration order and clear the
    /// operation. Returns how many waiters were still listening.
    pub fn complete(mut self, result: R) -> usize {
        self.settled = true;

        let Some(operation) = self.take_operation() else {
            trace!(signature = %self.signature, "exchange finished with no waiters left");
            return 0;
        };

        let waiters = operation.listeners.len();
        let delivered = operation
            .listeners
            .into_iter()
            .filter(|(_, sender)| !sender.is_closed())
            .map(|(_, sender)| sender.send(result.clone()).is_ok())
            .filter(|sent| *sent)
            .count();

        debug!(signature = %self.signature, waiters, delivered, "delivered coalesced result");
        delivered
    }
}

impl<R> Drop for PendingExchange<R> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(operation) = self.take_operation() {
            warn!(
                signature = %self.signature,
                waiters = operation.listeners.len(),
                "exchange dropped without a result; waiters abandoned"
            );
        }
    }
}

/// One caller's handle on a coalesced result.
pub struct Waiter<R> {
    signature: RequestSignature,
    generation: u64,
    id: u64,
    receiver: oneshot::Receiver<R>,
    registry: Shared<R>,
    settled: bool,
}

impl<R> Waiter<R> {
    pub fn signature(&self) -> &RequestSignature {
        &self.signature
    }

    /// Ask the operation this waiter joined to skip any remaining start
    /// delay. Has no effect once the exchange is running.
    pub fn expedite(&self) {
        let guard = self.registry.lock();
        if let Some(operation) = guard
            .pending
            .get(&self.signature)
            .filter(|operation| operation.generation == self.generation)
        {
            operation.expedite.notify_one();
            debug!(signature = %self.signature, "start delay cut short");
        }
    }

    /// Wait for the shared result. Dropping the future detaches this caller.
    pub async fn wait(mut self) -> Result<R, ExchangeAbandoned> {
        let received = (&mut self.receiver).await;
        self.settled = true;
        received.map_err(|_| ExchangeAbandoned)
    }
}

impl<R> Drop for Waiter<R> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let orphaned = {
            let mut guard = self.registry.lock();
            let Some(operation) = guard.pending.get_mut(&self.signature) else {
                return;
            };
            if operation.generation != self.generation {
                return;
            }
            operation.listeners.retain(|(id, _)| *id != self.id);
            if !operation.listeners.is_empty() {
                trace!(
                    signature = %self.signature,
                    remaining = operation.listeners.len(),
                    "waiter detached"
                );
                return;
            }
            guard.pending.remove(&self.signature)
        };

        if let Some(operation) = orphaned {
            if let Some(running) = operation.running {
                running.abort();
            }
            debug!(signature = %self.signature, "last waiter left; exchange cancelled");
        }
    }
}
