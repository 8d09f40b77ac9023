//! At-most-one in-flight exchange per request signature.
//!
//! [`CallbackCoalescer`] tracks who is waiting on which signature and fans
//! a single result out to all of them. [`OperationDispatcher`] runs the
//! exchanges themselves on a bounded set of tokio tasks, optionally after a
//! random start delay for background refreshes.

pub mod coalescer;
pub mod dispatcher;

pub use coalescer::{CacheStatus, CallbackCoalescer, ExchangeAbandoned, PendingExchange, Registration, Waiter};
pub use dispatcher::{DispatchConfig, DispatchDelay, OperationDispatcher};
