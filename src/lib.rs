//! Offline-first request cache and mutation outbox for the library
//! reservation app.
//!
//! Requests are routed to one of four fetch strategies backed by named,
//! versioned caches. Mutations made while offline are queued in a durable
//! outbox and replayed when connectivity returns.

pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod offline;
pub mod push;
pub mod router;
pub mod strategy;
pub mod sync;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use worker::ServiceWorker;
