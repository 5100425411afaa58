//! Per-destination, rate-limited webhook delivery.
//!
//! Producers enqueue JSON payloads for a destination url. Each destination
//! has its own minimum interval between sends; excess items wait in a FIFO
//! queue, are delivered one at a time with bounded retries, and their
//! outcomes are reported to a [`notifier::Notifier`].
pub mod api;
pub mod cli;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod notifier;
pub mod queue;
pub mod registry;
pub mod settings;
