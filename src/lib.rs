//! A buffered metrics client speaking a plain-text line protocol.
//!
//! Application code submits typed metric events — timers, counters, gauges,
//! or values it has already aggregated itself — and the client turns each
//! call into one encoded line, batches lines in a bounded buffer, and ships
//! flushed batches over one of two transports: a fire-and-forget UDP
//! datagram, or an authenticated HTTP API with optional gzip compression and
//! bounded retries.
//!
//! # Usage
//!
//! ```no_run
//! use statline::{Aggregation, ClientBuilder, MetricOpts};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientBuilder::new()
//!     .with_datagram_endpoint("127.0.0.1:2013")?
//!     .with_flush_size(20)
//!     .build()?;
//!
//! client.timer("request_duration", 123, MetricOpts::new())?;
//! client.counter("requests", 1, MetricOpts::new().with_tag("status", "ok"))?;
//! client.gauge("queue_depth", 42, MetricOpts::new().with_agg(Aggregation::Max))?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration layers
//!
//! The effective tags, aggregation list, and aggregation frequency of a call
//! come from three layers, resolved in a fixed order: built-in defaults per
//! metric kind, client-level defaults (each configured field replaces its
//! built-in counterpart entirely), and per-call options (tags and
//! aggregations merge additively, the frequency replaces). An
//! application-wide default can redefine a kind's baseline completely, while
//! a single call adds context without restating it.
//!
//! # Delivery guarantees
//!
//! Calls never block on network I/O: they encode, buffer, and at most hand a
//! detached batch to a background forwarder thread. Lines are flushed in
//! FIFO order and delivered at most once. Datagram sends are best-effort and
//! never retried; api sends are retried with backoff on transient failures
//! and dropped after exhaustion. Only configuration and encoding problems
//! are surfaced to callers.

#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod buffer;

mod builder;
pub use self::builder::{BuildError, ClientBuilder};

mod client;
pub use self::client::Client;

mod defaults;
pub use self::defaults::{Aggregation, MetricDefaults, MetricKind, MetricOpts};

mod forwarder;

mod writer;
pub use self::writer::{MetricError, MetricValue};
