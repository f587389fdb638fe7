//! A load tester for the HTTP statement protocol of Trino and Presto.
//!
//! Every simulated user runs *poll cycles* back to back: a query is submitted to
//! `/v1/statement`, and the `nextUri` continuation of every response is followed until the
//! engine returns a response without one. The [`QueryPoller`] drives a single cycle and reports
//! timings for the acceptance of the submission, for every continuation fetch and for the
//! completion of the query to a [`TelemetrySink`](telemetry::TelemetrySink).
//!
//! Continuation fetches answered with a `5xx` status are retried a bounded number of times
//! without backoff.
//!
//! The queries are drawn from a weighted mix of cheap *short* queries and expensive *long*
//! queries rendered from a template, using a seedable RNG so that runs are reproducible.
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod error;
pub mod observability;
pub mod poller;
pub mod protocol;
pub mod queries;
pub mod session;
pub mod stresstest;
pub mod telemetry;
pub mod transport;

pub use crate::poller::QueryPoller;
pub use crate::stresstest::{Scenario, run};
