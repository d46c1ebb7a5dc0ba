//! HTTP status service for the worker pool.
//!
//! Four read-only views over the pool registry, computed live per request:
//! liveness, readiness, slot listing, and Prometheus metrics.

pub mod metrics;
pub mod server;

pub use server::{StatusState, router, start_status_server};
