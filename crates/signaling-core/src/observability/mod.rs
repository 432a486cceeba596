//! Observability for the signaling core.
//!
//! Metrics are emitted through the `metrics` facade. Installing a recorder
//! (Prometheus or otherwise) is the embedding application's job.

pub mod metrics;
