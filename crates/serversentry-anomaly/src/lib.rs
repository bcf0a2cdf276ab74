//! Statistics Kernel and Anomaly Engine for ServerSentry.
//!
//! `stats` is a set of pure functions over `&[f64]`; `engine` wraps them
//! with the consecutive-anomaly-count gating the scheduler consults before
//! publishing an `Event::Anomaly`.

pub mod engine;
pub mod stats;

pub use engine::AnomalyEngine;
pub use stats::{linear_regression, summary, z_score};
