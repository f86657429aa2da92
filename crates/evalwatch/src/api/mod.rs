//! REST access to the evaluation backend.

pub mod client;
pub mod error;

pub use client::{EvaluationApi, HealthStatus, HttpEvaluationApi};
pub use error::{ApiError, Result};
