//! Metric model and integrity signing shared by the telemon agent and server.

pub mod error;
pub mod sign;
pub mod types;
