//! Energy predictor service
//!
//! Process wiring around `predictor-lib`: configuration loading and the
//! health, readiness, metrics and status HTTP endpoints.

pub mod api;
pub mod config;
