//! Filter class predictor server
//!
//! Wires the configuration, the TCP listener and the health/metrics API.

pub mod api;
pub mod config;
