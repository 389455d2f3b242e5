//! HTTP server of the metrika pipeline: accepts metric writes, stores them
//! in the configured backend and serves current values.

pub mod api;
pub mod app;
pub mod audit;
pub mod config;
pub mod logging;
pub mod middleware;
pub mod service;
pub mod state;
