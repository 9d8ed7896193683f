//! Core LibroRed client library (auth pipeline, config, logging).

pub mod api;
pub mod auth;
pub mod config;
pub mod logging;
