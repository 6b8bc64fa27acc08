#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod forwarder;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod prompt;
pub mod rate_limit;
pub mod server;
pub mod state;

pub use error::{GatewayError, Result};
