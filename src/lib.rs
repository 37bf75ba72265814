pub mod cache;
pub mod config;
pub mod geo;
pub mod limiter;
pub mod models;
pub mod redirect;
pub mod resolver;
pub mod storage;
pub mod telemetry;
