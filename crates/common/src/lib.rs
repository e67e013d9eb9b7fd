pub mod actors;
pub mod backoff;
pub mod config;
pub mod logger;
pub mod models;
pub mod sink;
