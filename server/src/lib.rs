pub mod config;
pub mod engine;
pub mod log_sink;
pub mod web;
