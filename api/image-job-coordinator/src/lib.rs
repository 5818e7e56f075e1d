pub mod app;
pub mod client;
pub mod config;
pub mod infra;
pub mod module;
pub mod service;
