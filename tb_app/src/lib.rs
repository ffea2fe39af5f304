//! # tb_app
//!
//! Process wiring for running throttles outside an embedding service

pub mod cli;
pub mod config_loader;
pub mod replay;
pub mod tracing_setup;
