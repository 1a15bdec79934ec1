//! Confgen: Metadata-Driven Config File Generation
//!
//! Polls a service metadata endpoint, builds a cross-linked context graph of
//! hosts, stacks, services and containers, renders templates against it and
//! publishes the output atomically with optional check and notify hooks.

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod logging;
pub mod metadata;
pub mod publish;
pub mod query;
pub mod render;
pub mod scheduler;
pub mod views;
