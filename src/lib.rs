//! Papertrade Simulation Engine Library
//!
//! This library provides the market-data resolution and trade-execution core
//! for the papertrade paper-trading simulator.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
