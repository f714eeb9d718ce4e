//! CSC — craps control decision engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod expr;
pub mod spec;
pub mod strategy;
pub mod engine;
