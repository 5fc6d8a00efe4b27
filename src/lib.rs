//! LandOS - hypothesis-driven property intelligence over a spatial Postgres store.
//!
//! This library exposes the core modules to the binary and to integration tests.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod explore;
pub mod llm;
pub mod logging;
pub mod query;
pub mod safety;
pub mod server;
