//! Integration tests for LandOS.

pub mod config_test;
pub mod explore_test;
pub mod postgres_test;
pub mod safety_test;
