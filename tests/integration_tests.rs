//! Integration tests for LandOS.
//!
//! Most tests drive the public API with the in-memory store and the mock
//! reasoning client. Tests against a live PostGIS store read `DATABASE_URL`
//! and skip when it is unset.
//!
//! Run with: `cargo test --test integration_tests`

mod integration;
