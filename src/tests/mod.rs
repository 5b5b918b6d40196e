//! Shared test fixtures and cross-module flow tests.

pub mod fixtures;
