//! Shared test utilities for csv-ingest integration tests.
//!
//! This module provides:
//! - `TestHarness` for running jobs against an in-memory database
//! - `CsvBuilder` for writing upload files programmatically

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
