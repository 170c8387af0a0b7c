//! Test infrastructure for the loader.
//!
//! Fixtures build the FHIR documents used across the binder, pipeline and store
//! tests.

#![allow(dead_code)]

pub mod fixtures;

pub use fixtures::*;
