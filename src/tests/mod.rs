//! Crate-level integration tests

mod common;
