// src/tests/mod.rs
//! Crate-level scenarios spanning several components
