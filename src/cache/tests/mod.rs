// src/cache/tests/mod.rs
//! Tests for the two-tier cache
