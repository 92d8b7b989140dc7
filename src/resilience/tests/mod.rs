// src/resilience/tests/mod.rs
//! Tests for resilience primitives

mod circuit_breaker_tests;
mod retry_policy_tests;
