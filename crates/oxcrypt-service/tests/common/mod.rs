//! Common test utilities for service client integration tests.

pub mod harness;

pub use harness::{TestService, PASSWORD_A, PASSWORD_B, VAULT_A, VAULT_B};
