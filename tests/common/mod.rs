//! Common test utilities and fixtures for chunkd integration tests
//!
//! This module provides:
//! - `TestServer`, a server on an ephemeral port with a temporary root
//! - `TestClient`, a blocking protocol peer with read timeouts
//! - Assertions about payloads and how a connection ended

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod assertions;
pub mod test_server;

pub use assertions::*;
pub use test_server::{TestClient, TestServer};
