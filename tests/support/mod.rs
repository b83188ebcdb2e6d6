//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod mock_session;
pub mod socket_guard;
