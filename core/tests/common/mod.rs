//! Common test utilities
//!
//! This module provides shared functionality for integration tests including:
//! - File-backed device images
//! - A scripted step runner that records per-device concurrency
//! - Step, registry and metadata fixtures
#![allow(dead_code)]

pub mod mock_drive;
pub mod scripted_runner;
pub mod test_helpers;
