// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Flowline integration tests.
//!
//! Provides mock adapters and test harness infrastructure for fast,
//! deterministic, CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MockProvider`] - Mock messaging provider with scripted send outcomes
//! - [`MockApiCaller`] - Mock HTTP caller for `api` flow nodes
//! - [`ManualClock`] - Clock that only moves when a test advances it
//! - [`TestHarness`] - Full engine over a temp database with a seeded campaign

pub mod clock;
pub mod harness;
pub mod mock_api;
pub mod mock_provider;

pub use clock::ManualClock;
pub use harness::{demo_flow, TestHarness, HARNESS_T0};
pub use mock_api::MockApiCaller;
pub use mock_provider::MockProvider;
