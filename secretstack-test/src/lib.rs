//! Test utilities for SecretStack
//!
//! Provides utilities for integration testing with SecretStack:
//! - Start/stop an in-process server on a random port
//! - Reset state between tests
//! - A signed Secrets Manager client with explicit region handling
//! - The region-resilience probe and its scenarios
//!
//! ## Usage
//!
//! ```rust,no_run
//! use secretstack_test::{RegionMode, Scenario, TestServer};
//!
//! #[tokio::test]
//! async fn test_regions() {
//!     let server = TestServer::start().await.unwrap();
//!
//!     let probe = server.probe();
//!     let report = Scenario::succeed_fail_succeed("us-east-1")
//!         .run(&probe)
//!         .await
//!         .unwrap();
//!     assert_eq!(report.steps.len(), 3);
//!
//!     // Reset state between tests
//!     server.reset();
//! }
//! ```

pub mod client;
pub mod probe;
pub mod server;

use rand::{distributions::Alphanumeric, Rng};

pub use client::{ClientError, Output, RegionMode, SecretsManagerClient};
pub use probe::{
    Expectation, Probe, ProbeOutcome, Requirement, Scenario, ScenarioError, ScenarioReport, Step,
    StepReport, Verdict,
};
pub use server::{TestError, TestServer};

/// Timeout for waiting on the test server
pub const STARTUP_TIMEOUT_SECS: u64 = 30;

/// Install a fmt subscriber that writes through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secretstack_test=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Eight lowercase alphanumerics, for unique resource names
pub fn short_uid() -> String {
    random_string(8).to_lowercase()
}

pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
