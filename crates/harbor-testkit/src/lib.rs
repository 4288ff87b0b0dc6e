//! # Harbor Testkit
//!
//! Testing utilities for harbor.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: entity descriptors and a registry over an in-memory
//!   store with a scripted transport
//! - **Generators**: Proptest strategies for batches, identities and filters
//! - **Tracing**: one-time subscriber setup honouring `RUST_LOG`
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use harbor_testkit::generators::{expected_merge, incoming_batch, local_ids};
//!
//! proptest! {
//!     #[test]
//!     fn merge_matches_model(local in local_ids(), batch in incoming_batch()) {
//!         let (report, remaining) = expected_merge(&local, &batch);
//!         // run the engine and compare
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use harbor_testkit::fixtures::{wine, TestFixture};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let fixture = TestFixture::new();
//!     let wine = fixture.register(wine()).await?;
//!     let wines = fixture.registry.collection(wine.name()).await?;
//!     assert!(wines.is_empty());
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod generators;

use std::sync::Once;

use tracing_subscriber::EnvFilter;

pub use fixtures::{record, wine_record, TestFixture};
pub use generators::{expected_merge, IncomingWine};

static TRACING: Once = Once::new();

/// Install a test subscriber once per process.
///
/// Output goes through the test harness's capture. Filtering follows
/// `RUST_LOG` and defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        // another harness may already have installed one
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
