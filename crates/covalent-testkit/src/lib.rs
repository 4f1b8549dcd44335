//! # Covalent Testkit
//!
//! Testing utilities for covalent.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Nodes on a shared manual clock, decoded transactions
//! - **Generators**: Proptest strategies for ids, known states and edit scripts
//! - **Storage**: A storage wrapper that loses writes on demand
//! - **Harness**: Wiring nodes together and pumping messages until quiet
//!
//! ## Two nodes talking
//!
//! ```rust,no_run
//! use covalent_testkit::{connect, pump, TestFixture};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let fixture = TestFixture::new();
//! let mut alice = fixture.node(1).await?;
//! let mut server = fixture.node(2).await?;
//! connect(&mut alice, &mut server).await?;
//!
//! let map = alice.create(covalent::content_types::COMAP, None, None).await?;
//! alice.set(map, "hello", "world").await?;
//! pump(&mut alice, &mut server).await?;
//! assert!(server.contains(&map));
//! # Ok(())
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use covalent_testkit::generators::known_state;
//!
//! proptest! {
//!     #[test]
//!     fn combine_is_idempotent(a in known_state()) {
//!         prop_assert_eq!(a.combine(&a), a);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod harness;
pub mod storage;

pub use fixtures::{agent, decoded_tx, TestFixture};
pub use generators::{ListStep, MapScript, ScriptEdit};
pub use harness::{connect, introduce, pump};
pub use storage::DroppingStorage;
