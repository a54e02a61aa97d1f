//! Reconciliation pipeline and public API for the cairn dataset mirror.
//!
//! Ties the chain adapter, the accumulator engine, storage, and the
//! block service together:
//!
//! - [`resolver`] - depth-first DAG resolution with per-block
//!   verification and cancellation
//! - [`pipeline`] - backward sweep, live sync, gap-filling walk-back,
//!   per-event commit, republish
//! - [`client`] - the surface the CLI (or an embedding application)
//!   talks to
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cairn_chain::ChainConfig;
//! use cairn_store::MemoryAdapter;
//! use cairn_sync::{CairnClient, CairnConfig};
//!
//! # async fn run() -> cairn_core::Result<()> {
//! let config = CairnConfig::new(ChainConfig::new(
//!     "http://127.0.0.1:8545",
//!     "0x1111111111111111111111111111111111111111",
//! ));
//! let client = CairnClient::open(config, Arc::new(MemoryAdapter::new())).await?;
//! client.start().await?;
//! println!("mirrored through leaf {}", client.highest_index()?);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod pipeline;
pub mod resolver;
pub mod source;

pub use client::{CairnClient, CairnConfig, StatusReport};
pub use pipeline::{DataSubscriberId, Pipeline, RepublishReport, SyncConfig};
pub use resolver::resolve_tree;
pub use source::BlockStore;
