//! Chain adapter for the cairn dataset mirror.
//!
//! Wraps an external JSON-RPC endpoint behind a throttled FIFO transport
//! and decodes the accumulator contract's wire formats:
//!
//! - [`state`] - the packed 256-bit state word and peak array
//! - [`abi`] - the `LeafAppended` event and view-call returns
//! - [`client`] - view calls, log range queries, single-leaf lookups
//! - [`ws`] - the optional newHeads push subscription
//! - [`transport`] - rate-limited, retrying JSON-RPC plumbing

pub mod abi;
pub mod client;
pub mod state;
pub mod transport;
pub mod ws;

pub use abi::{decode_leaf_appended, parse_quantity, quantity, RawLog};
pub use client::{event_topic, selector, ChainClient, ChainConfig};
pub use state::ContractState;
pub use transport::{HttpTransport, JsonRpcTransport, Throttled, ThrottleConfig};
pub use ws::{subscribe_new_heads, HeadSubscription};
