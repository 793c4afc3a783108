//! Shared primitives for firn.
//!
//! This crate holds the chain-neutral building blocks used across the
//! workspace:
//!
//! - **Types**: hashes, outpoints, amounts and key material ([`types`])
//! - **Chain access**: the read-only coin oracle ([`chain`])
//! - **Time**: mockable wall and monotonic clocks ([`time`])
//!
//! Nothing in this crate performs I/O or takes locks on its own; it exists
//! so that the avalanche subsystem and its embedders agree on primitive
//! representations without depending on a full node implementation.

pub mod chain;
pub mod time;
pub mod types;

pub use chain::{Coin, CoinView, MemoryCoinView};
pub use time::{Clock, MockClock, SteadyTime, SystemClock};
pub use types::{Amount, Hash256, Outpoint, PubKey, Script, TxId, COIN};
