//! RPC facade over the avalanche peer manager.
//!
//! This crate is the thin boundary between a JSON-RPC server and
//! [`firn_avalanche::PeerManager`]: it decodes and validates request
//! parameters, takes the manager lock once per call, and shapes results
//! into serializable response structures. It performs no transport; the
//! embedding server maps [`RpcError`] variants onto its own error codes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | `add_avalanche_node` | Register a proof if needed and bind a node to it |
//! | `send_avalanche_proof` | Register a proof and queue it for announcement |
//! | `get_avalanche_info` | Local proof status and network aggregates |
//! | `get_avalanche_peer_info` | Per-peer detail, optionally for one proof |
//! | `get_raw_avalanche_proof` | Hex proof lookup by id |
//! | `verify_avalanche_proof` | Stand-alone proof validation |
//!
//! The handler also carries the chain-notification entry point
//! ([`AvalancheRpc::updated_block_tip`]), which re-registers the local
//! proof before rescanning, so a node that runs its own proof keeps it
//! alive across reorgs.

mod api;
mod error;

pub use api::{
    AvalancheInfo, AvalancheRpc, LocalProofInfo, NetworkInfo, PeerInfo, RawProofResponse,
};
pub use error::RpcError;

/// Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;
