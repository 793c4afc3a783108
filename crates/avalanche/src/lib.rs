//! Avalanche pre-consensus peer management for firn.
//!
//! Avalanche participants must present a *proof*: a signed commitment of
//! unspent outputs (stakes) from the active chain. This crate decides which
//! proofs are accepted, which conflict, which are dormant awaiting chain
//! data, and how connected nodes are bound to accepted proofs for
//! stake-weighted random selection during polling.
//!
//! ## Key Concepts
//!
//! - **Proof**: commitment binding a master key to a set of on-chain UTXOs,
//!   granting participation in polling
//! - **Peer**: an accepted proof with an allocated selection slot
//! - **Node**: a connected network participant bound to at most one peer
//! - **Conflicting proof**: lost the per-UTXO comparator but is retained in
//!   case the winner is later removed
//! - **Orphan proof**: structurally valid but not currently confirmed by
//!   the chain's coin set
//!
//! ## Proof Lifecycle
//!
//! ```text
//! [Unknown] --register,ok--------------> [Peer]
//! [Unknown] --register,conflict--------> [Conflicting]
//! [Unknown] --register,missing utxo----> [Orphan]
//! [Peer]    --reject / utxo lost-------> [Unknown] / [Orphan]
//! [Conflicting] --peer removed---------> [Peer]
//! [Orphan]  --chain tip supplies utxo--> [Peer]
//! ```
//!
//! ## Concurrency
//!
//! [`PeerManager`] is a single-writer object; embedders guard it with one
//! reader/writer lock held for the duration of each public call. No
//! operation suspends or performs I/O. Chain queries go through a
//! [`firn_common::CoinView`] the caller has already positioned at a
//! consistent tip.
//!
//! ## Usage
//!
//! ```
//! use firn_avalanche::{AvalancheConfig, PeerManager, ProofBuilder};
//! use firn_common::{Amount, Hash256, MemoryCoinView, Outpoint, PubKey};
//!
//! let mut coins = MemoryCoinView::new();
//! let utxo = Outpoint::new(Hash256([1u8; 32]), 0);
//! coins.add_coin(utxo, firn_common::Coin::new(Amount::from_coins(10), 100, false));
//!
//! let mut builder = ProofBuilder::new(0, 0, PubKey([2u8; 33]));
//! builder.add_utxo(utxo, Amount::from_coins(10), 100, false, PubKey([3u8; 33]));
//! let proof = builder.build();
//!
//! let mut pm = PeerManager::new(AvalancheConfig::default());
//! let peer_id = pm.register_proof(proof.clone(), &coins).unwrap();
//! assert!(pm.is_bound_to_peer(&proof.id()));
//! assert!(pm.add_node(7, proof.id()));
//! # assert!(pm.verify());
//! # let _ = peer_id;
//! ```

mod compare;
mod config;
mod error;
mod peer_manager;
mod pool;
mod proof;
mod slots;

pub use compare::{compare_proofs, is_preferred};
pub use config::{AvalancheConfig, ConfigError};
pub use error::{ProofDecodeError, ProofValidationError, RegistrationError};
pub use peer_manager::{Node, Peer, PeerManager, RegistrationMode, RejectionMode};
pub use proof::{
    LimitedProofId, Proof, ProofBuilder, ProofId, ProofRef, ProofVerifier, Stake,
    StructuralVerifier, AVALANCHE_MAX_PROOF_STAKES, PROOF_DUST_THRESHOLD,
};
pub use slots::{select_peer_impl, Slot};

/// Identifier of an accepted peer. Dense, assigned monotonically.
pub type PeerId = u32;

/// Sentinel returned when no peer can be selected or found.
pub const NO_PEER: PeerId = PeerId::MAX;

/// Identifier of a connected node, supplied by the network layer.
pub type NodeId = i64;

/// Sentinel returned when no node is due for polling.
pub const NO_NODE: NodeId = -1;
