//! Error type for the RPC facade.

use thiserror::Error;

/// Errors surfaced to the JSON-RPC layer.
///
/// Variants are grouped the way the node's RPC server maps errors onto
/// wire codes: parameter problems, key/address problems, decoding
/// problems, and lookups that found nothing.
#[derive(Debug, Error)]
pub enum RpcError {
    /// A parameter was well formed but not acceptable.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A key or address did not match what the operation requires.
    #[error("invalid address or key: {0}")]
    InvalidAddressOrKey(String),

    /// A hex payload could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The requested proof is not known to the manager.
    #[error("proof not found")]
    ProofNotFound,

    /// The facade is misconfigured or an internal assumption failed.
    #[error("internal error: {0}")]
    Internal(String),
}
