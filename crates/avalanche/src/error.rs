//! Error types for the avalanche subsystem.
//!
//! Domain outcomes are typed: a failed registration is not a programmer
//! error, it is a classification the caller acts on (relay a conflict,
//! retain an orphan, surface an invalid proof to the user). The only fatal
//! condition anywhere in the crate is a broken internal invariant, caught
//! by [`crate::PeerManager::verify`].

use thiserror::Error;

/// Structural and cryptographic proof validation failures.
///
/// Produced by [`crate::ProofVerifier`] implementations. The cryptographic
/// arms exist for external verifiers; the in-crate
/// [`crate::StructuralVerifier`] only produces the structural subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProofValidationError {
    /// The proof commits to no stake at all.
    #[error("the proof has no stake")]
    NoStake,

    /// The proof commits to more stakes than the protocol allows.
    #[error("the proof has too many utxos (max: {max})")]
    TooManyUtxos { max: usize },

    /// Two stakes reference the same outpoint.
    #[error("the proof has duplicated stake")]
    DuplicateStake,

    /// Stakes are not in strictly increasing outpoint order.
    #[error("the proof stakes are not in outpoint order")]
    WrongStakeOrdering,

    /// A stake is below the dust threshold.
    #[error("the proof stake is too low")]
    DustThreshold,

    /// A stake signature does not match its committed public key.
    #[error("the proof has invalid stake signatures")]
    InvalidStakeSignature,

    /// The proof-level signature is invalid.
    #[error("the proof signature is invalid")]
    InvalidProofSignature,
}

/// Why a proof registration did not produce a peer.
///
/// This is a closed taxonomy: chain-dependent reasons (`MissingUtxo`,
/// `HeightMismatch`) mean the proof was retained as an orphan,
/// `Conflicting` means it was retained in the conflicting pool, and the
/// policy reasons mean it was not stored at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The proof is already a peer, an orphan, or a conflicting entry.
    #[error("the proof is already registered")]
    AlreadyRegistered,

    /// The proof failed structural or cryptographic validation.
    #[error("invalid proof: {0}")]
    Invalid(ProofValidationError),

    /// A stake's UTXO is absent from the active chain. The proof is
    /// retained as an orphan and re-examined on chain tip updates.
    #[error("stake utxo missing from the chain")]
    MissingUtxo,

    /// A stake's committed height differs from the chain's view of the
    /// UTXO. Retained as an orphan; a reorg can make it valid.
    #[error("stake height does not match the chain")]
    HeightMismatch,

    /// A colliding peer may not be challenged again yet.
    #[error("conflicting proof cooldown not elapsed")]
    CooldownNotElapsed,

    /// The proof collides with a live peer and was retained in the
    /// conflicting pool.
    #[error("the proof conflicts with an existing peer")]
    Conflicting,

    /// The proof lost every comparison and was not retained.
    #[error("the proof was rejected")]
    Rejected,
}

/// Failures decoding a proof from its canonical byte encoding.
#[derive(Debug, Error)]
pub enum ProofDecodeError {
    /// The input ended before the encoding was complete.
    #[error("truncated proof encoding")]
    Truncated,

    /// Extra bytes followed a complete encoding.
    #[error("trailing bytes after proof encoding")]
    TrailingBytes,

    /// The encoded stake count exceeds the protocol limit.
    #[error("stake count {0} exceeds the protocol limit")]
    OversizedStakeList(u32),

    /// The hex wrapper could not be decoded.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}
