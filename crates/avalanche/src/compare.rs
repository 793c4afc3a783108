//! Total order over conflicting proofs.
//!
//! When two proofs claim the same UTXO, exactly one of them may be a peer.
//! The order below decides the winner; it is also used as the eviction
//! order when a bounded pool overflows.
//!
//! Keys, first difference wins:
//!
//! 1. Higher sequence, only when both proofs carry the same master key.
//!    With different masters the sequence is ignored entirely: it is
//!    attacker-controlled and would otherwise allow free displacement.
//! 2. Higher total staked amount.
//! 3. Fewer stakes. Fewer UTXOs means less reorg surface.
//! 4. Smaller proof id, as a deterministic tie break.

use crate::proof::Proof;
use std::cmp::Ordering;

/// Rank `a` against `b`; `Ordering::Greater` means `a` is preferred.
///
/// Total and antisymmetric: `Equal` only occurs for identical proof ids.
pub fn compare_proofs(a: &Proof, b: &Proof) -> Ordering {
    if a.master() == b.master() {
        let by_sequence = a.sequence().cmp(&b.sequence());
        if by_sequence != Ordering::Equal {
            return by_sequence;
        }
    }

    let by_amount = a.staked_amount().cmp(&b.staked_amount());
    if by_amount != Ordering::Equal {
        return by_amount;
    }

    let by_count = b.stakes().len().cmp(&a.stakes().len());
    if by_count != Ordering::Equal {
        return by_count;
    }

    b.id().cmp(&a.id())
}

/// True iff `candidate` is strictly preferred over `reference`.
pub fn is_preferred(candidate: &Proof, reference: &Proof) -> bool {
    compare_proofs(candidate, reference) == Ordering::Greater
}
