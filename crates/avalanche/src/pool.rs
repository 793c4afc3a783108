//! Bounded per-UTXO proof pools.
//!
//! Both the conflicting pool (viable proofs that lost to a live peer) and
//! the orphan pool (proofs awaiting chain data) hold at most one proof per
//! UTXO: insertion resolves collisions with the conflicting-proof order and
//! keeps only the winner. Entries are indexed by proof id for deterministic
//! iteration and by outpoint for collision lookups.

use crate::compare::{compare_proofs, is_preferred};
use crate::proof::{ProofId, ProofRef, Stake};
use firn_common::Outpoint;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Outcome of a pool insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolAddStatus {
    /// The proof is in the pool; any colliding losers were dropped.
    Added,
    /// The proof lost a collision or the capacity cut and was not stored.
    Rejected,
}

/// A bounded container of proofs, unique per UTXO.
pub(crate) struct ProofPool {
    proofs: BTreeMap<ProofId, ProofRef>,
    by_utxo: HashMap<Outpoint, ProofId>,
    max_entries: usize,
}

impl ProofPool {
    pub fn new(max_entries: usize) -> Self {
        Self {
            proofs: BTreeMap::new(),
            by_utxo: HashMap::new(),
            max_entries,
        }
    }

    /// Insert a proof, resolving per-UTXO collisions.
    ///
    /// The candidate must be preferred over every colliding entry to get
    /// in; the displaced entries are dropped. At capacity, the globally
    /// worst proof (possibly the candidate) is evicted.
    pub fn add(&mut self, proof: ProofRef) -> PoolAddStatus {
        let colliding = self.conflicting_entries(proof.stakes());
        for id in &colliding {
            let incumbent = &self.proofs[id];
            if !is_preferred(&proof, incumbent) {
                return PoolAddStatus::Rejected;
            }
        }

        for id in &colliding {
            self.remove(id);
        }

        if self.proofs.len() >= self.max_entries {
            let worst = self
                .proofs
                .values()
                .min_by(|a, b| compare_proofs(a, b))
                .map(|p| p.id());
            match worst {
                Some(worst_id) if is_preferred(&proof, &self.proofs[&worst_id]) => {
                    self.remove(&worst_id);
                }
                _ => return PoolAddStatus::Rejected,
            }
        }

        for stake in proof.stakes() {
            self.by_utxo.insert(stake.utxo, proof.id());
        }
        self.proofs.insert(proof.id(), proof);
        PoolAddStatus::Added
    }

    /// Remove a proof by id, returning it if present.
    pub fn remove(&mut self, proofid: &ProofId) -> Option<ProofRef> {
        let proof = self.proofs.remove(proofid)?;
        for stake in proof.stakes() {
            if self.by_utxo.get(&stake.utxo) == Some(proofid) {
                self.by_utxo.remove(&stake.utxo);
            }
        }
        Some(proof)
    }

    pub fn get(&self, proofid: &ProofId) -> Option<&ProofRef> {
        self.proofs.get(proofid)
    }

    pub fn contains(&self, proofid: &ProofId) -> bool {
        self.proofs.contains_key(proofid)
    }

    /// Ids of pool entries sharing at least one outpoint with `stakes`.
    pub fn conflicting_entries(&self, stakes: &[Stake]) -> BTreeSet<ProofId> {
        stakes
            .iter()
            .filter_map(|s| self.by_utxo.get(&s.utxo).copied())
            .collect()
    }

    /// All proof ids, in ascending order.
    pub fn proof_ids(&self) -> Vec<ProofId> {
        self.proofs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.proofs.len()
    }

    /// Internal consistency check: the UTXO index matches the entries and
    /// no two entries share an outpoint.
    pub fn check_consistency(&self) -> bool {
        let mut expected = HashMap::new();
        for (id, proof) in &self.proofs {
            for stake in proof.stakes() {
                if expected.insert(stake.utxo, *id).is_some() {
                    return false;
                }
            }
        }
        expected == self.by_utxo
    }
}
