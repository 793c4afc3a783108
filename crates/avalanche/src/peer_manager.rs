//! The avalanche peer manager.
//!
//! [`PeerManager`] is the sybil-resistance gate of the avalanche subsystem.
//! It owns four cooperating structures:
//!
//! - the slot vector for stake-weighted selection ([`crate::slots`])
//! - the peer table with its proof, score and UTXO indices
//! - the node table with the pending buffer for nodes announcing proofs we
//!   do not know yet
//! - the conflicting and orphan proof pools ([`crate::pool`])
//!
//! Every proof id is in exactly one of: the peer table, the conflicting
//! pool, the orphan pool, or nowhere. Registration classifies a proof into
//! one of those places; rejection and chain tip updates move proofs
//! between them.
//!
//! The manager is a single-writer object: embedders wrap it in one
//! reader/writer lock held for the duration of each public call. No method
//! suspends or performs I/O; chain lookups go through the [`CoinView`]
//! argument the caller has already positioned at a consistent tip. The
//! manager does not log. Callers observe outcomes through the typed
//! results and log at their own boundary.

use crate::compare::{compare_proofs, is_preferred};
use crate::config::AvalancheConfig;
use crate::error::RegistrationError;
use crate::pool::{PoolAddStatus, ProofPool};
use crate::proof::{ProofId, ProofRef, ProofVerifier, StructuralVerifier};
use crate::slots::{select_peer_impl, Slot};
use crate::{NodeId, PeerId, NO_NODE, NO_PEER};
use firn_common::{Clock, CoinView, SteadyTime, SystemClock};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Draws attempted before `select_peer` reports no peer.
const SELECT_PEER_MAX_RETRY: usize = 3;

/// Peer selections attempted before `select_node` reports no node.
const SELECT_NODE_MAX_RETRY: usize = 3;

/// Bound on the invalidated-proof negative cache.
const INVALIDATED_CACHE_SIZE: usize = 16384;

/// An accepted proof with an allocated selection slot.
#[derive(Clone, Debug)]
pub struct Peer {
    /// Dense identifier, assigned monotonically at acceptance.
    pub peer_id: PeerId,
    /// The accepted proof.
    pub proof: ProofRef,
    /// Number of nodes currently bound to this peer.
    pub node_count: u32,
    /// Earliest wall time at which a conflicting registration may
    /// challenge this peer again.
    pub next_possible_conflict_time: i64,
    /// Position of this peer's slot in the slot vector.
    index: usize,
}

impl Peer {
    /// Selection weight, taken from the proof.
    pub fn score(&self) -> u32 {
        self.proof.score()
    }
}

/// A connected network participant.
///
/// A node is bound to a peer, or pending while its announced proof is not
/// a peer; either way the record survives so the request cooldown is not
/// lost across rebinding.
#[derive(Clone, Copy, Debug)]
pub struct Node {
    pub node_id: NodeId,
    /// The bound peer, or [`NO_PEER`] while pending.
    pub peer_id: PeerId,
    /// Earliest monotonic time this node may be polled again.
    pub next_request_time: SteadyTime,
}

/// How `register_proof` treats collisions with live peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationMode {
    /// Apply the cooldown and the conflicting-proof comparison.
    Default,
    /// Accept unconditionally, demoting every colliding peer. Also the
    /// promotion path for proofs already in the conflicting pool.
    ForceAccept,
}

/// How `reject_proof` treats the rejected proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionMode {
    /// Remove the proof; it may be registered again later.
    Default,
    /// Remove the proof and, for conflicting entries, remember the id so
    /// re-registration is refused.
    Invalidate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StakeStatus {
    Valid,
    MissingUtxo,
    HeightMismatch,
}

/// Bounded remember-set for invalidated proof ids.
struct NegativeCache {
    members: HashSet<ProofId>,
    order: VecDeque<ProofId>,
    capacity: usize,
}

impl NegativeCache {
    fn new(capacity: usize) -> Self {
        Self {
            members: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn insert(&mut self, proofid: ProofId) {
        if self.members.insert(proofid) {
            self.order.push_back(proofid);
            if self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.members.remove(&oldest);
                }
            }
        }
    }

    fn contains(&self, proofid: &ProofId) -> bool {
        self.members.contains(proofid)
    }
}

/// The peer manager. See the module documentation for the state model.
pub struct PeerManager {
    config: AvalancheConfig,
    clock: Arc<dyn Clock>,
    verifier: Arc<dyn ProofVerifier>,

    slots: Vec<Slot>,
    /// Total width of the slot vector, tombstones included.
    slot_count: u64,
    /// Total width of tombstoned slots still in the vector.
    fragmentation: u64,

    peers: BTreeMap<PeerId, Peer>,
    peer_by_proof: HashMap<ProofId, PeerId>,
    score_index: BTreeSet<(u32, PeerId)>,
    utxo_to_peer: HashMap<firn_common::Outpoint, PeerId>,
    next_peer_id: PeerId,

    nodes: HashMap<NodeId, Node>,
    /// Bound nodes keyed by `(peer, next_request_time, node)`, so the
    /// earliest due node of a peer is the first entry of its range.
    due_index: BTreeSet<(PeerId, SteadyTime, NodeId)>,
    pending_nodes: HashMap<NodeId, ProofId>,
    pending_by_proof: HashMap<ProofId, BTreeSet<NodeId>>,

    conflicting_pool: ProofPool,
    orphan_pool: ProofPool,
    invalidated: NegativeCache,

    unbroadcast: BTreeSet<ProofId>,
    need_more_nodes: bool,
}

impl PeerManager {
    /// Create a manager with the system clock and structural validation.
    pub fn new(config: AvalancheConfig) -> Self {
        Self::with_deps(
            config,
            Arc::new(SystemClock::new()),
            Arc::new(StructuralVerifier),
        )
    }

    /// Create a manager with injected clock and verifier.
    pub fn with_deps(
        config: AvalancheConfig,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn ProofVerifier>,
    ) -> Self {
        let conflicting_pool = ProofPool::new(config.conflicting_pool_size);
        let orphan_pool = ProofPool::new(config.orphan_pool_size);
        Self {
            config,
            clock,
            verifier,
            slots: Vec::new(),
            slot_count: 0,
            fragmentation: 0,
            peers: BTreeMap::new(),
            peer_by_proof: HashMap::new(),
            score_index: BTreeSet::new(),
            utxo_to_peer: HashMap::new(),
            next_peer_id: 0,
            nodes: HashMap::new(),
            due_index: BTreeSet::new(),
            pending_nodes: HashMap::new(),
            pending_by_proof: HashMap::new(),
            conflicting_pool,
            orphan_pool,
            invalidated: NegativeCache::new(INVALIDATED_CACHE_SIZE),
            unbroadcast: BTreeSet::new(),
            need_more_nodes: false,
        }
    }

    // ===== Registration =====

    /// Register a proof in [`RegistrationMode::Default`].
    pub fn register_proof(
        &mut self,
        proof: ProofRef,
        coins: &dyn CoinView,
    ) -> Result<PeerId, RegistrationError> {
        self.register_proof_with_mode(proof, coins, RegistrationMode::Default)
    }

    /// Register a proof, classifying it as a peer, a conflicting entry, an
    /// orphan, or nothing. On success the new peer id is returned and any
    /// pending nodes announcing this proof are bound to it.
    pub fn register_proof_with_mode(
        &mut self,
        proof: ProofRef,
        coins: &dyn CoinView,
        mode: RegistrationMode,
    ) -> Result<PeerId, RegistrationError> {
        let proofid = proof.id();
        let force = mode == RegistrationMode::ForceAccept;

        // In default mode the proof must be unknown. In force mode it may
        // additionally sit in the conflicting pool, from which it gets
        // promoted.
        if (!force || !self.conflicting_pool.contains(&proofid)) && self.exists(&proofid) {
            return Err(RegistrationError::AlreadyRegistered);
        }

        if self.invalidated.contains(&proofid) {
            return Err(RegistrationError::Rejected);
        }

        self.verifier
            .verify(&proof)
            .map_err(RegistrationError::Invalid)?;

        if force {
            self.conflicting_pool.remove(&proofid);
        }

        self.register_checked(proof, coins, mode, true)
    }

    /// Registration past the identity and validity gates.
    ///
    /// `apply_cooldown` is false on the chain-rescan path: a proof
    /// revalidated by a new tip is not an adversarial challenge.
    fn register_checked(
        &mut self,
        proof: ProofRef,
        coins: &dyn CoinView,
        mode: RegistrationMode,
        apply_cooldown: bool,
    ) -> Result<PeerId, RegistrationError> {
        match self.check_stakes(&proof, coins) {
            StakeStatus::Valid => {}
            StakeStatus::MissingUtxo => {
                return self.retain_as_orphan(proof, RegistrationError::MissingUtxo)
            }
            StakeStatus::HeightMismatch => {
                return self.retain_as_orphan(proof, RegistrationError::HeightMismatch)
            }
        }

        let colliding: BTreeSet<PeerId> = proof
            .stakes()
            .iter()
            .filter_map(|s| self.utxo_to_peer.get(&s.utxo).copied())
            .collect();

        if !colliding.is_empty() && mode == RegistrationMode::Default {
            let cooldown = i64::from(self.config.conflicting_proof_cooldown);
            if apply_cooldown && cooldown > 0 {
                let now = self.clock.seconds();
                for peer_id in &colliding {
                    let blocked = self
                        .peers
                        .get(peer_id)
                        .is_some_and(|p| now < p.next_possible_conflict_time + cooldown);
                    if blocked {
                        return Err(RegistrationError::CooldownNotElapsed);
                    }
                }
            }

            let preferred_over_all = self.config.enable_proof_replacement
                && colliding.iter().all(|peer_id| {
                    self.peers
                        .get(peer_id)
                        .is_some_and(|p| is_preferred(&proof, &p.proof))
                });

            if !preferred_over_all {
                return match self.conflicting_pool.add(proof) {
                    PoolAddStatus::Added => {
                        let now = self.clock.seconds();
                        for peer_id in &colliding {
                            if let Some(peer) = self.peers.get_mut(peer_id) {
                                peer.next_possible_conflict_time = now;
                            }
                        }
                        Err(RegistrationError::Conflicting)
                    }
                    PoolAddStatus::Rejected => Err(RegistrationError::Rejected),
                };
            }
        }

        for peer_id in colliding {
            self.demote_to_conflicting(peer_id);
        }

        Ok(self.create_peer(proof))
    }

    /// Check every stake against the chain. The first failing stake, in
    /// outpoint order, decides the classification.
    fn check_stakes(&self, proof: &ProofRef, coins: &dyn CoinView) -> StakeStatus {
        for stake in proof.stakes() {
            match coins.lookup(&stake.utxo) {
                None => return StakeStatus::MissingUtxo,
                Some(coin) if coin.height != stake.height => return StakeStatus::HeightMismatch,
                Some(_) => {}
            }
        }
        StakeStatus::Valid
    }

    fn retain_as_orphan(
        &mut self,
        proof: ProofRef,
        reason: RegistrationError,
    ) -> Result<PeerId, RegistrationError> {
        match self.orphan_pool.add(proof) {
            PoolAddStatus::Added => Err(reason),
            PoolAddStatus::Rejected => Err(RegistrationError::Rejected),
        }
    }

    /// Remove a live peer and park its proof in the conflicting pool. The
    /// pool comparison may drop the proof entirely.
    fn demote_to_conflicting(&mut self, peer_id: PeerId) {
        if let Some(peer) = self.remove_peer_internal(peer_id) {
            self.conflicting_pool.add(peer.proof);
        }
    }

    /// Allocate a peer for an accepted proof and bind any pending nodes
    /// that announced it.
    fn create_peer(&mut self, proof: ProofRef) -> PeerId {
        let peer_id = self.next_peer_id;
        self.next_peer_id += 1;

        let proofid = proof.id();
        let score = proof.score();

        let index = self.slots.len();
        self.slots.push(Slot::new(self.slot_count, score, peer_id));
        self.slot_count += u64::from(score);

        for stake in proof.stakes() {
            self.utxo_to_peer.insert(stake.utxo, peer_id);
        }
        self.peer_by_proof.insert(proofid, peer_id);
        self.score_index.insert((score, peer_id));
        self.peers.insert(
            peer_id,
            Peer {
                peer_id,
                proof,
                node_count: 0,
                next_possible_conflict_time: self.clock.seconds(),
                index,
            },
        );

        if let Some(node_ids) = self.pending_by_proof.remove(&proofid) {
            for node_id in node_ids {
                self.pending_nodes.remove(&node_id);
                self.bind_node(node_id, peer_id);
            }
        }

        peer_id
    }

    /// Bind an existing node record to a peer.
    fn bind_node(&mut self, node_id: NodeId, peer_id: PeerId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.peer_id = peer_id;
            self.due_index
                .insert((peer_id, node.next_request_time, node_id));
            if let Some(peer) = self.peers.get_mut(&peer_id) {
                peer.node_count += 1;
            }
        }
    }

    // ===== Rejection and removal =====

    /// Reject a proof out of whichever pool holds it.
    ///
    /// Orphans are dropped in both modes. Conflicting entries are dropped,
    /// and additionally remembered in `Invalidate` mode so they cannot
    /// return. A live peer is demoted (its nodes become pending) and the
    /// best conflicting entries freed by its departure are promoted.
    pub fn reject_proof(&mut self, proofid: &ProofId, mode: RejectionMode) -> bool {
        if self.orphan_pool.remove(proofid).is_some() {
            return true;
        }

        if self.conflicting_pool.remove(proofid).is_some() {
            if mode == RejectionMode::Invalidate {
                self.invalidated.insert(*proofid);
            }
            return true;
        }

        if let Some(&peer_id) = self.peer_by_proof.get(proofid) {
            self.remove_peer_internal(peer_id);
            self.promote_conflicting();
            return true;
        }

        false
    }

    /// Remove a peer. Its nodes revert to pending, announcing the removed
    /// proof. The conflicting pool is not consulted; `reject_proof` is the
    /// operation that promotes replacements.
    pub fn remove_peer(&mut self, peer_id: PeerId) -> bool {
        self.remove_peer_internal(peer_id).is_some()
    }

    fn remove_peer_internal(&mut self, peer_id: PeerId) -> Option<Peer> {
        let peer = self.peers.remove(&peer_id)?;
        let proofid = peer.proof.id();

        let i = peer.index;
        if i + 1 == self.slots.len() {
            self.slots.pop();
            self.slot_count = self.slots.last().map_or(0, |s| s.stop());
        } else {
            self.fragmentation += u64::from(self.slots[i].score());
            self.slots[i] = self.slots[i].with_peer_id(NO_PEER);
        }

        self.peer_by_proof.remove(&proofid);
        self.score_index.remove(&(peer.score(), peer_id));
        for stake in peer.proof.stakes() {
            if self.utxo_to_peer.get(&stake.utxo) == Some(&peer_id) {
                self.utxo_to_peer.remove(&stake.utxo);
            }
        }
        self.unbroadcast.remove(&proofid);

        let bound: Vec<NodeId> = self
            .due_index
            .range((peer_id, SteadyTime::ZERO, NodeId::MIN)..=(peer_id, SteadyTime::MAX, NodeId::MAX))
            .map(|&(_, _, node_id)| node_id)
            .collect();
        for node_id in bound {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                self.due_index
                    .remove(&(peer_id, node.next_request_time, node_id));
                node.peer_id = NO_PEER;
                self.pending_nodes.insert(node_id, proofid);
                self.pending_by_proof
                    .entry(proofid)
                    .or_default()
                    .insert(node_id);
            }
        }

        Some(peer)
    }

    /// Promote conflicting entries that no longer collide with any live
    /// peer, best first.
    fn promote_conflicting(&mut self) {
        let mut candidates: Vec<ProofRef> = self
            .conflicting_pool
            .proof_ids()
            .iter()
            .filter_map(|id| self.conflicting_pool.get(id).cloned())
            .filter(|proof| {
                !proof
                    .stakes()
                    .iter()
                    .any(|s| self.utxo_to_peer.contains_key(&s.utxo))
            })
            .collect();
        candidates.sort_by(|a, b| compare_proofs(b, a));

        for proof in candidates {
            let collides = proof
                .stakes()
                .iter()
                .any(|s| self.utxo_to_peer.contains_key(&s.utxo));
            if !collides {
                self.conflicting_pool.remove(&proof.id());
                self.create_peer(proof);
            }
        }
    }

    // ===== Node binding =====

    /// Bind a node to the peer holding `proofid`, or record it as pending
    /// if the proof is not a peer. Returns true iff the node is bound.
    pub fn add_node(&mut self, node_id: NodeId, proofid: ProofId) -> bool {
        match self.peer_by_proof.get(&proofid).copied() {
            Some(peer_id) => {
                if let Some(previous) = self.pending_nodes.remove(&node_id) {
                    self.clear_pending_reverse(previous, node_id);
                }

                match self.nodes.get_mut(&node_id) {
                    Some(node) => {
                        if node.peer_id == peer_id {
                            return true;
                        }
                        if node.peer_id != NO_PEER {
                            let old = node.peer_id;
                            self.due_index
                                .remove(&(old, node.next_request_time, node_id));
                            if let Some(peer) = self.peers.get_mut(&old) {
                                peer.node_count -= 1;
                            }
                        }
                        node.peer_id = peer_id;
                        let when = node.next_request_time;
                        self.due_index.insert((peer_id, when, node_id));
                        if let Some(peer) = self.peers.get_mut(&peer_id) {
                            peer.node_count += 1;
                        }
                    }
                    None => {
                        self.nodes.insert(
                            node_id,
                            Node {
                                node_id,
                                peer_id,
                                next_request_time: SteadyTime::ZERO,
                            },
                        );
                        self.due_index.insert((peer_id, SteadyTime::ZERO, node_id));
                        if let Some(peer) = self.peers.get_mut(&peer_id) {
                            peer.node_count += 1;
                        }
                    }
                }
                true
            }
            None => {
                match self.nodes.get_mut(&node_id) {
                    Some(node) => {
                        if node.peer_id != NO_PEER {
                            let old = node.peer_id;
                            self.due_index
                                .remove(&(old, node.next_request_time, node_id));
                            if let Some(peer) = self.peers.get_mut(&old) {
                                peer.node_count -= 1;
                            }
                            node.peer_id = NO_PEER;
                        }
                    }
                    None => {
                        self.nodes.insert(
                            node_id,
                            Node {
                                node_id,
                                peer_id: NO_PEER,
                                next_request_time: SteadyTime::ZERO,
                            },
                        );
                    }
                }

                if let Some(previous) = self.pending_nodes.insert(node_id, proofid) {
                    self.clear_pending_reverse(previous, node_id);
                }
                self.pending_by_proof
                    .entry(proofid)
                    .or_default()
                    .insert(node_id);
                false
            }
        }
    }

    fn clear_pending_reverse(&mut self, proofid: ProofId, node_id: NodeId) {
        if let Some(set) = self.pending_by_proof.get_mut(&proofid) {
            set.remove(&node_id);
            if set.is_empty() {
                self.pending_by_proof.remove(&proofid);
            }
        }
    }

    /// Forget a node entirely. Returns true iff it existed.
    pub fn remove_node(&mut self, node_id: NodeId) -> bool {
        let Some(node) = self.nodes.remove(&node_id) else {
            return false;
        };

        if node.peer_id != NO_PEER {
            self.due_index
                .remove(&(node.peer_id, node.next_request_time, node_id));
            if let Some(peer) = self.peers.get_mut(&node.peer_id) {
                peer.node_count -= 1;
            }
        }
        if let Some(previous) = self.pending_nodes.remove(&node_id) {
            self.clear_pending_reverse(previous, node_id);
        }
        true
    }

    /// Set a node's polling cooldown. Not monotonic: moving the time
    /// backwards is allowed (and is how a node is made due again).
    pub fn update_next_request_time(&mut self, node_id: NodeId, when: SteadyTime) -> bool {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return false;
        };

        if node.peer_id != NO_PEER {
            self.due_index
                .remove(&(node.peer_id, node.next_request_time, node_id));
            self.due_index.insert((node.peer_id, when, node_id));
        }
        node.next_request_time = when;
        true
    }

    /// Advance a peer's conflict clock. Rejects values below the current
    /// one; this is the monotonic clock behind the conflicting-proof
    /// cooldown.
    pub fn update_next_possible_conflict_time(&mut self, peer_id: PeerId, when: i64) -> bool {
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return false;
        };
        if when < peer.next_possible_conflict_time {
            return false;
        }
        peer.next_possible_conflict_time = when;
        true
    }

    // ===== Chain tip updates =====

    /// Re-evaluate every retained proof against the current coin view.
    ///
    /// Processing is deterministic, in proof id order per pool: conflicting
    /// entries and peers that lost chain backing become orphans (demoted
    /// peers release their nodes to pending), orphans that regained it
    /// re-enter registration with the cooldown bypassed, and conflicting
    /// entries whose blockers disappeared are promoted.
    pub fn updated_block_tip(&mut self, coins: &dyn CoinView) {
        for proofid in self.conflicting_pool.proof_ids() {
            let Some(proof) = self.conflicting_pool.get(&proofid).cloned() else {
                continue;
            };
            if self.check_stakes(&proof, coins) != StakeStatus::Valid {
                self.conflicting_pool.remove(&proofid);
                self.orphan_pool.add(proof);
            }
        }

        let mut peers_by_proof: Vec<(ProofId, PeerId)> = self
            .peer_by_proof
            .iter()
            .map(|(proofid, peer_id)| (*proofid, *peer_id))
            .collect();
        peers_by_proof.sort_unstable();
        for (_, peer_id) in peers_by_proof {
            let Some(proof) = self.peers.get(&peer_id).map(|p| p.proof.clone()) else {
                continue;
            };
            if self.check_stakes(&proof, coins) != StakeStatus::Valid {
                self.remove_peer_internal(peer_id);
                self.orphan_pool.add(proof);
            }
        }

        for proofid in self.orphan_pool.proof_ids() {
            let Some(proof) = self.orphan_pool.get(&proofid).cloned() else {
                continue;
            };
            if self.check_stakes(&proof, coins) == StakeStatus::Valid {
                self.orphan_pool.remove(&proofid);
                let _ = self.register_checked(proof, coins, RegistrationMode::Default, false);
            }
        }

        for proofid in self.conflicting_pool.proof_ids() {
            let Some(proof) = self.conflicting_pool.get(&proofid).cloned() else {
                continue;
            };
            let collides = proof
                .stakes()
                .iter()
                .any(|s| self.utxo_to_peer.contains_key(&s.utxo));
            if !collides && self.check_stakes(&proof, coins) == StakeStatus::Valid {
                self.conflicting_pool.remove(&proofid);
                self.create_peer(proof);
            }
        }

        debug_assert!(self.verify());
    }

    // ===== Selection =====

    /// Draw a peer with probability proportional to its score, or
    /// [`NO_PEER`] after a bounded number of misses.
    pub fn select_peer(&self) -> PeerId {
        if self.slots.is_empty() || self.slot_count == 0 {
            return NO_PEER;
        }

        let max = self.slot_count;
        let mut rng = rand::thread_rng();
        for _ in 0..SELECT_PEER_MAX_RETRY {
            let s = rng.gen_range(0..max);
            let peer_id = select_peer_impl(&self.slots, s, max);
            if peer_id != NO_PEER {
                return peer_id;
            }
        }
        NO_PEER
    }

    /// Select a peer, then return its earliest due node. When every
    /// attempt comes up empty the request-more-nodes flag is raised and
    /// [`NO_NODE`] is returned.
    pub fn select_node(&mut self) -> NodeId {
        let now = self.clock.steady();
        for _ in 0..SELECT_NODE_MAX_RETRY {
            let peer_id = self.select_peer();
            if peer_id == NO_PEER {
                continue;
            }

            let first = self
                .due_index
                .range(
                    (peer_id, SteadyTime::ZERO, NodeId::MIN)
                        ..=(peer_id, SteadyTime::MAX, NodeId::MAX),
                )
                .next();
            if let Some(&(_, when, node_id)) = first {
                if when <= now {
                    return node_id;
                }
            }
        }

        self.need_more_nodes = true;
        NO_NODE
    }

    /// One-shot flag set when node selection failed for lack of due
    /// nodes. Reading clears it.
    pub fn should_request_more_nodes(&mut self) -> bool {
        std::mem::take(&mut self.need_more_nodes)
    }

    // ===== Accessors =====

    /// Look up a proof in any pool.
    pub fn get_proof(&self, proofid: &ProofId) -> Option<ProofRef> {
        if let Some(peer_id) = self.peer_by_proof.get(proofid) {
            return self.peers.get(peer_id).map(|p| p.proof.clone());
        }
        self.conflicting_pool
            .get(proofid)
            .or_else(|| self.orphan_pool.get(proofid))
            .cloned()
    }

    /// Whether the proof is a peer, a conflicting entry, or an orphan.
    pub fn exists(&self, proofid: &ProofId) -> bool {
        self.is_bound_to_peer(proofid)
            || self.is_in_conflicting_pool(proofid)
            || self.is_orphan(proofid)
    }

    pub fn is_bound_to_peer(&self, proofid: &ProofId) -> bool {
        self.peer_by_proof.contains_key(proofid)
    }

    pub fn is_orphan(&self, proofid: &ProofId) -> bool {
        self.orphan_pool.contains(proofid)
    }

    pub fn is_in_conflicting_pool(&self, proofid: &ProofId) -> bool {
        self.conflicting_pool.contains(proofid)
    }

    /// Number of nodes bound to a peer.
    pub fn get_node_count(&self) -> usize {
        self.nodes.len() - self.pending_nodes.len()
    }

    /// Number of nodes whose announced proof is not a peer.
    pub fn get_pending_node_count(&self) -> usize {
        self.pending_nodes.len()
    }

    /// Total slot width, tombstones included.
    pub fn get_slot_count(&self) -> u64 {
        self.slot_count
    }

    /// Total tombstoned width awaiting compaction.
    pub fn get_fragmentation(&self) -> u64 {
        self.fragmentation
    }

    /// Rebuild the slot vector without tombstones. Returns the reclaimed
    /// width.
    pub fn compact(&mut self) -> u64 {
        if self.fragmentation == 0 {
            return 0;
        }

        let old = std::mem::take(&mut self.slots);
        let mut new_slots = Vec::with_capacity(old.len());
        let mut prev_stop = 0u64;
        for slot in old {
            if slot.peer_id() == NO_PEER {
                continue;
            }
            if let Some(peer) = self.peers.get_mut(&slot.peer_id()) {
                peer.index = new_slots.len();
            }
            new_slots.push(Slot::new(prev_stop, slot.score(), slot.peer_id()));
            prev_stop += u64::from(slot.score());
        }

        let reclaimed = self.slot_count - prev_stop;
        self.slots = new_slots;
        self.slot_count = prev_stop;
        self.fragmentation = 0;
        reclaimed
    }

    // ===== Unbroadcast proofs =====

    /// Remember a proof that still needs announcing. Only proofs bound to
    /// a peer qualify.
    pub fn add_unbroadcast_proof(&mut self, proofid: ProofId) -> bool {
        if !self.is_bound_to_peer(&proofid) {
            return false;
        }
        self.unbroadcast.insert(proofid);
        true
    }

    pub fn remove_unbroadcast_proof(&mut self, proofid: &ProofId) -> bool {
        self.unbroadcast.remove(proofid)
    }

    pub fn unbroadcast_proofs(&self) -> Vec<ProofId> {
        self.unbroadcast.iter().copied().collect()
    }

    // ===== Iteration =====

    /// Run `f` on the peer holding `proofid`, if any.
    pub fn for_peer<R>(&self, proofid: &ProofId, f: impl FnOnce(&Peer) -> R) -> Option<R> {
        let peer_id = self.peer_by_proof.get(proofid)?;
        self.peers.get(peer_id).map(f)
    }

    /// Run `f` on every peer, in peer id order.
    pub fn for_each_peer(&self, mut f: impl FnMut(&Peer)) {
        for peer in self.peers.values() {
            f(peer);
        }
    }

    /// Run `f` on a node, bound or pending.
    pub fn for_node<R>(&self, node_id: NodeId, f: impl FnOnce(&Node) -> R) -> Option<R> {
        self.nodes.get(&node_id).map(f)
    }

    /// Run `f` on every node bound to `peer`.
    pub fn for_each_node(&self, peer: &Peer, mut f: impl FnMut(&Node)) {
        let range = (peer.peer_id, SteadyTime::ZERO, NodeId::MIN)
            ..=(peer.peer_id, SteadyTime::MAX, NodeId::MAX);
        for &(_, _, node_id) in self.due_index.range(range) {
            if let Some(node) = self.nodes.get(&node_id) {
                f(node);
            }
        }
    }

    /// Peer scores in descending score order.
    pub(crate) fn ordered_scores(&self) -> Vec<u32> {
        self.score_index
            .iter()
            .rev()
            .map(|&(score, _)| score)
            .collect()
    }

    // ===== Invariants =====

    /// Check every internal invariant. Test suites call this after each
    /// mutation sequence; a false return is a bug in the manager.
    pub fn verify(&self) -> bool {
        // Slot geometry: sorted, non-overlapping, contiguous accounting.
        let mut prev_stop = 0u64;
        let mut live_width = 0u64;
        for slot in &self.slots {
            if slot.start() < prev_stop {
                return false;
            }
            prev_stop = slot.stop();
            if slot.peer_id() != NO_PEER {
                live_width += u64::from(slot.score());
            }
        }
        if self.slot_count != self.slots.last().map_or(0, |s| s.stop()) {
            return false;
        }
        if self.fragmentation != self.slot_count - live_width {
            return false;
        }

        // Peer records against every index.
        if self.peer_by_proof.len() != self.peers.len()
            || self.score_index.len() != self.peers.len()
        {
            return false;
        }
        let mut stake_total = 0usize;
        let mut peer_score_sum = 0u64;
        for (peer_id, peer) in &self.peers {
            if peer.peer_id != *peer_id {
                return false;
            }
            let Some(slot) = self.slots.get(peer.index) else {
                return false;
            };
            if slot.peer_id() != *peer_id || slot.score() != peer.score() {
                return false;
            }
            if self.peer_by_proof.get(&peer.proof.id()) != Some(peer_id) {
                return false;
            }
            if !self.score_index.contains(&(peer.score(), *peer_id)) {
                return false;
            }
            for stake in peer.proof.stakes() {
                if self.utxo_to_peer.get(&stake.utxo) != Some(peer_id) {
                    return false;
                }
            }
            stake_total += peer.proof.stakes().len();
            peer_score_sum += u64::from(peer.score());

            let bound = self
                .due_index
                .range(
                    (*peer_id, SteadyTime::ZERO, NodeId::MIN)
                        ..=(*peer_id, SteadyTime::MAX, NodeId::MAX),
                )
                .count();
            if bound != peer.node_count as usize {
                return false;
            }
        }
        if self.utxo_to_peer.len() != stake_total {
            return false;
        }
        if peer_score_sum != live_width {
            return false;
        }

        // Nodes are bound to live peers or pending, never both.
        let mut bound_count = 0usize;
        for (node_id, node) in &self.nodes {
            if node.node_id != *node_id {
                return false;
            }
            if node.peer_id == NO_PEER {
                if !self.pending_nodes.contains_key(node_id) {
                    return false;
                }
            } else {
                bound_count += 1;
                if self.pending_nodes.contains_key(node_id) {
                    return false;
                }
                if !self.peers.contains_key(&node.peer_id) {
                    return false;
                }
                if !self
                    .due_index
                    .contains(&(node.peer_id, node.next_request_time, *node_id))
                {
                    return false;
                }
            }
        }
        if bound_count != self.due_index.len() {
            return false;
        }
        if self.pending_nodes.len() + bound_count != self.nodes.len() {
            return false;
        }
        for (node_id, proofid) in &self.pending_nodes {
            if !self.nodes.contains_key(node_id) {
                return false;
            }
            if self.peer_by_proof.contains_key(proofid) {
                return false;
            }
            if !self
                .pending_by_proof
                .get(proofid)
                .is_some_and(|set| set.contains(node_id))
            {
                return false;
            }
        }
        let reverse_total: usize = self.pending_by_proof.values().map(|s| s.len()).sum();
        if reverse_total != self.pending_nodes.len() {
            return false;
        }

        // Pools are internally consistent and pairwise disjoint with the
        // peer table and each other.
        if !self.conflicting_pool.check_consistency() || !self.orphan_pool.check_consistency() {
            return false;
        }
        for proofid in self.conflicting_pool.proof_ids() {
            if self.peer_by_proof.contains_key(&proofid) || self.orphan_pool.contains(&proofid) {
                return false;
            }
        }
        for proofid in self.orphan_pool.proof_ids() {
            if self.peer_by_proof.contains_key(&proofid) {
                return false;
            }
        }

        self.unbroadcast
            .iter()
            .all(|proofid| self.peer_by_proof.contains_key(proofid))
    }
}
