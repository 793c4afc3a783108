//! Request handling and response shaping.

use crate::{Result, RpcError};
use firn_avalanche::{
    NodeId, PeerManager, Proof, ProofId, ProofRef, ProofVerifier, StructuralVerifier,
};
use firn_common::{Amount, CoinView, PubKey};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-peer response row of `get_avalanche_peer_info`.
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    /// The peer id.
    pub peerid: u64,
    /// Hex encoding of the peer's proof.
    pub proof: String,
    /// Number of nodes bound to this peer.
    pub nodecount: u64,
    /// The bound node ids.
    pub nodes: Vec<NodeId>,
}

/// The `local` block of `get_avalanche_info`.
#[derive(Debug, Clone, Serialize)]
pub struct LocalProofInfo {
    /// Whether the local proof is currently bound to a peer.
    pub live: bool,
    pub proofid: String,
    pub limited_proofid: String,
    /// Hex encoding of the proof master key.
    pub master: String,
    pub stake_amount: Amount,
}

/// The `network` block of `get_avalanche_info`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkInfo {
    pub proof_count: u64,
    pub connected_proof_count: u64,
    pub total_stake_amount: Amount,
    pub connected_stake_amount: Amount,
    pub node_count: u64,
    pub connected_node_count: u64,
    pub pending_node_count: u64,
}

/// Response of `get_avalanche_info`.
#[derive(Debug, Clone, Serialize)]
pub struct AvalancheInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalProofInfo>,
    pub network: NetworkInfo,
}

/// Response of `get_raw_avalanche_proof`.
#[derive(Debug, Clone, Serialize)]
pub struct RawProofResponse {
    /// Hex encoding of the proof.
    pub proof: String,
    /// Whether the proof is waiting for chain data.
    pub orphan: bool,
    /// Whether the proof is currently bound to a peer.
    pub bound_to_peer: bool,
}

/// The avalanche RPC handler.
///
/// Holds the shared peer manager, the coin oracle, and optionally this
/// node's own proof. Each method takes the manager lock exactly once.
pub struct AvalancheRpc {
    peer_manager: Arc<RwLock<PeerManager>>,
    coins: Arc<dyn CoinView>,
    verifier: Arc<dyn ProofVerifier>,
    local_proof: Option<ProofRef>,
}

impl AvalancheRpc {
    pub fn new(peer_manager: Arc<RwLock<PeerManager>>, coins: Arc<dyn CoinView>) -> Self {
        Self {
            peer_manager,
            coins,
            verifier: Arc::new(StructuralVerifier),
            local_proof: None,
        }
    }

    /// Use a specific proof verifier instead of the structural default.
    pub fn with_verifier(mut self, verifier: Arc<dyn ProofVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Attach this node's own proof, reported by `get_avalanche_info` and
    /// re-registered on every chain tip update.
    pub fn with_local_proof(mut self, proof: ProofRef) -> Self {
        self.local_proof = Some(proof);
        self
    }

    fn decode_proof(&self, proof_hex: &str) -> Result<ProofRef> {
        let proof = Proof::from_hex(proof_hex)
            .map_err(|e| RpcError::Deserialization(e.to_string()))?;
        Ok(Arc::new(proof))
    }

    fn verify_or_reject(&self, proof: &Proof) -> Result<()> {
        self.verifier
            .verify(proof)
            .map_err(|e| RpcError::InvalidParameter(format!("The proof is invalid: {e}")))
    }

    /// Register the proof unless the manager already knows it.
    fn register_proof_if_needed(&self, proof: ProofRef) -> Result<()> {
        let mut pm = self.peer_manager.write();
        if pm.get_proof(&proof.id()).is_some() {
            return Ok(());
        }
        match pm.register_proof(proof, self.coins.as_ref()) {
            Ok(_) => Ok(()),
            Err(e) => Err(RpcError::InvalidParameter(format!(
                "The proof was not accepted: {e}"
            ))),
        }
    }

    /// Add a node to the set of peers to poll.
    ///
    /// The supplied public key must be the proof's master key; delegated
    /// keys are not supported here.
    pub fn add_avalanche_node(
        &self,
        node_id: NodeId,
        pubkey_hex: &str,
        proof_hex: &str,
    ) -> Result<bool> {
        let key = PubKey::from_hex(pubkey_hex)
            .map_err(|e| RpcError::InvalidAddressOrKey(format!("Invalid public key: {e}")))?;
        let proof = self.decode_proof(proof_hex)?;
        self.verify_or_reject(&proof)?;

        if &key != proof.master() {
            return Err(RpcError::InvalidAddressOrKey(
                "The public key does not match the proof".into(),
            ));
        }

        let proofid = proof.id();
        self.register_proof_if_needed(proof)?;

        let mut pm = self.peer_manager.write();
        if !pm.add_node(node_id, proofid) {
            return Ok(false);
        }
        pm.add_unbroadcast_proof(proofid);
        info!(node_id, proofid = %proofid, "added avalanche node");
        Ok(true)
    }

    /// Register a proof and queue it for announcement.
    pub fn send_avalanche_proof(&self, proof_hex: &str) -> Result<bool> {
        let proof = self.decode_proof(proof_hex)?;
        self.verify_or_reject(&proof)?;

        let proofid = proof.id();
        self.register_proof_if_needed(proof)?;

        let mut pm = self.peer_manager.write();
        let queued = pm.add_unbroadcast_proof(proofid);
        debug!(proofid = %proofid, queued, "send avalanche proof");
        Ok(queued)
    }

    /// Validate a proof without touching the manager.
    pub fn verify_avalanche_proof(&self, proof_hex: &str) -> Result<bool> {
        let proof = self.decode_proof(proof_hex)?;
        self.verify_or_reject(&proof)?;
        Ok(true)
    }

    /// Look up a known proof by id.
    pub fn get_raw_avalanche_proof(&self, proofid_hex: &str) -> Result<RawProofResponse> {
        let proofid = ProofId::from_hex(proofid_hex)
            .map_err(|e| RpcError::Deserialization(e.to_string()))?;

        let pm = self.peer_manager.read();
        let proof = pm.get_proof(&proofid).ok_or(RpcError::ProofNotFound)?;
        Ok(RawProofResponse {
            proof: proof.to_hex(),
            orphan: pm.is_orphan(&proofid),
            bound_to_peer: pm.is_bound_to_peer(&proofid),
        })
    }

    /// Per-peer data, for one proof or for every peer.
    pub fn get_avalanche_peer_info(&self, proofid_hex: Option<&str>) -> Result<Vec<PeerInfo>> {
        let pm = self.peer_manager.read();

        let peer_to_info = |peer: &firn_avalanche::Peer| {
            let mut nodes = Vec::with_capacity(peer.node_count as usize);
            pm.for_each_node(peer, |node| nodes.push(node.node_id));
            PeerInfo {
                peerid: u64::from(peer.peer_id),
                proof: peer.proof.to_hex(),
                nodecount: u64::from(peer.node_count),
                nodes,
            }
        };

        match proofid_hex {
            Some(hex_id) => {
                let proofid = ProofId::from_hex(hex_id)
                    .map_err(|e| RpcError::Deserialization(e.to_string()))?;
                if !pm.is_bound_to_peer(&proofid) {
                    return Err(RpcError::InvalidParameter("Proofid not found".into()));
                }
                Ok(pm.for_peer(&proofid, peer_to_info).into_iter().collect())
            }
            None => {
                let mut out = Vec::new();
                pm.for_each_peer(|peer| out.push(peer_to_info(peer)));
                Ok(out)
            }
        }
    }

    /// Local proof status and network aggregates.
    pub fn get_avalanche_info(&self) -> AvalancheInfo {
        let pm = self.peer_manager.read();

        let local = self.local_proof.as_ref().map(|proof| LocalProofInfo {
            live: pm.is_bound_to_peer(&proof.id()),
            proofid: proof.id().to_hex(),
            limited_proofid: proof.limited_id().to_string(),
            master: proof.master().to_hex(),
            stake_amount: proof.staked_amount(),
        });

        let mut network = NetworkInfo::default();
        let local_id = self.local_proof.as_ref().map(|p| p.id());
        pm.for_each_peer(|peer| {
            // The local proof is reported separately.
            if Some(peer.proof.id()) == local_id {
                return;
            }
            network.proof_count += 1;
            network.total_stake_amount = network
                .total_stake_amount
                .saturating_add(peer.proof.staked_amount());
            if peer.node_count > 0 {
                network.connected_proof_count += 1;
                network.connected_stake_amount = network
                    .connected_stake_amount
                    .saturating_add(peer.proof.staked_amount());
            }
        });

        let connected = pm.get_node_count() as u64;
        let pending = pm.get_pending_node_count() as u64;
        network.node_count = connected + pending;
        network.connected_node_count = connected;
        network.pending_node_count = pending;

        AvalancheInfo { local, network }
    }

    /// Chain tip notification: keep the local proof registered, then
    /// rescan every retained proof.
    pub fn updated_block_tip(&self) {
        let mut pm = self.peer_manager.write();
        if let Some(proof) = &self.local_proof {
            let _ = pm.register_proof(proof.clone(), self.coins.as_ref());
        }
        pm.updated_block_tip(self.coins.as_ref());
        debug!("avalanche rescan after tip update");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firn_avalanche::{AvalancheConfig, ProofBuilder};
    use firn_common::{Coin, Hash256, MemoryCoinView, Outpoint};

    fn outpoint(seed: u8) -> Outpoint {
        Outpoint::new(Hash256([seed; 32]), 0)
    }

    fn pubkey(seed: u8) -> PubKey {
        PubKey([seed; 33])
    }

    fn build_proof(coins: &mut MemoryCoinView, master: PubKey, seed: u8) -> ProofRef {
        let utxo = outpoint(seed);
        let amount = Amount::from_coins(10);
        coins.add_coin(utxo, Coin::new(amount, 100, false));

        let mut builder = ProofBuilder::new(0, 0, master);
        builder.add_utxo(utxo, amount, 100, false, pubkey(0x77));
        builder.build()
    }

    fn make_rpc(coins: MemoryCoinView) -> AvalancheRpc {
        let pm = Arc::new(RwLock::new(PeerManager::new(AvalancheConfig::default())));
        AvalancheRpc::new(pm, Arc::new(coins))
    }

    #[test]
    fn test_add_avalanche_node() {
        let mut coins = MemoryCoinView::new();
        let master = pubkey(0x31);
        let proof = build_proof(&mut coins, master, 1);
        let rpc = make_rpc(coins);

        assert!(rpc
            .add_avalanche_node(7, &master.to_hex(), &proof.to_hex())
            .unwrap());

        let peers = rpc.get_avalanche_peer_info(None).unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].nodecount, 1);
        assert_eq!(peers[0].nodes, vec![7]);
        assert_eq!(peers[0].proof, proof.to_hex());

        // The proof is queued for announcement.
        let pm = rpc.peer_manager.read();
        assert_eq!(pm.unbroadcast_proofs(), vec![proof.id()]);
    }

    #[test]
    fn test_add_avalanche_node_key_mismatch() {
        let mut coins = MemoryCoinView::new();
        let proof = build_proof(&mut coins, pubkey(0x31), 1);
        let rpc = make_rpc(coins);

        let err = rpc
            .add_avalanche_node(7, &pubkey(0x32).to_hex(), &proof.to_hex())
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidAddressOrKey(_)));
    }

    #[test]
    fn test_add_avalanche_node_rejects_garbage() {
        let rpc = make_rpc(MemoryCoinView::new());

        assert!(matches!(
            rpc.add_avalanche_node(7, "zz", "00"),
            Err(RpcError::InvalidAddressOrKey(_))
        ));
        assert!(matches!(
            rpc.add_avalanche_node(7, &pubkey(1).to_hex(), "not hex"),
            Err(RpcError::Deserialization(_))
        ));

        // Structurally invalid: no stake.
        let empty = ProofBuilder::new(0, 0, pubkey(1)).build();
        assert!(matches!(
            rpc.add_avalanche_node(7, &pubkey(1).to_hex(), &empty.to_hex()),
            Err(RpcError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_send_and_get_raw_proof() {
        let mut coins = MemoryCoinView::new();
        let master = pubkey(0x31);
        let proof = build_proof(&mut coins, master, 1);
        let rpc = make_rpc(coins);

        assert!(rpc.send_avalanche_proof(&proof.to_hex()).unwrap());

        let raw = rpc.get_raw_avalanche_proof(&proof.id().to_hex()).unwrap();
        assert_eq!(raw.proof, proof.to_hex());
        assert!(!raw.orphan);
        assert!(raw.bound_to_peer);

        assert!(matches!(
            rpc.get_raw_avalanche_proof(&Hash256([5u8; 32]).to_hex()),
            Err(RpcError::ProofNotFound)
        ));
    }

    #[test]
    fn test_verify_avalanche_proof() {
        let mut coins = MemoryCoinView::new();
        let proof = build_proof(&mut coins, pubkey(0x31), 1);
        let rpc = make_rpc(coins);

        assert!(rpc.verify_avalanche_proof(&proof.to_hex()).unwrap());

        let empty = ProofBuilder::new(0, 0, pubkey(1)).build();
        assert!(rpc.verify_avalanche_proof(&empty.to_hex()).is_err());
    }

    #[test]
    fn test_get_avalanche_info() {
        let mut coins = MemoryCoinView::new();
        let master = pubkey(0x31);
        let local = build_proof(&mut coins, master, 1);
        let other = build_proof(&mut coins, pubkey(0x32), 2);

        let pm = Arc::new(RwLock::new(PeerManager::new(AvalancheConfig::default())));
        let rpc = AvalancheRpc::new(pm, Arc::new(coins)).with_local_proof(local.clone());

        // Nothing registered yet.
        let stats = rpc.get_avalanche_info();
        let local_info = stats.local.expect("local proof configured");
        assert!(!local_info.live);
        assert_eq!(stats.network.proof_count, 0);

        // The tip notification registers the local proof; register the
        // other one with a node attached.
        rpc.updated_block_tip();
        assert!(rpc
            .add_avalanche_node(3, &pubkey(0x32).to_hex(), &other.to_hex())
            .unwrap());

        let stats = rpc.get_avalanche_info();
        assert!(stats.local.expect("local proof configured").live);
        assert_eq!(stats.network.proof_count, 1);
        assert_eq!(stats.network.connected_proof_count, 1);
        assert_eq!(stats.network.total_stake_amount, Amount::from_coins(10));
        assert_eq!(stats.network.connected_node_count, 1);
        assert_eq!(stats.network.pending_node_count, 0);
        assert_eq!(stats.network.node_count, 1);
    }

    #[test]
    fn test_peer_info_for_unknown_proof() {
        let rpc = make_rpc(MemoryCoinView::new());

        assert!(matches!(
            rpc.get_avalanche_peer_info(Some(&Hash256([5u8; 32]).to_hex())),
            Err(RpcError::InvalidParameter(_))
        ));
        assert!(matches!(
            rpc.get_avalanche_peer_info(Some("xyz")),
            Err(RpcError::Deserialization(_))
        ));
    }

    #[test]
    fn test_response_serialization_shape() {
        let mut coins = MemoryCoinView::new();
        let master = pubkey(0x31);
        let proof = build_proof(&mut coins, master, 1);
        let rpc = make_rpc(coins);

        rpc.add_avalanche_node(7, &master.to_hex(), &proof.to_hex())
            .unwrap();

        let peers = rpc.get_avalanche_peer_info(None).unwrap();
        let json = serde_json::to_value(&peers).unwrap();
        assert_eq!(json[0]["peerid"], 0);
        assert_eq!(json[0]["nodecount"], 1);
        assert_eq!(json[0]["nodes"][0], 7);

        let info = rpc.get_avalanche_info();
        let json = serde_json::to_value(&info).unwrap();
        // No local proof configured: the field is omitted entirely.
        assert!(json.get("local").is_none());
        assert_eq!(json["network"]["connected_node_count"], 1);
    }
}
