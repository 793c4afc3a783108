//! End-to-end reorg scenarios through the public API only.

use firn_avalanche::{
    AvalancheConfig, PeerManager, ProofBuilder, RegistrationError, NO_PEER,
};
use firn_common::{Amount, Coin, Hash256, MemoryCoinView, Outpoint, PubKey};

fn outpoint(seed: u8) -> Outpoint {
    Outpoint::new(Hash256([seed; 32]), 0)
}

fn pubkey(seed: u8) -> PubKey {
    PubKey([seed; 33])
}

fn coin(coins: i64) -> Coin {
    Coin::new(Amount::from_coins(coins), 100, false)
}

#[test]
fn orphan_promotion_on_tip_update() {
    let mut coins = MemoryCoinView::new();
    let mut pm = PeerManager::new(AvalancheConfig::default());

    // u1 exists, u2 does not: the proof is an orphan.
    let u1 = outpoint(1);
    let u2 = outpoint(2);
    coins.add_coin(u1, coin(10));

    let mut builder = ProofBuilder::new(0, 0, pubkey(0x11));
    builder.add_utxo(u1, Amount::from_coins(10), 100, false, pubkey(0x21));
    builder.add_utxo(u2, Amount::from_coins(10), 100, false, pubkey(0x21));
    let proof = builder.build();

    assert_eq!(
        pm.register_proof(proof.clone(), &coins),
        Err(RegistrationError::MissingUtxo)
    );
    assert!(pm.is_orphan(&proof.id()));

    // Supply u2: the next rescan binds the proof as a peer.
    coins.add_coin(u2, coin(10));
    pm.updated_block_tip(&coins);

    assert!(!pm.is_orphan(&proof.id()));
    assert!(pm.is_bound_to_peer(&proof.id()));
    assert!(pm.verify());
}

#[test]
fn reorg_unbinds_and_rebinds_nodes() {
    let mut coins = MemoryCoinView::new();
    let mut pm = PeerManager::new(AvalancheConfig::default());

    let u1 = outpoint(3);
    coins.add_coin(u1, coin(10));

    let mut builder = ProofBuilder::new(0, 0, pubkey(0x12));
    builder.add_utxo(u1, Amount::from_coins(10), 100, false, pubkey(0x22));
    let proof = builder.build();

    assert!(pm.register_proof(proof.clone(), &coins).is_ok());
    for node in 0..10 {
        assert!(pm.add_node(node, proof.id()));
    }
    assert_eq!(pm.get_node_count(), 10);
    assert_eq!(pm.get_pending_node_count(), 0);

    // Spend the stake: the proof is orphaned and the nodes wait.
    coins.spend_coin(&u1);
    pm.updated_block_tip(&coins);

    assert!(pm.is_orphan(&proof.id()));
    assert_eq!(pm.get_node_count(), 0);
    assert_eq!(pm.get_pending_node_count(), 10);

    // Restore the stake: the proof returns and every node rebinds.
    coins.add_coin(u1, coin(10));
    pm.updated_block_tip(&coins);

    assert!(pm.is_bound_to_peer(&proof.id()));
    assert_eq!(pm.get_node_count(), 10);
    assert_eq!(pm.get_pending_node_count(), 0);

    let peer_id = pm.for_peer(&proof.id(), |p| p.peer_id).unwrap_or(NO_PEER);
    assert_ne!(peer_id, NO_PEER);
    for node in 0..10 {
        assert!(pm
            .for_node(node, |n| n.peer_id == peer_id)
            .unwrap_or(false));
    }
    assert!(pm.verify());
}

#[test]
fn fragmentation_accounting_and_compaction() {
    let mut coins = MemoryCoinView::new();
    let mut pm = PeerManager::new(AvalancheConfig::default());

    let mut peer_ids = Vec::new();
    for seed in 0..4u8 {
        let u = outpoint(0x40 + seed);
        coins.add_coin(u, coin(1));
        let mut builder = ProofBuilder::new(0, 0, pubkey(0x50 + seed));
        builder.add_utxo(u, Amount::from_coins(1), 100, false, pubkey(0x60 + seed));
        let proof = builder.build();
        assert!(pm.register_proof(proof.clone(), &coins).is_ok());
        peer_ids.push(pm.for_peer(&proof.id(), |p| p.peer_id).unwrap_or(NO_PEER));
    }

    assert_eq!(pm.get_slot_count(), 400);
    assert_eq!(pm.get_fragmentation(), 0);

    // Remove a middle peer: the width is tombstoned, not reclaimed.
    assert!(pm.remove_peer(peer_ids[2]));
    assert_eq!(pm.get_slot_count(), 400);
    assert_eq!(pm.get_fragmentation(), 100);

    for _ in 0..100 {
        assert_ne!(pm.select_peer(), peer_ids[2]);
    }

    assert_eq!(pm.compact(), 100);
    assert_eq!(pm.get_slot_count(), 300);
    assert_eq!(pm.get_fragmentation(), 0);

    // After compaction every draw hits a live peer.
    for _ in 0..100 {
        let p = pm.select_peer();
        assert!(p == peer_ids[0] || p == peer_ids[1] || p == peer_ids[3]);
    }
    assert!(pm.verify());
}
