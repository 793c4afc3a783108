//! Read-only access to the active chain's coin set.
//!
//! The avalanche subsystem never owns chain state. It consults a
//! [`CoinView`] positioned by the caller at a consistent chain tip, and the
//! caller is responsible for holding whatever chain lock keeps that view
//! stable for the duration of the call.
//!
//! [`MemoryCoinView`] is a complete in-memory implementation used by the
//! test suites and by embedders that maintain their own UTXO set.

use crate::types::{Amount, Outpoint, Script};
use std::collections::HashMap;

/// An unspent transaction output as seen by the active chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coin {
    /// Value of the output.
    pub amount: Amount,
    /// Locking script of the output.
    pub script_pubkey: Script,
    /// Height of the block containing the output.
    pub height: u32,
    /// Whether the output comes from a coinbase transaction.
    pub is_coinbase: bool,
}

impl Coin {
    pub fn new(amount: Amount, height: u32, is_coinbase: bool) -> Self {
        Self {
            amount,
            script_pubkey: Script::default(),
            height,
            is_coinbase,
        }
    }
}

/// A synchronous oracle over the active chain's unspent outputs.
///
/// Implementations must answer from a single consistent snapshot for the
/// duration of one manager call.
pub trait CoinView: Send + Sync {
    /// Look up an unspent output, or `None` if it is absent from the view.
    fn lookup(&self, outpoint: &Outpoint) -> Option<Coin>;
}

/// An in-memory [`CoinView`].
///
/// Mutation methods mirror a chainstate cache: coins are added when a block
/// connects and spent when a transaction consumes them.
#[derive(Default)]
pub struct MemoryCoinView {
    coins: HashMap<Outpoint, Coin>,
}

impl MemoryCoinView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a coin.
    pub fn add_coin(&mut self, outpoint: Outpoint, coin: Coin) {
        self.coins.insert(outpoint, coin);
    }

    /// Remove a coin; returns true if it was present.
    pub fn spend_coin(&mut self, outpoint: &Outpoint) -> bool {
        self.coins.remove(outpoint).is_some()
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}

impl CoinView for MemoryCoinView {
    fn lookup(&self, outpoint: &Outpoint) -> Option<Coin> {
        self.coins.get(outpoint).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash256;

    fn outpoint(seed: u8) -> Outpoint {
        Outpoint::new(Hash256([seed; 32]), 0)
    }

    #[test]
    fn test_memory_coin_view_add_spend() {
        let mut view = MemoryCoinView::new();
        let o = outpoint(1);

        assert!(view.lookup(&o).is_none());

        view.add_coin(o, Coin::new(Amount::from_coins(5), 100, false));
        let coin = view.lookup(&o).unwrap();
        assert_eq!(coin.amount, Amount::from_coins(5));
        assert_eq!(coin.height, 100);
        assert!(!coin.is_coinbase);

        assert!(view.spend_coin(&o));
        assert!(!view.spend_coin(&o));
        assert!(view.lookup(&o).is_none());
    }

    #[test]
    fn test_memory_coin_view_replace() {
        let mut view = MemoryCoinView::new();
        let o = outpoint(2);

        view.add_coin(o, Coin::new(Amount::from_coins(1), 10, false));
        view.add_coin(o, Coin::new(Amount::from_coins(1), 20, true));

        let coin = view.lookup(&o).unwrap();
        assert_eq!(coin.height, 20);
        assert!(coin.is_coinbase);
    }
}
