//! Proof model: stakes, identifiers, builder, and structural validation.
//!
//! A proof binds a master key to a set of on-chain UTXOs (stakes). Proofs
//! are immutable once constructed and shared between the manager's pools as
//! [`ProofRef`], so demotion between pools never copies stake data.
//!
//! Two identifiers are derived from the content:
//!
//! - [`LimitedProofId`]: double SHA-256 of everything except the master key
//! - [`ProofId`]: double SHA-256 of the limited id followed by the master
//!   key, matching the upstream `ProofId = hash(LimitedProofId || master)`
//!   scheme
//!
//! The byte encoding used for hashing doubles as a canonical wire form so
//! the RPC layer can round-trip proofs as hex. Signature material is out of
//! scope here; cryptographic verification is the business of external
//! [`ProofVerifier`] implementations.

use crate::error::{ProofDecodeError, ProofValidationError};
use firn_common::{Amount, Hash256, Outpoint, PubKey, COIN};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Maximum number of stakes a proof may commit to.
pub const AVALANCHE_MAX_PROOF_STAKES: usize = 1000;

/// Minimum amount for a single stake.
pub const PROOF_DUST_THRESHOLD: Amount = Amount::from_coins(1);

/// Identifier of a proof: hash over the full content including the master.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProofId(pub Hash256);

/// Identifier of a proof excluding the master key.
///
/// Used by the wire protocol to advertise proofs without revealing which
/// master key signed them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LimitedProofId(pub Hash256);

impl ProofId {
    pub fn from_hex(s: &str) -> Result<Self, firn_common::types::ParseError> {
        Hash256::from_hex(s).map(ProofId)
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Display for ProofId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for ProofId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProofId({})", self.0)
    }
}

impl FromStr for ProofId {
    type Err = firn_common::types::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProofId::from_hex(s)
    }
}

impl fmt::Display for LimitedProofId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for LimitedProofId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LimitedProofId({})", self.0)
    }
}

/// A single UTXO commitment inside a proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stake {
    /// The committed outpoint.
    pub utxo: Outpoint,
    /// Value of the output at commitment time.
    pub amount: Amount,
    /// Height of the block containing the output.
    pub height: u32,
    /// Whether the output is a coinbase output.
    pub is_coinbase: bool,
    /// Key authorized to spend the output.
    pub pubkey: PubKey,
}

/// An immutable avalanche proof.
///
/// Construct through [`ProofBuilder`] (which orders stakes) or
/// [`Proof::new`] for raw stake lists; identifiers and the score are
/// computed eagerly.
#[derive(Clone, Debug)]
pub struct Proof {
    sequence: u64,
    expiration: i64,
    master: PubKey,
    stakes: Vec<Stake>,
    limited_id: LimitedProofId,
    proof_id: ProofId,
    score: u32,
}

/// Shared handle to an immutable proof.
pub type ProofRef = Arc<Proof>;

fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    Hash256(out)
}

impl Proof {
    /// Build a proof from raw parts. No validation is performed; run a
    /// [`ProofVerifier`] before trusting the result.
    pub fn new(sequence: u64, expiration: i64, master: PubKey, stakes: Vec<Stake>) -> Self {
        let limited_bytes = encode_limited(sequence, expiration, &stakes);
        let limited_id = LimitedProofId(sha256d(&limited_bytes));

        let mut full = Vec::with_capacity(32 + 33);
        full.extend_from_slice(limited_id.0.as_bytes());
        full.extend_from_slice(master.as_bytes());
        let proof_id = ProofId(sha256d(&full));

        // Amounts may come from an untrusted encoding; saturate instead of
        // wrapping.
        let staked: Amount = stakes.iter().map(|s| s.amount).sum();
        let score = ((100i128 * i128::from(staked.sats())) / i128::from(COIN))
            .clamp(0, i128::from(u32::MAX)) as u32;

        Self {
            sequence,
            expiration,
            master,
            stakes,
            limited_id,
            proof_id,
            score,
        }
    }

    pub fn id(&self) -> ProofId {
        self.proof_id
    }

    pub fn limited_id(&self) -> LimitedProofId {
        self.limited_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn expiration(&self) -> i64 {
        self.expiration
    }

    pub fn master(&self) -> &PubKey {
        &self.master
    }

    /// The stakes, in the order they were committed.
    pub fn stakes(&self) -> &[Stake] {
        &self.stakes
    }

    /// Total committed amount.
    pub fn staked_amount(&self) -> Amount {
        self.stakes.iter().map(|s| s.amount).sum()
    }

    /// Selection weight: `100 * staked_amount / COIN`, matching the chain's
    /// scoring rule.
    pub fn score(&self) -> u32 {
        self.score
    }

    /// Canonical byte encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = encode_limited(self.sequence, self.expiration, &self.stakes);
        out.extend_from_slice(self.master.as_bytes());
        out
    }

    /// Decode from the canonical byte encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProofDecodeError> {
        let mut r = Reader::new(bytes);

        let sequence = r.read_u64()?;
        let expiration = r.read_u64()? as i64;
        let count = r.read_u32()?;
        if count as usize > AVALANCHE_MAX_PROOF_STAKES {
            return Err(ProofDecodeError::OversizedStakeList(count));
        }

        let mut stakes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let txid = Hash256(r.read_array::<32>()?);
            let n = r.read_u32()?;
            let amount = Amount::from_sats(r.read_u64()? as i64);
            let packed = r.read_u32()?;
            let pubkey = PubKey(r.read_array::<33>()?);
            stakes.push(Stake {
                utxo: Outpoint::new(txid, n),
                amount,
                height: packed >> 1,
                is_coinbase: packed & 1 == 1,
                pubkey,
            });
        }

        let master = PubKey(r.read_array::<33>()?);
        if !r.is_empty() {
            return Err(ProofDecodeError::TrailingBytes);
        }

        Ok(Proof::new(sequence, expiration, master, stakes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, ProofDecodeError> {
        Proof::from_bytes(&hex::decode(s)?)
    }
}

fn encode_limited(sequence: u64, expiration: i64, stakes: &[Stake]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 8 + 4 + stakes.len() * 81);
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&expiration.to_le_bytes());
    out.extend_from_slice(&(stakes.len() as u32).to_le_bytes());
    for stake in stakes {
        out.extend_from_slice(stake.utxo.txid.as_bytes());
        out.extend_from_slice(&stake.utxo.n.to_le_bytes());
        out.extend_from_slice(&(stake.amount.sats() as u64).to_le_bytes());
        let packed = (stake.height << 1) | u32::from(stake.is_coinbase);
        out.extend_from_slice(&packed.to_le_bytes());
        out.extend_from_slice(stake.pubkey.as_bytes());
    }
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProofDecodeError> {
        if self.bytes.len() < n {
            return Err(ProofDecodeError::Truncated);
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn read_u32(&mut self) -> Result<u32, ProofDecodeError> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    fn read_u64(&mut self) -> Result<u64, ProofDecodeError> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProofDecodeError> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Incrementally assemble a proof.
///
/// Stakes are sorted by outpoint at build time so the result always
/// satisfies the ordering rule; duplicate outpoints are refused at
/// insertion.
pub struct ProofBuilder {
    sequence: u64,
    expiration: i64,
    master: PubKey,
    stakes: Vec<Stake>,
}

impl ProofBuilder {
    pub fn new(sequence: u64, expiration: i64, master: PubKey) -> Self {
        Self {
            sequence,
            expiration,
            master,
            stakes: Vec::new(),
        }
    }

    /// Add a stake; returns false if the outpoint is already committed.
    pub fn add_utxo(
        &mut self,
        utxo: Outpoint,
        amount: Amount,
        height: u32,
        is_coinbase: bool,
        pubkey: PubKey,
    ) -> bool {
        if self.stakes.iter().any(|s| s.utxo == utxo) {
            return false;
        }
        self.stakes.push(Stake {
            utxo,
            amount,
            height,
            is_coinbase,
            pubkey,
        });
        true
    }

    pub fn build(mut self) -> ProofRef {
        self.stakes.sort_by_key(|s| s.utxo);
        Arc::new(Proof::new(
            self.sequence,
            self.expiration,
            self.master,
            self.stakes,
        ))
    }
}

/// Structural and cryptographic proof validation.
///
/// The peer manager consults one implementation before classifying a
/// registration. Implementations answering from chain or key material live
/// outside this crate.
pub trait ProofVerifier: Send + Sync {
    fn verify(&self, proof: &Proof) -> Result<(), ProofValidationError>;
}

/// The non-cryptographic subset of proof validation: stake presence,
/// count, ordering, and dust limits.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralVerifier;

impl ProofVerifier for StructuralVerifier {
    fn verify(&self, proof: &Proof) -> Result<(), ProofValidationError> {
        let stakes = proof.stakes();

        if stakes.is_empty() {
            return Err(ProofValidationError::NoStake);
        }
        if stakes.len() > AVALANCHE_MAX_PROOF_STAKES {
            return Err(ProofValidationError::TooManyUtxos {
                max: AVALANCHE_MAX_PROOF_STAKES,
            });
        }

        for pair in stakes.windows(2) {
            match pair[0].utxo.cmp(&pair[1].utxo) {
                std::cmp::Ordering::Less => {}
                std::cmp::Ordering::Equal => return Err(ProofValidationError::DuplicateStake),
                std::cmp::Ordering::Greater => {
                    return Err(ProofValidationError::WrongStakeOrdering)
                }
            }
        }

        if stakes.iter().any(|s| s.amount < PROOF_DUST_THRESHOLD) {
            return Err(ProofValidationError::DustThreshold);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outpoint(seed: u8, n: u32) -> Outpoint {
        Outpoint::new(Hash256([seed; 32]), n)
    }

    fn stake(seed: u8, n: u32, coins: i64) -> Stake {
        Stake {
            utxo: outpoint(seed, n),
            amount: Amount::from_coins(coins),
            height: 100,
            is_coinbase: false,
            pubkey: PubKey([7u8; 33]),
        }
    }

    #[test]
    fn test_proof_ids_are_content_derived() {
        let a = Proof::new(1, 0, PubKey([1u8; 33]), vec![stake(1, 0, 10)]);
        let b = Proof::new(1, 0, PubKey([1u8; 33]), vec![stake(1, 0, 10)]);
        let c = Proof::new(2, 0, PubKey([1u8; 33]), vec![stake(1, 0, 10)]);

        assert_eq!(a.id(), b.id());
        assert_eq!(a.limited_id(), b.limited_id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_master_changes_proof_id_not_limited_id() {
        let a = Proof::new(1, 0, PubKey([1u8; 33]), vec![stake(1, 0, 10)]);
        let b = Proof::new(1, 0, PubKey([2u8; 33]), vec![stake(1, 0, 10)]);

        assert_eq!(a.limited_id(), b.limited_id());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_score_and_staked_amount() {
        let proof = Proof::new(
            0,
            0,
            PubKey([1u8; 33]),
            vec![stake(1, 0, 10), stake(2, 0, 20)],
        );

        assert_eq!(proof.staked_amount(), Amount::from_coins(30));
        assert_eq!(proof.score(), 3000);
    }

    #[test]
    fn test_score_rounds_down() {
        let proof = Proof::new(
            0,
            0,
            PubKey([1u8; 33]),
            vec![Stake {
                amount: Amount::from_sats(COIN + COIN / 200),
                ..stake(1, 0, 1)
            }],
        );

        // 1.005 coins scores as 100, not 100.5.
        assert_eq!(proof.score(), 100);
    }

    #[test]
    fn test_score_saturates_on_oversized_amounts() {
        let huge = Amount::from_sats(i64::MAX / 2 + 1);
        let proof = Proof::new(
            0,
            0,
            PubKey([1u8; 33]),
            vec![
                Stake {
                    amount: huge,
                    ..stake(1, 0, 1)
                },
                Stake {
                    amount: huge,
                    ..stake(2, 0, 1)
                },
            ],
        );

        // The total saturates rather than wrapping, and the score pins at
        // the u32 ceiling.
        assert_eq!(proof.staked_amount(), Amount::from_sats(i64::MAX));
        assert_eq!(proof.score(), u32::MAX);

        // The same stakes arriving off the wire decode without panicking.
        let decoded = Proof::from_bytes(&proof.to_bytes()).unwrap();
        assert_eq!(decoded.score(), u32::MAX);
        assert_eq!(decoded.id(), proof.id());
    }

    #[test]
    fn test_builder_sorts_and_rejects_duplicates() {
        let mut builder = ProofBuilder::new(5, 99, PubKey([1u8; 33]));
        assert!(builder.add_utxo(
            outpoint(9, 0),
            Amount::from_coins(1),
            10,
            false,
            PubKey([2u8; 33])
        ));
        assert!(builder.add_utxo(
            outpoint(3, 0),
            Amount::from_coins(2),
            10,
            false,
            PubKey([2u8; 33])
        ));
        assert!(!builder.add_utxo(
            outpoint(9, 0),
            Amount::from_coins(3),
            10,
            false,
            PubKey([2u8; 33])
        ));

        let proof = builder.build();
        assert_eq!(proof.stakes().len(), 2);
        assert!(proof.stakes()[0].utxo < proof.stakes()[1].utxo);
        assert!(StructuralVerifier.verify(&proof).is_ok());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let mut builder = ProofBuilder::new(42, -1, PubKey([8u8; 33]));
        builder.add_utxo(
            outpoint(1, 3),
            Amount::from_coins(7),
            1234,
            true,
            PubKey([9u8; 33]),
        );
        let proof = builder.build();

        let decoded = Proof::from_bytes(&proof.to_bytes()).unwrap();
        assert_eq!(decoded.id(), proof.id());
        assert_eq!(decoded.sequence(), 42);
        assert_eq!(decoded.expiration(), -1);
        assert_eq!(decoded.stakes(), proof.stakes());
        assert!(decoded.stakes()[0].is_coinbase);
        assert_eq!(decoded.stakes()[0].height, 1234);

        let hex_form = proof.to_hex();
        assert_eq!(Proof::from_hex(&hex_form).unwrap().id(), proof.id());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Proof::from_bytes(&[0u8; 4]),
            Err(ProofDecodeError::Truncated)
        ));

        let proof = ProofBuilder::new(0, 0, PubKey([1u8; 33])).build();
        let mut bytes = proof.to_bytes();
        bytes.push(0);
        assert!(matches!(
            Proof::from_bytes(&bytes),
            Err(ProofDecodeError::TrailingBytes)
        ));

        assert!(Proof::from_hex("not hex").is_err());
    }

    #[test]
    fn test_structural_verifier() {
        let master = PubKey([1u8; 33]);

        let empty = Proof::new(0, 0, master, vec![]);
        assert_eq!(
            StructuralVerifier.verify(&empty),
            Err(ProofValidationError::NoStake)
        );

        let duplicated = Proof::new(0, 0, master, vec![stake(1, 0, 5), stake(1, 0, 5)]);
        assert_eq!(
            StructuralVerifier.verify(&duplicated),
            Err(ProofValidationError::DuplicateStake)
        );

        let misordered = Proof::new(0, 0, master, vec![stake(2, 0, 5), stake(1, 0, 5)]);
        assert_eq!(
            StructuralVerifier.verify(&misordered),
            Err(ProofValidationError::WrongStakeOrdering)
        );

        let dusty = Proof::new(
            0,
            0,
            master,
            vec![Stake {
                amount: Amount::from_sats(10),
                ..stake(1, 0, 1)
            }],
        );
        assert_eq!(
            StructuralVerifier.verify(&dusty),
            Err(ProofValidationError::DustThreshold)
        );

        let ok = Proof::new(0, 0, master, vec![stake(1, 0, 5), stake(2, 0, 5)]);
        assert!(StructuralVerifier.verify(&ok).is_ok());
    }
}
