//! Transactions: bodies, hashing, signing and priority pricing.

use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::block::BlockId;
use crate::params;

/// Content hash of a transaction, the ingress dedup key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; blake3::OUT_LEN]);

impl TxHash {
    pub fn as_bytes(&self) -> &[u8; blake3::OUT_LEN] {
        &self.0
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Logical transaction id, bound to the signer. Used for user-facing
/// logging; differs from [`TxHash`] because it commits to the recovered
/// origin rather than the raw signature bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TxId(pub [u8; blake3::OUT_LEN]);

impl TxId {
    pub fn as_bytes(&self) -> &[u8; blake3::OUT_LEN] {
        &self.0
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Transaction feature bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Features(u32);

impl Features {
    /// Fee delegation.
    pub const DELEGATED: Features = Features(1);

    pub const fn empty() -> Self {
        Features(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Features(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Features) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Features {
    type Output = Features;

    fn bitor(self, rhs: Features) -> Features {
        Features(self.0 | rhs.0)
    }
}

/// An 8-byte prefix of a [`BlockId`], carried by a transaction as its
/// earliest-inclusion constraint. The first 4 bytes are the big-endian
/// block number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockRef(pub [u8; 8]);

impl BlockRef {
    /// A reference to block `number`, with an unconstrained id suffix.
    pub fn new(number: u32) -> Self {
        let mut raw = [0u8; 8];
        raw[..4].copy_from_slice(&number.to_be_bytes());
        Self(raw)
    }

    /// The full 8-byte prefix of `id`.
    pub fn from_id(id: &BlockId) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&id.as_bytes()[..8]);
        Self(raw)
    }

    /// The block number encoded in the reference.
    pub fn number(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Whether `id` satisfies the reference (prefix match).
    pub fn matches(&self, id: &BlockId) -> bool {
        self.0 == id.as_bytes()[..8]
    }
}

/// A signed transaction.
///
/// Hashes and size are computed once at construction; the origin is
/// verified lazily and cached.
#[derive(Clone, Debug)]
pub struct Transaction {
    chain_tag: u8,
    block_ref: BlockRef,
    expiration: u32,
    to: Option<Address>,
    value: u128,
    payload: Vec<u8>,
    gas: u64,
    gas_price_coef: u8,
    depends_on: Option<TxId>,
    nonce: u64,
    features: Features,
    sender: [u8; 32],
    signature: [u8; 64],

    hash: TxHash,
    signing_hash: [u8; blake3::OUT_LEN],
    size: usize,
    origin: OnceLock<Option<Address>>,
}

/// A batch of shared transactions.
pub type Transactions = Vec<Arc<Transaction>>;

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    fn new(
        chain_tag: u8,
        block_ref: BlockRef,
        expiration: u32,
        to: Option<Address>,
        value: u128,
        payload: Vec<u8>,
        gas: u64,
        gas_price_coef: u8,
        depends_on: Option<TxId>,
        nonce: u64,
        features: Features,
        sender: [u8; 32],
        signature: [u8; 64],
    ) -> Self {
        let mut tx = Self {
            chain_tag,
            block_ref,
            expiration,
            to,
            value,
            payload,
            gas,
            gas_price_coef,
            depends_on,
            nonce,
            features,
            sender,
            signature,
            hash: TxHash([0u8; blake3::OUT_LEN]),
            signing_hash: [0u8; blake3::OUT_LEN],
            size: 0,
            origin: OnceLock::new(),
        };
        let signing = tx.encode(false);
        tx.signing_hash = blake3::hash(&signing).into();
        let full = tx.encode(true);
        tx.hash = TxHash(blake3::hash(&full).into());
        tx.size = full.len();
        tx
    }

    /// Canonical binary encoding, with or without the signature tail.
    fn encode(&self, include_signature: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.payload.len());
        out.push(self.chain_tag);
        out.extend_from_slice(&self.block_ref.0);
        out.extend_from_slice(&self.expiration.to_be_bytes());
        match &self.to {
            Some(addr) => {
                out.push(1);
                out.extend_from_slice(addr.as_bytes());
            }
            None => out.push(0),
        }
        out.extend_from_slice(&self.value.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.gas.to_be_bytes());
        out.push(self.gas_price_coef);
        match &self.depends_on {
            Some(dep) => {
                out.push(1);
                out.extend_from_slice(dep.as_bytes());
            }
            None => out.push(0),
        }
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.features.bits().to_be_bytes());
        out.extend_from_slice(&self.sender);
        if include_signature {
            out.extend_from_slice(&self.signature);
        }
        out
    }

    pub fn chain_tag(&self) -> u8 {
        self.chain_tag
    }

    pub fn block_ref(&self) -> BlockRef {
        self.block_ref
    }

    pub fn expiration(&self) -> u32 {
        self.expiration
    }

    pub fn to(&self) -> Option<&Address> {
        self.to.as_ref()
    }

    pub fn value(&self) -> u128 {
        self.value
    }

    pub fn gas(&self) -> u64 {
        self.gas
    }

    pub fn gas_price_coef(&self) -> u8 {
        self.gas_price_coef
    }

    pub fn depends_on(&self) -> Option<&TxId> {
        self.depends_on.as_ref()
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn features(&self) -> Features {
        self.features
    }

    /// Encoded length in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Content hash over the full encoding.
    pub fn hash(&self) -> TxHash {
        self.hash
    }

    /// Hash of the encoding minus the signature; the message the sender signs.
    pub fn signing_hash(&self) -> [u8; blake3::OUT_LEN] {
        self.signing_hash
    }

    /// Recovers the origin: verifies the signature against the embedded
    /// sender key and returns the derived address.
    pub fn origin(&self) -> Result<Address> {
        self.origin
            .get_or_init(|| {
                let key = VerifyingKey::from_bytes(&self.sender).ok()?;
                let sig = Signature::from_bytes(&self.signature);
                key.verify_strict(&self.signing_hash, &sig).ok()?;
                Some(Address::from_public_key(&key))
            })
            .ok_or_else(|| anyhow!("invalid signature"))
    }

    /// The logical id: commits to the signing hash and the origin.
    pub fn id(&self) -> Result<TxId> {
        let origin = self.origin()?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.signing_hash);
        hasher.update(origin.as_bytes());
        Ok(TxId(hasher.finalize().into()))
    }

    /// Fails when the transaction carries a feature bit the head does not
    /// support.
    pub fn check_features(&self, supported: Features) -> Result<()> {
        if self.features.bits() & !supported.bits() != 0 {
            return Err(anyhow!("unsupported features"));
        }
        Ok(())
    }

    /// The minimum gas the transaction must provide.
    pub fn intrinsic_gas(&self) -> u64 {
        let payload_gas: u64 = self
            .payload
            .iter()
            .map(|b| {
                if *b == 0 {
                    params::PAYLOAD_ZERO_BYTE_GAS
                } else {
                    params::PAYLOAD_NONZERO_BYTE_GAS
                }
            })
            .sum();
        params::TX_GAS + params::CLAUSE_GAS + payload_gas
    }

    /// The declared gas price given the chain's base gas price.
    pub fn gas_price(&self, base_gas_price: u64) -> u64 {
        base_gas_price + base_gas_price * u64::from(self.gas_price_coef) / 255
    }

    /// Priority score: the declared gas price, plus a bonus when the block
    /// reference points at a recent canonical block. `get_block_id` resolves
    /// a block number to the canonical id under the current head.
    pub fn overall_gas_price(
        &self,
        base_gas_price: u64,
        head_number: u32,
        mut get_block_id: impl FnMut(u32) -> BlockId,
    ) -> u64 {
        let price = self.gas_price(base_gas_price);
        let ref_number = self.block_ref.number();
        if ref_number > head_number || head_number - ref_number > params::REF_FRESHNESS {
            return price;
        }
        if self.block_ref.matches(&get_block_id(ref_number)) {
            price + price / 20
        } else {
            price
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Transaction {}

/// Builder for signed transactions.
#[derive(Clone, Debug)]
pub struct TxBuilder {
    chain_tag: u8,
    block_ref: BlockRef,
    expiration: u32,
    to: Option<Address>,
    value: u128,
    payload: Vec<u8>,
    gas: u64,
    gas_price_coef: u8,
    depends_on: Option<TxId>,
    nonce: u64,
    features: Features,
}

impl TxBuilder {
    pub fn new(chain_tag: u8) -> Self {
        Self {
            chain_tag,
            block_ref: BlockRef::default(),
            expiration: 720,
            to: None,
            value: 0,
            payload: Vec::new(),
            gas: 21_000,
            gas_price_coef: 0,
            depends_on: None,
            nonce: 0,
            features: Features::empty(),
        }
    }

    pub fn block_ref(mut self, block_ref: BlockRef) -> Self {
        self.block_ref = block_ref;
        self
    }

    pub fn expiration(mut self, expiration: u32) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn gas(mut self, gas: u64) -> Self {
        self.gas = gas;
        self
    }

    pub fn gas_price_coef(mut self, coef: u8) -> Self {
        self.gas_price_coef = coef;
        self
    }

    pub fn depends_on(mut self, dep: TxId) -> Self {
        self.depends_on = Some(dep);
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Signs the body with `key` and returns the finished transaction.
    pub fn build(self, key: &SigningKey) -> Transaction {
        let sender = key.verifying_key().to_bytes();
        // Assemble once with an empty signature to obtain the signing hash.
        let unsigned = Transaction::new(
            self.chain_tag,
            self.block_ref,
            self.expiration,
            self.to,
            self.value,
            self.payload.clone(),
            self.gas,
            self.gas_price_coef,
            self.depends_on,
            self.nonce,
            self.features,
            sender,
            [0u8; 64],
        );
        let signature = key.sign(&unsigned.signing_hash()).to_bytes();
        Transaction::new(
            self.chain_tag,
            self.block_ref,
            self.expiration,
            self.to,
            self.value,
            self.payload,
            self.gas,
            self.gas_price_coef,
            self.depends_on,
            self.nonce,
            self.features,
            sender,
            signature,
        )
    }
}
