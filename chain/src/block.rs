//! Blocks and headers.

use crate::address::Address;
use crate::state::StateRoot;
use crate::tx::{Features, Transactions};

/// A 32-byte block id. The first 4 bytes carry the big-endian block
/// number, so the number can be read off any id or reference prefix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlockId(pub [u8; blake3::OUT_LEN]);

impl BlockId {
    pub fn as_bytes(&self) -> &[u8; blake3::OUT_LEN] {
        &self.0
    }

    /// The block number embedded in the id.
    pub fn number(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}…{}", self.number(), hex::encode(&self.0[28..]))
    }
}

/// [`Header`] carries everything the pool and packer need from a block:
/// chain position, gas accounting, the state root to open views at, and
/// the transaction feature bits the block supports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    parent_id: BlockId,
    number: u32,
    timestamp: u64,
    gas_limit: u64,
    gas_used: u64,
    state_root: StateRoot,
    txs_features: Features,
    beneficiary: Address,
}

impl Header {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent_id: BlockId,
        number: u32,
        timestamp: u64,
        gas_limit: u64,
        gas_used: u64,
        state_root: StateRoot,
        txs_features: Features,
        beneficiary: Address,
    ) -> Self {
        Self {
            parent_id,
            number,
            timestamp,
            gas_limit,
            gas_used,
            state_root,
            txs_features,
            beneficiary,
        }
    }

    pub fn parent_id(&self) -> &BlockId {
        &self.parent_id
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn state_root(&self) -> &StateRoot {
        &self.state_root
    }

    pub fn txs_features(&self) -> Features {
        self.txs_features
    }

    pub fn beneficiary(&self) -> &Address {
        &self.beneficiary
    }

    /// The block id: blake3 of the header encoding, with the number
    /// overwritten into the first 4 bytes.
    pub fn id(&self) -> BlockId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.parent_id.as_bytes());
        hasher.update(&self.number.to_be_bytes());
        hasher.update(&self.timestamp.to_be_bytes());
        hasher.update(&self.gas_limit.to_be_bytes());
        hasher.update(&self.gas_used.to_be_bytes());
        hasher.update(self.state_root.as_bytes());
        hasher.update(&self.txs_features.bits().to_be_bytes());
        hasher.update(self.beneficiary.as_bytes());
        let mut id: [u8; blake3::OUT_LEN] = hasher.finalize().into();
        id[..4].copy_from_slice(&self.number.to_be_bytes());
        BlockId(id)
    }
}

/// A sealed block: header, transactions and the packer's signature over
/// the block id.
#[derive(Clone, Debug)]
pub struct Block {
    header: Header,
    transactions: Transactions,
    signature: [u8; 64],
}

impl Block {
    pub fn new(header: Header, transactions: Transactions, signature: [u8; 64]) -> Self {
        Self {
            header,
            transactions,
            signature,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn transactions(&self) -> &Transactions {
        &self.transactions
    }

    pub fn signature(&self) -> &[u8; 64] {
        &self.signature
    }

    pub fn id(&self) -> BlockId {
        self.header.id()
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Block {}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(number: u32, timestamp: u64) -> Header {
        Header::new(
            BlockId::default(),
            number,
            timestamp,
            10_000_000,
            0,
            StateRoot::default(),
            Features::empty(),
            Address::from_bytes([3u8; 32]),
        )
    }

    #[test]
    fn id_embeds_block_number() {
        let h = header(42, 1_000);
        assert_eq!(h.id().number(), 42);
    }

    #[test]
    fn id_is_content_addressed() {
        let a = header(1, 1_000);
        let b = header(1, 1_001);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), header(1, 1_000).id());
    }
}
