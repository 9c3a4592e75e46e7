//! In-memory chain repository.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Error, Result};

use crate::block::{Block, BlockId};
use crate::packer::Receipt;
use crate::tx::TxId;

struct Inner {
    blocks: HashMap<BlockId, Arc<Block>>,
    receipts: HashMap<BlockId, Arc<Vec<Receipt>>>,
    tx_locations: HashMap<TxId, BlockId>,
    best: BlockId,
}

/// Block store plus best-block pointer. Internally synchronized; all
/// mutation goes through its public operations.
pub struct Repository {
    inner: RwLock<Inner>,
    genesis_id: BlockId,
    tag: u8,
}

impl Repository {
    pub fn new(genesis: Block) -> Self {
        let genesis_id = genesis.id();
        // The chain tag is the last byte of the genesis id.
        let tag = genesis_id.as_bytes()[blake3::OUT_LEN - 1];
        let mut blocks = HashMap::new();
        blocks.insert(genesis_id, Arc::new(genesis));
        Self {
            inner: RwLock::new(Inner {
                blocks,
                receipts: HashMap::new(),
                tx_locations: HashMap::new(),
                best: genesis_id,
            }),
            genesis_id,
            tag,
        }
    }

    pub fn chain_tag(&self) -> u8 {
        self.tag
    }

    pub fn genesis_id(&self) -> &BlockId {
        &self.genesis_id
    }

    pub fn best_block(&self) -> Arc<Block> {
        let inner = self.inner.read().expect("repository lock poisoned");
        Arc::clone(&inner.blocks[&inner.best])
    }

    pub fn get_block(&self, id: &BlockId) -> Option<Arc<Block>> {
        let inner = self.inner.read().expect("repository lock poisoned");
        inner.blocks.get(id).cloned()
    }

    pub fn get_receipts(&self, id: &BlockId) -> Option<Arc<Vec<Receipt>>> {
        let inner = self.inner.read().expect("repository lock poisoned");
        inner.receipts.get(id).cloned()
    }

    /// Whether a transaction with `id` has been included on chain.
    pub fn has_transaction(&self, id: &TxId) -> bool {
        let inner = self.inner.read().expect("repository lock poisoned");
        inner.tx_locations.contains_key(id)
    }

    /// Stores a block; its parent must already be known. Does not move the
    /// best-block pointer.
    pub fn add_block(&self, block: Block, receipts: Vec<Receipt>) -> Result<()> {
        let id = block.id();
        let mut inner = self.inner.write().expect("repository lock poisoned");
        if inner.blocks.contains_key(&id) {
            bail!("block already known: {id}");
        }
        if !inner.blocks.contains_key(block.header().parent_id()) {
            bail!("parent missing for block {id}");
        }
        for tx in block.transactions() {
            if let Ok(tx_id) = tx.id() {
                inner.tx_locations.insert(tx_id, id);
            }
        }
        inner.receipts.insert(id, Arc::new(receipts));
        inner.blocks.insert(id, Arc::new(block));
        Ok(())
    }

    pub fn set_best_block_id(&self, id: &BlockId) -> Result<()> {
        let mut inner = self.inner.write().expect("repository lock poisoned");
        if !inner.blocks.contains_key(id) {
            bail!("block not found: {id}");
        }
        inner.best = *id;
        Ok(())
    }

    /// Opens a [`Seeker`] anchored at `head_id`.
    pub fn new_seeker(&self, head_id: BlockId) -> Seeker<'_> {
        Seeker {
            repo: self,
            head_id,
            err: RefCell::new(None),
        }
    }
}

/// Resolves block numbers to canonical ids by walking parent links from a
/// fixed head. Lookup failures are latched rather than returned per call,
/// so bulk traversals check once at the end; a failed lookup yields the
/// zero id, which matches no reference.
pub struct Seeker<'a> {
    repo: &'a Repository,
    head_id: BlockId,
    err: RefCell<Option<Error>>,
}

impl Seeker<'_> {
    pub fn get_id(&self, number: u32) -> BlockId {
        match self.seek(number) {
            Ok(id) => id,
            Err(e) => {
                let mut err = self.err.borrow_mut();
                if err.is_none() {
                    *err = Some(e);
                }
                BlockId::default()
            }
        }
    }

    fn seek(&self, number: u32) -> Result<BlockId> {
        if number > self.head_id.number() {
            bail!("block number {number} beyond head {}", self.head_id.number());
        }
        let mut cursor = self.head_id;
        while cursor.number() > number {
            let block = self
                .repo
                .get_block(&cursor)
                .ok_or_else(|| anyhow!("missing block {cursor} on canonical walk"))?;
            cursor = *block.header().parent_id();
        }
        if cursor.number() != number {
            bail!("no block at number {number} under head {}", self.head_id);
        }
        Ok(cursor)
    }

    /// The first lookup error, if any occurred since the seeker was opened.
    pub fn take_err(&self) -> Option<Error> {
        self.err.borrow_mut().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis;
    use crate::packer::Packer;
    use crate::params::ForkConfig;
    use crate::state::Stater;

    fn fixture() -> (Arc<Repository>, Arc<Stater>) {
        let stater = Arc::new(Stater::new());
        let genesis = genesis::build_dev(&stater, 1_000, &ForkConfig::default());
        (Arc::new(Repository::new(genesis)), stater)
    }

    fn extend(repo: &Arc<Repository>, stater: &Arc<Stater>, n: usize) {
        let packer = Packer::new(
            Arc::clone(repo),
            Arc::clone(stater),
            genesis::dev_accounts()[0].address,
            ForkConfig::default(),
        );
        for _ in 0..n {
            let best = repo.best_block();
            let ts = best.header().timestamp() + 10;
            let flow = packer
                .mock(best.header(), ts, 10_000_000)
                .expect("mock flow");
            let (block, stage, receipts) = flow
                .pack(&genesis::dev_accounts()[0].signing_key)
                .expect("pack");
            stage.commit().expect("commit");
            repo.add_block(block.clone(), receipts).expect("add block");
            repo.set_best_block_id(&block.id()).expect("set best");
        }
    }

    #[test]
    fn genesis_is_best_and_sets_tag() {
        let (repo, _) = fixture();
        let best = repo.best_block();
        assert_eq!(best.header().number(), 0);
        assert_eq!(
            repo.chain_tag(),
            best.id().as_bytes()[blake3::OUT_LEN - 1]
        );
    }

    #[test]
    fn add_block_requires_known_parent() {
        let (repo, stater) = fixture();
        let orphan_root = stater
            .new_state(repo.best_block().header().state_root())
            .expect("state")
            .to_snapshot()
            .root();
        let header = crate::block::Header::new(
            BlockId([9u8; 32]),
            1,
            2_000,
            10_000_000,
            0,
            orphan_root,
            crate::tx::Features::empty(),
            genesis::dev_accounts()[0].address,
        );
        let orphan = Block::new(header, Vec::new(), [0u8; 64]);
        assert!(repo.add_block(orphan, Vec::new()).is_err());
    }

    #[test]
    fn seeker_walks_canonical_chain() {
        let (repo, stater) = fixture();
        extend(&repo, &stater, 3);

        let head = repo.best_block();
        assert_eq!(head.header().number(), 3);

        let seeker = repo.new_seeker(head.id());
        assert_eq!(seeker.get_id(3), head.id());
        assert_eq!(seeker.get_id(0), *repo.genesis_id());
        assert_eq!(
            seeker.get_id(2),
            *head.header().parent_id()
        );
        assert!(seeker.take_err().is_none());
    }

    #[test]
    fn seeker_latches_out_of_range_errors() {
        let (repo, _) = fixture();
        let seeker = repo.new_seeker(repo.best_block().id());
        assert_eq!(seeker.get_id(5), BlockId::default());
        assert!(seeker.take_err().is_some());
        assert!(seeker.take_err().is_none());
    }
}
