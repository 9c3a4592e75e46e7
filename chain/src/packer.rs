//! Block packing: adopt transactions into a flow, execute them against a
//! working state, seal and commit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use ed25519_dalek::{Signer, SigningKey};
use thiserror::Error;

use crate::address::Address;
use crate::block::{Block, BlockId, Header};
use crate::params::ForkConfig;
use crate::repository::Repository;
use crate::state::{StateRoot, StateSnapshot, Stater};
use crate::tx::{Features, Transaction, TxHash, TxId};

/// Why a transaction could not be adopted into a flow.
#[derive(Error, Debug)]
pub enum PackError {
    /// The block's gas budget cannot fit the transaction; stop adopting.
    #[error("gas limit reached")]
    GasLimitReached,

    /// The transaction is well-formed but cannot be included under this
    /// parent (future block reference, unresolved dependency, insufficient
    /// balance); it may become adoptable later.
    #[error("tx not adoptable now")]
    NotAdoptableNow,

    /// The transaction can never be included (expired, wrong chain,
    /// already on chain, bad signature); callers should drop it.
    #[error("{0}")]
    Unprocessable(String),
}

/// Execution receipt for one adopted transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_id: TxId,
    pub gas_used: u64,
    pub gas_payer: Address,
    pub paid: u128,
}

/// Builds packing flows on top of a parent header.
pub struct Packer {
    repo: Arc<Repository>,
    stater: Arc<Stater>,
    beneficiary: Address,
    fork_config: ForkConfig,
    target_gas_limit: AtomicU64,
}

impl Packer {
    pub fn new(
        repo: Arc<Repository>,
        stater: Arc<Stater>,
        beneficiary: Address,
        fork_config: ForkConfig,
    ) -> Self {
        Self {
            repo,
            stater,
            beneficiary,
            fork_config,
            target_gas_limit: AtomicU64::new(0),
        }
    }

    /// Sets the gas-limit target used when `mock` is called with 0.
    pub fn set_target_gas_limit(&self, limit: u64) {
        self.target_gas_limit.store(limit, Ordering::Relaxed);
    }

    /// Opens a packing flow on top of `parent`. Gas limit resolution:
    /// explicit argument, then the configured target, then the parent's.
    pub fn mock(&self, parent: &Header, timestamp: u64, gas_limit: u64) -> Result<Flow> {
        let resolved = if gas_limit > 0 {
            gas_limit
        } else {
            let target = self.target_gas_limit.load(Ordering::Relaxed);
            if target > 0 {
                target
            } else {
                parent.gas_limit()
            }
        };
        let state = self
            .stater
            .new_state(parent.state_root())
            .context("open parent state")?;
        Ok(Flow {
            repo: Arc::clone(&self.repo),
            stater: Arc::clone(&self.stater),
            beneficiary: self.beneficiary,
            parent_id: parent.id(),
            number: parent.number() + 1,
            timestamp,
            gas_limit: resolved,
            txs_features: self.fork_config.features_at(parent.number() + 1),
            working: state.to_snapshot(),
            adopted: Vec::new(),
            adopted_hashes: Vec::new(),
            receipts: Vec::new(),
            gas_used: 0,
        })
    }
}

/// An in-progress block: working state, adopted transactions, receipts.
pub struct Flow {
    repo: Arc<Repository>,
    stater: Arc<Stater>,
    beneficiary: Address,
    parent_id: BlockId,
    number: u32,
    timestamp: u64,
    gas_limit: u64,
    txs_features: Features,
    working: StateSnapshot,
    adopted: Vec<Arc<Transaction>>,
    adopted_hashes: Vec<TxHash>,
    receipts: Vec<Receipt>,
    gas_used: u64,
}

impl Flow {
    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    /// Attempts to execute `tx` against the working state and include it.
    pub fn adopt(&mut self, tx: &Arc<Transaction>) -> std::result::Result<(), PackError> {
        if tx.chain_tag() != self.repo.chain_tag() {
            return Err(PackError::Unprocessable("chain tag mismatch".into()));
        }
        let origin = tx
            .origin()
            .map_err(|e| PackError::Unprocessable(e.to_string()))?;
        let tx_id = tx
            .id()
            .map_err(|e| PackError::Unprocessable(e.to_string()))?;
        if self.adopted_hashes.contains(&tx.hash()) || self.repo.has_transaction(&tx_id) {
            return Err(PackError::Unprocessable("known tx".into()));
        }
        tx.check_features(self.txs_features)
            .map_err(|e| PackError::Unprocessable(e.to_string()))?;

        if self.gas_used + tx.gas() > self.gas_limit {
            return Err(PackError::GasLimitReached);
        }

        let parent_number = self.number - 1;
        let ref_number = tx.block_ref().number();
        if ref_number > parent_number {
            return Err(PackError::NotAdoptableNow);
        }
        if self.number > ref_number.saturating_add(tx.expiration()) {
            return Err(PackError::Unprocessable("expired".into()));
        }
        if let Some(dep) = tx.depends_on() {
            if !self.repo.has_transaction(dep) {
                return Err(PackError::NotAdoptableNow);
            }
        }

        let price = tx.gas_price(self.working.base_gas_price());
        let paid = u128::from(tx.gas()) * u128::from(price);
        let cost = tx.value() + paid;
        let balance = self.working.balance(&origin);
        if balance < cost {
            return Err(PackError::NotAdoptableNow);
        }

        // Execute: debit the origin, move the value, pay the beneficiary.
        self.working.set_balance(origin, balance - cost);
        if let Some(to) = tx.to() {
            let credited = self.working.balance(to) + tx.value();
            self.working.set_balance(*to, credited);
        }
        let reward = self.working.balance(&self.beneficiary) + paid;
        self.working.set_balance(self.beneficiary, reward);

        self.gas_used += tx.gas();
        self.adopted_hashes.push(tx.hash());
        self.adopted.push(Arc::clone(tx));
        self.receipts.push(Receipt {
            tx_id,
            gas_used: tx.gas(),
            gas_payer: origin,
            paid,
        });
        Ok(())
    }

    /// Seals the block, signing it with `key`. The returned [`Stage`] must
    /// be committed before the block is added to the repository, so the
    /// header's state root resolves.
    pub fn pack(self, key: &SigningKey) -> Result<(Block, Stage, Vec<Receipt>)> {
        let state_root = self.working.root();
        let header = Header::new(
            self.parent_id,
            self.number,
            self.timestamp,
            self.gas_limit,
            self.gas_used,
            state_root,
            self.txs_features,
            self.beneficiary,
        );
        let signature = key.sign(header.id().as_bytes()).to_bytes();
        let block = Block::new(header, self.adopted, signature);
        let stage = Stage {
            stater: self.stater,
            snapshot: self.working,
        };
        Ok((block, stage, self.receipts))
    }
}

/// Working state awaiting persistence.
pub struct Stage {
    stater: Arc<Stater>,
    snapshot: StateSnapshot,
}

impl Stage {
    /// Persists the staged state and returns its root.
    pub fn commit(self) -> Result<StateRoot> {
        Ok(self.stater.persist(self.snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::{self, DEV_INITIAL_BALANCE};
    use crate::tx::{BlockRef, TxBuilder};

    struct Fixture {
        repo: Arc<Repository>,
        stater: Arc<Stater>,
        packer: Packer,
    }

    fn fixture() -> Fixture {
        let stater = Arc::new(Stater::new());
        let genesis = genesis::build_dev(&stater, 1_000, &ForkConfig::default());
        let repo = Arc::new(Repository::new(genesis));
        let packer = Packer::new(
            Arc::clone(&repo),
            Arc::clone(&stater),
            genesis::dev_accounts()[0].address,
            ForkConfig::default(),
        );
        Fixture {
            repo,
            stater,
            packer,
        }
    }

    #[test]
    fn packs_value_transfer_and_commits() {
        let f = fixture();
        let dev_accounts = genesis::dev_accounts();
        let sender = &dev_accounts[1];
        let recipient = Address::from_bytes([0xEE; 32]);

        let tx = Arc::new(
            TxBuilder::new(f.repo.chain_tag())
                .to(recipient)
                .value(1_000)
                .gas(21_000)
                .build(&sender.signing_key),
        );

        let best = f.repo.best_block();
        let mut flow = f
            .packer
            .mock(best.header(), best.header().timestamp() + 10, 10_000_000)
            .expect("mock");
        flow.adopt(&tx).expect("adopt");

        let (block, stage, receipts) = flow
            .pack(&genesis::dev_accounts()[0].signing_key)
            .expect("pack");
        assert_eq!(block.transactions().len(), 1);
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].gas_payer, sender.address);

        let root = stage.commit().expect("commit");
        assert_eq!(root, *block.header().state_root());

        f.repo
            .add_block(block.clone(), receipts)
            .expect("add block");
        f.repo.set_best_block_id(&block.id()).expect("set best");

        let view = f.stater.new_state(&root).expect("state");
        assert_eq!(view.balance(&recipient), 1_000);
        assert!(view.balance(&sender.address) < DEV_INITIAL_BALANCE - 1_000);
        assert!(f.repo.has_transaction(&tx.id().expect("id")));
    }

    #[test]
    fn adopt_stops_at_gas_limit() {
        let f = fixture();
        let dev_accounts = genesis::dev_accounts();
        let sender = &dev_accounts[1];
        let tx = Arc::new(
            TxBuilder::new(f.repo.chain_tag())
                .gas(30_000)
                .build(&sender.signing_key),
        );

        let best = f.repo.best_block();
        let mut flow = f
            .packer
            .mock(best.header(), best.header().timestamp() + 10, 25_000)
            .expect("mock");
        assert!(matches!(
            flow.adopt(&tx),
            Err(PackError::GasLimitReached)
        ));
    }

    #[test]
    fn adopt_defers_future_block_ref() {
        let f = fixture();
        let dev_accounts = genesis::dev_accounts();
        let sender = &dev_accounts[1];
        let tx = Arc::new(
            TxBuilder::new(f.repo.chain_tag())
                .block_ref(BlockRef::new(200))
                .build(&sender.signing_key),
        );

        let best = f.repo.best_block();
        let mut flow = f
            .packer
            .mock(best.header(), best.header().timestamp() + 10, 10_000_000)
            .expect("mock");
        assert!(matches!(
            flow.adopt(&tx),
            Err(PackError::NotAdoptableNow)
        ));
    }

    #[test]
    fn adopt_rejects_wrong_chain_tag_and_duplicates() {
        let f = fixture();
        let dev_accounts = genesis::dev_accounts();
        let sender = &dev_accounts[1];
        let best = f.repo.best_block();
        let mut flow = f
            .packer
            .mock(best.header(), best.header().timestamp() + 10, 10_000_000)
            .expect("mock");

        let foreign = Arc::new(
            TxBuilder::new(f.repo.chain_tag().wrapping_add(1)).build(&sender.signing_key),
        );
        assert!(matches!(
            flow.adopt(&foreign),
            Err(PackError::Unprocessable(_))
        ));

        let tx = Arc::new(TxBuilder::new(f.repo.chain_tag()).build(&sender.signing_key));
        flow.adopt(&tx).expect("first adopt");
        assert!(matches!(
            flow.adopt(&tx),
            Err(PackError::Unprocessable(_))
        ));
    }

    #[test]
    fn target_gas_limit_backs_mock_default() {
        let f = fixture();
        f.packer.set_target_gas_limit(5_000_000);
        let best = f.repo.best_block();
        let flow = f
            .packer
            .mock(best.header(), best.header().timestamp() + 10, 0)
            .expect("mock");
        assert_eq!(flow.gas_limit(), 5_000_000);
    }
}
