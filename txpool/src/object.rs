//! Pooled transaction wrapper.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};

use chain::repository::Repository;
use chain::state::StateView;
use chain::{Address, Header, Transaction, TxHash, TxId};

use crate::error::PoolError;

/// A transaction held by the pool, with cached admission-time facts and
/// advisory wash-time state.
///
/// `executable` and `overall_gas_price` are advisory caches: the
/// authoritative values are recomputed during wash. They are plain atomics
/// so the wash can update shared objects without exclusive access.
#[derive(Debug)]
pub struct TxObject {
    tx: Arc<Transaction>,
    origin: Address,
    id: TxId,
    time_added: Instant,
    executable: AtomicBool,
    overall_gas_price: AtomicU64,
}

impl TxObject {
    /// Resolves a raw transaction: verifies the signature (recovering the
    /// origin) and checks the intrinsic gas bound.
    pub fn resolve(tx: Arc<Transaction>) -> Result<Self, PoolError> {
        let origin = tx
            .origin()
            .map_err(|e| PoolError::BadTx(e.to_string()))?;
        if tx.gas() < tx.intrinsic_gas() {
            return Err(PoolError::BadTx("intrinsic gas exceeds provided gas".into()));
        }
        let id = tx.id().map_err(|e| PoolError::BadTx(e.to_string()))?;
        Ok(Self {
            tx,
            origin,
            id,
            time_added: Instant::now(),
            executable: AtomicBool::new(false),
            overall_gas_price: AtomicU64::new(0),
        })
    }

    pub fn tx(&self) -> &Arc<Transaction> {
        &self.tx
    }

    pub fn origin(&self) -> &Address {
        &self.origin
    }

    pub fn id(&self) -> &TxId {
        &self.id
    }

    pub fn hash(&self) -> TxHash {
        self.tx.hash()
    }

    pub fn time_added(&self) -> Instant {
        self.time_added
    }

    pub fn is_executable(&self) -> bool {
        self.executable.load(Ordering::Relaxed)
    }

    pub fn set_executable(&self, executable: bool) {
        self.executable.store(executable, Ordering::Relaxed);
    }

    pub fn overall_gas_price(&self) -> u64 {
        self.overall_gas_price.load(Ordering::Relaxed)
    }

    pub fn set_overall_gas_price(&self, price: u64) {
        self.overall_gas_price.store(price, Ordering::Relaxed);
    }

    /// Whether the transaction is immediately includable under `head`.
    ///
    /// `Ok(false)` means "not yet" (future block reference, unresolved
    /// dependency, insufficient balance); an error means the transaction
    /// can never become includable and should be evicted. Permanent
    /// conditions are checked before the recoverable ones, so an expired
    /// transaction errors out even when its dependency is also
    /// unresolved.
    pub fn evaluate(
        &self,
        repo: &Repository,
        state: &StateView,
        head: &Header,
    ) -> Result<bool> {
        if repo.has_transaction(&self.id) {
            bail!("known tx");
        }
        let ref_number = self.tx.block_ref().number();
        if ref_number > head.number() {
            return Ok(false);
        }
        if head.number() + 1 > ref_number.saturating_add(self.tx.expiration()) {
            bail!("expired");
        }
        if let Some(dep) = self.tx.depends_on() {
            if !repo.has_transaction(dep) {
                return Ok(false);
            }
        }
        let price = self.tx.gas_price(state.base_gas_price());
        let cost = self.tx.value() + u128::from(self.tx.gas()) * u128::from(price);
        if state.balance(&self.origin) < cost {
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain::genesis;
    use chain::params::ForkConfig;
    use chain::state::Stater;
    use chain::tx::{BlockRef, TxBuilder};

    struct Fixture {
        repo: Arc<Repository>,
        stater: Arc<Stater>,
    }

    fn fixture() -> Fixture {
        let stater = Arc::new(Stater::new());
        let genesis = genesis::build_dev(&stater, 1_000, &ForkConfig::default());
        let repo = Arc::new(Repository::new(genesis));
        Fixture { repo, stater }
    }

    fn state_at_head(f: &Fixture) -> (StateView, Header) {
        let head = f.repo.best_block().header().clone();
        let state = f.stater.new_state(head.state_root()).expect("state");
        (state, head)
    }

    #[test]
    fn resolve_requires_enough_gas() {
        let f = fixture();
        let tx = Arc::new(
            TxBuilder::new(f.repo.chain_tag())
                .gas(100)
                .build(&genesis::dev_accounts()[0].signing_key),
        );
        let err = TxObject::resolve(tx).expect_err("must fail");
        assert!(matches!(err, PoolError::BadTx(_)));
    }

    #[test]
    fn funded_tx_is_executable() {
        let f = fixture();
        let tx = Arc::new(
            TxBuilder::new(f.repo.chain_tag()).build(&genesis::dev_accounts()[0].signing_key),
        );
        let obj = TxObject::resolve(tx).expect("resolve");
        let (state, head) = state_at_head(&f);
        assert!(obj.evaluate(&f.repo, &state, &head).expect("evaluate"));
    }

    #[test]
    fn future_block_ref_is_not_executable() {
        let f = fixture();
        let tx = Arc::new(
            TxBuilder::new(f.repo.chain_tag())
                .block_ref(BlockRef::new(200))
                .build(&genesis::dev_accounts()[0].signing_key),
        );
        let obj = TxObject::resolve(tx).expect("resolve");
        let (state, head) = state_at_head(&f);
        assert!(!obj.evaluate(&f.repo, &state, &head).expect("evaluate"));
    }

    #[test]
    fn unresolved_dependency_is_not_executable() {
        let f = fixture();
        let tx = Arc::new(
            TxBuilder::new(f.repo.chain_tag())
                .depends_on(TxId([0x42; 32]))
                .build(&genesis::dev_accounts()[0].signing_key),
        );
        let obj = TxObject::resolve(tx).expect("resolve");
        let (state, head) = state_at_head(&f);
        assert!(!obj.evaluate(&f.repo, &state, &head).expect("evaluate"));
    }

    #[test]
    fn expired_tx_errors() {
        let f = fixture();
        let tx = Arc::new(
            TxBuilder::new(f.repo.chain_tag())
                .expiration(0)
                .build(&genesis::dev_accounts()[0].signing_key),
        );
        let obj = TxObject::resolve(tx).expect("resolve");
        let (state, head) = state_at_head(&f);
        // Genesis head: number 0, next block is 1, past ref 0 + expiration 0.
        assert!(obj.evaluate(&f.repo, &state, &head).is_err());
    }

    #[test]
    fn expiry_wins_over_unresolved_dependency() {
        let f = fixture();
        // Expired reference window and an unresolved dependency at once:
        // the permanent condition decides, so the entry is evicted rather
        // than kept pooled waiting on a dependency it can never use.
        let tx = Arc::new(
            TxBuilder::new(f.repo.chain_tag())
                .expiration(0)
                .depends_on(TxId([0x42; 32]))
                .build(&genesis::dev_accounts()[0].signing_key),
        );
        let obj = TxObject::resolve(tx).expect("resolve");
        let (state, head) = state_at_head(&f);
        let err = obj
            .evaluate(&f.repo, &state, &head)
            .expect_err("expired must error");
        assert_eq!(err.to_string(), "expired");
    }
}
