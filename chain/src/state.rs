//! In-memory state store.
//!
//! State is content-addressed: a [`StateSnapshot`] hashes to a
//! [`StateRoot`], the [`Stater`] keeps every persisted snapshot keyed by
//! root, and a [`StateView`] is a read-only handle opened at a root.
//! Persisted snapshots are immutable; the packer mutates a working copy
//! and persists it as a new root on commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};

use crate::address::Address;

/// Account balance unit.
pub type Balance = u128;

/// Root hash of a state snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StateRoot(pub [u8; blake3::OUT_LEN]);

impl StateRoot {
    pub fn as_bytes(&self) -> &[u8; blake3::OUT_LEN] {
        &self.0
    }
}

impl std::fmt::Display for StateRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// The full account table plus chain parameters carried in state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    accounts: BTreeMap<Address, Balance>,
    base_gas_price: u64,
}

impl StateSnapshot {
    pub fn new(base_gas_price: u64) -> Self {
        Self {
            accounts: BTreeMap::new(),
            base_gas_price,
        }
    }

    pub fn balance(&self, addr: &Address) -> Balance {
        self.accounts.get(addr).copied().unwrap_or(0)
    }

    pub fn set_balance(&mut self, addr: Address, balance: Balance) {
        if balance == 0 {
            self.accounts.remove(&addr);
        } else {
            self.accounts.insert(addr, balance);
        }
    }

    pub fn base_gas_price(&self) -> u64 {
        self.base_gas_price
    }

    /// Content hash over the parameter block and the sorted account table.
    pub fn root(&self) -> StateRoot {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.base_gas_price.to_be_bytes());
        for (addr, balance) in &self.accounts {
            hasher.update(addr.as_bytes());
            hasher.update(&balance.to_be_bytes());
        }
        StateRoot(hasher.finalize().into())
    }
}

/// State-view factory. Internally synchronized; shared via `Arc`.
#[derive(Debug, Default)]
pub struct Stater {
    roots: RwLock<HashMap<StateRoot, Arc<StateSnapshot>>>,
}

impl Stater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists `snapshot` and returns its root. Idempotent.
    pub fn persist(&self, snapshot: StateSnapshot) -> StateRoot {
        let root = snapshot.root();
        self.roots
            .write()
            .expect("stater lock poisoned")
            .entry(root)
            .or_insert_with(|| Arc::new(snapshot));
        root
    }

    /// Opens a read-only view at `root`; errors when the root is unknown.
    pub fn new_state(&self, root: &StateRoot) -> Result<StateView> {
        let snapshot = self
            .roots
            .read()
            .expect("stater lock poisoned")
            .get(root)
            .cloned()
            .ok_or_else(|| anyhow!("unknown state root {root}"))?;
        Ok(StateView { snapshot })
    }
}

/// Read-only state handle at a fixed root.
#[derive(Clone, Debug)]
pub struct StateView {
    snapshot: Arc<StateSnapshot>,
}

impl StateView {
    pub fn balance(&self, addr: &Address) -> Balance {
        self.snapshot.balance(addr)
    }

    pub fn base_gas_price(&self) -> u64 {
        self.snapshot.base_gas_price()
    }

    /// A mutable copy of the underlying snapshot, for packing flows.
    pub fn to_snapshot(&self) -> StateSnapshot {
        (*self.snapshot).clone()
    }
}
