//! Keyed, origin-bucketed transaction index.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

use chain::{Address, Transactions, TxHash};

use crate::object::TxObject;

struct Entry {
    obj: Arc<TxObject>,
    seq: u64,
}

struct IndexInner {
    entries: HashMap<TxHash, Entry>,
    quota: HashMap<Address, usize>,
    next_seq: u64,
}

/// Hash-keyed map of pooled transactions with per-origin counting.
///
/// Insertion order is tracked explicitly (a monotone sequence per entry)
/// so snapshots iterate oldest-first and the fallback eviction after a
/// failed wash removes the oldest entries deterministically.
pub struct TxIndex {
    inner: Mutex<IndexInner>,
}

impl TxIndex {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(IndexInner {
                entries: HashMap::new(),
                quota: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Inserts `obj`. Duplicate hashes are a no-op; an origin at its quota
    /// is an error.
    pub fn add(&self, obj: Arc<TxObject>, limit_per_account: usize) -> Result<()> {
        let mut inner = self.inner.lock().expect("index lock poisoned");
        if inner.entries.contains_key(&obj.hash()) {
            return Ok(());
        }
        let used = inner.quota.get(obj.origin()).copied().unwrap_or(0);
        if used >= limit_per_account {
            bail!("account quota exceeded");
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        *inner.quota.entry(*obj.origin()).or_insert(0) += 1;
        inner.entries.insert(obj.hash(), Entry { obj, seq });
        Ok(())
    }

    /// Bulk insert used to rehydrate the pool; quota errors are
    /// deliberately not enforced, duplicates are skipped.
    pub fn fill(&self, objs: Vec<Arc<TxObject>>) {
        let mut inner = self.inner.lock().expect("index lock poisoned");
        for obj in objs {
            if inner.entries.contains_key(&obj.hash()) {
                continue;
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            *inner.quota.entry(*obj.origin()).or_insert(0) += 1;
            inner.entries.insert(obj.hash(), Entry { obj, seq });
        }
    }

    pub fn remove(&self, hash: &TxHash) -> bool {
        let mut inner = self.inner.lock().expect("index lock poisoned");
        if let Some(entry) = inner.entries.remove(hash) {
            let origin = *entry.obj.origin();
            if let Some(count) = inner.quota.get_mut(&origin) {
                *count -= 1;
                if *count == 0 {
                    inner.quota.remove(&origin);
                }
            }
            true
        } else {
            false
        }
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.inner
            .lock()
            .expect("index lock poisoned")
            .entries
            .contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("index lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all objects in insertion order. The returned list does
    /// not alias internal storage.
    pub fn to_objects(&self) -> Vec<Arc<TxObject>> {
        let inner = self.inner.lock().expect("index lock poisoned");
        let mut entries: Vec<(u64, Arc<TxObject>)> = inner
            .entries
            .values()
            .map(|e| (e.seq, Arc::clone(&e.obj)))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, obj)| obj).collect()
    }

    /// Snapshot of all transactions in insertion order.
    pub fn to_txs(&self) -> Transactions {
        self.to_objects()
            .into_iter()
            .map(|obj| Arc::clone(obj.tx()))
            .collect()
    }
}

impl Default for TxIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain::genesis;
    use chain::tx::TxBuilder;

    fn obj(account: usize, nonce: u64) -> Arc<TxObject> {
        let tx = Arc::new(
            TxBuilder::new(0x4a)
                .nonce(nonce)
                .build(&genesis::dev_accounts()[account].signing_key),
        );
        Arc::new(TxObject::resolve(tx).expect("resolve"))
    }

    #[test]
    fn add_and_remove_round_trip() {
        let index = TxIndex::new();
        let a = obj(0, 1);
        index.add(Arc::clone(&a), 10).expect("add");
        assert!(index.contains(&a.hash()));
        assert_eq!(index.len(), 1);
        assert!(index.remove(&a.hash()));
        assert!(!index.remove(&a.hash()));
        assert!(index.is_empty());
    }

    #[test]
    fn duplicate_add_is_idempotent() {
        let index = TxIndex::new();
        let a = obj(0, 1);
        index.add(Arc::clone(&a), 10).expect("add");
        index.add(Arc::clone(&a), 10).expect("duplicate add");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn per_account_quota_is_enforced() {
        let index = TxIndex::new();
        index.add(obj(0, 1), 2).expect("first");
        index.add(obj(0, 2), 2).expect("second");
        let err = index.add(obj(0, 3), 2).expect_err("quota hit");
        assert_eq!(err.to_string(), "account quota exceeded");
        // Another origin is unaffected.
        index.add(obj(1, 1), 2).expect("other origin");
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn quota_frees_up_after_remove() {
        let index = TxIndex::new();
        let a = obj(0, 1);
        index.add(Arc::clone(&a), 1).expect("add");
        assert!(index.add(obj(0, 2), 1).is_err());
        index.remove(&a.hash());
        index.add(obj(0, 3), 1).expect("freed quota");
    }

    #[test]
    fn snapshots_preserve_insertion_order() {
        let index = TxIndex::new();
        let objs: Vec<_> = (0..5).map(|i| obj(i, i as u64)).collect();
        for o in &objs {
            index.add(Arc::clone(o), 10).expect("add");
        }
        let snapshot = index.to_objects();
        let hashes: Vec<_> = snapshot.iter().map(|o| o.hash()).collect();
        let expected: Vec<_> = objs.iter().map(|o| o.hash()).collect();
        assert_eq!(hashes, expected);
    }

    #[test]
    fn fill_skips_duplicates_and_ignores_quota() {
        let index = TxIndex::new();
        let a = obj(0, 1);
        index.fill(vec![
            Arc::clone(&a),
            Arc::clone(&a),
            obj(0, 2),
            obj(0, 3),
        ]);
        assert_eq!(index.len(), 3);
    }
}
