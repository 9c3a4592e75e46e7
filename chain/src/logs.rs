//! Receipt log write-through.

use std::sync::Mutex;

use anyhow::Result;

use crate::block::{Block, BlockId};
use crate::packer::Receipt;
use crate::tx::TxId;

/// Sink for per-block receipt logs. The packing loop writes through this
/// seam after committing a block.
pub trait LogWriter: Send + Sync {
    fn write(&self, block: &Block, receipts: &[Receipt]) -> Result<()>;
}

/// One written log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub block_id: BlockId,
    pub tx_ids: Vec<TxId>,
}

/// In-memory [`LogWriter`] used by dev mode and tests.
#[derive(Debug, Default)]
pub struct MemoryLogDb {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().expect("log lock poisoned").clone()
    }
}

impl LogWriter for MemoryLogDb {
    fn write(&self, block: &Block, receipts: &[Receipt]) -> Result<()> {
        let entry = LogEntry {
            block_id: block.id(),
            tx_ids: receipts.iter().map(|r| r.tx_id).collect(),
        };
        self.entries.lock().expect("log lock poisoned").push(entry);
        Ok(())
    }
}
