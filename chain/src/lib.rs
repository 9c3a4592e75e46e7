//! Chain substrate: the domain types and stores the transaction pool and
//! solo packer are built on.
//!
//! - strongly-typed transactions, blocks and addresses (`tx`, `block`,
//!   `address`),
//! - an in-memory chain repository with canonical-chain seeking
//!   (`repository`),
//! - a content-addressed state store (`state`),
//! - the block packing flow (`packer`),
//! - receipt log write-through (`logs`),
//! - dev-mode genesis (`genesis`),
//! - and protocol constants plus fork configuration (`params`).

pub mod address;
pub mod block;
pub mod genesis;
pub mod logs;
pub mod packer;
pub mod params;
pub mod repository;
pub mod state;
pub mod tx;

pub use address::Address;
pub use block::{Block, BlockId, Header};
pub use logs::{LogWriter, MemoryLogDb};
pub use packer::{Flow, PackError, Packer, Receipt, Stage};
pub use params::ForkConfig;
pub use repository::{Repository, Seeker};
pub use state::{Balance, StateRoot, StateSnapshot, StateView, Stater};
pub use tx::{BlockRef, Features, Transaction, Transactions, TxBuilder, TxHash, TxId};
