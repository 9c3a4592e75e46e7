//! Transaction Pool - Concurrent, Bounded, Priority-Ordered Staging Area
//!
//! Candidate transactions enter through [`TxPool::add`] /
//! [`TxPool::strictly_add`], live in a hash-keyed, origin-bucketed index,
//! and are periodically reconciled ("washed") against the current chain
//! head: blocked, aged, settled and broken entries are evicted, the rest
//! are re-evaluated for executability and priority-sorted into an
//! immutable snapshot published through an atomic cell.
//!
//! ## Data Flow
//!
//! 1. Ingress: `add`/`strictly_add` validate and insert, then publish a
//!    [`TxEvent`]
//! 2. Housekeeping: a 2-second tick triggers a wash on head change, pool
//!    overflow, or fresh admissions into a small pool
//! 3. Snapshot: wash rewrites the executable snapshot atomically; readers
//!    never block
//! 4. Blocklist: loaded from a cache file at startup and refreshed over
//!    HTTP with a conditional GET on a 60 to 120 s jitter
//!
//! ## Thread Safety
//!
//! The index and blocklist are internally synchronized; the executable
//! snapshot is read lock-free. Event fan-out runs on a dedicated
//! dispatcher task so a slow subscriber never stalls admission or wash.

mod blocklist;
mod error;
mod index;
mod object;
mod pool;

pub use blocklist::Blocklist;
pub use error::PoolError;
pub use object::TxObject;
pub use pool::{PoolOptions, TxEvent, TxPool, MAX_TX_SIZE};
