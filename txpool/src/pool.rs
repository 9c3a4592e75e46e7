//! The transaction pool: ingress validation, executability tracking,
//! periodic wash, event fan-out, blocklist refresh.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;
use config::{Config, Environment, File};
use rand::Rng;
use serde::{Deserialize, Serialize};
use slog::Logger;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use chain::params;
use chain::repository::Repository;
use chain::state::Stater;
use chain::{Header, Transaction, Transactions, TxHash, TxId};

use crate::blocklist::Blocklist;
use crate::error::PoolError;
use crate::index::TxIndex;
use crate::object::TxObject;

/// Max encoded size of a transaction accepted at ingress.
pub const MAX_TX_SIZE: usize = 64 * 1024;

/// Housekeeping tick period.
const WASH_INTERVAL: Duration = Duration::from_secs(2);

/// Below this pool size, any admission since the last wash triggers one.
const SMALL_POOL_THRESHOLD: usize = 200;

/// Pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolOptions {
    /// Hard cap on index size after wash.
    pub limit: usize,
    /// Max entries sharing one origin.
    pub limit_per_account: usize,
    /// Age after which an entry is evicted.
    pub max_lifetime: Duration,
    /// Local blocklist cache file; `None` disables caching.
    pub blocklist_cache_file_path: Option<PathBuf>,
    /// Blocklist refresh URL; `None` disables refreshing.
    pub blocklist_fetch_url: Option<String>,
}

impl PoolOptions {
    /// [`from_path`] loads a [`PoolOptions`] from a .toml file, with
    /// `TXPOOL`-prefixed environment overrides.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path
            .as_ref()
            .to_str()
            .context("config path is not valid UTF-8")?;
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("TXPOOL")
                    .keep_prefix(true)
                    .separator("__"),
            )
            .build()?;

        config.get::<Self>("txpool").map_err(anyhow::Error::msg)
    }
}

/// Posted when a tx is admitted or its executability status changes.
///
/// `executable` is `None` when the chain was not synced at admission and
/// the status could not be evaluated.
#[derive(Clone, Debug)]
pub struct TxEvent {
    pub tx: Arc<Transaction>,
    pub executable: Option<bool>,
}

/// Result of one successful wash pass.
struct Washed {
    executables: Transactions,
    removed: usize,
    promoted: Transactions,
}

/// Multicasts [`TxEvent`]s to subscribers.
///
/// Publishing enqueues onto an unbounded dispatch queue and never blocks;
/// a dedicated dispatcher task forwards events to each subscriber channel
/// in publish order, so a slow subscriber cannot stall admission or wash.
struct TxFeed {
    queue: mpsc::UnboundedSender<TxEvent>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<TxEvent>>>>,
}

impl TxFeed {
    fn new() -> (Self, mpsc::UnboundedReceiver<TxEvent>) {
        let (queue, queue_rx) = mpsc::unbounded_channel();
        (
            Self {
                queue,
                subscribers: Arc::new(Mutex::new(Vec::new())),
            },
            queue_rx,
        )
    }

    fn subscribe(&self, buffer: usize) -> mpsc::Receiver<TxEvent> {
        let (tx, rx) = mpsc::channel(buffer);
        self.subscribers
            .lock()
            .expect("feed lock poisoned")
            .push(tx);
        rx
    }

    fn publish(&self, event: TxEvent) {
        // Fails only once the dispatcher is gone, i.e. after close.
        let _ = self.queue.send(event);
    }

    fn close(&self) {
        self.subscribers
            .lock()
            .expect("feed lock poisoned")
            .clear();
    }
}

async fn dispatch(
    mut queue_rx: mpsc::UnboundedReceiver<TxEvent>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<TxEvent>>>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = queue_rx.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };
        // Snapshot the subscriber list; sends happen without the lock held.
        let senders: Vec<mpsc::Sender<TxEvent>> = subscribers
            .lock()
            .expect("feed lock poisoned")
            .clone();
        for sender in senders {
            let _ = sender.send(event.clone()).await;
        }
        subscribers
            .lock()
            .expect("feed lock poisoned")
            .retain(|s| !s.is_closed());
    }
}

/// [`TxPool`] maintains unprocessed transactions.
///
/// Background tasks (housekeeping wash, blocklist refresh, event
/// dispatch) start with the pool; [`TxPool::close`] is required at the
/// end to cancel and join them.
pub struct TxPool {
    options: PoolOptions,
    repo: Arc<Repository>,
    stater: Arc<Stater>,
    blocklist: Arc<Blocklist>,
    index: TxIndex,
    executables: ArcSwapOption<Transactions>,
    added_after_wash: AtomicU32,
    feed: TxFeed,
    cancel: CancellationToken,
    tasks: TaskTracker,
    logger: Logger,
}

impl TxPool {
    /// Creates the pool and spawns its background tasks onto the current
    /// tokio runtime.
    pub fn new(
        repo: Arc<Repository>,
        stater: Arc<Stater>,
        options: PoolOptions,
        logger: Logger,
    ) -> Arc<Self> {
        let (feed, queue_rx) = TxFeed::new();
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        let blocklist = Arc::new(Blocklist::new(logger.clone()));

        let pool = Arc::new(Self {
            options,
            repo,
            stater,
            blocklist,
            index: TxIndex::new(),
            executables: ArcSwapOption::empty(),
            added_after_wash: AtomicU32::new(0),
            feed,
            cancel: cancel.clone(),
            tasks,
            logger,
        });

        pool.tasks.spawn(dispatch(
            queue_rx,
            Arc::clone(&pool.feed.subscribers),
            cancel.clone(),
        ));
        pool.tasks.spawn(housekeeping(Arc::clone(&pool)));
        pool.tasks.spawn(blocklist_loop(Arc::clone(&pool)));
        pool
    }

    /// Number of transactions in the pool.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of transactions in the executable snapshot.
    pub fn executable_size(&self) -> usize {
        self.executables
            .load()
            .as_ref()
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Adds a new tx into the pool. A tx already in the pool is not an
    /// error.
    pub fn add(&self, tx: Arc<Transaction>) -> Result<(), PoolError> {
        self.add_inner(tx, false)
    }

    /// Adds a new tx into the pool; rejects it if it is not executable at
    /// this time.
    pub fn strictly_add(&self, tx: Arc<Transaction>) -> Result<(), PoolError> {
        self.add_inner(tx, true)
    }

    fn add_inner(&self, tx: Arc<Transaction>, reject_nonexecutable: bool) -> Result<(), PoolError> {
        if self.index.contains(&tx.hash()) {
            // tx already in the pool
            return Ok(());
        }
        if let Ok(origin) = tx.origin() {
            if params::is_origin_blocked(&origin) || self.blocklist.contains(&origin) {
                // tx origin blocked
                return Ok(());
            }
        }

        let head = self.repo.best_block().header().clone();

        if tx.chain_tag() != self.repo.chain_tag() {
            return Err(PoolError::BadTx("chain tag mismatch".into()));
        }
        if tx.size() > MAX_TX_SIZE {
            return Err(PoolError::Rejected("size too large".into()));
        }
        tx.check_features(head.txs_features())
            .map_err(|e| PoolError::Rejected(e.to_string()))?;

        let obj = Arc::new(TxObject::resolve(Arc::clone(&tx))?);

        if is_chain_synced(now_unix(), head.timestamp()) {
            let state = self
                .stater
                .new_state(head.state_root())
                .context("new state")?;

            let executable = obj
                .evaluate(&self.repo, &state, &head)
                .map_err(|e| PoolError::Rejected(e.to_string()))?;

            if reject_nonexecutable && !executable {
                return Err(PoolError::Rejected("tx is not executable".into()));
            }

            self.index
                .add(Arc::clone(&obj), self.options.limit_per_account)
                .map_err(|e| PoolError::Rejected(e.to_string()))?;

            obj.set_executable(executable);
            self.feed.publish(TxEvent {
                tx: Arc::clone(&tx),
                executable: Some(executable),
            });
            slog::debug!(self.logger, "tx added"; "id" => %obj.id(), "executable" => executable);
        } else {
            // Head-dependent checks are skipped while the chain is not
            // synced, but the pool limit still holds.
            if self.index.len() >= self.options.limit {
                return Err(PoolError::Rejected("pool is full".into()));
            }

            self.index
                .add(Arc::clone(&obj), self.options.limit_per_account)
                .map_err(|e| PoolError::Rejected(e.to_string()))?;

            slog::debug!(self.logger, "tx added"; "id" => %obj.id());
            self.feed.publish(TxEvent {
                tx: Arc::clone(&tx),
                executable: None,
            });
        }
        self.added_after_wash.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Removes a tx from the pool by its hash.
    pub fn remove(&self, hash: &TxHash, id: &TxId) -> bool {
        if self.index.remove(hash) {
            slog::debug!(self.logger, "tx removed"; "id" => %id);
            return true;
        }
        false
    }

    /// The current executable snapshot, sorted by priority descending.
    /// Empty until the first successful wash.
    pub fn executables(&self) -> Transactions {
        match self.executables.load_full() {
            Some(snapshot) => (*snapshot).clone(),
            None => Transactions::new(),
        }
    }

    /// Bulk-imports txs, bypassing executability checks. The blocklist and
    /// resolution still apply; failures are dropped silently.
    pub fn fill(&self, txs: Transactions) {
        let mut objs = Vec::with_capacity(txs.len());
        for tx in txs {
            if let Ok(origin) = tx.origin() {
                if params::is_origin_blocked(&origin) || self.blocklist.contains(&origin) {
                    continue;
                }
            }
            if let Ok(obj) = TxObject::resolve(tx) {
                objs.push(Arc::new(obj));
            }
        }
        self.index.fill(objs);
    }

    /// Dumps all txs in the pool, in insertion order.
    pub fn dump(&self) -> Transactions {
        self.index.to_txs()
    }

    /// Subscribes to [`TxEvent`]s with the given channel buffer. Dropping
    /// the receiver unsubscribes.
    pub fn subscribe_tx_event(&self, buffer: usize) -> mpsc::Receiver<TxEvent> {
        self.feed.subscribe(buffer)
    }

    /// Cancels background tasks, drops all subscriptions and joins the
    /// workers. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.feed.close();
        self.tasks.close();
        self.tasks.wait().await;
        slog::debug!(self.logger, "closed");
    }

    /// One wash pass under `head`: prune blocked/aged/settled entries,
    /// re-evaluate executability, priority-sort, enforce the pool limit.
    ///
    /// Does not publish anything; [`run_wash`] applies the outcome.
    fn wash(&self, head: &Header) -> Result<Washed> {
        let all = self.index.to_objects();
        let mut to_remove: Vec<Arc<TxObject>> = Vec::new();

        let state = self
            .stater
            .new_state(head.state_root())
            .context("new state")?;
        let base_gas_price = state.base_gas_price();
        let seeker = self.repo.new_seeker(head.id());

        let mut executable_objs: Vec<Arc<TxObject>> = Vec::with_capacity(all.len());
        let mut non_executable_objs: Vec<Arc<TxObject>> = Vec::with_capacity(all.len());

        for obj in all {
            if params::is_origin_blocked(obj.origin()) || self.blocklist.contains(obj.origin()) {
                slog::debug!(self.logger, "tx washed out"; "id" => %obj.id(), "err" => "blocked");
                to_remove.push(obj);
                continue;
            }
            if obj.time_added().elapsed() > self.options.max_lifetime {
                slog::debug!(self.logger, "tx washed out"; "id" => %obj.id(), "err" => "out of lifetime");
                to_remove.push(obj);
                continue;
            }
            // Settled, expired or dep broken entries drop out here.
            match obj.evaluate(&self.repo, &state, head) {
                Err(e) => {
                    slog::debug!(self.logger, "tx washed out"; "id" => %obj.id(), "err" => %e);
                    to_remove.push(obj);
                }
                Ok(true) => {
                    let price = obj.tx().overall_gas_price(base_gas_price, head.number(), |n| {
                        seeker.get_id(n)
                    });
                    obj.set_overall_gas_price(price);
                    executable_objs.push(obj);
                }
                Ok(false) => non_executable_objs.push(obj),
            }
        }

        if let Some(e) = seeker.take_err() {
            return Err(e).context("seeker");
        }

        // Sort by price from high to low; the sort is stable, so ties keep
        // insertion order.
        executable_objs.sort_by(|a, b| b.overall_gas_price().cmp(&a.overall_gas_price()));

        let limit = self.options.limit;

        // Shed over-limit txs: non-executables first, then the low priced.
        if executable_objs.len() > limit {
            for obj in non_executable_objs.drain(..) {
                slog::debug!(self.logger, "non-executable tx washed out due to pool limit"; "id" => %obj.id());
                to_remove.push(obj);
            }
            for obj in executable_objs.drain(limit..) {
                slog::debug!(self.logger, "executable tx washed out due to pool limit"; "id" => %obj.id());
                to_remove.push(obj);
            }
        } else if executable_objs.len() + non_executable_objs.len() > limit {
            let free = limit - executable_objs.len();
            for obj in non_executable_objs.drain(free..) {
                slog::debug!(self.logger, "non-executable tx washed out due to pool limit"; "id" => %obj.id());
                to_remove.push(obj);
            }
        }

        let mut executables = Transactions::with_capacity(executable_objs.len());
        let mut promoted = Transactions::new();
        for obj in &executable_objs {
            executables.push(Arc::clone(obj.tx()));
            if !obj.is_executable() {
                obj.set_executable(true);
                promoted.push(Arc::clone(obj.tx()));
            }
        }

        for obj in &to_remove {
            self.index.remove(&obj.hash());
        }

        Ok(Washed {
            executables,
            removed: to_remove.len(),
            promoted,
        })
    }

    /// Washes under `head` and applies the outcome: publish the snapshot,
    /// then the promotion events. On error the pool is cut back to its
    /// limit by dropping the oldest entries.
    fn run_wash(&self, head: &Header) {
        let pool_len = self.index.len();
        let start = Instant::now();
        match self.wash(head) {
            Ok(washed) => {
                let executable_len = washed.executables.len();
                self.executables.store(Some(Arc::new(washed.executables)));
                // Promotions go out only after the new snapshot is
                // observable.
                for tx in washed.promoted {
                    self.feed.publish(TxEvent {
                        tx,
                        executable: Some(true),
                    });
                }
                slog::debug!(self.logger, "wash done";
                    "len" => pool_len,
                    "executables" => executable_len,
                    "removed" => washed.removed,
                    "elapsed" => ?start.elapsed(),
                );
            }
            Err(e) => {
                let removed = self.emergency_trim();
                slog::debug!(self.logger, "wash done";
                    "len" => pool_len,
                    "removed" => removed,
                    "elapsed" => ?start.elapsed(),
                    "err" => %format!("{e:#}"),
                );
            }
        }
    }

    /// Cuts the pool back to its limit, oldest entries first. Returns the
    /// number of evicted entries.
    fn emergency_trim(&self) -> usize {
        let all = self.index.to_objects();
        if all.len() <= self.options.limit {
            return 0;
        }
        let excess = all.len() - self.options.limit;
        for obj in all.iter().take(excess) {
            self.index.remove(&obj.hash());
        }
        excess
    }
}

async fn housekeeping(pool: Arc<TxPool>) {
    slog::debug!(pool.logger, "enter housekeeping");

    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + WASH_INTERVAL,
        WASH_INTERVAL,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut head = pool.repo.best_block().header().clone();

    loop {
        tokio::select! {
            _ = pool.cancel.cancelled() => {
                slog::debug!(pool.logger, "leave housekeeping");
                return;
            }
            _ = ticker.tick() => {}
        }

        let mut head_changed = false;
        let new_head = pool.repo.best_block();
        if new_head.id() != head.id() {
            head = new_head.header().clone();
            head_changed = true;
        }
        if !is_chain_synced(now_unix(), head.timestamp()) {
            // skip washing txs if not synced
            continue;
        }
        let pool_len = pool.index.len();
        // do wash on
        // 1. head block changed
        // 2. pool size exceeds limit
        // 3. new tx added while pool size is small
        if head_changed
            || pool_len > pool.options.limit
            || (pool_len < SMALL_POOL_THRESHOLD
                && pool.added_after_wash.load(Ordering::Acquire) > 0)
        {
            pool.added_after_wash.store(0, Ordering::Relaxed);
            pool.run_wash(&head);
        }
    }
}

async fn blocklist_loop(pool: Arc<TxPool>) {
    let path = pool.options.blocklist_cache_file_path.clone();
    let url = pool.options.blocklist_fetch_url.clone();

    if let Some(path) = path.as_deref() {
        match pool.blocklist.load(path).await {
            Ok(()) => {
                slog::debug!(pool.logger, "blocklist loaded"; "len" => pool.blocklist.len())
            }
            Err(e) => {
                slog::warn!(pool.logger, "blocklist load failed";
                    "error" => %format!("{e:#}"), "path" => %path.display())
            }
        }
    }
    let Some(url) = url else {
        return;
    };

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            slog::warn!(pool.logger, "blocklist http client build failed"; "error" => %e);
            return;
        }
    };

    let mut etag: Option<String> = None;
    loop {
        tokio::select! {
            _ = pool.cancel.cancelled() => return,
            res = pool.blocklist.fetch(&client, &url, &mut etag) => match res {
                Ok(()) => {
                    slog::debug!(pool.logger, "blocklist fetched"; "len" => pool.blocklist.len());
                    if let Some(path) = path.as_deref() {
                        match pool.blocklist.save(path).await {
                            Ok(()) => slog::debug!(pool.logger, "blocklist saved"),
                            Err(e) => slog::warn!(pool.logger, "blocklist save failed";
                                "error" => %format!("{e:#}"), "path" => %path.display()),
                        }
                    }
                }
                Err(e) => {
                    slog::warn!(pool.logger, "blocklist fetch failed";
                        "error" => %format!("{e:#}"), "url" => %url);
                }
            }
        }

        // delay 1~2 min
        let delay = Duration::from_secs(rand::thread_rng().gen_range(60..120));
        tokio::select! {
            _ = pool.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The chain counts as synced while the head timestamp is within six
/// block intervals of now, in either direction.
fn is_chain_synced(now_timestamp: u64, block_timestamp: u64) -> bool {
    now_timestamp.abs_diff(block_timestamp) < params::BLOCK_INTERVAL * 6
}
