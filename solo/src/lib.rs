//! Solo mode: a standalone single-validator packing loop.
//!
//! The loop drains the pool's executable snapshot on a timer (or packs
//! immediately per transaction in on-demand mode), commits the produced
//! block, and adapts its gas-limit target to the observed packing time.

mod bandwidth;
mod gas_limit;

pub use bandwidth::Bandwidth;
pub use gas_limit::recalculate_gas_limit;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use slog::Logger;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use chain::packer::{PackError, Packer};
use chain::repository::Repository;
use chain::state::Stater;
use chain::{genesis, Block, ForkConfig, LogWriter, Transactions};
use txpool::TxPool;

/// Target wall-clock budget for packing one block.
pub const MAX_PACK_DURATION: Duration = Duration::from_secs(10);

/// Interval between packing attempts.
const PACK_INTERVAL: Duration = Duration::from_secs(10);

/// Buffer of the pool event subscription.
const TX_EVENT_BUFFER: usize = 10;

/// Solo-mode configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SoloOptions {
    /// Fixed block gas limit; 0 lets the bandwidth estimator drive it.
    pub gas_limit: u64,
    /// Pack immediately per transaction instead of on the interval.
    pub on_demand: bool,
    /// Skip the receipt log write-through.
    pub skip_logs: bool,
    /// Fork schedule for packed blocks.
    pub fork_config: ForkConfig,
}

impl Default for SoloOptions {
    fn default() -> Self {
        Self {
            gas_limit: 0,
            on_demand: false,
            skip_logs: false,
            fork_config: ForkConfig::default(),
        }
    }
}

/// Solo mode is the standalone client without a p2p server.
pub struct Solo {
    repo: Arc<Repository>,
    pool: Arc<TxPool>,
    packer: Packer,
    log_db: Arc<dyn LogWriter>,
    signer: SigningKey,
    bandwidth: Bandwidth,
    gas_limit: u64,
    on_demand: bool,
    skip_logs: bool,
    logger: Logger,
}

impl Solo {
    /// Returns a Solo instance packing on behalf of the first dev account.
    pub fn new(
        repo: Arc<Repository>,
        stater: Arc<Stater>,
        log_db: Arc<dyn LogWriter>,
        pool: Arc<TxPool>,
        options: SoloOptions,
        logger: Logger,
    ) -> Self {
        let dev_accounts = genesis::dev_accounts();
        let dev = &dev_accounts[0];
        let packer = Packer::new(
            Arc::clone(&repo),
            stater,
            dev.address,
            options.fork_config,
        );
        Self {
            repo,
            pool,
            packer,
            log_db,
            signer: dev.signing_key.clone(),
            bandwidth: Bandwidth::new(),
            gas_limit: options.gas_limit,
            on_demand: options.on_demand,
            skip_logs: options.skip_logs,
            logger,
        }
    }

    /// Runs the packing loop until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + PACK_INTERVAL,
            PACK_INTERVAL,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut tx_events = self.pool.subscribe_tx_event(TX_EVENT_BUFFER);
        let mut tx_events_open = true;

        slog::info!(self.logger, "prepared to pack block");

        if let Err(e) = self.packing(Transactions::new()) {
            slog::error!(self.logger, "failed to pack block"; "err" => %format!("{e:#}"));
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    slog::info!(self.logger, "stopping interval packing service");
                    return;
                }
                event = tx_events.recv(), if tx_events_open => {
                    let Some(event) = event else {
                        tx_events_open = false;
                        continue;
                    };
                    if self.on_demand {
                        if let Err(e) = self.packing(vec![event.tx]) {
                            slog::error!(self.logger, "failed to pack block"; "err" => %format!("{e:#}"));
                        }
                    }
                }
                _ = ticker.tick() => {
                    if self.on_demand {
                        continue;
                    }
                    match self.packing(self.pool.executables()) {
                        Ok(pack_duration) => {
                            let new_gas_limit = recalculate_gas_limit(
                                pack_duration,
                                MAX_PACK_DURATION,
                                self.gas_limit,
                            );
                            slog::info!(self.logger, "gaslimit";
                                "old" => self.gas_limit, "new" => new_gas_limit);
                            self.gas_limit = new_gas_limit;
                        }
                        Err(e) => {
                            slog::error!(self.logger, "failed to pack block"; "err" => %format!("{e:#}"));
                        }
                    }
                }
            }
        }
    }

    /// Packs one block out of `pending`, commits it and moves the best
    /// block. Returns the total elapsed packing time.
    fn packing(&mut self, pending: Transactions) -> Result<Duration> {
        slog::info!(self.logger, "pool";
            "pending" => pending.len(),
            "executables" => self.pool.executable_size(),
            "size" => self.pool.len(),
        );

        let mut txs_to_remove = Transactions::new();
        let result = self.packing_inner(&pending, &mut txs_to_remove);
        // Unadoptable txs leave the pool on every exit path.
        for tx in txs_to_remove {
            self.pool.remove(&tx.hash(), &tx.id().unwrap_or_default());
        }
        result
    }

    fn packing_inner(
        &mut self,
        pending: &Transactions,
        txs_to_remove: &mut Transactions,
    ) -> Result<Duration> {
        let best = self.repo.best_block();

        if self.gas_limit == 0 {
            let suggested = self.bandwidth.suggest_gas_limit();
            self.packer.set_target_gas_limit(suggested);
        }

        let mut flow = self
            .packer
            .mock(best.header(), now_unix(), self.gas_limit)
            .context("mock packer")?;

        let start = Instant::now();
        for tx in pending {
            match flow.adopt(tx) {
                Ok(()) => {}
                Err(PackError::GasLimitReached) => break,
                Err(PackError::NotAdoptableNow) => continue,
                Err(PackError::Unprocessable(_)) => txs_to_remove.push(Arc::clone(tx)),
            }
        }

        let (block, stage, receipts) = flow.pack(&self.signer).context("pack")?;
        let exec_elapsed = start.elapsed();

        // If there is no tx packed in the on-demand mode then skip.
        if self.on_demand && block.transactions().is_empty() {
            return Ok(exec_elapsed);
        }

        stage.commit().context("commit state")?;

        // Fork choice does not apply in solo.
        self.repo
            .add_block(block.clone(), receipts.clone())
            .context("commit block")?;
        self.repo
            .set_best_block_id(&block.id())
            .context("set best block")?;

        if !self.skip_logs {
            self.log_db
                .write(&block, &receipts)
                .context("commit log")?;
        }

        let total_elapsed = start.elapsed();
        let commit_elapsed = total_elapsed - exec_elapsed;

        if let Some(gps) = self
            .bandwidth
            .update(block.header(), exec_elapsed + commit_elapsed)
        {
            slog::debug!(self.logger, "bandwidth updated"; "gps" => gps);
        }

        log_packed_block(&self.logger, &block, receipts.len(), exec_elapsed, commit_elapsed);

        Ok(total_elapsed)
    }
}

fn log_packed_block(
    logger: &Logger,
    block: &Block,
    receipt_count: usize,
    exec_elapsed: Duration,
    commit_elapsed: Duration,
) {
    slog::info!(logger, "📦 new block packed";
        "txs" => receipt_count,
        "mgas" => block.header().gas_used() as f64 / 1_000.0 / 1_000.0,
        "et" => %format!("{exec_elapsed:?}|{commit_elapsed:?}"),
        "id" => %block.id(),
    );
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
