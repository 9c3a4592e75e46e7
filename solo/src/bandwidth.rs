//! Packing bandwidth estimation.

use std::sync::Mutex;
use std::time::Duration;

use chain::Header;

/// Gas-limit suggestion used before any block has been measured.
const DEFAULT_SUGGESTED_GAS_LIMIT: u64 = 10_000_000;

/// Fraction of a block interval a packed block should spend executing.
const TARGET_EXEC_FRACTION: u64 = 20;

/// Tracks observed execution bandwidth (gas per second) of packed blocks
/// and suggests a gas limit sized to it.
#[derive(Debug, Default)]
pub struct Bandwidth {
    gps: Mutex<u64>,
}

impl Bandwidth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current gas-per-second estimate; 0 until the first sample.
    pub fn gas_per_second(&self) -> u64 {
        *self.gps.lock().expect("bandwidth lock poisoned")
    }

    /// A gas limit sized so that a block at the observed bandwidth packs
    /// within a twentieth of the block interval.
    pub fn suggest_gas_limit(&self) -> u64 {
        let gps = self.gas_per_second();
        if gps == 0 {
            return DEFAULT_SUGGESTED_GAS_LIMIT;
        }
        (u128::from(gps) * u128::from(chain::params::BLOCK_INTERVAL) / u128::from(TARGET_EXEC_FRACTION))
            as u64
    }

    /// Feeds one observed block; returns the new gas-per-second estimate,
    /// or `None` when the sample carries no signal (no gas or no time).
    pub fn update(&self, header: &Header, elapsed: Duration) -> Option<u64> {
        let nanos = elapsed.as_nanos();
        if header.gas_used() == 0 || nanos == 0 {
            return None;
        }
        let gps = (u128::from(header.gas_used()) * 1_000_000_000 / nanos) as u64;
        *self.gps.lock().expect("bandwidth lock poisoned") = gps;
        Some(gps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain::state::StateRoot;
    use chain::tx::Features;
    use chain::{Address, BlockId};

    fn header(gas_used: u64) -> Header {
        Header::new(
            BlockId::default(),
            1,
            1_000,
            10_000_000,
            gas_used,
            StateRoot::default(),
            Features::empty(),
            Address::from_bytes([1u8; 32]),
        )
    }

    #[test]
    fn default_suggestion_before_any_sample() {
        let bw = Bandwidth::new();
        assert_eq!(bw.suggest_gas_limit(), DEFAULT_SUGGESTED_GAS_LIMIT);
    }

    #[test]
    fn update_measures_gas_per_second() {
        let bw = Bandwidth::new();
        let gps = bw
            .update(&header(2_000_000), Duration::from_secs(2))
            .expect("sample");
        assert_eq!(gps, 1_000_000);
        assert_eq!(bw.gas_per_second(), 1_000_000);
        assert_eq!(
            bw.suggest_gas_limit(),
            1_000_000 * chain::params::BLOCK_INTERVAL / TARGET_EXEC_FRACTION
        );
    }

    #[test]
    fn empty_blocks_do_not_update() {
        let bw = Bandwidth::new();
        assert!(bw.update(&header(0), Duration::from_secs(1)).is_none());
        assert!(bw
            .update(&header(1_000), Duration::from_nanos(0))
            .is_none());
        assert_eq!(bw.gas_per_second(), 0);
    }
}
