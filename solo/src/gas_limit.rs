//! Gas-limit controller.

use std::time::Duration;

/// Adjusts the gas limit toward the packing-time target.
///
/// When the observed duration fits the target, the limit creeps up by 1%;
/// when it overshoots, the limit is damped by the integer percentage ratio
/// of target over observed.
pub fn recalculate_gas_limit(used: Duration, expected: Duration, now_gas_limit: u64) -> u64 {
    let a = used.as_nanos();
    let b = expected.as_nanos();
    if a <= b {
        return (now_gas_limit as f64 * 1.01) as u64;
    }

    // a > b
    let ratio = (b as f64 / a as f64 * 100.0) as u128;
    (ratio * u128::from(now_gas_limit) / 100) as u64
}
