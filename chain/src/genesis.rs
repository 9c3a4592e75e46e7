//! Dev-mode genesis: deterministic accounts and the genesis block builder.

use ed25519_dalek::SigningKey;

use crate::address::Address;
use crate::block::{Block, BlockId, Header};
use crate::params::ForkConfig;
use crate::state::{Balance, StateSnapshot, Stater};

/// Balance every dev account starts with.
pub const DEV_INITIAL_BALANCE: Balance = 1_000_000_000_000_000_000;

/// Base gas price written into the dev genesis state.
pub const DEV_BASE_GAS_PRICE: u64 = 1_000;

/// Gas limit of the dev genesis block.
pub const DEV_GAS_LIMIT: u64 = 10_000_000;

const DEV_ACCOUNT_COUNT: usize = 10;

/// A well-known dev account: its signing key and derived address.
#[derive(Clone)]
pub struct DevAccount {
    pub signing_key: SigningKey,
    pub address: Address,
}

/// The fixed set of dev accounts. Keys are derived from stable labels, so
/// every node in a dev network agrees on them.
pub fn dev_accounts() -> Vec<DevAccount> {
    (0..DEV_ACCOUNT_COUNT)
        .map(|i| {
            let seed: [u8; 32] = blake3::hash(format!("dev-account-{i}").as_bytes()).into();
            let signing_key = SigningKey::from_bytes(&seed);
            let address = Address::from_public_key(&signing_key.verifying_key());
            DevAccount {
                signing_key,
                address,
            }
        })
        .collect()
}

/// Builds the dev genesis block, persisting its state into `stater`.
pub fn build_dev(stater: &Stater, timestamp: u64, fork_config: &ForkConfig) -> Block {
    let mut snapshot = StateSnapshot::new(DEV_BASE_GAS_PRICE);
    let accounts = dev_accounts();
    for account in &accounts {
        snapshot.set_balance(account.address, DEV_INITIAL_BALANCE);
    }
    let state_root = stater.persist(snapshot);
    let header = Header::new(
        BlockId::default(),
        0,
        timestamp,
        DEV_GAS_LIMIT,
        0,
        state_root,
        fork_config.features_at(0),
        accounts[0].address,
    );
    Block::new(header, Vec::new(), [0u8; 64])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_accounts_are_deterministic() {
        let a = dev_accounts();
        let b = dev_accounts();
        assert_eq!(a.len(), DEV_ACCOUNT_COUNT);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.address, y.address);
        }
        // All distinct.
        for i in 0..a.len() {
            for j in i + 1..a.len() {
                assert_ne!(a[i].address, a[j].address);
            }
        }
    }

    #[test]
    fn genesis_funds_dev_accounts() {
        let stater = Stater::new();
        let genesis = build_dev(&stater, 1_000, &ForkConfig::default());
        assert_eq!(genesis.header().number(), 0);

        let view = stater
            .new_state(genesis.header().state_root())
            .expect("genesis state");
        for account in dev_accounts() {
            assert_eq!(view.balance(&account.address), DEV_INITIAL_BALANCE);
        }
        assert_eq!(view.base_gas_price(), DEV_BASE_GAS_PRICE);
    }
}
