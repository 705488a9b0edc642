//! Devnet accounts and CKB transfers between addresses.

use crate::chain::{Address, ChainError, SignerKey};
use crate::deployment::plan::HumanCapacity;
use crate::network::Network;
use anyhow::{anyhow, bail, Result};
use ckb_types::H160;
use serde::Serialize;

/// Keys funded by the stock devnet genesis, the first one also receives the
/// mining rewards.
pub const DEVNET_ACCOUNT_KEYS: [&str; 2] = [
    "0xd00c06bfd800d27397002dca6fb0993d5ba6399b4238b2f29ee9deb97593d2bc",
    "0x63d86723e08f0f813a36ce6aa123bb2289d90680ae1e99d4de8cdb334553f24d",
];

pub const TESTNET_FAUCET_URL: &str = "https://faucet.nervos.org";

/// A well known devnet account.
#[derive(Debug, Clone)]
pub struct Account {
    pub index: usize,
    pub privkey: String,
    pub key: SignerKey,
}

impl Account {
    pub fn address(&self) -> Address {
        Address::new(Network::Devnet, self.key.lock_script())
    }
}

pub fn devnet_accounts() -> Result<Vec<Account>, ChainError> {
    DEVNET_ACCOUNT_KEYS
        .iter()
        .enumerate()
        .map(|(index, privkey)| {
            Ok(Account {
                index,
                privkey: privkey.to_string(),
                key: SignerKey::from_hex(privkey)?,
            })
        })
        .collect()
}

#[derive(Serialize)]
struct AccountInfo {
    index: usize,
    address: String,
    privkey: String,
    pubkey: String,
    lock_arg: H160,
    lock_script: ckb_jsonrpc_types::Script,
}

/// YAML listing of `accounts`, private keys included.
pub fn accounts_report(accounts: &[Account]) -> Result<String, serde_yaml::Error> {
    let infos: Vec<AccountInfo> = accounts
        .iter()
        .map(|account| AccountInfo {
            index: account.index,
            address: account.address().to_string(),
            privkey: account.privkey.clone(),
            pubkey: account.key.pubkey_hex(),
            lock_arg: account.key.lock_arg(),
            lock_script: account.key.lock_script().into(),
        })
        .collect();
    serde_yaml::to_string(&infos)
}

/// Parse a CKB amount like `100` or `61.5` into shannons.
pub fn parse_amount(input: &str) -> Result<u64> {
    let amount: HumanCapacity = input
        .parse()
        .map_err(|err| anyhow!("invalid amount '{}': {}", input, err))?;
    if amount.0 == 0 {
        bail!("amount must be greater than zero");
    }
    Ok(amount.0)
}

/// The key that funds deposits, only devnet has one.
pub fn deposit_key(network: Network) -> Result<SignerKey> {
    match network {
        Network::Devnet => Ok(SignerKey::from_hex(DEVNET_ACCOUNT_KEYS[0])?),
        Network::Testnet => bail!(
            "offckb can not deposit on testnet, claim testnet CKB from {}",
            TESTNET_FAUCET_URL
        ),
        Network::Mainnet => bail!("deposit on mainnet is not supported"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::plan::ONE_CKB;

    #[test]
    fn test_devnet_accounts() {
        let accounts = devnet_accounts().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(
            format!("{:#x}", accounts[0].key.lock_arg()),
            crate::node::DEVNET_MINER_LOCK_ARG
        );
        assert_eq!(
            format!("{:#x}", accounts[1].key.lock_arg()),
            "0x470dcdc5e44064909650113a274b3b36aecb6dc7"
        );
        let address = accounts[1].address().to_string();
        assert!(address.starts_with("ckt1"));
        let parsed = Address::parse_for(Network::Devnet, &address).unwrap();
        assert_eq!(parsed.lock(), &accounts[1].key.lock_script());
    }

    #[test]
    fn test_accounts_report() {
        let report = accounts_report(&devnet_accounts().unwrap()).unwrap();
        let listed: serde_yaml::Value = serde_yaml::from_str(&report).unwrap();
        assert_eq!(listed.as_sequence().unwrap().len(), 2);
        assert_eq!(listed[0]["privkey"].as_str(), Some(DEVNET_ACCOUNT_KEYS[0]));
        assert_eq!(
            listed[1]["lock_arg"].as_str(),
            Some("0x470dcdc5e44064909650113a274b3b36aecb6dc7")
        );
        assert_eq!(listed[0]["lock_script"]["hash_type"].as_str(), Some("type"));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("100").unwrap(), 100 * ONE_CKB);
        assert_eq!(parse_amount("0.5").unwrap(), ONE_CKB / 2);
        assert!(parse_amount("0").is_err());
        assert!(parse_amount("ten").is_err());
    }

    #[test]
    fn test_deposit_key() {
        let key = deposit_key(Network::Devnet).unwrap();
        assert_eq!(format!("{:#x}", key.lock_arg()), crate::node::DEVNET_MINER_LOCK_ARG);
        let err = deposit_key(Network::Testnet).unwrap_err();
        assert!(err.to_string().contains(TESTNET_FAUCET_URL));
        assert!(deposit_key(Network::Mainnet).is_err());
    }
}
