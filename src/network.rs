use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Devnet,
    Testnet,
    Mainnet,
}

impl Network {
    pub const ALL: [Network; 3] = [Network::Devnet, Network::Testnet, Network::Mainnet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Devnet => "devnet",
            Network::Testnet => "testnet",
            Network::Mainnet => "mainnet",
        }
    }

    /// Bech32 address prefix used by the network.
    pub fn address_prefix(&self) -> &'static str {
        match self {
            Network::Mainnet => "ckb",
            _ => "ckt",
        }
    }

    /// Deploying to mainnet is not supported by this tool.
    pub fn ensure_deployable(&self) -> Result<(), Error> {
        self.ensure_test_network("deploying")
    }

    /// Fail with "`action` to mainnet is not supported" on mainnet.
    pub fn ensure_test_network(&self, action: &str) -> Result<(), Error> {
        if *self == Network::Mainnet {
            return Err(anyhow!(
                "{} to mainnet is not supported, use devnet or testnet",
                action
            ));
        }
        Ok(())
    }
}

impl Default for Network {
    fn default() -> Self {
        Network::Devnet
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let network = match s.to_lowercase().as_str() {
            "devnet" | "dev" => Network::Devnet,
            "testnet" | "test" => Network::Testnet,
            "mainnet" | "main" => Network::Mainnet,
            _ => {
                return Err(anyhow!("Unexpected network '{}'", s));
            }
        };
        Ok(network)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_network() {
        assert_eq!("devnet".parse::<Network>().unwrap(), Network::Devnet);
        assert_eq!("Testnet".parse::<Network>().unwrap(), Network::Testnet);
        assert_eq!("main".parse::<Network>().unwrap(), Network::Mainnet);
        assert!("regtest".parse::<Network>().is_err());
    }

    #[test]
    fn test_mainnet_is_not_deployable() {
        assert!(Network::Devnet.ensure_deployable().is_ok());
        assert!(Network::Testnet.ensure_deployable().is_ok());
        assert!(Network::Mainnet.ensure_deployable().is_err());
        let err = Network::Mainnet.ensure_test_network("transferring").unwrap_err();
        assert!(err.to_string().starts_with("transferring to mainnet"));
    }
}
