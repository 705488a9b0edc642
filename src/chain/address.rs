use super::signer::SIGHASH_TYPE_HASH;
use crate::network::Network;
use bech32::{FromBase32, ToBase32, Variant};
use ckb_types::{bytes::Bytes, core::ScriptHashType, packed, prelude::*, H256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MULTISIG_TYPE_HASH: H256 =
    ckb_types::h256!("0x5c5069eb0857efc65e1bca0c07df34c31663b3622fd3876c876320fc9634e2a8");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address: {0}")]
    Encoding(String),
    #[error("unknown address prefix {0}")]
    Prefix(String),
    #[error("invalid address payload: {0}")]
    Payload(String),
    #[error("{address} is a {actual} address, expect a {expected} one")]
    Network {
        address: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Payload format byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum AddressType {
    Full = 0x00,
    Short = 0x01,
    FullData = 0x02,
    FullType = 0x04,
}

impl AddressType {
    fn from_u8(value: u8) -> Result<AddressType, AddressError> {
        match value {
            0x00 => Ok(AddressType::Full),
            0x01 => Ok(AddressType::Short),
            0x02 => Ok(AddressType::FullData),
            0x04 => Ok(AddressType::FullType),
            _ => Err(AddressError::Payload(format!(
                "unknown address type {:#04x}",
                value
            ))),
        }
    }
}

/// A lock script together with the address prefix it is shown with.
///
/// Addresses are always rendered in the full format, the deprecated short
/// and full-data/full-type formats are accepted when parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    prefix: &'static str,
    lock: packed::Script,
}

impl Address {
    pub fn new(network: Network, lock: packed::Script) -> Self {
        Address {
            prefix: network.address_prefix(),
            lock,
        }
    }

    /// Parse `input` and check it belongs to `network`. Devnet shares the
    /// testnet prefix.
    pub fn parse_for(network: Network, input: &str) -> Result<Self, AddressError> {
        let address: Address = input.parse()?;
        let expected = network.address_prefix();
        if address.prefix != expected {
            return Err(AddressError::Network {
                address: input.to_string(),
                expected,
                actual: address.prefix,
            });
        }
        Ok(address)
    }

    pub fn lock(&self) -> &packed::Script {
        &self.lock
    }

    fn full_payload(&self) -> Vec<u8> {
        let mut data = vec![AddressType::Full as u8];
        data.extend_from_slice(self.lock.code_hash().as_slice());
        data.extend_from_slice(self.lock.hash_type().as_slice());
        data.extend_from_slice(&self.lock.args().raw_data());
        data
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let encoded = bech32::encode(
            self.prefix,
            self.full_payload().to_base32(),
            Variant::Bech32m,
        )
        .map_err(|_| fmt::Error)?;
        write!(f, "{}", encoded)
    }
}

fn prefix_of(hrp: &str) -> Result<&'static str, AddressError> {
    [Network::Mainnet, Network::Testnet]
        .iter()
        .map(Network::address_prefix)
        .find(|prefix| *prefix == hrp)
        .ok_or_else(|| AddressError::Prefix(hrp.to_string()))
}

fn script(code_hash: &[u8], hash_type: ScriptHashType, args: &[u8]) -> packed::Script {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(code_hash);
    packed::Script::new_builder()
        .code_hash(hash.pack())
        .hash_type(hash_type.into())
        .args(Bytes::from(args.to_vec()).pack())
        .build()
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (hrp, data, variant) =
            bech32::decode(input).map_err(|err| AddressError::Encoding(err.to_string()))?;
        let prefix = prefix_of(&hrp)?;
        let data = Vec::<u8>::from_base32(&data)
            .map_err(|err| AddressError::Encoding(err.to_string()))?;
        let ty = AddressType::from_u8(*data.first().ok_or_else(|| {
            AddressError::Payload("empty payload".to_string())
        })?)?;
        let expected_variant = if ty == AddressType::Full {
            Variant::Bech32m
        } else {
            Variant::Bech32
        };
        if variant != expected_variant {
            return Err(AddressError::Encoding(format!(
                "{:?} checksum for address type {:?}",
                variant, ty
            )));
        }

        let lock = match ty {
            AddressType::Full => {
                if data.len() < 34 {
                    return Err(AddressError::Payload(format!(
                        "full payload of {} bytes",
                        data.len()
                    )));
                }
                let hash_type = match data[33] {
                    0x00 => ScriptHashType::Data,
                    0x01 => ScriptHashType::Type,
                    0x02 => ScriptHashType::Data1,
                    0x04 => ScriptHashType::Data2,
                    other => {
                        return Err(AddressError::Payload(format!(
                            "unknown hash type {:#04x}",
                            other
                        )))
                    }
                };
                script(&data[1..33], hash_type, &data[34..])
            }
            AddressType::Short => {
                if data.len() != 22 {
                    return Err(AddressError::Payload(format!(
                        "short payload of {} bytes",
                        data.len()
                    )));
                }
                let code_hash = match data[1] {
                    0x00 => SIGHASH_TYPE_HASH,
                    0x01 => MULTISIG_TYPE_HASH,
                    other => {
                        return Err(AddressError::Payload(format!(
                            "unsupported code hash index {:#04x}",
                            other
                        )))
                    }
                };
                script(code_hash.as_bytes(), ScriptHashType::Type, &data[2..])
            }
            AddressType::FullData | AddressType::FullType => {
                if data.len() < 33 {
                    return Err(AddressError::Payload(format!(
                        "full payload of {} bytes",
                        data.len()
                    )));
                }
                let hash_type = if ty == AddressType::FullData {
                    ScriptHashType::Data
                } else {
                    ScriptHashType::Type
                };
                script(&data[1..33], hash_type, &data[33..])
            }
        };
        Ok(Address { prefix, lock })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARGS: [u8; 20] = [
        0xb3, 0x9b, 0xbc, 0x0b, 0x36, 0x73, 0xc7, 0xd3, 0x64, 0x50, 0xbc, 0x14, 0xcf, 0xcd,
        0xad, 0x2d, 0x55, 0x9c, 0x6c, 0x64,
    ];

    fn sighash_lock() -> packed::Script {
        script(SIGHASH_TYPE_HASH.as_bytes(), ScriptHashType::Type, &ARGS)
    }

    #[test]
    fn test_full_address() {
        let address = Address::new(Network::Mainnet, sighash_lock());
        let encoded = address.to_string();
        assert_eq!(
            encoded,
            "ckb1qzda0cr08m85hc8jlnfp3zer7xulejywt49kt2rr0vthywaa50xwsqdnnw7qkdnnclfkg59uzn8umtfd2kwxceqxwquc4"
        );
        assert_eq!(encoded.parse::<Address>().unwrap(), address);
        assert!(Address::new(Network::Devnet, sighash_lock())
            .to_string()
            .starts_with("ckt1qzda0cr08m85hc8jlnfp3zer7xulejywt49kt2rr0vthywaa50xws"));
    }

    #[test]
    fn test_short_address_is_accepted() {
        let address: Address = "ckb1qyqt8xaupvm8837nv3gtc9x0ekkj64vud3jqfwyw5v".parse().unwrap();
        assert_eq!(address.lock(), &sighash_lock());
    }

    #[test]
    fn test_network_of_address() {
        let testnet = Address::new(Network::Testnet, sighash_lock()).to_string();
        assert!(Address::parse_for(Network::Devnet, &testnet).is_ok());
        assert!(matches!(
            Address::parse_for(Network::Mainnet, &testnet),
            Err(AddressError::Network { .. })
        ));
        assert!(matches!(
            "ckb1invalid".parse::<Address>(),
            Err(AddressError::Encoding(_))
        ));
    }
}
