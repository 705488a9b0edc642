use super::ChainError;
use ckb_crypto::secp::{Privkey, Pubkey};
use ckb_hash::{blake2b_256, new_blake2b};
use ckb_types::{
    bytes::Bytes,
    core::{ScriptHashType, TransactionView},
    packed::{self, WitnessArgs},
    prelude::*,
    H160, H256,
};
use std::fmt;

pub const SIGNATURE_SIZE: usize = 65;
pub const SIGHASH_TYPE_HASH: H256 =
    ckb_types::h256!("0x9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8");

/// A secp256k1 key that owns and signs for sighash-all cells.
#[derive(Clone)]
pub struct SignerKey {
    privkey: Privkey,
    pubkey: Pubkey,
}

impl SignerKey {
    pub fn from_hex(input: &str) -> Result<Self, ChainError> {
        let hex = input.trim().trim_start_matches("0x");
        if hex.len() != 64 {
            return Err(ChainError::InvalidKey(format!(
                "expect 32 bytes hex, got {} chars",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 32];
        faster_hex::hex_decode(hex.as_bytes(), &mut bytes)
            .map_err(|err| ChainError::InvalidKey(err.to_string()))?;
        let privkey = Privkey::from_slice(&bytes);
        let pubkey = privkey
            .pubkey()
            .map_err(|err| ChainError::InvalidKey(err.to_string()))?;
        Ok(SignerKey { privkey, pubkey })
    }

    /// blake160 of the compressed public key.
    pub fn lock_arg(&self) -> H160 {
        let hash = blake2b_256(self.pubkey.serialize());
        let mut arg = [0u8; 20];
        arg.copy_from_slice(&hash[0..20]);
        H160(arg)
    }

    /// Compressed public key as 0x-prefixed hex.
    pub fn pubkey_hex(&self) -> String {
        format!("0x{}", faster_hex::hex_string(&self.pubkey.serialize()))
    }

    pub fn lock_script(&self) -> packed::Script {
        packed::Script::new_builder()
            .code_hash(SIGHASH_TYPE_HASH.pack())
            .hash_type(ScriptHashType::Type.into())
            .args(Bytes::from(self.lock_arg().as_bytes().to_vec()).pack())
            .build()
    }

    /// Sign every input of `tx`, all of them must be locked by this key.
    pub fn sign_tx(&self, tx: TransactionView) -> Result<TransactionView, ChainError> {
        let tx = with_placeholder_witnesses(tx);
        let message = tx_sign_message(&tx, 0, tx.inputs().len());
        let signature = self
            .privkey
            .sign_recoverable(&message)
            .map_err(|err| ChainError::InvalidKey(err.to_string()))?;
        Ok(attach_signature(tx, signature.serialize().into(), 0))
    }
}

impl fmt::Debug for SignerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignerKey({:#x})", self.lock_arg())
    }
}

/// Fill witnesses so that the first one carries a zeroed signature, this is
/// also the shape used to estimate the transaction size.
pub fn with_placeholder_witnesses(tx: TransactionView) -> TransactionView {
    let zero_lock = Bytes::from(vec![0u8; SIGNATURE_SIZE]);
    let mut witnesses: Vec<packed::Bytes> = vec![WitnessArgs::new_builder()
        .lock(Some(zero_lock).pack())
        .build()
        .as_bytes()
        .pack()];
    witnesses.extend((1..tx.inputs().len()).map(|_| packed::Bytes::default()));
    tx.as_advanced_builder().set_witnesses(witnesses).build()
}

pub fn tx_sign_message(tx: &TransactionView, begin_index: usize, len: usize) -> H256 {
    let mut blake2b = new_blake2b();
    let mut message = [0u8; 32];
    blake2b.update(&tx.hash().raw_data());
    // digest the first witness with a zeroed lock
    let witness = tx
        .witnesses()
        .get(begin_index)
        .map(|w| WitnessArgs::new_unchecked(w.unpack()))
        .unwrap_or_default();
    let witness_for_digest = witness
        .as_builder()
        .lock(Some(Bytes::from(vec![0u8; SIGNATURE_SIZE])).pack())
        .build();
    let witness_len = witness_for_digest.as_bytes().len() as u64;
    blake2b.update(&witness_len.to_le_bytes());
    blake2b.update(&witness_for_digest.as_bytes());
    // rest of the group, then witnesses without a matching input
    let tail = (begin_index + 1)..(begin_index + len);
    let extra = tx.inputs().len()..tx.witnesses().len();
    for n in tail.chain(extra) {
        if let Some(witness) = tx.witnesses().get(n) {
            let witness_len = witness.raw_data().len() as u64;
            blake2b.update(&witness_len.to_le_bytes());
            blake2b.update(&witness.raw_data());
        }
    }
    blake2b.finalize(&mut message);
    H256::from(message)
}

pub fn attach_signature(tx: TransactionView, signature: Bytes, begin_index: usize) -> TransactionView {
    let signed_witnesses: Vec<packed::Bytes> = tx
        .witnesses()
        .into_iter()
        .enumerate()
        .map(|(i, witness)| {
            if i == begin_index {
                WitnessArgs::new_unchecked(witness.unpack())
                    .as_builder()
                    .lock(Some(signature.clone()).pack())
                    .build()
                    .as_bytes()
                    .pack()
            } else {
                witness
            }
        })
        .collect();
    tx.as_advanced_builder()
        .set_witnesses(signed_witnesses)
        .build()
}
