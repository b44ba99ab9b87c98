//! Multisig Signer
//!
//! The bridge wallet is an m-of-n P2WSH multisig over the validators' keys.
//! Each validator signs every input of a withdrawal with its share; any m
//! valid contributions are merged into the final witnesses.

use bitcoin::{
    ecdsa,
    hashes::Hash,
    opcodes::all::OP_CHECKMULTISIG,
    script::Builder,
    secp256k1::{self, Message, Secp256k1, SecretKey},
    sighash::{EcdsaSighashType, SighashCache},
    Address, Amount, Network, PublicKey, ScriptBuf, Transaction, Witness,
};

use crate::types::{InputSignature, SignatureContribution, UnspentOutput, WithdrawalId};

/// m-of-n multisig wallet description shared by every validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigWallet {
    /// Keys in script order (sorted by serialization)
    pubkeys: Vec<PublicKey>,
    threshold: usize,
    network: Network,
}

impl MultisigWallet {
    pub fn new(pubkeys: &[secp256k1::PublicKey], threshold: usize, network: Network) -> Result<Self, SignerError> {
        if pubkeys.is_empty() || threshold == 0 || threshold > pubkeys.len() {
            return Err(SignerError::InvalidThreshold {
                threshold,
                keys: pubkeys.len(),
            });
        }

        let mut pubkeys: Vec<PublicKey> = pubkeys.iter().map(|k| PublicKey::new(*k)).collect();
        pubkeys.sort_by_key(|k| k.to_bytes());
        pubkeys.dedup();

        if threshold > pubkeys.len() {
            return Err(SignerError::InvalidThreshold {
                threshold,
                keys: pubkeys.len(),
            });
        }

        Ok(Self {
            pubkeys,
            threshold,
            network,
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn pubkeys(&self) -> &[PublicKey] {
        &self.pubkeys
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// `OP_m <pubkeys> OP_n OP_CHECKMULTISIG`
    pub fn witness_script(&self) -> ScriptBuf {
        let mut builder = Builder::new().push_int(self.threshold as i64);
        for key in &self.pubkeys {
            builder = builder.push_key(key);
        }
        builder
            .push_int(self.pubkeys.len() as i64)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script()
    }

    /// P2WSH address holding the bridge funds
    pub fn address(&self) -> Address {
        Address::p2wsh(&self.witness_script(), self.network)
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address().script_pubkey()
    }

    pub fn position(&self, pubkey_hex: &str) -> Option<usize> {
        self.pubkeys.iter().position(|k| k.to_string() == pubkey_hex)
    }

    /// Sighash of input `index` spending `value_sat` from the multisig
    pub fn sighash(&self, tx: &Transaction, index: usize, value_sat: u64) -> Result<Message, SignerError> {
        let script = self.witness_script();
        let sighash = SighashCache::new(tx)
            .p2wsh_signature_hash(index, &script, Amount::from_sat(value_sat), EcdsaSighashType::All)
            .map_err(|e| SignerError::SigningFailed(e.to_string()))?;
        Ok(Message::from_digest(sighash.to_byte_array()))
    }

    /// Assemble final witnesses from collected contributions
    ///
    /// `inputs` are the spent outputs in transaction input order. Invalid
    /// signatures and signatures from keys outside the script are skipped.
    pub fn finalize(
        &self,
        tx: &Transaction,
        inputs: &[UnspentOutput],
        contributions: &[SignatureContribution],
    ) -> Result<Transaction, SignerError> {
        if inputs.len() != tx.input.len() {
            return Err(SignerError::InputMismatch {
                inputs: tx.input.len(),
                values: inputs.len(),
            });
        }

        let secp = Secp256k1::verification_only();
        let script = self.witness_script();
        let mut signed = tx.clone();

        for (index, utxo) in inputs.iter().enumerate() {
            let msg = self.sighash(tx, index, utxo.value_sat)?;

            // One slot per script key keeps the CHECKMULTISIG order
            let mut slots: Vec<Option<Vec<u8>>> = vec![None; self.pubkeys.len()];
            for contribution in contributions {
                let Some(position) = self.position(&contribution.signer_pubkey) else {
                    continue;
                };
                let Some(input_sig) = contribution.for_input(index) else {
                    continue;
                };
                let Ok(bytes) = hex::decode(&input_sig.signature) else {
                    continue;
                };
                let Ok(sig) = ecdsa::Signature::from_slice(&bytes) else {
                    continue;
                };
                if sig.sighash_type != EcdsaSighashType::All {
                    continue;
                }
                if secp
                    .verify_ecdsa(&msg, &sig.signature, &self.pubkeys[position].inner)
                    .is_ok()
                {
                    slots[position] = Some(bytes);
                }
            }

            let sigs: Vec<Vec<u8>> = slots.into_iter().flatten().take(self.threshold).collect();
            if sigs.len() < self.threshold {
                return Err(SignerError::NotEnoughSignatures {
                    input: index,
                    have: sigs.len(),
                    need: self.threshold,
                });
            }

            let mut items: Vec<Vec<u8>> = Vec::with_capacity(sigs.len() + 2);
            items.push(Vec::new());
            items.extend(sigs);
            items.push(script.to_bytes());
            signed.input[index].witness = Witness::from_slice(&items);
        }

        Ok(signed)
    }
}

/// This validator's share of the multisig key
pub struct MultisigSigner {
    secret_key: SecretKey,
    secp: Secp256k1<secp256k1::All>,
}

impl MultisigSigner {
    /// Create from secret key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignerError> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;

        Ok(Self { secret_key, secp })
    }

    /// Create from hex string
    pub fn from_hex(hex: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(hex.trim())
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;

        if bytes.len() != 32 {
            return Err(SignerError::InvalidKey("key must be 32 bytes".to_string()));
        }

        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Self::from_bytes(&arr)
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        Self {
            secret_key,
            secp: Secp256k1::new(),
        }
    }

    /// Generate a new random key share
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        Self { secret_key, secp }
    }

    /// Get secret key hex (for backup)
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::new(self.secret_key.public_key(&self.secp))
    }

    /// Compressed public key hex; the author of this node's contributions
    pub fn public_key_hex(&self) -> String {
        self.public_key().to_string()
    }

    /// Sign every input of `tx`
    pub fn sign_inputs(
        &self,
        wallet: &MultisigWallet,
        tx: &Transaction,
        inputs: &[UnspentOutput],
    ) -> Result<Vec<InputSignature>, SignerError> {
        if wallet.position(&self.public_key_hex()).is_none() {
            return Err(SignerError::UnknownSigner(self.public_key_hex()));
        }
        if inputs.len() != tx.input.len() {
            return Err(SignerError::InputMismatch {
                inputs: tx.input.len(),
                values: inputs.len(),
            });
        }

        inputs
            .iter()
            .enumerate()
            .map(|(index, utxo)| {
                let msg = wallet.sighash(tx, index, utxo.value_sat)?;
                let signature = ecdsa::Signature {
                    signature: self.secp.sign_ecdsa(&msg, &self.secret_key),
                    sighash_type: EcdsaSighashType::All,
                };
                Ok(InputSignature {
                    input_index: index,
                    signature: hex::encode(signature.to_vec()),
                })
            })
            .collect()
    }

    /// Sign and wrap as a ledger contribution
    pub fn contribution(
        &self,
        withdrawal_id: &WithdrawalId,
        wallet: &MultisigWallet,
        tx: &Transaction,
        inputs: &[UnspentOutput],
    ) -> Result<SignatureContribution, SignerError> {
        Ok(SignatureContribution {
            withdrawal_id: withdrawal_id.clone(),
            signer_pubkey: self.public_key_hex(),
            signatures: self.sign_inputs(wallet, tx, inputs)?,
        })
    }
}

/// Signer errors
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("invalid threshold {threshold} for {keys} keys")]
    InvalidThreshold { threshold: usize, keys: usize },

    #[error("signer {0} is not part of the multisig")]
    UnknownSigner(String),

    #[error("transaction has {inputs} inputs but {values} input values were given")]
    InputMismatch { inputs: usize, values: usize },

    #[error("input {input}: {have} valid signatures, {need} required")]
    NotEnoughSignatures { input: usize, have: usize, need: usize },
}
