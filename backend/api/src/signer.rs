//! Local signing of contract calls with a hot-wallet key.
//!
//! Transactions are legacy EIP-155 transactions: RLP-encoded, hashed with
//! Keccak-256 and signed with a recoverable secp256k1 signature. Signing is
//! deterministic (RFC 6979), so rebroadcasting a signed transaction sends
//! exactly the same bytes and the same hash.

use std::fmt;

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use thiserror::Error;

use crate::abi::keccak256;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("private key is not hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid secp256k1 key or signature: {0}")]
    Ecdsa(#[from] k256::ecdsa::Error),

    #[error("invalid recipient address {0}")]
    Recipient(String),
}

/// An unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: u64,
    pub gas: u64,
    /// Recipient, `0x`-prefixed.
    pub to: String,
    pub value: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    /// `0x`-prefixed raw transaction for `eth_sendRawTransaction`.
    pub raw: String,
    pub hash: String,
}

#[derive(Clone)]
pub struct LocalSigner {
    key: SigningKey,
    address: String,
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// Load a 32-byte secret given as hex, with or without `0x`.
    pub fn from_hex(secret: &str) -> Result<Self, SignerError> {
        let raw = secret.trim();
        let bytes = hex::decode(raw.strip_prefix("0x").unwrap_or(raw))?;
        let key = SigningKey::from_slice(&bytes)?;
        let address = address_of(&key);
        Ok(Self { key, address })
    }

    /// EIP-55 checksummed account address.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn sign(&self, tx: &LegacyTx, chain_id: u64) -> Result<SignedTx, SignerError> {
        let to = decode_address(&tx.to)?;
        let mut fields = vec![
            rlp_uint(tx.nonce),
            rlp_uint(tx.gas_price),
            rlp_uint(tx.gas),
            rlp_bytes(&to),
            rlp_uint(tx.value),
            rlp_bytes(&tx.data),
        ];

        let mut unsigned = fields.clone();
        unsigned.extend([rlp_uint(chain_id), rlp_uint(0), rlp_uint(0)]);
        let sighash = keccak256(&rlp_list(&unsigned));

        let (signature, recovery) = self.key.sign_prehash_recoverable(&sighash)?;
        let v = chain_id * 2 + 35 + u64::from(recovery.is_y_odd());
        let rs = signature.to_bytes();
        let (r, s) = rs.split_at(32);
        fields.extend([
            rlp_uint(v),
            rlp_bytes(trim_leading_zeros(r)),
            rlp_bytes(trim_leading_zeros(s)),
        ]);

        let raw = rlp_list(&fields);
        Ok(SignedTx {
            hash: format!("0x{}", hex::encode(keccak256(&raw))),
            raw: format!("0x{}", hex::encode(raw)),
        })
    }
}

fn address_of(key: &SigningKey) -> String {
    let point = key.verifying_key().as_affine().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    checksum_address(&hash[12..])
}

fn checksum_address(bytes: &[u8]) -> String {
    let lower = hex::encode(bytes);
    let hash = hex::encode(keccak256(lower.as_bytes()));
    let mixed: String = lower
        .chars()
        .zip(hash.chars())
        .map(|(c, h)| {
            if c.is_ascii_alphabetic() && h.to_digit(16).is_some_and(|n| n >= 8) {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect();
    format!("0x{mixed}")
}

fn decode_address(address: &str) -> Result<Vec<u8>, SignerError> {
    let raw = address.strip_prefix("0x").unwrap_or(address);
    match hex::decode(raw) {
        Ok(bytes) if bytes.len() == 20 => Ok(bytes),
        _ => Err(SignerError::Recipient(address.to_string())),
    }
}

// ─────────────────────────────────────────────────────────
// RLP
// ─────────────────────────────────────────────────────────

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

fn rlp_length(len: usize, offset: u8) -> Vec<u8> {
    if len < 56 {
        return vec![offset + len as u8];
    }
    let len_bytes = (len as u64).to_be_bytes();
    let len_bytes = trim_leading_zeros(&len_bytes);
    let mut out = vec![offset + 55 + len_bytes.len() as u8];
    out.extend_from_slice(len_bytes);
    out
}

fn rlp_bytes(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        return bytes.to_vec();
    }
    let mut out = rlp_length(bytes.len(), 0x80);
    out.extend_from_slice(bytes);
    out
}

fn rlp_uint(value: u64) -> Vec<u8> {
    rlp_bytes(trim_leading_zeros(&value.to_be_bytes()))
}

fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let body = items.concat();
    let mut out = rlp_length(body.len(), 0xc0);
    out.extend(body);
    out
}
