//! # Keys
//!
//! Ed25519 key handling for operators. Everything here is a pure function of
//! its input except [`PrivateKey::generate`], which reads the thread RNG.
//!
//! Keys are accepted either as raw 32-byte hex or in the DER-prefixed hex form
//! the ledger tooling prints (`302e0201...0420<key>` for private keys,
//! `302a3005...2100<key>` for public keys).

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::Rng;

use crate::error::{ClientError, Result};

const PRIVATE_KEY_DER_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04, 0x20,
];
const PUBLIC_KEY_DER_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Decode a hex string, tolerating a leading `0x`.
pub fn decode_hex(input: &str) -> std::result::Result<Vec<u8>, hex::FromHexError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits)
}

/// Private signing key of an operator.
#[derive(Clone)]
pub struct PrivateKey {
    inner: SigningKey,
}

impl PrivateKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let seed: [u8; 32] = rand::thread_rng().gen();
        Self {
            inner: SigningKey::from_bytes(&seed),
        }
    }

    /// Build from raw (32 bytes), DER (48 bytes) or seed+public (64 bytes) material.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let seed = match bytes.len() {
            32 => bytes,
            48 if bytes.starts_with(&PRIVATE_KEY_DER_PREFIX) => &bytes[16..],
            64 => &bytes[..32],
            n => return Err(ClientError::InvalidKey(format!("unexpected private key length {n}"))),
        };

        let mut raw = [0u8; 32];
        raw.copy_from_slice(seed);
        let key = Self {
            inner: SigningKey::from_bytes(&raw),
        };

        // The trailing half of 64-byte material must be the seed's public key.
        if bytes.len() == 64 && key.public_key().to_bytes()[..] != bytes[32..] {
            return Err(ClientError::InvalidKey(
                "public half does not match the private seed".to_string(),
            ));
        }
        Ok(key)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.verifying_key(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.inner.sign(message).to_bytes().to_vec()
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// DER-prefixed hex encoding, the form [`FromStr`] round-trips.
    pub fn to_string_der(&self) -> String {
        let mut der = PRIVATE_KEY_DER_PREFIX.to_vec();
        der.extend_from_slice(&self.inner.to_bytes());
        hex::encode(der)
    }
}

impl FromStr for PrivateKey {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = decode_hex(s).map_err(|e| ClientError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public_key", &self.public_key().to_string())
            .finish_non_exhaustive()
    }
}

/// Public verification key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Build from raw (32 bytes) or DER (44 bytes) material.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw = match bytes.len() {
            32 => bytes,
            44 if bytes.starts_with(&PUBLIC_KEY_DER_PREFIX) => &bytes[12..],
            n => return Err(ClientError::InvalidKey(format!("unexpected public key length {n}"))),
        };

        let mut key = [0u8; 32];
        key.copy_from_slice(raw);
        VerifyingKey::from_bytes(&key)
            .map(|inner| Self { inner })
            .map_err(|e| ClientError::InvalidKey(e.to_string()))
    }

    /// Check `signature` over `message`; malformed signatures verify as false.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match Signature::from_slice(signature) {
            Ok(sig) => self.inner.verify(message, &sig).is_ok(),
            Err(_) => false,
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.inner.to_bytes()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl FromStr for PublicKey {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = decode_hex(s).map_err(|e| ClientError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}
