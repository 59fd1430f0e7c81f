//! RSA PKCS#1 v1.5 payload encryption.
//!
//! The agent encrypts single-metric bodies with the server's public key (SPKI PEM);
//! the ciphertext travels base64-encoded. The server decrypts with its PKCS#1 private key.

use crate::error::{PulseError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::path::Path;

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| PulseError::IoError { path: path.to_path_buf(), source: e })
}

fn encryption_error(e: impl std::fmt::Display) -> PulseError {
    PulseError::EncryptionFailed { reason: e.to_string() }
}

/// Agent side: encrypts with a public key.
#[derive(Debug, Clone)]
pub struct Encryptor {
    key: RsaPublicKey,
}

impl Encryptor {
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        RsaPublicKey::from_public_key_pem(pem).map(Self::new).map_err(encryption_error)
    }

    pub fn from_pem_file(path: &Path) -> Result<Self> {
        Self::from_pem(&read_pem(path)?)
    }

    /// Encrypt `body` and return the base64 text sent on the wire.
    pub fn encrypt(&self, body: &[u8]) -> Result<Vec<u8>> {
        let ciphertext = self
            .key
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, body)
            .map_err(encryption_error)?;
        Ok(STANDARD.encode(ciphertext).into_bytes())
    }
}

/// Server side: decrypts with a private key.
#[derive(Debug, Clone)]
pub struct Decryptor {
    key: RsaPrivateKey,
}

impl Decryptor {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        RsaPrivateKey::from_pkcs1_pem(pem).map(Self::new).map_err(encryption_error)
    }

    pub fn from_pem_file(path: &Path) -> Result<Self> {
        Self::from_pem(&read_pem(path)?)
    }

    /// Decode base64 `body` and decrypt it.
    pub fn decrypt(&self, body: &[u8]) -> Result<Vec<u8>> {
        let text: Vec<u8> = body.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
        let ciphertext = STANDARD.decode(text).map_err(encryption_error)?;
        self.key.decrypt(Pkcs1v15Encrypt, &ciphertext).map_err(encryption_error)
    }
}
