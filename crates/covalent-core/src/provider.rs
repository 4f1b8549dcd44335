//! The crypto provider interface consumed by every other component.
//!
//! Nothing outside this module touches AEAD or key agreement directly. The
//! shipped [`DalekCrypto`] uses Ed25519 for signatures, Blake3 for hashing,
//! ChaCha20-Poly1305 for symmetric encryption and ephemeral X25519 for sealing.

use bytes::Bytes;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

use crate::crypto::{
    AgentSecret, Blake3Hash, Encrypted, KeySecret, SealerId, SealerSecret, Sealed, Signature,
    SignerId, SignerSecret,
};
use crate::error::{CoreError, Result};

/// Opaque cryptographic operations.
pub trait CryptoProvider: Send + Sync {
    /// Hash arbitrary bytes.
    fn hash(&self, data: &[u8]) -> Blake3Hash;

    /// Extend a running session hash with one more encoded transaction.
    fn chain_hash(&self, previous: &Blake3Hash, encoded_tx: &[u8]) -> Blake3Hash;

    fn sign(&self, secret: &SignerSecret, message: &[u8]) -> Signature;

    fn verify(&self, signer: &SignerId, message: &[u8], signature: &Signature) -> bool;

    fn new_agent_secret(&self) -> AgentSecret;

    fn new_key_secret(&self) -> KeySecret;

    /// Random 64-bit value for session nonces and header uniqueness.
    fn random_u64(&self) -> u64;

    /// Symmetric encryption; `context` is authenticated but not encrypted.
    fn encrypt(&self, key: &KeySecret, plaintext: &[u8], context: &[u8]) -> Result<Encrypted>;

    fn decrypt(&self, key: &KeySecret, encrypted: &Encrypted, context: &[u8]) -> Result<Vec<u8>>;

    /// Seal `plaintext` so only the holder of `recipient`'s secret can open it.
    fn seal(&self, recipient: &SealerId, plaintext: &[u8], context: &[u8]) -> Result<Sealed>;

    fn unseal(&self, recipient: &SealerSecret, sealed: &Sealed, context: &[u8]) -> Result<Vec<u8>>;
}

/// Default provider backed by the dalek, blake3 and RustCrypto crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct DalekCrypto;

impl DalekCrypto {
    fn random_nonce() -> [u8; 12] {
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    fn cipher(key: &KeySecret) -> Result<ChaCha20Poly1305> {
        ChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|e| CoreError::EncryptionError(e.to_string()))
    }
}

impl CryptoProvider for DalekCrypto {
    fn hash(&self, data: &[u8]) -> Blake3Hash {
        Blake3Hash::hash(data)
    }

    fn chain_hash(&self, previous: &Blake3Hash, encoded_tx: &[u8]) -> Blake3Hash {
        let mut hasher = blake3::Hasher::new_derive_key("covalent-v0 session chain");
        hasher.update(previous.as_bytes());
        hasher.update(encoded_tx);
        Blake3Hash(*hasher.finalize().as_bytes())
    }

    fn sign(&self, secret: &SignerSecret, message: &[u8]) -> Signature {
        secret.sign(message)
    }

    fn verify(&self, signer: &SignerId, message: &[u8], signature: &Signature) -> bool {
        signer.verify(message, signature).is_ok()
    }

    fn new_agent_secret(&self) -> AgentSecret {
        AgentSecret::generate()
    }

    fn new_key_secret(&self) -> KeySecret {
        KeySecret::generate()
    }

    fn random_u64(&self) -> u64 {
        rand::thread_rng().next_u64()
    }

    fn encrypt(&self, key: &KeySecret, plaintext: &[u8], context: &[u8]) -> Result<Encrypted> {
        let nonce = Self::random_nonce();
        let ciphertext = Self::cipher(key)?
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: context,
                },
            )
            .map_err(|e| CoreError::EncryptionError(e.to_string()))?;
        Ok(Encrypted {
            nonce,
            ciphertext: Bytes::from(ciphertext),
        })
    }

    fn decrypt(&self, key: &KeySecret, encrypted: &Encrypted, context: &[u8]) -> Result<Vec<u8>> {
        Self::cipher(key)?
            .decrypt(
                Nonce::from_slice(&encrypted.nonce),
                Payload {
                    msg: &encrypted.ciphertext,
                    aad: context,
                },
            )
            .map_err(|e| CoreError::DecryptionError(e.to_string()))
    }

    fn seal(&self, recipient: &SealerId, plaintext: &[u8], context: &[u8]) -> Result<Sealed> {
        // A fresh static secret per seal acts as the ephemeral half.
        let ephemeral = SealerSecret::generate();
        let wrap_key = ephemeral.diffie_hellman(recipient).derive_key(context);
        let encrypted = self.encrypt(&wrap_key, plaintext, context)?;
        Ok(Sealed {
            ephemeral: ephemeral.sealer_id(),
            nonce: encrypted.nonce,
            ciphertext: encrypted.ciphertext,
        })
    }

    fn unseal(&self, recipient: &SealerSecret, sealed: &Sealed, context: &[u8]) -> Result<Vec<u8>> {
        let wrap_key = recipient.diffie_hellman(&sealed.ephemeral).derive_key(context);
        let encrypted = Encrypted {
            nonce: sealed.nonce,
            ciphertext: sealed.ciphertext.clone(),
        };
        self.decrypt(&wrap_key, &encrypted, context)
    }
}
