//! Cryptographic key material and hashes.
//!
//! Wraps Ed25519 signing, X25519 sealing keys, symmetric read keys and
//! Blake3 hashing with strong types. The operations that combine them live
//! behind [`CryptoProvider`](crate::provider::CryptoProvider).

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CoreError;
use crate::ids::{parse_hex, string_serde, AgentId};

/// A 32-byte Blake3 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Blake3Hash(pub [u8; 32]);

impl Blake3Hash {
    /// Compute the Blake3 hash of the given data.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The zero hash (sentinel value).
    pub const ZERO: Self = Self([0u8; 32]);
}

impl fmt::Debug for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blake3({})", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Blake3Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignerId(pub [u8; 32]);

impl SignerId {
    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CoreError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signer({})", &self.to_hex()[..16])
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub const PREFIX: &'static str = "signature_";

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

impl FromStr for Signature {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| CoreError::InvalidId(s.to_string()))?;
        Ok(Self(parse_hex(hex)?))
    }
}

string_serde!(Signature);

/// Secret half of a signer.
#[derive(Clone)]
pub struct SignerSecret {
    signing_key: SigningKey,
}

impl SignerSecret {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn signer_id(&self) -> SignerId {
        SignerId(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Get the raw seed bytes (secret key material).
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for SignerSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignerSecret({:?})", self.signer_id())
    }
}

/// An X25519 public key used to seal secrets to an agent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SealerId(pub [u8; 32]);

impl SealerId {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub(crate) fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for SealerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sealer({})", &self.to_hex()[..16])
    }
}

/// An X25519 static secret.
#[derive(Clone)]
pub struct SealerSecret(StaticSecret);

impl SealerSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    /// Create from seed bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn sealer_id(&self) -> SealerId {
        SealerId(*PublicKey::from(&self.0).as_bytes())
    }

    /// Perform key agreement with a peer's public key.
    pub fn diffie_hellman(&self, peer: &SealerId) -> SharedKey {
        SharedKey(*self.0.diffie_hellman(&peer.to_dalek()).as_bytes())
    }
}

impl fmt::Debug for SealerSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealerSecret({:?})", self.sealer_id())
    }
}

/// A shared secret derived from X25519 key agreement.
#[derive(Clone)]
pub struct SharedKey(pub(crate) [u8; 32]);

impl SharedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive a symmetric key from this shared secret, domain-separated by `context`.
    pub fn derive_key(&self, context: &[u8]) -> KeySecret {
        let mut hasher = blake3::Hasher::new_derive_key("covalent-v0 seal");
        hasher.update(&self.0);
        hasher.update(context);
        KeySecret(*hasher.finalize().as_bytes())
    }
}

/// Full secret of an agent: its signing and sealing secrets.
#[derive(Clone, Debug)]
pub struct AgentSecret {
    pub signer: SignerSecret,
    pub sealer: SealerSecret,
}

impl AgentSecret {
    pub const PREFIX: &'static str = "agentSecret_";

    pub fn generate() -> Self {
        Self {
            signer: SignerSecret::generate(),
            sealer: SealerSecret::generate(),
        }
    }

    /// Deterministically derive both halves from one seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key("covalent-v0 sealer seed");
        hasher.update(seed);
        Self {
            signer: SignerSecret::from_seed(seed),
            sealer: SealerSecret::from_bytes(*hasher.finalize().as_bytes()),
        }
    }

    pub fn agent_id(&self) -> AgentId {
        AgentId {
            signer: self.signer.signer_id(),
            sealer: self.sealer.sealer_id(),
        }
    }

    /// Textual form, used to hand invite secrets around.
    pub fn to_secret_string(&self) -> String {
        format!(
            "{}{}_{}",
            Self::PREFIX,
            hex::encode(self.signer.seed()),
            hex::encode(self.sealer.to_bytes())
        )
    }
}

impl FromStr for AgentSecret {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (signer, sealer) = s
            .strip_prefix(Self::PREFIX)
            .and_then(|rest| rest.split_once('_'))
            .ok_or_else(|| CoreError::InvalidId("malformed agent secret".into()))?;
        Ok(Self {
            signer: SignerSecret::from_seed(&parse_hex(signer)?),
            sealer: SealerSecret::from_bytes(parse_hex(sealer)?),
        })
    }
}

/// Identifier of a symmetric key, derived from the key itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(pub [u8; 16]);

impl KeyId {
    pub const PREFIX: &'static str = "key_";

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.to_hex())
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", &self.to_hex()[..8])
    }
}

impl FromStr for KeyId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| CoreError::InvalidId(s.to_string()))?;
        Ok(Self(parse_hex(hex)?))
    }
}

string_serde!(KeyId);

/// A 256-bit symmetric key for ChaCha20-Poly1305.
#[derive(Clone, PartialEq, Eq)]
pub struct KeySecret(pub(crate) [u8; 32]);

impl KeySecret {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn id(&self) -> KeyId {
        let mut hasher = blake3::Hasher::new_derive_key("covalent-v0 key id");
        hasher.update(&self.0);
        let mut id = [0u8; 16];
        id.copy_from_slice(&hasher.finalize().as_bytes()[..16]);
        KeyId(id)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        Ok(Self(parse_hex(s)?))
    }
}

impl fmt::Debug for KeySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeySecret({:?})", self.id())
    }
}

/// Symmetric ciphertext with its nonce.
#[derive(Clone, PartialEq, Eq)]
pub struct Encrypted {
    pub nonce: [u8; 12],
    pub ciphertext: Bytes,
}

impl Encrypted {
    pub const PREFIX: &'static str = "encrypted_";
}

impl fmt::Display for Encrypted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            Self::PREFIX,
            hex::encode(self.nonce),
            hex::encode(&self.ciphertext)
        )
    }
}

impl fmt::Debug for Encrypted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Encrypted({} bytes)", self.ciphertext.len())
    }
}

impl FromStr for Encrypted {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| CoreError::DecodingError("expected encrypted value".into()))?;
        let bytes = hex::decode(raw).map_err(|e| CoreError::DecodingError(e.to_string()))?;
        if bytes.len() < 12 {
            return Err(CoreError::DecodingError("encrypted value too short".into()));
        }
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&bytes[..12]);
        Ok(Self {
            nonce,
            ciphertext: Bytes::copy_from_slice(&bytes[12..]),
        })
    }
}

string_serde!(Encrypted);

/// A secret sealed to one agent via an ephemeral X25519 exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ephemeral: SealerId,
    pub nonce: [u8; 12],
    pub ciphertext: Bytes,
}

impl Sealed {
    pub const PREFIX: &'static str = "sealed_";
}

impl fmt::Display for Sealed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            Self::PREFIX,
            self.ephemeral.to_hex(),
            hex::encode(self.nonce),
            hex::encode(&self.ciphertext)
        )
    }
}

impl fmt::Debug for Sealed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sealed({} bytes)", self.ciphertext.len())
    }
}

impl FromStr for Sealed {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| CoreError::DecodingError("expected sealed value".into()))?;
        let bytes = hex::decode(raw).map_err(|e| CoreError::DecodingError(e.to_string()))?;
        if bytes.len() < 44 {
            return Err(CoreError::DecodingError("sealed value too short".into()));
        }
        let mut ephemeral = [0u8; 32];
        ephemeral.copy_from_slice(&bytes[..32]);
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&bytes[32..44]);
        Ok(Self {
            ephemeral: SealerId(ephemeral),
            nonce,
            ciphertext: Bytes::copy_from_slice(&bytes[44..]),
        })
    }
}

string_serde!(Sealed);
