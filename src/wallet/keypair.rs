use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::KeyError;

const PUBLIC_KEY_LEN: usize = 32;
const SECRET_KEY_LEN: usize = 64;

/// Ed25519 keypair for a ledger account.
///
/// The address is the base58 encoding of the public key. The secret is the
/// base58 encoding of `seed || public key`. Neither `Debug` nor any serde impl
/// exposes the secret.
pub struct Keypair {
    signing: SigningKey,
    address: String,
}

impl Keypair {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        let address = bs58::encode(signing.verifying_key().as_bytes()).into_string();
        Self { signing, address }
    }

    pub fn random() -> Self {
        Self::from_seed(rand::random::<[u8; 32]>())
    }

    /// Parse a base58 secret key (64 bytes).
    pub fn from_secret(secret: &str) -> Result<Self, KeyError> {
        let bytes = decode(secret.trim())?;
        let bytes: [u8; SECRET_KEY_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| KeyError::Length {
                    expected: SECRET_KEY_LEN,
                    actual: bytes.len(),
                })?;

        let signing =
            SigningKey::from_keypair_bytes(&bytes).map_err(|_| KeyError::PublicKeyMismatch)?;
        let address = bs58::encode(signing.verifying_key().as_bytes()).into_string();
        Ok(Self { signing, address })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Base58 secret, only meant for writing key files.
    pub fn secret(&self) -> String {
        bs58::encode(self.signing.to_keypair_bytes()).into_string()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// What a user-supplied key string turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKey {
    Address(String),
    Secret,
}

/// Classify `input` as a public address or a secret key.
pub fn parse_key(input: &str) -> Result<ParsedKey, KeyError> {
    let bytes = decode(input)?;
    match bytes.len() {
        PUBLIC_KEY_LEN => {
            let raw: [u8; PUBLIC_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
                KeyError::Length {
                    expected: PUBLIC_KEY_LEN,
                    actual: bytes.len(),
                }
            })?;
            VerifyingKey::from_bytes(&raw)
                .map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;
            Ok(ParsedKey::Address(input.to_string()))
        }
        SECRET_KEY_LEN => Ok(ParsedKey::Secret),
        actual => Err(KeyError::Length {
            expected: PUBLIC_KEY_LEN,
            actual,
        }),
    }
}

/// Check `signature` over `message` against a base58 address.
pub fn verify(address: &str, message: &[u8], signature: &[u8]) -> bool {
    let Ok(bytes) = decode(address) else {
        return false;
    };
    let Ok(raw) = <[u8; PUBLIC_KEY_LEN]>::try_from(bytes.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&raw) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}

fn decode(input: &str) -> Result<Vec<u8>, KeyError> {
    bs58::decode(input)
        .into_vec()
        .map_err(|e| KeyError::Encoding(e.to_string()))
}
