//! Cryptographic primitives for EduChain

use crate::canonical::CanonicalBytes;
use crate::error::{ChainError, Result};
use once_cell::sync::{Lazy, OnceCell};
use rand::rngs::OsRng;
use secp256k1::{
    constants::{SECRET_KEY_SIZE, UNCOMPRESSED_PUBLIC_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::{Digest, Sha256};
use std::fmt;

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Raw public key length: the uncompressed point without its `0x04` tag.
pub const PUBLIC_KEY_LEN: usize = UNCOMPRESSED_PUBLIC_KEY_SIZE - 1;

/// Hex-encoded, `0x`-prefixed 20-byte account address.
pub type Address = String;

/// Keccak-256 implementation used for address derivation.
///
/// Selected once at process start through [`install_keccak_backend`]; nothing
/// in the crate searches for an implementation at runtime.
pub trait KeccakBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    fn keccak256(&self, data: &[u8]) -> [u8; 32];
}

/// RustCrypto's `Keccak256` (original Keccak padding, as Ethereum uses; not SHA3-256).
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha3Keccak;

impl KeccakBackend for Sha3Keccak {
    fn name(&self) -> &'static str {
        "sha3"
    }

    fn keccak256(&self, data: &[u8]) -> [u8; 32] {
        sha3::Keccak256::digest(data).into()
    }
}

/// Resolves a backend by its configured name.
pub fn keccak_backend_by_name(name: &str) -> Result<Box<dyn KeccakBackend>> {
    match name {
        "sha3" => Ok(Box::new(Sha3Keccak)),
        other => Err(ChainError::Config(format!(
            "Unknown keccak backend '{}'",
            other
        ))),
    }
}

static KECCAK_BACKEND: OnceCell<Box<dyn KeccakBackend>> = OnceCell::new();

/// Installs the process-wide Keccak backend. May be called at most once, and
/// only before the first address is derived.
pub fn install_keccak_backend(backend: Box<dyn KeccakBackend>) -> Result<()> {
    KECCAK_BACKEND.set(backend).map_err(|rejected| {
        ChainError::Conflict(format!(
            "Keccak backend already installed; refusing '{}'",
            rejected.name()
        ))
    })
}

/// The active backend, installing [`Sha3Keccak`] if none was chosen explicitly.
pub fn keccak_backend() -> &'static dyn KeccakBackend {
    KECCAK_BACKEND.get_or_init(|| Box::new(Sha3Keccak)).as_ref()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Result<Self> {
        let secret_key = SecretKey::new(&mut OsRng);
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                ChainError::Crypto(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                ChainError::Crypto(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex)
            .map_err(|e| ChainError::Crypto(format!("Invalid secret key hex: {}", e)))?;
        Self::from_secret_bytes(&bytes)
    }

    /// 64-byte raw public key (x || y) as lowercase hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key.serialize_uncompressed()[1..])
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    pub fn address(&self) -> Address {
        derive_address_from_key(&self.public_key)
    }

    /// Signs `SHA-256(message)`; the nonce is derived per RFC 6979.
    pub fn sign(&self, message: &CanonicalBytes) -> Result<String> {
        let digest = Sha256::digest(message.as_bytes());
        let message = Message::from_digest_slice(&digest)
            .map_err(|e| ChainError::Crypto(format!("Failed to create message: {}", e)))?;
        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        Ok(hex::encode(signature.serialize_der().to_vec()))
    }
}

/// Returns `(public_key_hex, private_key_hex)` for a fresh key pair.
pub fn generate_key_pair() -> Result<(String, String)> {
    let keypair = KeyPair::generate()?;
    Ok((keypair.public_key_hex(), keypair.secret_key_hex()))
}

/// Public key hex for a private key hex.
pub fn public_key_from_private(secret_hex: &str) -> Result<String> {
    Ok(KeyPair::from_secret_hex(secret_hex)?.public_key_hex())
}

pub fn parse_public_key(public_key_hex: &str) -> Result<PublicKey> {
    let bytes = hex::decode(public_key_hex)
        .map_err(|e| ChainError::Crypto(format!("Invalid public key hex: {}", e)))?;
    if bytes.len() != PUBLIC_KEY_LEN {
        return Err(ChainError::Crypto(format!(
            "Public key must be exactly {} bytes, got {}",
            PUBLIC_KEY_LEN,
            bytes.len()
        )));
    }
    let mut tagged = [0u8; UNCOMPRESSED_PUBLIC_KEY_SIZE];
    tagged[0] = 0x04;
    tagged[1..].copy_from_slice(&bytes);
    PublicKey::from_slice(&tagged)
        .map_err(|e| ChainError::Crypto(format!("Invalid public key: {}", e)))
}

fn derive_address_from_key(public_key: &PublicKey) -> Address {
    let raw = &public_key.serialize_uncompressed()[1..];
    let digest = keccak_backend().keccak256(raw);
    format!("0x{}", hex::encode(&digest[12..]))
}

/// `"0x" + last 20 bytes of Keccak-256(raw public key)`. The key must be the
/// 64-byte raw point; tagged or compressed encodings are rejected.
pub fn derive_address(public_key_hex: &str) -> Result<Address> {
    Ok(derive_address_from_key(&parse_public_key(public_key_hex)?))
}

/// Signs a message with a hex-encoded private key.
pub fn sign(message: &CanonicalBytes, secret_hex: &str) -> Result<String> {
    KeyPair::from_secret_hex(secret_hex)?.sign(message)
}

/// Verifies a hex DER signature. Fails closed: malformed keys, malformed
/// signatures and digest mismatches all yield `false`.
pub fn verify(message: &CanonicalBytes, signature_hex: &str, public_key_hex: &str) -> bool {
    verify_signature(message, signature_hex, public_key_hex).is_ok()
}

/// Like [`verify`] but reports why verification failed.
pub fn verify_signature(
    message: &CanonicalBytes,
    signature_hex: &str,
    public_key_hex: &str,
) -> Result<()> {
    let public_key = parse_public_key(public_key_hex)?;

    let signature_bytes = hex::decode(signature_hex)
        .map_err(|e| ChainError::Crypto(format!("Invalid signature hex: {}", e)))?;
    let mut signature = Signature::from_der(&signature_bytes)
        .map_err(|e| ChainError::Crypto(format!("Invalid signature: {}", e)))?;
    signature.normalize_s();

    let digest = Sha256::digest(message.as_bytes());
    let message = Message::from_digest_slice(&digest)
        .map_err(|e| ChainError::Crypto(format!("Failed to create message: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| ChainError::Crypto("Signature verification failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;
    use serde_json::json;

    #[test]
    fn test_key_generation() {
        let (public_hex, secret_hex) = generate_key_pair().unwrap();
        assert_eq!(public_hex.len(), PUBLIC_KEY_LEN * 2);
        assert_eq!(secret_hex.len(), SECRET_KEY_SIZE * 2);
        assert_eq!(public_key_from_private(&secret_hex).unwrap(), public_hex);
    }

    #[test]
    fn test_keccak_is_not_sha3_256() {
        // Keccak-256 of the empty string, as used by Ethereum.
        assert_eq!(
            hex::encode(Sha3Keccak.keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_known_address_derivation() {
        // Private key 1 maps to the well-known Ethereum address of the generator point.
        let mut secret = [0u8; 32];
        secret[31] = 1;
        let keypair = KeyPair::from_secret_bytes(&secret).unwrap();
        assert_eq!(
            keypair.address(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
        assert_eq!(
            derive_address(&keypair.public_key_hex()).unwrap(),
            keypair.address()
        );
    }

    #[test]
    fn test_address_requires_raw_public_key() {
        let keypair = KeyPair::generate().unwrap();
        let tagged = format!("04{}", keypair.public_key_hex());
        let compressed = hex::encode(keypair.public_key.serialize());
        assert!(matches!(derive_address(&tagged), Err(ChainError::Crypto(_))));
        assert!(matches!(derive_address(&compressed), Err(ChainError::Crypto(_))));
        assert!(derive_address("zz").is_err());
    }

    #[test]
    fn test_signing_and_verification() {
        let keypair = KeyPair::generate().unwrap();
        let message = canonicalize(&json!({"hello": "educhain"})).unwrap();

        let signature = keypair.sign(&message).unwrap();
        assert!(verify(&message, &signature, &keypair.public_key_hex()));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let keypair = KeyPair::generate().unwrap();
        let message = canonicalize("block-digest").unwrap();
        assert_eq!(
            keypair.sign(&message).unwrap(),
            keypair.sign(&message).unwrap()
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let keypair1 = KeyPair::generate().unwrap();
        let keypair2 = KeyPair::generate().unwrap();
        let message = CanonicalBytes::raw(b"Test message".to_vec());
        let signature = keypair1.sign(&message).unwrap();

        let result = verify_signature(&message, &signature, &keypair2.public_key_hex());
        assert_eq!(
            result.unwrap_err().to_string(),
            "Cryptographic error: Signature verification failed"
        );
    }

    #[test]
    fn test_flipped_signature_bit_fails() {
        let keypair = KeyPair::generate().unwrap();
        let message = canonicalize(&json!({"a": 1})).unwrap();
        let signature = keypair.sign(&message).unwrap();
        let mut bytes = hex::decode(&signature).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(!verify(&message, &hex::encode(bytes), &keypair.public_key_hex()));
    }

    #[test]
    fn test_flipped_message_bit_fails() {
        let keypair = KeyPair::generate().unwrap();
        let message = canonicalize(&json!({"a": 1})).unwrap();
        let signature = keypair.sign(&message).unwrap();
        let mut tampered = message.as_bytes().to_vec();
        tampered[2] ^= 0x01;
        assert!(!verify(
            &CanonicalBytes::raw(tampered),
            &signature,
            &keypair.public_key_hex()
        ));
    }

    #[test]
    fn test_malformed_inputs_fail_closed() {
        let keypair = KeyPair::generate().unwrap();
        let message = canonicalize("x").unwrap();
        let signature = keypair.sign(&message).unwrap();

        assert!(!verify(&message, "not-hex", &keypair.public_key_hex()));
        assert!(!verify(&message, "", &keypair.public_key_hex()));
        assert!(!verify(&message, &signature, "zz"));
        assert!(!verify(&message, &signature, &keypair.public_key_hex()[2..]));
    }

    #[test]
    fn test_from_secret_bytes_invalid_length() {
        let short_bytes = [0u8; SECRET_KEY_SIZE - 1];
        let result = KeyPair::from_secret_bytes(&short_bytes);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Secret key must be"));
    }

    #[test]
    fn test_unknown_backend_name() {
        assert_eq!(keccak_backend_by_name("sha3").unwrap().name(), "sha3");
        assert!(keccak_backend_by_name("pysha3").is_err());
    }
}
