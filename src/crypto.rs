//! The elliptic-curve signing/verification primitives and the SDP
//! encryption hook. Per spec §1 these are "treated as two pure functions
//! plus key derivation" — the interesting control-plane logic lives
//! elsewhere; this module just wires a concrete, real ed25519/x25519 stack
//! behind that narrow interface, grounded in `runar-keys`'s dependency set
//! (ed25519-dalek + x25519-dalek + chacha20poly1305 + hkdf) rather than
//! inventing one.

use crate::error::NodeError;
use crate::types::Address;
use chacha20poly1305::{aead::Aead, AeadCore, KeyInit, XChaCha20Poly1305, XNonce};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::hazmat::ExpandedSecretKey;
use ed25519_dalek::{Signature as EdSignature, Signer, SigningKey as EdSigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;

const SDP_HKDF_INFO: &[u8] = b"meshnet-core/sdp-ecdh/v1";

/// A node's signing identity. `Address` is the lowercase hex of the Ed25519
/// verifying key (spec §3).
pub struct SigningKey {
    signing: EdSigningKey,
    verifying: VerifyingKey,
    address: Address,
}

impl SigningKey {
    /// Derives a full identity from a 32-byte seed. The seed is the "secret"
    /// of the constructor's `secret|address` argument (spec §6).
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, NodeError> {
        let signing = EdSigningKey::from_bytes(seed);
        let verifying = signing.verifying_key();
        let address = hex::encode(verifying.to_bytes());
        Ok(SigningKey { signing, verifying, address })
    }

    pub fn generate() -> Self {
        let signing = EdSigningKey::generate(&mut OsRng);
        let verifying = signing.verifying_key();
        let address = hex::encode(verifying.to_bytes());
        SigningKey { signing, verifying, address }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// `sign(secret, msg)` of spec §4.3: deterministic (Ed25519 signatures
    /// are deterministic given the same key and message) and produces a
    /// base64 string, the wire representation of `Signature::signature`.
    pub fn sign(&self, canonical_message: &[u8]) -> String {
        let sig: EdSignature = self.signing.sign(canonical_message);
        base64::encode(sig.to_bytes())
    }

    /// Converts this node's Ed25519 identity key into the X25519 static
    /// secret used for ECDH, via the standard Edwards→Montgomery scalar
    /// clamping technique (the same one libsodium's
    /// `crypto_sign_ed25519_sk_to_curve25519` uses).
    fn x25519_static(&self) -> x25519_dalek::StaticSecret {
        let expanded = ExpandedSecretKey::from(&self.signing);
        let scalar_bytes: [u8; 32] = expanded.scalar.to_bytes();
        x25519_dalek::StaticSecret::from(scalar_bytes)
    }
}

/// Converts a peer's Ed25519 verifying-key bytes (their Address, decoded
/// from hex) into the X25519 public key used to encrypt to them, via the
/// Edwards→Montgomery birational map.
fn address_to_x25519_public(address: &Address) -> Result<x25519_dalek::PublicKey, NodeError> {
    let bytes = hex::decode(address).map_err(|_| NodeError::BadSecret)?;
    if bytes.len() != 32 {
        return Err(NodeError::BadSecret);
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    let edwards = CompressedEdwardsY(arr).decompress().ok_or(NodeError::BadSecret)?;
    let montgomery = edwards.to_montgomery();
    Ok(x25519_dalek::PublicKey::from(montgomery.to_bytes()))
}

/// `verify(address, msg, signature)` of spec §4.3: true iff `signature` is a
/// valid Ed25519 signature over `msg` by the key whose hex encoding is
/// `address`.
pub fn verify(address: &Address, canonical_message: &[u8], signature_b64: &str) -> bool {
    let Ok(pub_bytes) = hex::decode(address) else { return false };
    let Ok(pub_bytes): Result<[u8; 32], _> = pub_bytes.try_into() else { return false };
    let Ok(verifying) = VerifyingKey::from_bytes(&pub_bytes) else { return false };
    let Ok(sig_bytes) = base64::decode(signature_b64) else { return false };
    let Ok(sig_bytes): Result<[u8; 64], _> = sig_bytes.try_into() else { return false };
    let sig = EdSignature::from_bytes(&sig_bytes);
    verifying.verify(canonical_message, &sig).is_ok()
}

/// ECDH shared secret between `us` and `remote_address`, stretched through
/// HKDF-SHA256 into an XChaCha20-Poly1305 key. Used by the SDP encryption
/// hook on both the encrypt and decrypt sides — the same shared secret
/// results regardless of which end computes it.
fn shared_cipher(us: &SigningKey, remote_address: &Address) -> Result<XChaCha20Poly1305, NodeError> {
    let remote_pub = address_to_x25519_public(remote_address)?;
    let shared = us.x25519_static().diffie_hellman(&remote_pub);
    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key_bytes = [0u8; 32];
    hk.expand(SDP_HKDF_INFO, &mut key_bytes)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    Ok(XChaCha20Poly1305::new((&key_bytes).into()))
}

/// Encrypts `sdp` to `remote_address`. Identity function when `key` is
/// `None` (spec §4.1 "If no key is configured both hooks are identity").
pub fn encrypt_sdp(key: Option<&SigningKey>, remote_address: &Address, sdp: &str) -> Result<String, NodeError> {
    let Some(key) = key else { return Ok(sdp.to_string()) };
    let cipher = shared_cipher(key, remote_address)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, sdp.as_bytes())
        .map_err(|_| NodeError::BadSecret)?;
    let mut out = nonce.to_vec();
    out.extend(ciphertext);
    Ok(base64::encode(out))
}

/// Decrypts an SDP string produced by [`encrypt_sdp`] with the same key
/// configuration. Identity function when `key` is `None`.
pub fn decrypt_sdp(key: Option<&SigningKey>, remote_address: &Address, sdp: &str) -> Result<String, NodeError> {
    let Some(key) = key else { return Ok(sdp.to_string()) };
    let cipher = shared_cipher(key, remote_address)?;
    let raw = base64::decode(sdp).map_err(|_| NodeError::BadSecret)?;
    if raw.len() < 24 {
        return Err(NodeError::BadSecret);
    }
    let (nonce_bytes, ciphertext) = raw.split_at(24);
    let nonce = XNonce::from_slice(nonce_bytes);
    let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| NodeError::BadSecret)?;
    String::from_utf8(plaintext).map_err(|_| NodeError::BadSecret)
}
