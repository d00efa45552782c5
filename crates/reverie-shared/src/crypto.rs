use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::constants::{
    FINGERPRINT_LEN, KDF_CONTEXT_POV_FINGERPRINT, NONCE_SIZE, RECOVERY_KEY_BYTES, SALT_SIZE,
    SYMMETRIC_KEY_SIZE,
};
use crate::error::CryptoError;
use crate::types::UserId;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

pub type Salt = [u8; SALT_SIZE];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_salt() -> Salt {
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt a text field into its stored form: URL-safe base64 of
/// `nonce || ciphertext`.
pub fn encrypt_text(key: &SymmetricKey, plaintext: &str) -> Result<String, CryptoError> {
    let sealed = encrypt(key, plaintext.as_bytes())?;
    Ok(URL_SAFE.encode(sealed))
}

/// Inverse of [`encrypt_text`]. Anything that is not valid base64 is
/// reported as [`CryptoError::InvalidEncoding`] so callers can tell
/// "not ciphertext at all" apart from "wrong key".
pub fn decrypt_text(key: &SymmetricKey, token: &str) -> Result<String, CryptoError> {
    let data = URL_SAFE
        .decode(token.trim())
        .map_err(|_| CryptoError::InvalidEncoding)?;
    let plaintext = decrypt(key, &data)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidEncoding)
}

/// PBKDF2-HMAC-SHA256 password stretching into a cipher key.
pub fn derive_key_from_password(password: &[u8], salt: &[u8], iterations: u32) -> SymmetricKey {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut key);
    key
}

pub fn parse_key_hex(hex_key: &str) -> Result<SymmetricKey, CryptoError> {
    let bytes = hex::decode(hex_key.trim()).map_err(|_| CryptoError::InvalidEncoding)?;
    if bytes.len() != SYMMETRIC_KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength);
    }
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Fresh high-entropy recovery key, URL-safe base64 without padding.
pub fn generate_recovery_key() -> String {
    let mut bytes = [0u8; RECOVERY_KEY_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest stored in place of the recovery key.
pub fn hash_recovery_key(recovery_key: &str) -> String {
    hex::encode(Sha256::digest(recovery_key.as_bytes()))
}

pub fn verify_recovery_key(candidate: &str, stored_hash: &str) -> bool {
    let candidate_hash = hash_recovery_key(candidate);
    candidate_hash.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

// BLAKE3 KDF with domain separation
pub fn fingerprint(author: &UserId, body: &str) -> String {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_POV_FINGERPRINT);
    hasher.update(author.0.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(body.as_bytes());
    let hash = hasher.finalize();
    let mut digest = hash.to_hex().to_string();
    digest.truncate(FINGERPRINT_LEN);
    digest
}
