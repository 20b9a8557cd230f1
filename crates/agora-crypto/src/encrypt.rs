use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::CryptoError;
use crate::keys::{import_private_key, import_public_key};

/// SHA-256 output length, used twice by the OAEP overhead.
const HASH_LEN: usize = 32;

/// Largest plaintext RSA-OAEP/SHA-256 can carry under `key`.
pub fn max_plaintext_len(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(2 * HASH_LEN + 2)
}

/// Encrypt `plaintext` for the holder of `recipient_public_key` (base64 SPKI).
/// Returns base64 ciphertext. OAEP padding is randomized, so encrypting the
/// same plaintext twice yields different ciphertexts.
pub fn encrypt(plaintext: &str, recipient_public_key: &str) -> Result<String, CryptoError> {
    let key = import_public_key(recipient_public_key)?;
    let ciphertext = encrypt_bytes(&key, plaintext.as_bytes())?;
    Ok(BASE64.encode(ciphertext))
}

/// Decrypt base64 ciphertext with the caller's own private key (base64 PKCS#8).
pub fn decrypt(ciphertext: &str, own_private_key: &str) -> Result<String, CryptoError> {
    let key = import_private_key(own_private_key)?;
    let raw = BASE64.decode(ciphertext.trim()).map_err(|_| CryptoError::Decryption)?;
    let plaintext = decrypt_bytes(&key, &raw)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption)
}

pub(crate) fn encrypt_bytes(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let max = max_plaintext_len(key);
    if data.len() > max {
        return Err(CryptoError::PlaintextTooLong { len: data.len(), max });
    }

    key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), data)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

pub(crate) fn decrypt_bytes(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    key.decrypt(Oaep::new::<Sha256>(), data)
        .map_err(|_| CryptoError::Decryption)
}
