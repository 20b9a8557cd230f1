use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};

use crate::CryptoError;

/// Modulus size for every generated key.
pub const KEY_BITS: usize = 2048;

/// A user's key pair, both halves base64 DER encoded.
/// `public_key` is SubjectPublicKeyInfo, `private_key` is PKCS#8, the same
/// shapes WebCrypto exports as `spki` and `pkcs8`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Generate a fresh RSA-2048 key pair (e = 65537).
#[cfg(feature = "client")]
pub fn generate_key_pair() -> Result<KeyPair, CryptoError> {
    use rand_core::OsRng;
    use rsa::RsaPrivateKey;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};

    let private = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let public = RsaPublicKey::from(&private);

    let spki = public
        .to_public_key_der()
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let pkcs8 = private
        .to_pkcs8_der()
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

    Ok(KeyPair {
        public_key: BASE64.encode(spki.as_bytes()),
        private_key: BASE64.encode(pkcs8.as_bytes()),
    })
}

/// Decode and validate a base64 SPKI public key.
/// Keys smaller than `KEY_BITS` are refused.
pub fn import_public_key(encoded: &str) -> Result<RsaPublicKey, CryptoError> {
    let der = BASE64
        .decode(encoded.trim())
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let key = RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

    if key.size() * 8 < KEY_BITS {
        return Err(CryptoError::InvalidPublicKey(format!(
            "{}-bit modulus is below {} bits",
            key.size() * 8,
            KEY_BITS
        )));
    }
    Ok(key)
}

/// Decode a base64 PKCS#8 private key.
#[cfg(feature = "client")]
pub fn import_private_key(encoded: &str) -> Result<rsa::RsaPrivateKey, CryptoError> {
    use rsa::pkcs8::DecodePrivateKey;

    let der = BASE64
        .decode(encoded.trim())
        .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
    rsa::RsaPrivateKey::from_pkcs8_der(&der)
        .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))
}
