use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::CryptoError;
use crate::encrypt::{decrypt_bytes, encrypt_bytes};
use crate::keys::{import_private_key, import_public_key};

/// Marks a sealed envelope on the wire. Plain RSA-OAEP ciphertext is bare
/// base64 and can never contain a `.`, so the two forms cannot collide.
pub const SEALED_PREFIX: &str = "sealed.v1.";

const NONCE_LEN: usize = 12;

/// Encrypt a body of any length for `recipient_public_key`.
///
/// Layout: `sealed.v1.<wrapped key>.<nonce>.<ciphertext>`, every part base64.
/// The AES-256-GCM key is fresh per call and only travels RSA-wrapped.
pub fn seal(plaintext: &str, recipient_public_key: &str) -> Result<String, CryptoError> {
    let public = import_public_key(recipient_public_key)?;

    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let wrapped = encrypt_bytes(&public, &key)?;

    Ok(format!(
        "{}{}.{}.{}",
        SEALED_PREFIX,
        BASE64.encode(wrapped),
        BASE64.encode(nonce_bytes),
        BASE64.encode(ciphertext)
    ))
}

/// Open an envelope produced by `seal` with the caller's own private key.
pub fn open(envelope: &str, own_private_key: &str) -> Result<String, CryptoError> {
    let private = import_private_key(own_private_key)?;

    let body = envelope
        .trim()
        .strip_prefix(SEALED_PREFIX)
        .ok_or(CryptoError::Decryption)?;
    let mut parts = body.splitn(3, '.');
    let (Some(wrapped), Some(nonce), Some(ciphertext)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(CryptoError::Decryption);
    };

    let wrapped = BASE64.decode(wrapped).map_err(|_| CryptoError::Decryption)?;
    let nonce = BASE64.decode(nonce).map_err(|_| CryptoError::Decryption)?;
    let ciphertext = BASE64.decode(ciphertext).map_err(|_| CryptoError::Decryption)?;
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::Decryption);
    }

    let key = decrypt_bytes(&private, &wrapped)?;
    if key.len() != 32 {
        return Err(CryptoError::Decryption);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|_| CryptoError::Decryption)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption)
}

pub fn is_sealed(body: &str) -> bool {
    body.starts_with(SEALED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_keys;

    #[test]
    fn seal_open_roundtrip_for_long_bodies() {
        let pair = test_keys::alice();
        let long = "a rather long direct message. ".repeat(200);

        let sealed = seal(&long, &pair.public_key).unwrap();
        assert!(is_sealed(&sealed));
        assert_eq!(open(&sealed, &pair.private_key).unwrap(), long);
    }

    #[test]
    fn sealing_twice_differs() {
        let pair = test_keys::alice();
        assert_ne!(
            seal("hi", &pair.public_key).unwrap(),
            seal("hi", &pair.public_key).unwrap()
        );
    }

    #[test]
    fn wrong_key_cannot_open() {
        let sealed = seal("for alice only", &test_keys::alice().public_key).unwrap();
        assert!(matches!(
            open(&sealed, &test_keys::bob().private_key),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let pair = test_keys::alice();
        let sealed = seal("transfer 10 coins", &pair.public_key).unwrap();

        let (head, body) = sealed.rsplit_once('.').unwrap();
        let mut raw = BASE64.decode(body).unwrap();
        raw[0] ^= 0x01;
        let tampered = format!("{}.{}", head, BASE64.encode(raw));

        assert!(matches!(open(&tampered, &pair.private_key), Err(CryptoError::Decryption)));
    }

    #[test]
    fn truncated_envelopes_are_rejected() {
        let pair = test_keys::alice();
        assert!(open("sealed.v1.abc", &pair.private_key).is_err());
        assert!(open("not an envelope", &pair.private_key).is_err());
    }
}
