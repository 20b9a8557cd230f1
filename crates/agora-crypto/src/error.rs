use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("plaintext is {len} bytes, limit for this key is {max}")]
    PlaintextTooLong { len: usize, max: usize },

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The ciphertext was not produced for this key pair, was tampered with,
    /// or is not valid ciphertext at all. Deliberately carries no detail.
    #[error("message could not be decrypted")]
    Decryption,
}
