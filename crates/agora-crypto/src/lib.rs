/// Agora Crypto Library
///
/// End-to-end encryption for direct messages. Every user owns an RSA-2048
/// key pair; the public half is published through the key directory and the
/// private half never leaves the client.
///
/// - `encrypt`/`decrypt`: RSA-OAEP (SHA-256) per message, for short bodies.
///   Wire-compatible with WebCrypto `RSA-OAEP` clients.
/// - `seal`/`open`: hybrid envelope for bodies of any length. A fresh
///   AES-256-GCM key encrypts the body and RSA-OAEP wraps the key.
///
/// There is no session negotiation, forward secrecy or key rotation.
/// The relay server only links the `server` feature, which can validate
/// published public keys but cannot encrypt or decrypt.

mod error;
pub mod keys;

#[cfg(feature = "client")]
pub mod encrypt;
#[cfg(feature = "client")]
pub mod envelope;

pub use error::CryptoError;
pub use keys::{KeyPair, import_public_key};

#[cfg(feature = "client")]
pub use encrypt::{decrypt, encrypt, max_plaintext_len};
#[cfg(feature = "client")]
pub use envelope::{is_sealed, open, seal};
#[cfg(feature = "client")]
pub use keys::{generate_key_pair, import_private_key};
