use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use std::fmt;
use zeroize::Zeroizing;

/// The number of random bytes in a session key.
const SESSION_KEY_SIZE: usize = 32;
/// The number of hex characters of the digest that may appear in logs.
const LOGGED_HASH_LEN: usize = 12;

/// An opaque, high-entropy session key.
///
/// The raw value is only reachable through [`SessionKey::expose`]; `Debug`
/// prints the truncated hash instead, so a stray `{:?}` cannot leak it.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(Zeroizing<String>);

impl SessionKey {
    /// Generates a new random session key.
    ///
    /// # Returns
    ///
    /// A hex-encoded key built from 32 bytes of OS randomness.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; SESSION_KEY_SIZE]);
        OsRng.fill_bytes(&mut bytes[..]);

        Self(Zeroizing::new(hex::encode(&bytes[..])))
    }

    /// The raw key, for the cookie and the store. Never log this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// The truncated one-way hash used in log records.
    pub fn hash(&self) -> String {
        session_key_hash(&self.0)
    }

    /// The pointer value recorded on the owning account.
    pub fn pointer(&self) -> SessionPointer {
        SessionPointer(hex::encode(Sha512::digest(self.0.as_bytes())))
    }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self {
        Self(Zeroizing::new(value))
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionKey").field(&self.hash()).finish()
    }
}

/// An account's back-reference to its current session: the full SHA-512 hex
/// digest of the session key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionPointer(String);

impl SessionPointer {
    /// The digest as a string, suitable for a text column.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hashes a raw session key for logging.
///
/// # Arguments
///
/// * `session_key` - The raw key, possibly one read from an untrusted cookie.
///
/// # Returns
///
/// The first 12 hex characters of the key's SHA-512 digest.
pub fn session_key_hash(session_key: &str) -> String {
    let mut encoded = hex::encode(Sha512::digest(session_key.as_bytes()));
    encoded.truncate(LOGGED_HASH_LEN);
    encoded
}
