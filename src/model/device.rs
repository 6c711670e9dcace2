use std::fmt::{self, Display};

use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub type HmacSha256 = Hmac<Sha256>;

/// Opaque device fingerprint supplied by the client's device identity provider.
///
/// Never stored: only its [`DeviceHash`] reaches the database.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct DeviceToken(String);

impl DeviceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

// Keep raw fingerprints out of logs.
impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceToken(..)")
    }
}

/// Keyed digest of a [`DeviceToken`], hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceHash(String);

impl DeviceHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeviceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turns device tokens into the digests the store keys on.
#[derive(Clone)]
pub struct DeviceHasher {
    secret: Vec<u8>,
}

impl DeviceHasher {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: secret.to_vec(),
        }
    }

    /// Do not directly store potentially identifying fingerprints.
    pub fn digest(&self, token: &DeviceToken) -> DeviceHash {
        // HMAC accepts keys of any length.
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take a key of any size");
        mac.update(token.0.as_bytes());
        DeviceHash(HEXLOWER.encode(&mac.finalize().into_bytes()))
    }
}
