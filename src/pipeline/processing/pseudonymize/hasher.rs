use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::Category;
use crate::error::{ExportError, Result};

type HmacSha256 = Hmac<Sha256>;

/// ASCII unit separator between category and value
const KEY_SEPARATOR: u8 = 0x1f;

/// Derives the mapping-store key of a `(category, value)` pair
pub trait KeyedHasher {
    fn key(&self, category: Category, value: &str) -> String;
}

/// `hex(HMAC-SHA256(salt, category ␟ value))`
pub struct HmacSha256Hasher {
    mac: HmacSha256,
}

impl HmacSha256Hasher {
    pub fn new(salt: &[u8]) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(salt)
            .map_err(|e| ExportError::Config(format!("Unusable salt: {}", e)))?;
        Ok(Self { mac })
    }
}

impl KeyedHasher for HmacSha256Hasher {
    fn key(&self, category: Category, value: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(category.as_str().as_bytes());
        mac.update(&[KEY_SEPARATOR]);
        mac.update(value.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
