use sha2::{Digest, Sha256};

/// File name of `key` in the disk tier: the lowercase hex SHA-256 of the key.
pub fn disk_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
