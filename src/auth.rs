use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Lower-case hex SHA-256, the format already stored in `users.password_hash`.
pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let computed = hash_password(password);
    let stored = stored_hash.trim().to_ascii_lowercase();
    computed.as_bytes().ct_eq(stored.as_bytes()).into()
}
