use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::SystError;
use crate::serde::to_canonical_json_bytes;

/// Computes a stable hexadecimal hash for the provided serializable payload.
pub fn stable_hash_string<T: Serialize>(value: &T) -> Result<String, SystError> {
    let bytes = to_canonical_json_bytes(value)?;
    let digest = Sha256::digest(bytes);
    Ok(format!("{:x}", digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn key_order_does_not_change_hash() {
        let mut a = HashMap::new();
        a.insert("luminosity", 59.8);
        a.insert("xs", 2.5);
        let mut b = HashMap::new();
        b.insert("xs", 2.5);
        b.insert("luminosity", 59.8);
        assert_eq!(stable_hash_string(&a).unwrap(), stable_hash_string(&b).unwrap());
        assert_eq!(stable_hash_string(&a).unwrap().len(), 64);
    }
}
