//! Digest aggregation for bulk hash signing.
//!
//! The provider signs a single combined digest per bulk job. The combined
//! value is SHA-256 over the concatenated *raw* digest bytes, in array
//! order, so the result is order-sensitive by construction.

use sha2::{Digest, Sha256};

use crate::error::SignError;

/// SHA-256 of `bytes`, hex-encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Combine per-document digests into the bulk signing digest.
///
/// Each input is a hex-encoded SHA-256 digest from the signing co-process.
/// The hex is decoded to raw bytes before hashing; hashing the hex text
/// would produce a different, wrong value.
pub fn combined_digest(digests_hex: &[String]) -> Result<String, SignError> {
    if digests_hex.is_empty() {
        return Err(SignError::validation("no digests to combine"));
    }
    let mut hasher = Sha256::new();
    for (index, digest) in digests_hex.iter().enumerate() {
        let raw = hex::decode(digest).map_err(|_| {
            SignError::Validation(format!("document {index} digest is not valid hex"))
        })?;
        hasher.update(&raw);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest_of(data: &[u8]) -> String {
        sha256_hex(data)
    }

    #[test]
    fn single_element_equals_hash_of_raw_bytes() {
        let d1 = digest_of(b"document one");
        let raw = hex::decode(&d1).unwrap();
        assert_eq!(combined_digest(&[d1]).unwrap(), sha256_hex(&raw));
    }

    #[test]
    fn order_changes_the_result() {
        let d1 = digest_of(b"first");
        let d2 = digest_of(b"second");
        let forward = combined_digest(&[d1.clone(), d2.clone()]).unwrap();
        let reversed = combined_digest(&[d2, d1]).unwrap();
        assert_ne!(forward, reversed);
    }

    #[test]
    fn combines_raw_bytes_not_hex_text() {
        let d1 = digest_of(b"alpha");
        let d2 = digest_of(b"beta");
        let combined = combined_digest(&[d1.clone(), d2.clone()]).unwrap();

        let mut concatenated = hex::decode(&d1).unwrap();
        concatenated.extend(hex::decode(&d2).unwrap());
        assert_eq!(combined, sha256_hex(&concatenated));

        let hex_text_hash = sha256_hex(format!("{d1}{d2}").as_bytes());
        assert_ne!(combined, hex_text_hash);
    }

    #[test]
    fn rejects_empty_and_malformed_input() {
        assert!(combined_digest(&[]).is_err());
        assert!(combined_digest(&["not hex at all".to_string()]).is_err());
    }
}
