use sha2::{Digest, Sha256};

/// Prefix carried by every content identifier issued by this node
pub const CID_PREFIX: &str = "kx-";

/// Number of digest hex characters kept in a CID
pub const CID_HEX_LEN: usize = 32;

/// Compute SHA-256 and return the lowercase hex digest
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Derive the content identifier for a byte payload
///
/// The CID is the fixed prefix followed by the first 32 hex characters of the
/// SHA-256 digest. Anyone holding the bytes can recompute it.
pub fn compute_cid(data: &[u8]) -> String {
    cid_from_digest(&sha256_hex(data))
}

/// Build a CID from an already computed hex digest
pub fn cid_from_digest(digest_hex: &str) -> String {
    let short = digest_hex.get(..CID_HEX_LEN).unwrap_or(digest_hex);
    format!("{}{}", CID_PREFIX, short)
}

/// Check that a string looks like a CID issued by [`compute_cid`]
pub fn is_valid_cid(cid: &str) -> bool {
    match cid.strip_prefix(CID_PREFIX) {
        Some(rest) => {
            rest.len() == CID_HEX_LEN
                && rest.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        }
        None => false,
    }
}

/// Deterministic peer identifier for a network endpoint
pub fn derive_peer_id(name: &str, address: &str, port: u16) -> String {
    let digest = sha256_hex(format!("{}:{}:{}", name, address, port).as_bytes());
    format!("peer-{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_cid_is_deterministic() {
        let a = compute_cid(b"lecture notes");
        let b = compute_cid(b"lecture notes");
        assert_eq!(a, b);
        assert!(a.starts_with(CID_PREFIX));
        assert_eq!(a.len(), CID_PREFIX.len() + CID_HEX_LEN);
    }

    #[test]
    fn test_cid_differs_on_single_byte_change() {
        assert_ne!(compute_cid(b"chapter 1"), compute_cid(b"chapter 2"));
    }

    #[test]
    fn test_cid_from_digest_matches_compute() {
        let data = b"some payload";
        assert_eq!(cid_from_digest(&sha256_hex(data)), compute_cid(data));
    }

    #[test]
    fn test_is_valid_cid() {
        assert!(is_valid_cid(&compute_cid(b"x")));
        assert!(!is_valid_cid("kx-short"));
        assert!(!is_valid_cid("Qm0123456789abcdef0123456789abcdef"));
        assert!(!is_valid_cid("kx-0123456789ABCDEF0123456789abcdef"));
    }

    #[test]
    fn test_derive_peer_id() {
        let id = derive_peer_id("alice", "10.0.0.1", 9000);
        assert_eq!(id, derive_peer_id("alice", "10.0.0.1", 9000));
        assert_ne!(id, derive_peer_id("alice", "10.0.0.1", 9001));
        assert!(id.starts_with("peer-"));
        assert_eq!(id.len(), "peer-".len() + 16);
    }
}
