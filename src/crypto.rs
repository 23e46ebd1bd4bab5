/// Cryptographic signing and hashing collaborator: exposed as pure
/// functions over byte strings, out of scope for this core.
///
/// `hash` stands in for whatever block-key derivation the node uses, a
/// double-SHA256 here. `Signer` is the seam the wallet/private-key
/// collaborator plugs into.

use sha2::{Digest, Sha256};

use crate::reliability::BlockKey;

/// Double-SHA256.
pub fn hash(data: &[u8]) -> BlockKey {
    let first = Sha256::digest(data);
    let second = Sha256::digest(&first);
    BlockKey::from_slice(&second)
}

/// A pure signing function over byte strings: `sign(private_key, data) ->
/// signature`. Implementations may be a no-op stub in tests or a real
/// secp256k1/ed25519 signer in production; the core only ever consumes the
/// resulting bytes.
pub trait Signer: Send + Sync {
    fn sign(&self, private_key: &[u8], data: &[u8]) -> Vec<u8>;
}

/// A deterministic signer used in tests and as a development default: signs
/// by hashing the private key together with the data. Not a real signature
/// scheme; production deployments supply a real `Signer`.
pub struct HashSigner;

impl Signer for HashSigner {
    fn sign(&self, private_key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(private_key.len() + data.len());
        buf.extend_from_slice(private_key);
        buf.extend_from_slice(data);
        hash(&buf).0.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash(b"abc"), hash(b"abc"));
        assert_ne!(hash(b"abc"), hash(b"abd"));
    }

    #[test]
    fn test_signer_depends_on_key() {
        let signer = HashSigner;
        let a = signer.sign(b"key-a", b"data");
        let b = signer.sign(b"key-b", b"data");
        assert_ne!(a, b);
    }
}
