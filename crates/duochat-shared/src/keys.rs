//! Simulated key agreement between a user's web and mobile devices.
//!
//! A "key pair" here is two independent random 256-bit values and the shared
//! secret is `SHA256(local_private || remote_public)`. Nothing about this is
//! asymmetric cryptography: the formula is directional, so two devices only
//! agree on a secret when the pairing flow feeds both of them the same
//! concatenation. The scheme sits behind [`KeyAgreementScheme`] so a real
//! Diffie-Hellman exchange can replace it without touching callers.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::KEY_MATERIAL_SIZE;

/// Hex-encoded key material held by one device.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Contract for deriving a device-to-device secret from exchanged keys.
///
/// Implementations must be deterministic: the same inputs always produce the
/// same lowercase hex secret. Symmetry (`derive(a_priv, b_pub) ==
/// derive(b_priv, a_pub)`) is NOT part of the contract.
pub trait KeyAgreementScheme {
    fn generate_key_pair(&self) -> KeyPair;

    fn derive_shared_secret(&self, local_private_key: &str, remote_public_key: &str) -> String;
}

/// `SHA256(private || public)` over the hex strings' bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedSha256;

impl KeyAgreementScheme for SimulatedSha256 {
    fn generate_key_pair(&self) -> KeyPair {
        KeyPair {
            public_key: random_hex(KEY_MATERIAL_SIZE),
            private_key: random_hex(KEY_MATERIAL_SIZE),
        }
    }

    fn derive_shared_secret(&self, local_private_key: &str, remote_public_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(local_private_key.as_bytes());
        hasher.update(remote_public_key.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Generate a key pair with the default scheme.
pub fn generate_key_pair() -> KeyPair {
    SimulatedSha256.generate_key_pair()
}

/// Derive a shared secret with the default scheme.
///
/// Returns `None` when either side's key is missing or empty.
pub fn derive_shared_secret(
    local_private_key: Option<&str>,
    remote_public_key: Option<&str>,
) -> Option<String> {
    let local = local_private_key.filter(|k| !k.is_empty())?;
    let remote = remote_public_key.filter(|k| !k.is_empty())?;
    Some(SimulatedSha256.derive_shared_secret(local, remote))
}

/// `len` random bytes as lowercase hex.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pair_shape() {
        let pair = generate_key_pair();
        assert_eq!(pair.public_key.len(), 64);
        assert_eq!(pair.private_key.len(), 64);
        assert!(pair.public_key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(pair.public_key, pair.private_key);
    }

    #[test]
    fn test_shared_secret_formula_pinned() {
        // sha256("ab" || "cd") == sha256("abcd")
        let secret = derive_shared_secret(Some("ab"), Some("cd")).unwrap();
        assert_eq!(
            secret,
            "88d4266fd4e6338d13b845fcf289579d209c897823b9217da3e161936f031589"
        );
    }

    #[test]
    fn test_shared_secret_deterministic() {
        let local = generate_key_pair();
        let remote = generate_key_pair();

        let a = derive_shared_secret(Some(&local.private_key), Some(&remote.public_key));
        let b = derive_shared_secret(Some(&local.private_key), Some(&remote.public_key));
        assert_eq!(a, b);
        assert_eq!(a.unwrap().len(), 64);
    }

    #[test]
    fn test_shared_secret_not_symmetric() {
        let web = generate_key_pair();
        let mobile = generate_key_pair();

        let on_web = SimulatedSha256.derive_shared_secret(&web.private_key, &mobile.public_key);
        let on_mobile = SimulatedSha256.derive_shared_secret(&mobile.private_key, &web.public_key);
        assert_ne!(on_web, on_mobile);
    }

    #[test]
    fn test_missing_input_yields_none() {
        assert!(derive_shared_secret(None, Some("ab")).is_none());
        assert!(derive_shared_secret(Some("ab"), None).is_none());
        assert!(derive_shared_secret(Some(""), Some("ab")).is_none());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let pair = generate_key_pair();
        let printed = format!("{pair:?}");
        assert!(!printed.contains(&pair.private_key));
        assert!(printed.contains(&pair.public_key));
    }
}
