//! Challenge nonces and the proofs of secret knowledge derived from them.

use std::fmt;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde_derive::{Deserialize, Serialize};

use super::Secret;

pub const NONCE_LEN: usize = 32;
pub const PROOF_LEN: usize = blake3::OUT_LEN;

/// Context string for deriving the proof key from a shared secret. Changing it invalidates every
/// deployed client.
const PROOF_KEY_CONTEXT: &str = "slink 2012 service proof v1";

/// A random, single-use challenge issued by the server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Creates a new, randomly generated nonce.
    pub fn new_random() -> Self {
        // Same generator as for auth tokens: 20-round ChaCha, seeded from the OS.
        let mut rng: ChaCha20Rng = SeedableRng::from_entropy();
        let mut buf = [0; NONCE_LEN];
        rng.fill_bytes(&mut buf);
        Self(buf)
    }

    pub fn from_bytes(buf: [u8; NONCE_LEN]) -> Self {
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce(")?;
        for b in &self.0[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Proof that the sender knows a secret, bound to one [Nonce].
///
/// Equality is constant-time.
#[derive(Clone, Copy, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Proof([u8; PROOF_LEN]);

static_assertions::assert_eq_size!(Proof, [u8; 32]);

impl Proof {
    /// Derives the proof for a secret and nonce: a keyed BLAKE3 hash of the nonce, under a key
    /// derived from the secret.
    pub fn derive(secret: &Secret, nonce: &Nonce) -> Self {
        let mut key = blake3::derive_key(PROOF_KEY_CONTEXT, secret.expose());
        let hash = blake3::keyed_hash(&key, nonce.as_bytes());
        zeroize::Zeroize::zeroize(&mut key);
        Self(*hash.as_bytes())
    }

    pub fn from_bytes(buf: [u8; PROOF_LEN]) -> Self {
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8; PROOF_LEN] {
        &self.0
    }
}

impl PartialEq for Proof {
    fn eq(&self, other: &Self) -> bool {
        // `blake3::Hash` compares in constant time.
        blake3::Hash::from(self.0) == blake3::Hash::from(other.0)
    }
}

impl Eq for Proof {}

impl fmt::Debug for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Proof(<redacted>)")
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::{Nonce, Proof, NONCE_LEN};
    use crate::auth::Secret;

    #[test]
    fn derivation_is_deterministic() {
        let secret = Secret::from("the shared secret");
        for i in 0..=u8::MAX {
            let nonce = Nonce::from_bytes([i; NONCE_LEN]);
            assert_eq!(
                Proof::derive(&secret, &nonce),
                Proof::derive(&secret.clone(), &nonce.clone())
            );
        }
    }

    #[test]
    fn distinct_nonces_give_distinct_proofs() {
        let secret = Secret::from("the shared secret");
        let proofs: HashSet<_> = (0..1_000)
            .map(|_| *Proof::derive(&secret, &Nonce::new_random()).as_bytes())
            .collect();
        assert_eq!(proofs.len(), 1_000);
    }

    #[test]
    fn distinct_secrets_give_distinct_proofs() {
        let nonce = Nonce::new_random();
        let a = Proof::derive(&Secret::from("secret-a"), &nonce);
        let b = Proof::derive(&Secret::from("secret-b"), &nonce);
        assert_ne!(a, b);
    }

    #[test]
    fn proof_is_not_the_secret() {
        let secret = Secret::from("0123456789abcdef0123456789abcdef");
        let proof = Proof::derive(&secret, &Nonce::from_bytes([0; NONCE_LEN]));
        assert_ne!(&proof.as_bytes()[..], secret.expose());
    }

    #[test]
    fn random_nonces_differ() {
        assert_ne!(Nonce::new_random(), Nonce::new_random());
    }
}
