//! Authentication of backend services against a slink server.
//!
//! A service authenticates with a [credential bundle][CredentialBundle], which pairs its
//! [identity][Identity] with a shared [secret][Secret]:
//!   - The service announces its identity and the invocation group it wants to join.
//!   - The server answers with a single-use random [nonce][Nonce].
//!   - The service answers with a [proof][Proof] derived from the secret and the nonce. The raw
//!     secret never leaves the process that holds it.
//!   - The server derives the same proof from its own copy of the secret and compares the two in
//!     constant time.

mod credentials;
mod identity;
mod proof;

pub use credentials::{CredentialBundle, CredentialError, Secret};
pub use identity::{Identity, IdentityError};
pub use proof::{Nonce, Proof, NONCE_LEN, PROOF_LEN};
