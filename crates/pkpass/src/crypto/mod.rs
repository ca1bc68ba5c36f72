//! Signing material and detached signatures.

pub mod credentials;
pub mod signer;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use credentials::Credentials;
pub use signer::{load_certificate, sign_manifest, verify_signature};
