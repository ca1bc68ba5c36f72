//! Detached PKCS#7 signatures over `manifest.json`.
//!
//! The wallet verifies `signature` as a DER `signed-data` structure whose
//! content is omitted and supplied separately as the manifest bytes. The
//! signer certificate and the issuer (WWDR intermediate) certificate are both
//! embedded so the device can build the chain to its trusted root.

use crate::crypto::Credentials;
use crate::{Error, Result};
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509PurposeId, X509Ref, X509};

/// Load a certificate from PEM or DER bytes.
pub fn load_certificate(data: &[u8]) -> Result<X509> {
    X509::from_pem(data)
        .or_else(|_| X509::from_der(data))
        .map_err(|e| Error::Config(format!("Failed to load certificate: {e}")))
}

/// Sign `manifest` and return the DER-encoded detached signature.
///
/// The bytes are signed exactly as given (`BINARY`), so callers must pass the
/// same buffer that is written to disk as `manifest.json`.
///
/// # Errors
///
/// Returns [`Error::Signature`] if the private key does not belong to the
/// signer certificate or if OpenSSL fails to produce the structure.
pub fn sign_manifest(manifest: &[u8], credentials: &Credentials, issuer: &X509Ref) -> Result<Vec<u8>> {
    validate_key_pair(credentials)?;

    let mut certs = Stack::new().map_err(signature_error)?;
    certs.push(issuer.to_owned()).map_err(signature_error)?;

    let flags = Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY;
    let pkcs7 = Pkcs7::sign(
        credentials.certificate(),
        credentials.private_key(),
        &certs,
        manifest,
        flags,
    )
    .map_err(signature_error)?;

    let der = pkcs7.to_der().map_err(signature_error)?;
    log::debug!("Signed {} manifest bytes ({} byte signature)", manifest.len(), der.len());
    Ok(der)
}

/// Verify a detached signature against `manifest`.
///
/// `trusted` are the certificates accepted as chain anchors, normally the
/// issuer certificate passed to [`sign_manifest`] (or its root). An anchor
/// need not be self-signed, and the signer certificate may carry any
/// extended key usage.
///
/// # Errors
///
/// Returns [`Error::Signature`] if the signature does not parse, the chain
/// does not reach a trusted certificate, or the manifest was modified.
pub fn verify_signature(signature: &[u8], manifest: &[u8], trusted: &[X509]) -> Result<()> {
    let pkcs7 = Pkcs7::from_der(signature).map_err(signature_error)?;

    let mut store = X509StoreBuilder::new().map_err(signature_error)?;
    store
        .set_flags(X509VerifyFlags::PARTIAL_CHAIN)
        .map_err(signature_error)?;
    store
        .set_purpose(X509PurposeId::ANY)
        .map_err(signature_error)?;
    for cert in trusted {
        store.add_cert(cert.clone()).map_err(signature_error)?;
    }
    let store = store.build();

    let extra = Stack::new().map_err(signature_error)?;
    pkcs7
        .verify(&extra, &store, Some(manifest), None, Pkcs7Flags::BINARY)
        .map_err(signature_error)
}

fn validate_key_pair(credentials: &Credentials) -> Result<()> {
    let cert_public_key = credentials.certificate().public_key().map_err(|e| {
        Error::Signature(format!("Failed to extract public key from certificate: {e}"))
    })?;

    if !credentials.private_key().public_eq(&cert_public_key) {
        return Err(Error::Signature(
            "Private key does not match certificate public key".into(),
        ));
    }

    Ok(())
}

fn signature_error(e: openssl::error::ErrorStack) -> Error {
    Error::Signature(e.to_string())
}
