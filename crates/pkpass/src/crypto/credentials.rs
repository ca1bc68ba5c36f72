//! Signing credential extraction from PKCS#12 containers.
//!
//! Pass type certificates are distributed as password-protected `.p12`
//! bundles holding the private key and the signer certificate. This module
//! decrypts such a bundle and exposes both parts, in memory only, for the
//! duration of a single build.
//!
//! # Examples
//!
//! ```no_run
//! use pkpass::crypto::Credentials;
//! use secrecy::SecretString;
//!
//! let p12_data = std::fs::read("pass.p12")?;
//! let password = SecretString::new("password".into());
//! let credentials = Credentials::from_pkcs12(&p12_data, &password)?;
//! println!("Pass type: {:?}", credentials.pass_type_identifier());
//! # Ok::<(), pkpass::Error>(())
//! ```

use crate::error::{Component, CredentialError};
use crate::{Error, Result};
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::x509::{X509Ref, X509};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::fs;
use std::path::Path;

/// Private key and signer certificate decrypted from a PKCS#12 container.
///
/// # Security
///
/// The private key is sensitive. [`Credentials`] is never cached across builds
/// and its `Debug` output omits the key.
pub struct Credentials {
    certificate: X509,
    private_key: PKey<Private>,
    chain: Vec<X509>,
}

impl Credentials {
    /// Decrypt a PKCS#12 container.
    ///
    /// # Errors
    ///
    /// - [`CredentialError::Malformed`] if `der` is not a PKCS#12 structure
    /// - [`CredentialError::InvalidPassword`] if decryption fails
    /// - [`CredentialError::MissingComponent`] if the key or certificate is absent
    pub fn from_pkcs12(der: &[u8], password: &SecretString) -> Result<Self> {
        let pkcs12 = Pkcs12::from_der(der)
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;

        let parsed = pkcs12
            .parse2(password.expose_secret())
            .map_err(|_| CredentialError::InvalidPassword)?;

        let private_key = parsed
            .pkey
            .ok_or(CredentialError::MissingComponent(Component::PrivateKey))?;
        let certificate = parsed
            .cert
            .ok_or(CredentialError::MissingComponent(Component::Certificate))?;
        let chain = parsed
            .ca
            .map(|stack| stack.into_iter().collect())
            .unwrap_or_default();

        Ok(Self {
            certificate,
            private_key,
            chain,
        })
    }

    /// Load credentials from a PEM certificate and PEM private key.
    ///
    /// The key may be encrypted, in which case `key_password` must be given.
    /// Errors are reported as [`CredentialError::Malformed`], or
    /// [`CredentialError::InvalidPassword`] when an encrypted key fails to decrypt.
    pub fn from_pem(
        cert_pem: &[u8],
        key_pem: &[u8],
        key_password: Option<&SecretString>,
    ) -> Result<Self> {
        let certificate = X509::from_pem(cert_pem)
            .map_err(|e| CredentialError::Malformed(format!("certificate: {e}")))?;

        let private_key = match key_password {
            Some(pass) => {
                PKey::private_key_from_pem_passphrase(key_pem, pass.expose_secret().as_bytes())
                    .map_err(|_| CredentialError::InvalidPassword)?
            }
            None => PKey::private_key_from_pem(key_pem)
                .map_err(|e| CredentialError::Malformed(format!("private key: {e}")))?,
        };

        Ok(Self {
            certificate,
            private_key,
            chain: Vec::new(),
        })
    }

    /// Read and decrypt a `.p12` file.
    pub fn from_pkcs12_file(path: impl AsRef<Path>, password: &SecretString) -> Result<Self> {
        let der = fs::read(path.as_ref()).map_err(|e| {
            CredentialError::Malformed(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_pkcs12(&der, password)
    }

    pub fn certificate(&self) -> &X509Ref {
        &self.certificate
    }

    pub fn private_key(&self) -> &PKeyRef<Private> {
        &self.private_key
    }

    /// Additional certificates shipped inside the container.
    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    /// Signer certificate as PEM.
    pub fn certificate_pem(&self) -> Result<Vec<u8>> {
        self.certificate
            .to_pem()
            .map_err(|e| CredentialError::Malformed(e.to_string()).into())
    }

    /// Private key as unencrypted PKCS#8 PEM.
    pub fn private_key_pem(&self) -> Result<SecretString> {
        let pem = self
            .private_key
            .private_key_to_pem_pkcs8()
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;
        String::from_utf8(pem)
            .map(SecretString::new)
            .map_err(|_| Error::from(CredentialError::Malformed("non UTF-8 PEM".into())))
    }

    /// Pass type identifier from the certificate subject UID.
    pub fn pass_type_identifier(&self) -> Option<String> {
        subject_entry(&self.certificate, Nid::USERID)
    }

    /// Team identifier from the certificate subject OU.
    pub fn team_identifier(&self) -> Option<String> {
        subject_entry(&self.certificate, Nid::ORGANIZATIONALUNITNAME)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("pass_type_identifier", &self.pass_type_identifier())
            .field("team_identifier", &self.team_identifier())
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

fn subject_entry(cert: &X509Ref, nid: Nid) -> Option<String> {
    cert.subject_name()
        .entries_by_nid(nid)
        .find_map(|entry| entry.data().to_string().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::TestPki;

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    #[test]
    fn test_from_pkcs12_roundtrip() {
        let pki = TestPki::generate();
        let creds = Credentials::from_pkcs12(&pki.pkcs12("hunter2"), &secret("hunter2")).unwrap();

        assert!(creds.private_key().public_eq(&pki.leaf_key));
        assert_eq!(
            creds.certificate().to_der().unwrap(),
            pki.leaf_cert.to_der().unwrap()
        );
        assert_eq!(
            creds.pass_type_identifier().as_deref(),
            Some(TestPki::PASS_TYPE_IDENTIFIER)
        );
        assert_eq!(creds.team_identifier().as_deref(), Some(TestPki::TEAM_IDENTIFIER));
    }

    #[test]
    fn test_wrong_password() {
        let pki = TestPki::generate();
        let result = Credentials::from_pkcs12(&pki.pkcs12("hunter2"), &secret("wrong"));
        assert!(matches!(
            result,
            Err(Error::Credential(CredentialError::InvalidPassword))
        ));
    }

    #[test]
    fn test_malformed_container() {
        let result = Credentials::from_pkcs12(b"not valid p12 data", &secret("password"));
        assert!(matches!(
            result,
            Err(Error::Credential(CredentialError::Malformed(_)))
        ));
    }

    #[test]
    fn test_missing_private_key() {
        let pki = TestPki::generate();
        let result = Credentials::from_pkcs12(&pki.pkcs12_without_key("pw"), &secret("pw"));
        assert!(matches!(
            result,
            Err(Error::Credential(CredentialError::MissingComponent(
                Component::PrivateKey
            )))
        ));
    }

    #[test]
    fn test_missing_certificate() {
        let pki = TestPki::generate();
        let result =
            Credentials::from_pkcs12(&pki.pkcs12_without_certificate("pw"), &secret("pw"));
        assert!(matches!(
            result,
            Err(Error::Credential(CredentialError::MissingComponent(
                Component::Certificate
            )))
        ));
    }

    #[test]
    fn test_subject_entry_keeps_interior_nul() {
        let pki = TestPki::builder().team_identifier("TEAM\0SUFFIX").generate();
        let creds = Credentials::from_pkcs12(&pki.pkcs12("pw"), &secret("pw")).unwrap();
        assert_eq!(creds.team_identifier().as_deref(), Some("TEAM\0SUFFIX"));
    }

    #[test]
    fn test_pem_representation() {
        let pki = TestPki::generate();
        let creds = Credentials::from_pkcs12(&pki.pkcs12("pw"), &secret("pw")).unwrap();

        let cert_pem = creds.certificate_pem().unwrap();
        assert!(cert_pem.starts_with(b"-----BEGIN CERTIFICATE-----"));

        let key_pem = creds.private_key_pem().unwrap();
        let reparsed = PKey::private_key_from_pem(key_pem.expose_secret().as_bytes()).unwrap();
        assert!(reparsed.public_eq(&pki.leaf_key));
    }

    #[test]
    fn test_from_pem() {
        let pki = TestPki::generate();
        let cert_pem = pki.leaf_cert.to_pem().unwrap();
        let key_pem = pki.leaf_key.private_key_to_pem_pkcs8().unwrap();

        let creds = Credentials::from_pem(&cert_pem, &key_pem, None).unwrap();
        assert!(creds.private_key().public_eq(&pki.leaf_key));
        assert!(creds.chain().is_empty());

        let result = Credentials::from_pem(b"not a cert", &key_pem, None);
        assert!(matches!(
            result,
            Err(Error::Credential(CredentialError::Malformed(_)))
        ));
    }

    #[test]
    fn test_debug_omits_key() {
        let pki = TestPki::generate();
        let creds = Credentials::from_pkcs12(&pki.pkcs12("pw"), &secret("pw")).unwrap();
        let debug = format!("{creds:?}");
        assert!(!debug.contains("PRIVATE KEY"));
        assert!(debug.contains(TestPki::TEAM_IDENTIFIER));
    }
}
