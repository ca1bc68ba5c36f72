//! Error types for pass packaging operations.
//!
//! This module defines the [`enum@Error`] enum covering every way a pass build
//! can fail, and [`CredentialError`] for the PKCS#12 extraction step.
//! Every pipeline failure can report the [`Stage`] it came from, so callers
//! never receive an unlabeled error from a build.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Working directory creation, template copy, `pass.json` write.
    Stage,
    /// Manifest generation.
    Manifest,
    /// PKCS#12 decryption.
    Credentials,
    /// Detached signature generation.
    Sign,
    /// Zip assembly.
    Assemble,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Stage => "stage",
            Stage::Manifest => "manifest",
            Stage::Credentials => "credentials",
            Stage::Sign => "sign",
            Stage::Assemble => "assemble",
        };
        f.write_str(name)
    }
}

/// Component that may be missing from a PKCS#12 container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    PrivateKey,
    Certificate,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::PrivateKey => f.write_str("private key"),
            Component::Certificate => f.write_str("certificate"),
        }
    }
}

/// Failure while extracting signing material from a PKCS#12 container.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// The container parsed but could not be decrypted with the password.
    #[error("Invalid password for PKCS#12 container")]
    InvalidPassword,

    /// The bytes are not a PKCS#12 container.
    #[error("Malformed PKCS#12 container: {0}")]
    Malformed(String),

    /// The container decrypted but lacks a key or certificate.
    #[error("PKCS#12 container has no {0}")]
    MissingComponent(Component),
}

/// Error type for pass packaging operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses this error type.
/// Match on variants to handle specific failure cases, or call [`Error::stage`]
/// to find out which build stage failed.
///
/// # Examples
///
/// ```no_run
/// use pkpass::{Error, PassDocument, PassSigner};
///
/// let document = PassDocument::from_json_bytes(std::fs::read("pass.json")?)?;
/// let result = PassSigner::new()
///     .pkcs12("pass.p12")
///     .password("secret")
///     .issuer_certificate("AppleWWDRCA.pem")
///     .template_dir("template")
///     .build(&document, None);
/// match result {
///     Ok(archive) => println!("{} bytes", archive.len()),
///     Err(Error::Credential(e)) => eprintln!("Bad certificate bundle: {e}"),
///     Err(e) => eprintln!("Build failed at {:?}: {e}", e.stage()),
/// }
/// # Ok::<(), pkpass::Error>(())
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// The working directory could not be created or populated.
    #[error("Staging failed: {0}")]
    Staging(String),

    /// A staged file could not be read while building the manifest.
    #[error("Manifest failed reading {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `manifest.json` could not be encoded or parsed.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Signing material could not be extracted.
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// The detached signature could not be produced or did not verify.
    #[error("Signature error: {0}")]
    Signature(String),

    /// The zip archive could not be assembled or read.
    #[error("Archive error: {0}")]
    Archive(String),

    /// Low-level zip failure during assembly.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Generic filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Pass content violates a construction rule.
    #[error("Invalid pass: {0}")]
    Pass(String),

    /// Invalid builder or file configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The build was cancelled before it completed.
    #[error("Build cancelled")]
    Cancelled,
}

impl Error {
    /// Pipeline stage this error is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Staging(_) => Some(Stage::Stage),
            Error::Manifest { .. } | Error::InvalidManifest(_) => Some(Stage::Manifest),
            Error::Credential(_) => Some(Stage::Credentials),
            Error::Signature(_) => Some(Stage::Sign),
            Error::Archive(_) | Error::Zip(_) => Some(Stage::Assemble),
            Error::Io(_) | Error::Pass(_) | Error::Config(_) | Error::Cancelled => None,
        }
    }

    pub(crate) fn staging(context: &str, err: impl fmt::Display) -> Self {
        Error::Staging(format!("{context}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = Error::Signature("key mismatch".to_string());
        assert_eq!(error.to_string(), "Signature error: key mismatch");

        let error = Error::from(CredentialError::MissingComponent(Component::PrivateKey));
        assert_eq!(
            error.to_string(),
            "Credential error: PKCS#12 container has no private key"
        );
    }

    #[test]
    fn test_manifest_error_names_path() {
        let error = Error::Manifest {
            path: PathBuf::from("icon.png"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(error.to_string().contains("icon.png"));
        assert_eq!(error.stage(), Some(Stage::Manifest));
    }

    #[test]
    fn test_stage_attribution() {
        assert_eq!(Error::Staging("x".into()).stage(), Some(Stage::Stage));
        assert_eq!(
            Error::Credential(CredentialError::InvalidPassword).stage(),
            Some(Stage::Credentials)
        );
        assert_eq!(Error::InvalidManifest("x".into()).stage(), Some(Stage::Manifest));
        assert_eq!(Error::Signature("x".into()).stage(), Some(Stage::Sign));
        assert_eq!(Error::Archive("x".into()).stage(), Some(Stage::Assemble));
        assert_eq!(Error::Cancelled.stage(), None);
    }
}
