//! Per-build working directory.
//!
//! A [`WorkingBundle`] owns a uniquely named directory for the duration of one
//! build and walks it through the packaging protocol:
//!
//! | State | Contents | Transition |
//! |-------|----------|------------|
//! | [`Staged`] | template assets, `pass.json` | [`WorkingBundle::write_manifest`] |
//! | [`Manifested`] | + `manifest.json` | [`WorkingBundle::write_signature`] |
//! | [`Signed`] | + `signature` | [`WorkingBundle::assemble`] |
//!
//! The manifest can only be produced from a staged bundle and the signature
//! only from a manifested one, so the manifest never lists itself or the
//! signature. The directory is removed when the bundle is dropped, whichever
//! state it is in.
//!
//! # Examples
//!
//! ```no_run
//! use pkpass::bundle::WorkingBundle;
//! use pkpass::crypto::{load_certificate, Credentials};
//! use pkpass::{Compression, PassDocument};
//! use secrecy::SecretString;
//! use std::path::Path;
//!
//! let document = PassDocument::from_json_bytes(std::fs::read("pass.json")?)?;
//! let credentials = Credentials::from_pkcs12_file("pass.p12", &SecretString::new("pw".into()))?;
//! let issuer = load_certificate(&std::fs::read("wwdr.pem")?)?;
//!
//! let archive = WorkingBundle::stage(None, Some(Path::new("template")), &document)?
//!     .write_manifest()?
//!     .write_signature(&credentials, &issuer)?
//!     .assemble(Compression::Stored, None)?;
//! # Ok::<(), pkpass::Error>(())
//! ```

use crate::archive::{archive_to_vec, create_archive, Compression};
use crate::crypto::{sign_manifest, Credentials};
use crate::manifest::Manifest;
use crate::pass::PassDocument;
use crate::{Error, Result};
use openssl::x509::X509Ref;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Serialized pass document.
pub const PASS_FILE: &str = "pass.json";
/// Digest mapping of every other file.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Detached signature over `manifest.json`.
pub const SIGNATURE_FILE: &str = "signature";

/// Names the pipeline writes itself; never copied from a template.
const RESERVED_NAMES: [&str; 3] = [PASS_FILE, MANIFEST_FILE, SIGNATURE_FILE];

const DIR_PREFIX: &str = "pkpass-";

/// Template copied and `pass.json` written.
#[derive(Debug)]
pub struct Staged;

/// `manifest.json` written; holds the exact bytes that will be signed.
#[derive(Debug)]
pub struct Manifested {
    manifest: Manifest,
    bytes: Vec<u8>,
}

/// `signature` written; the bundle is complete.
#[derive(Debug)]
pub struct Signed {
    signature: Vec<u8>,
}

/// Working directory for a single build, in protocol state `S`.
#[derive(Debug)]
pub struct WorkingBundle<S> {
    dir: Option<TempDir>,
    path: PathBuf,
    state: S,
}

impl WorkingBundle<Staged> {
    /// Create the working directory and stage the bundle content.
    ///
    /// The directory is created under `work_root` (or the system temp
    /// directory) with a unique `pkpass-` name. Every file below `template` is
    /// copied, except `pass.json`, `manifest.json` and `signature` at the
    /// template root, which are skipped with a warning. `document` is then
    /// written verbatim as `pass.json`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Staging`] if the directory cannot be created, the
    /// template cannot be read, or a file cannot be written. Anything already
    /// created is removed before returning.
    pub fn stage(
        work_root: Option<&Path>,
        template: Option<&Path>,
        document: &PassDocument,
    ) -> Result<Self> {
        let dir = create_working_dir(work_root)?;
        let bundle = Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
            state: Staged,
        };
        log::debug!("Staging pass in {}", bundle.path.display());

        if let Some(template) = template {
            copy_template(template, &bundle.path)?;
        }

        fs::write(bundle.path.join(PASS_FILE), document.as_bytes())
            .map_err(|e| Error::staging("Failed to write pass.json", e))?;

        Ok(bundle)
    }

    /// Hash the staged content and write `manifest.json`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] if a staged file cannot be read or the
    /// manifest cannot be written.
    pub fn write_manifest(self) -> Result<WorkingBundle<Manifested>> {
        let manifest = Manifest::scan(&self.path)?;
        let bytes = manifest.to_json()?;

        let manifest_path = self.path.join(MANIFEST_FILE);
        fs::write(&manifest_path, &bytes).map_err(|source| Error::Manifest {
            path: manifest_path,
            source,
        })?;
        log::debug!("Wrote manifest with {} entries", manifest.len());

        Ok(self.transition(Manifested { manifest, bytes }))
    }
}

impl WorkingBundle<Manifested> {
    pub fn manifest(&self) -> &Manifest {
        &self.state.manifest
    }

    /// Bytes of `manifest.json` exactly as written to disk.
    pub fn manifest_bytes(&self) -> &[u8] {
        &self.state.bytes
    }

    /// Sign the manifest and write `signature`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signature`] if signing fails or the signature cannot be
    /// written.
    pub fn write_signature(
        self,
        credentials: &Credentials,
        issuer: &X509Ref,
    ) -> Result<WorkingBundle<Signed>> {
        let signature = sign_manifest(&self.state.bytes, credentials, issuer)?;

        fs::write(self.path.join(SIGNATURE_FILE), &signature)
            .map_err(|e| Error::Signature(format!("Failed to write signature: {e}")))?;

        Ok(self.transition(Signed { signature }))
    }
}

impl WorkingBundle<Signed> {
    /// DER signature written into the bundle.
    pub fn signature(&self) -> &[u8] {
        &self.state.signature
    }

    /// Zip the bundle and remove the working directory.
    ///
    /// When `dest` is given the archive is also written there.
    pub fn assemble(self, compression: Compression, dest: Option<&Path>) -> Result<Vec<u8>> {
        let bytes = match dest {
            Some(dest) => create_archive(&self.path, dest, compression)?,
            None => archive_to_vec(&self.path, compression)?,
        };
        log::debug!("Assembled {} byte archive", bytes.len());

        let path = self.path.clone();
        if let Err(e) = self.close() {
            log::warn!("Failed to remove working directory {}: {e}", path.display());
        }

        Ok(bytes)
    }
}

impl<S> WorkingBundle<S> {
    /// Location of the working directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the working directory now, reporting any failure.
    pub fn close(mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }

    fn transition<T>(mut self, state: T) -> WorkingBundle<T> {
        WorkingBundle {
            dir: self.dir.take(),
            path: std::mem::take(&mut self.path),
            state,
        }
    }
}

impl<S> Drop for WorkingBundle<S> {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                log::warn!(
                    "Failed to remove working directory {}: {e}",
                    self.path.display()
                );
            }
        }
    }
}

fn create_working_dir(work_root: Option<&Path>) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(DIR_PREFIX);

    match work_root {
        Some(root) => {
            fs::create_dir_all(root)
                .map_err(|e| Error::staging(&format!("Cannot create {}", root.display()), e))?;
            builder.tempdir_in(root)
        }
        None => builder.tempdir(),
    }
    .map_err(|e| Error::staging("Failed to create working directory", e))
}

fn copy_template(template: &Path, dest: &Path) -> Result<()> {
    if !template.is_dir() {
        return Err(Error::Staging(format!(
            "Template is not a directory: {}",
            template.display()
        )));
    }

    let mut entries = WalkDir::new(template)
        .min_depth(1)
        .follow_links(false)
        .into_iter();

    while let Some(entry) = entries.next() {
        let entry = entry.map_err(|e| Error::staging("Failed to read template", e))?;
        let relative = entry
            .path()
            .strip_prefix(template)
            .map_err(|e| Error::staging("Template walk escaped its root", e))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if entry.depth() == 1 && is_reserved(entry.file_name()) {
            log::warn!(
                "Ignoring reserved name in template: {}",
                entry.path().display()
            );
            if file_type.is_dir() {
                entries.skip_current_dir();
            }
            continue;
        }

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| Error::staging(&format!("Cannot create {}", target.display()), e))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)
                .map_err(|e| Error::staging(&format!("Cannot copy {}", relative.display()), e))?;
        } else {
            log::warn!("Skipping non-regular template entry: {}", entry.path().display());
        }
    }

    Ok(())
}

fn is_reserved(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| RESERVED_NAMES.contains(&n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::read_archive;
    use crate::crypto::testing::TestPki;
    use crate::crypto::verify_signature;
    use secrecy::SecretString;
    use tempfile::tempdir;

    const PASS: &[u8] = br#"{"formatVersion":1,"serialNumber":"001"}"#;

    fn document() -> PassDocument {
        PassDocument::from_json_bytes(PASS.to_vec()).unwrap()
    }

    fn template(root: &Path) -> PathBuf {
        let template = root.join("template");
        fs::create_dir_all(template.join("en.lproj")).unwrap();
        fs::write(template.join("icon.png"), b"icon").unwrap();
        fs::write(template.join("en.lproj/pass.strings"), b"\"a\" = \"b\";").unwrap();
        template
    }

    fn working_dirs(root: &Path) -> Vec<PathBuf> {
        fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(DIR_PREFIX))
            })
            .collect()
    }

    #[test]
    fn test_stage_copies_template_and_document() {
        let root = tempdir().unwrap();
        let template = template(root.path());
        let work = root.path().join("work");

        let bundle = WorkingBundle::stage(Some(&work), Some(&template), &document()).unwrap();

        assert!(bundle.path().starts_with(&work));
        assert_eq!(fs::read(bundle.path().join(PASS_FILE)).unwrap(), PASS);
        assert_eq!(fs::read(bundle.path().join("icon.png")).unwrap(), b"icon");
        assert!(bundle.path().join("en.lproj/pass.strings").is_file());
    }

    #[test]
    fn test_stage_skips_reserved_template_names() {
        let root = tempdir().unwrap();
        let template = template(root.path());
        fs::write(template.join(MANIFEST_FILE), b"{\"stale\":\"x\"}").unwrap();
        fs::write(template.join(SIGNATURE_FILE), b"stale").unwrap();
        fs::write(template.join(PASS_FILE), b"{}").unwrap();

        let bundle = WorkingBundle::stage(None, Some(&template), &document()).unwrap();

        assert!(!bundle.path().join(MANIFEST_FILE).exists());
        assert!(!bundle.path().join(SIGNATURE_FILE).exists());
        assert_eq!(fs::read(bundle.path().join(PASS_FILE)).unwrap(), PASS);
    }

    #[test]
    fn test_missing_template_is_staging_error() {
        let root = tempdir().unwrap();
        let work = root.path().join("work");

        let result = WorkingBundle::stage(
            Some(&work),
            Some(&root.path().join("missing")),
            &document(),
        );

        assert!(matches!(result, Err(Error::Staging(_))));
        assert!(working_dirs(&work).is_empty());
    }

    #[test]
    fn test_manifest_excludes_itself_and_signature() {
        let root = tempdir().unwrap();
        let template = template(root.path());

        let bundle = WorkingBundle::stage(None, Some(&template), &document())
            .unwrap()
            .write_manifest()
            .unwrap();

        let manifest = bundle.manifest();
        assert_eq!(manifest.len(), 3);
        assert!(manifest.get(PASS_FILE).is_some());
        assert!(manifest.get(MANIFEST_FILE).is_none());
        assert!(manifest.get(SIGNATURE_FILE).is_none());
        assert_eq!(
            fs::read(bundle.path().join(MANIFEST_FILE)).unwrap(),
            bundle.manifest_bytes()
        );
    }

    #[test]
    fn test_full_protocol() {
        let root = tempdir().unwrap();
        let work = root.path().join("work");
        let pki = TestPki::generate();
        let credentials =
            Credentials::from_pkcs12(&pki.pkcs12("pw"), &SecretString::new("pw".into())).unwrap();

        let signed = WorkingBundle::stage(Some(&work), None, &document())
            .unwrap()
            .write_manifest()
            .unwrap()
            .write_signature(&credentials, &pki.issuer_cert)
            .unwrap();
        let signature = signed.signature().to_vec();
        let archive = signed.assemble(Compression::Stored, None).unwrap();

        let files = read_archive(&archive).unwrap();
        let names: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(names, vec![MANIFEST_FILE, PASS_FILE, SIGNATURE_FILE]);
        assert_eq!(files[SIGNATURE_FILE], signature);
        verify_signature(&signature, &files[MANIFEST_FILE], &[pki.issuer_cert.clone()]).unwrap();
        assert!(working_dirs(&work).is_empty());
    }

    #[test]
    fn test_drop_removes_directory_in_any_state() {
        let root = tempdir().unwrap();

        let staged = WorkingBundle::stage(Some(root.path()), None, &document()).unwrap();
        let staged_path = staged.path().to_path_buf();
        drop(staged);
        assert!(!staged_path.exists());

        let manifested = WorkingBundle::stage(Some(root.path()), None, &document())
            .unwrap()
            .write_manifest()
            .unwrap();
        let manifested_path = manifested.path().to_path_buf();
        drop(manifested);
        assert!(!manifested_path.exists());
    }

    #[test]
    fn test_close_reports_success() {
        let bundle = WorkingBundle::stage(None, None, &document()).unwrap();
        let path = bundle.path().to_path_buf();
        bundle.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_directories_are_unique() {
        let root = tempdir().unwrap();
        let a = WorkingBundle::stage(Some(root.path()), None, &document()).unwrap();
        let b = WorkingBundle::stage(Some(root.path()), None, &document()).unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(working_dirs(root.path()).len(), 2);
    }
}
