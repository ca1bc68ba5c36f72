//! Pass build orchestration.
//!
//! [`PassSigner`] runs the full build: stage the document and template into a
//! working directory, write the manifest, decrypt the PKCS#12 bundle, sign,
//! and zip. The working directory is removed on every exit path.

use crate::archive::Compression;
use crate::bundle::{Manifested, Signed, WorkingBundle};
use crate::config::SignerConfig;
use crate::crypto::{load_certificate, Credentials};
use crate::pass::PassDocument;
use crate::{Error, Result};
use openssl::x509::X509;
use secrecy::SecretString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};

#[derive(Debug, Clone)]
enum Source {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl Source {
    fn read(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Source::Path(path) => fs::read(path),
            Source::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Pass builder and signer.
///
/// # Example
///
/// ```no_run
/// use pkpass::{PassDocument, PassSigner};
/// use std::path::Path;
///
/// let document = PassDocument::from_json_bytes(std::fs::read("pass.json")?)?;
/// PassSigner::new()
///     .pkcs12("pass.p12")
///     .password("secret")
///     .issuer_certificate("AppleWWDRCAG4.pem")
///     .template_dir("template")
///     .build(&document, Some(Path::new("Event.pkpass")))?;
/// # Ok::<(), pkpass::Error>(())
/// ```
#[derive(Clone)]
pub struct PassSigner {
    pkcs12: Option<Source>,
    password: Option<SecretString>,
    issuer_certificate: Option<Source>,
    template_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    compression: Compression,
}

impl PassSigner {
    /// Create a new PassSigner builder.
    pub fn new() -> Self {
        Self {
            pkcs12: None,
            password: None,
            issuer_certificate: None,
            template_dir: None,
            work_dir: None,
            compression: Compression::default(),
        }
    }

    /// Configure a signer from a loaded [`SignerConfig`].
    ///
    /// The password is read from the configured environment variable; when it
    /// is unset the container is opened with an empty password.
    pub fn from_config(config: &SignerConfig) -> Self {
        let mut signer = Self::new()
            .pkcs12(&config.pkcs12)
            .issuer_certificate(&config.issuer_certificate)
            .compression(Compression::from_level(config.compression_level));

        match config.password() {
            Some(password) => signer.password = Some(password),
            None => log::debug!("{} is not set, using empty password", config.password_env),
        }
        if let Some(ref dir) = config.template_dir {
            signer = signer.template_dir(dir);
        }
        if let Some(ref dir) = config.work_dir {
            signer = signer.work_dir(dir);
        }
        signer
    }

    /// Set PKCS#12 file path (.p12 format).
    pub fn pkcs12(mut self, path: impl AsRef<Path>) -> Self {
        self.pkcs12 = Some(Source::Path(path.as_ref().to_path_buf()));
        self
    }

    /// Use an in-memory PKCS#12 container.
    pub fn pkcs12_bytes(mut self, der: impl Into<Vec<u8>>) -> Self {
        self.pkcs12 = Some(Source::Bytes(der.into()));
        self
    }

    /// Set password for the PKCS#12 container.
    ///
    /// The password is stored securely and will be zeroized when dropped.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Set issuer (WWDR intermediate) certificate path, PEM or DER.
    pub fn issuer_certificate(mut self, path: impl AsRef<Path>) -> Self {
        self.issuer_certificate = Some(Source::Path(path.as_ref().to_path_buf()));
        self
    }

    pub fn issuer_certificate_bytes(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.issuer_certificate = Some(Source::Bytes(data.into()));
        self
    }

    /// Directory of static assets copied into every pass.
    pub fn template_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.template_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Parent directory for working directories (default: system temp).
    pub fn work_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.work_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Validate the builder configuration.
    ///
    /// Returns an error if the PKCS#12 container or the issuer certificate is
    /// not configured.
    pub fn validate(&self) -> Result<()> {
        if self.pkcs12.is_none() {
            return Err(Error::Config("Must specify a PKCS#12 container".into()));
        }
        if self.issuer_certificate.is_none() {
            return Err(Error::Config("Must specify an issuer certificate".into()));
        }
        Ok(())
    }

    /// Build, sign and package `document`.
    ///
    /// Returns the archive bytes; when `dest` is given the archive is also
    /// written there.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing stage, see [`Error::stage`].
    pub fn build(&self, document: &PassDocument, dest: Option<&Path>) -> Result<Vec<u8>> {
        self.validate()?;
        log::info!("Building pass ({} byte document)", document.as_bytes().len());

        let bundle = self.stage(document)?;
        let (credentials, issuer) = self.load_signing_material()?;
        let bundle = bundle.write_signature(&credentials, &issuer)?;
        drop(credentials);

        let archive = bundle.assemble(self.compression, dest)?;
        log_built(&archive, dest);
        Ok(archive)
    }

    /// Asynchronous [`PassSigner::build`].
    ///
    /// Staging plus manifest and credential extraction run concurrently on
    /// the blocking pool; signing and assembly follow as separate steps.
    /// Dropping the returned future lets the in-flight blocking step finish,
    /// skips every later step, and removes the working directory. No archive
    /// is written to `dest` once the future has been dropped.
    pub async fn build_async(
        &self,
        document: PassDocument,
        dest: Option<PathBuf>,
    ) -> Result<Vec<u8>> {
        self.validate()?;
        log::info!("Building pass ({} byte document)", document.as_bytes().len());

        let guard = CancelGuard::new();

        let stager = self.clone();
        let staging = tokio::task::spawn_blocking(move || stager.stage(&document));
        let loader = self.clone();
        let loading = tokio::task::spawn_blocking(move || loader.load_signing_material());

        // Both tasks are awaited so a staged bundle is dropped (and cleaned
        // up) before a credential error is returned.
        let (staged, loaded) = tokio::join!(join(staging), join(loading));
        let bundle = staged?;
        let (credentials, issuer) = loaded?;

        let token = guard.token();
        let signed = join(tokio::task::spawn_blocking(move || {
            sign_step(&token, bundle, credentials, &issuer)
        }))
        .await?;

        let token = guard.token();
        let compression = self.compression;
        let archive = join(tokio::task::spawn_blocking(move || {
            assemble_step(&token, signed, compression, dest.as_deref())
        }))
        .await?;

        log::info!("Built {} byte pass archive", archive.len());
        Ok(archive)
    }

    fn stage(&self, document: &PassDocument) -> Result<WorkingBundle<Manifested>> {
        WorkingBundle::stage(
            self.work_dir.as_deref(),
            self.template_dir.as_deref(),
            document,
        )?
        .write_manifest()
    }

    /// Decrypt the PKCS#12 container and load the issuer certificate.
    fn load_signing_material(&self) -> Result<(Credentials, X509)> {
        let pkcs12 = self
            .pkcs12
            .as_ref()
            .ok_or_else(|| Error::Config("No PKCS#12 container configured".into()))?;
        let issuer = self
            .issuer_certificate
            .as_ref()
            .ok_or_else(|| Error::Config("No issuer certificate configured".into()))?;

        let empty = SecretString::new(String::new());
        let password = self.password.as_ref().unwrap_or(&empty);
        let credentials = match pkcs12 {
            Source::Path(path) => Credentials::from_pkcs12_file(path, password)?,
            Source::Bytes(der) => Credentials::from_pkcs12(der, password)?,
        };
        log::debug!(
            "Loaded signing certificate for {}",
            credentials
                .pass_type_identifier()
                .as_deref()
                .unwrap_or("unknown pass type")
        );

        let issuer_data = issuer
            .read()
            .map_err(|e| Error::Config(format!("Failed to read issuer certificate: {e}")))?;
        let issuer = load_certificate(&issuer_data)?;

        Ok((credentials, issuer))
    }
}

impl Default for PassSigner {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks a build cancelled when the owning future is dropped.
struct CancelGuard(Arc<AtomicBool>);

impl CancelGuard {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    fn token(&self) -> CancelToken {
        CancelToken(Arc::clone(&self.0))
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Checked by blocking steps before they start.
struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    fn check(&self) -> Result<()> {
        if self.0.load(Ordering::Acquire) {
            log::debug!("Build cancelled, skipping remaining steps");
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

fn sign_step(
    token: &CancelToken,
    bundle: WorkingBundle<Manifested>,
    credentials: Credentials,
    issuer: &X509,
) -> Result<WorkingBundle<Signed>> {
    token.check()?;
    bundle.write_signature(&credentials, issuer)
}

fn assemble_step(
    token: &CancelToken,
    bundle: WorkingBundle<Signed>,
    compression: Compression,
    dest: Option<&Path>,
) -> Result<Vec<u8>> {
    token.check()?;
    bundle.assemble(compression, dest)
}

async fn join<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle.await.map_err(join_error)?
}

fn join_error(err: JoinError) -> Error {
    if err.is_panic() {
        std::panic::resume_unwind(err.into_panic());
    }
    Error::Cancelled
}

fn log_built(archive: &[u8], dest: Option<&Path>) {
    match dest {
        Some(dest) => log::info!("Wrote {} byte pass to {}", archive.len(), dest.display()),
        None => log::info!("Built {} byte pass archive", archive.len()),
    }
}
