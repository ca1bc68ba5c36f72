//! File-based signer configuration.
//!
//! ```toml
//! pkcs12 = "certs/pass.p12"
//! password_env = "PKPASS_PASSWORD"
//! issuer_certificate = "certs/AppleWWDRCAG4.pem"
//! template_dir = "template"
//! work_dir = "/var/tmp/pkpass"
//! compression_level = 0
//! ```
//!
//! Relative paths are resolved against the directory holding the config file.
//! The PKCS#12 password itself is never stored in the file; `password_env`
//! names the environment variable it is read from.

use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default environment variable holding the PKCS#12 password.
pub const DEFAULT_PASSWORD_ENV: &str = "PKPASS_PASSWORD";

/// Maximum accepted config file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignerConfig {
    /// PKCS#12 bundle with the pass type certificate and key.
    pub pkcs12: PathBuf,
    /// Environment variable holding the PKCS#12 password.
    #[serde(default = "default_password_env")]
    pub password_env: String,
    /// Issuer (WWDR intermediate) certificate, PEM or DER.
    pub issuer_certificate: PathBuf,
    #[serde(default)]
    pub template_dir: Option<PathBuf>,
    /// Parent of the per-build working directories.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// 0 stores entries uncompressed, 1-9 deflates.
    #[serde(default)]
    pub compression_level: u32,
}

fn default_password_env() -> String {
    DEFAULT_PASSWORD_ENV.to_string()
}

impl SignerConfig {
    /// Load a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read, is too large, or
    /// does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(Error::Config(format!(
                "{}: config file exceeds size limit",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.resolve_relative(base))
    }

    /// Parse TOML text without resolving paths.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Password from the configured environment variable, if set.
    pub fn password(&self) -> Option<SecretString> {
        env::var(&self.password_env).ok().map(SecretString::new)
    }

    fn resolve_relative(mut self, base: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.pkcs12);
        resolve(&mut self.issuer_certificate);
        if let Some(dir) = self.template_dir.as_mut() {
            resolve(dir);
        }
        if let Some(dir) = self.work_dir.as_mut() {
            resolve(dir);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = SignerConfig::from_toml(
            r#"
            pkcs12 = "pass.p12"
            issuer_certificate = "wwdr.pem"
            "#,
        )
        .unwrap();

        assert_eq!(config.password_env, DEFAULT_PASSWORD_ENV);
        assert_eq!(config.compression_level, 0);
        assert!(config.template_dir.is_none());
        assert!(config.work_dir.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = SignerConfig::from_toml(
            r#"
            pkcs12 = "pass.p12"
            issuer_certificate = "wwdr.pem"
            password = "plaintext"
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pkpass.toml");
        fs::write(
            &path,
            r#"
            pkcs12 = "certs/pass.p12"
            issuer_certificate = "/etc/pkpass/wwdr.pem"
            template_dir = "template"
            compression_level = 6
            "#,
        )
        .unwrap();

        let config = SignerConfig::load(&path).unwrap();

        assert_eq!(config.pkcs12, dir.path().join("certs/pass.p12"));
        assert_eq!(config.issuer_certificate, PathBuf::from("/etc/pkpass/wwdr.pem"));
        assert_eq!(config.template_dir, Some(dir.path().join("template")));
        assert_eq!(config.compression_level, 6);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result = SignerConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_password_from_env() {
        let config = SignerConfig::from_toml(
            r#"
            pkcs12 = "pass.p12"
            issuer_certificate = "wwdr.pem"
            password_env = "PKPASS_CONFIG_TEST_PASSWORD"
            "#,
        )
        .unwrap();

        assert!(config.password().is_none());
        env::set_var("PKPASS_CONFIG_TEST_PASSWORD", "hunter2");
        assert_eq!(config.password().unwrap().expose_secret(), "hunter2");
        env::remove_var("PKPASS_CONFIG_TEST_PASSWORD");
    }
}
