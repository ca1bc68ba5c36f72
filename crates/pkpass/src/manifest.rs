//! Manifest generation for pass bundles.
//!
//! The manifest maps every file in the bundle directory (relative path, `/`
//! separated) to the lowercase hex SHA-1 of its contents. It is serialized as
//! `manifest.json` and is the only thing the detached signature covers, so it
//! must be built after all other content is staged and before `signature`
//! exists.

use crate::bundle::{MANIFEST_FILE, SIGNATURE_FILE};
use crate::digest::sha1_hex;
use crate::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Relative path to hex digest mapping for a bundle directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    /// Walk `dir` and hash every regular file below it.
    ///
    /// Directories are skipped and symbolic links are not followed. Hashing
    /// runs in parallel; the resulting map is ordered by path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] naming the path if the directory cannot be
    /// listed or a file cannot be read.
    pub fn scan(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                Error::Manifest { path, source }
            })?;

            if entry.file_type().is_file() {
                files.push(entry.into_path());
            } else if entry.file_type().is_symlink() {
                log::warn!("Skipping symlink in bundle: {}", entry.path().display());
            }
        }

        let hashed: Vec<(String, String)> = files
            .par_iter()
            .map(|path| {
                let data = fs::read(path).map_err(|source| Error::Manifest {
                    path: path.clone(),
                    source,
                })?;
                Ok((relative_key(dir, path)?, sha1_hex(&data)))
            })
            .collect::<Result<_>>()?;

        let entries: BTreeMap<String, String> = hashed.into_iter().collect();
        log::debug!("Manifest covers {} files in {}", entries.len(), dir.display());

        Ok(Self { entries })
    }

    /// Parse a `manifest.json` document.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::InvalidManifest(e.to_string()))
    }

    /// Serialize as pretty-printed JSON with sorted keys.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::InvalidManifest(e.to_string()))
    }

    /// Digest recorded for `path`, if present.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compare this manifest against the current contents of `dir`.
    ///
    /// Returns the paths that are missing, changed, or present but unlisted.
    /// `manifest.json` and `signature` at the bundle root are never expected
    /// to be listed. An empty result means the directory matches.
    pub fn verify(&self, dir: impl AsRef<Path>) -> Result<Vec<String>> {
        let current = Self::scan(dir)?;
        let mut mismatched = Vec::new();

        for (path, digest) in &self.entries {
            if current.get(path) != Some(digest.as_str()) {
                mismatched.push(path.clone());
            }
        }
        for path in current.entries.keys() {
            if path == MANIFEST_FILE || path == SIGNATURE_FILE {
                continue;
            }
            if !self.entries.contains_key(path) {
                mismatched.push(path.clone());
            }
        }

        mismatched.sort();
        Ok(mismatched)
    }

    /// Like [`Manifest::verify`], against unpacked archive contents.
    pub fn verify_files(&self, files: &BTreeMap<String, Vec<u8>>) -> Vec<String> {
        let mut mismatched: Vec<String> = self
            .entries
            .iter()
            .filter(|(path, digest)| {
                files.get(*path).map(|data| sha1_hex(data)).as_ref() != Some(*digest)
            })
            .map(|(path, _)| path.clone())
            .collect();

        mismatched.extend(
            files
                .keys()
                .filter(|path| *path != MANIFEST_FILE && *path != SIGNATURE_FILE)
                .filter(|path| !self.entries.contains_key(*path))
                .cloned(),
        );

        mismatched.sort();
        mismatched
    }
}

impl FromIterator<(String, String)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Archive-style key for `path` relative to `root`.
pub(crate) fn relative_key(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| Error::Manifest {
        path: PathBuf::from(path),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path is outside the bundle directory",
        ),
    })?;

    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn populate(dir: &Path) {
        fs::write(dir.join("pass.json"), br#"{"formatVersion":1}"#).unwrap();
        fs::write(dir.join("icon.png"), b"fake png data").unwrap();
        let lproj = dir.join("en.lproj");
        fs::create_dir(&lproj).unwrap();
        fs::write(lproj.join("pass.strings"), b"\"a\" = \"b\";").unwrap();
    }

    #[test]
    fn test_scan_lists_every_file() {
        let temp_dir = tempdir().unwrap();
        populate(temp_dir.path());

        let manifest = Manifest::scan(temp_dir.path()).unwrap();

        assert_eq!(manifest.len(), 3);
        assert_eq!(
            manifest.get("pass.json"),
            Some(sha1_hex(br#"{"formatVersion":1}"#).as_str())
        );
        assert_eq!(manifest.get("icon.png"), Some(sha1_hex(b"fake png data").as_str()));
        assert!(manifest.get("en.lproj/pass.strings").is_some());
        assert!(manifest.get("en.lproj").is_none());
    }

    #[test]
    fn test_scan_empty_directory() {
        let temp_dir = tempdir().unwrap();
        let manifest = Manifest::scan(temp_dir.path()).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_scan_missing_directory() {
        let temp_dir = tempdir().unwrap();
        let result = Manifest::scan(temp_dir.path().join("missing"));
        assert!(matches!(result, Err(Error::Manifest { .. })));
    }

    #[test]
    fn test_change_affects_only_that_entry() {
        let temp_dir = tempdir().unwrap();
        populate(temp_dir.path());
        let before = Manifest::scan(temp_dir.path()).unwrap();

        fs::write(temp_dir.path().join("icon.png"), b"fake png dat4").unwrap();
        let after = Manifest::scan(temp_dir.path()).unwrap();

        assert_ne!(before.get("icon.png"), after.get("icon.png"));
        assert_eq!(before.get("pass.json"), after.get("pass.json"));
        assert_eq!(
            before.get("en.lproj/pass.strings"),
            after.get("en.lproj/pass.strings")
        );
    }

    #[test]
    fn test_json_is_flat_object() {
        let temp_dir = tempdir().unwrap();
        populate(temp_dir.path());
        let manifest = Manifest::scan(temp_dir.path()).unwrap();

        let json = manifest.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), 3);
        assert!(object.values().all(|v| v.is_string()));
        assert_eq!(Manifest::from_json(&json).unwrap(), manifest);
    }

    #[test]
    fn test_malformed_json_is_manifest_error() {
        let inputs: [&[u8]; 3] = [b"not json", br#"{"pass.json": 1}"#, b"[]"];
        for data in inputs {
            let err = Manifest::from_json(data).unwrap_err();
            assert!(matches!(err, Error::InvalidManifest(_)));
            assert_eq!(err.stage(), Some(crate::Stage::Manifest));
        }
    }

    #[test]
    fn test_verify_reports_changes() {
        let temp_dir = tempdir().unwrap();
        populate(temp_dir.path());
        let manifest = Manifest::scan(temp_dir.path()).unwrap();

        fs::write(temp_dir.path().join(MANIFEST_FILE), manifest.to_json().unwrap()).unwrap();
        fs::write(temp_dir.path().join(SIGNATURE_FILE), b"sig").unwrap();
        assert!(manifest.verify(temp_dir.path()).unwrap().is_empty());

        fs::write(temp_dir.path().join("icon.png"), b"tampered").unwrap();
        fs::write(temp_dir.path().join("extra.png"), b"new").unwrap();
        assert_eq!(
            manifest.verify(temp_dir.path()).unwrap(),
            vec!["extra.png".to_string(), "icon.png".to_string()]
        );
    }

    #[test]
    fn test_verify_files() {
        let manifest: Manifest = [
            ("pass.json".to_string(), sha1_hex(b"{}")),
            ("icon.png".to_string(), sha1_hex(b"icon")),
        ]
        .into_iter()
        .collect();

        let mut files = BTreeMap::new();
        files.insert("pass.json".to_string(), b"{}".to_vec());
        files.insert("icon.png".to_string(), b"icon".to_vec());
        files.insert(MANIFEST_FILE.to_string(), b"{}".to_vec());
        files.insert(SIGNATURE_FILE.to_string(), b"sig".to_vec());
        assert!(manifest.verify_files(&files).is_empty());

        files.remove("icon.png");
        files.insert("logo.png".to_string(), b"logo".to_vec());
        assert_eq!(
            manifest.verify_files(&files),
            vec!["icon.png".to_string(), "logo.png".to_string()]
        );
    }
}
