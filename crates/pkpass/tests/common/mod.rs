//! Shared fixtures for integration tests: a throwaway issuer CA, a pass type
//! certificate signed by it, and pass documents.

#![allow(dead_code)]

use openssl::x509::X509;
use pkpass::crypto::testing::TestPki;
use pkpass::PassDocument;
use std::fs;
use std::path::{Path, PathBuf};

pub use pkpass::crypto::testing::generate_key;

pub const PASSWORD: &str = "integration";
pub const PASS_TYPE_IDENTIFIER: &str = TestPki::PASS_TYPE_IDENTIFIER;

pub struct Fixture {
    pub issuer_cert: X509,
    pub leaf_cert: X509,
    pub pkcs12: Vec<u8>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::from_pki(TestPki::generate())
    }

    pub fn from_pki(pki: TestPki) -> Self {
        Self {
            pkcs12: pki.pkcs12(PASSWORD),
            issuer_cert: pki.issuer_cert,
            leaf_cert: pki.leaf_cert,
        }
    }

    /// Write the PKCS#12 and issuer PEM into `dir`, returning their paths.
    pub fn write_to(&self, dir: &Path) -> (PathBuf, PathBuf) {
        let p12 = dir.join("pass.p12");
        let issuer = dir.join("wwdr.pem");
        fs::write(&p12, &self.pkcs12).unwrap();
        fs::write(&issuer, self.issuer_cert.to_pem().unwrap()).unwrap();
        (p12, issuer)
    }
}

pub fn minimal_document(serial: &str) -> PassDocument {
    let team = TestPki::TEAM_IDENTIFIER;
    let json = format!(
        r#"{{
  "formatVersion": 1,
  "passTypeIdentifier": "{PASS_TYPE_IDENTIFIER}",
  "serialNumber": "{serial}",
  "teamIdentifier": "{team}",
  "organizationName": "Example",
  "description": "Integration pass",
  "generic": {{ "primaryFields": [{{ "key": "name", "value": "{serial}" }}] }}
}}"#
    );
    PassDocument::from_json_bytes(json.into_bytes()).unwrap()
}

pub fn template(root: &Path) -> PathBuf {
    let dir = root.join("template");
    fs::create_dir_all(dir.join("de.lproj")).unwrap();
    fs::write(dir.join("icon.png"), b"\x89PNG icon").unwrap();
    fs::write(dir.join("icon@2x.png"), b"\x89PNG icon 2x").unwrap();
    fs::write(dir.join("de.lproj/pass.strings"), "\"name\" = \"Name\";").unwrap();
    dir
}

/// Entries in `dir`; working directories left behind show up here.
pub fn leftovers(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}
