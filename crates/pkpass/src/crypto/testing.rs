//! Throwaway issuer and pass type certificates for tests.
//!
//! Built for this crate's unit tests and, with the `test-util` feature, for
//! integration tests. Everything here panics on failure.

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, KeyUsage};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder, X509};

/// A pass type certificate, its key, and the certificates above it.
pub struct TestPki {
    /// Self-signed root above the issuer, for chained PKIs only.
    pub root_cert: Option<X509>,
    /// Issuer (WWDR intermediate stand-in). Self-signed unless chained.
    pub issuer_cert: X509,
    pub leaf_cert: X509,
    pub leaf_key: PKey<Private>,
}

impl TestPki {
    pub const PASS_TYPE_IDENTIFIER: &'static str = "pass.com.example.test";
    pub const TEAM_IDENTIFIER: &'static str = "TEAM123456";

    pub fn builder() -> TestPkiBuilder {
        TestPkiBuilder::default()
    }

    /// Self-signed issuer and a pass type certificate below it.
    pub fn generate() -> Self {
        Self::builder().generate()
    }

    pub fn pkcs12(&self, password: &str) -> Vec<u8> {
        Pkcs12::builder()
            .name("Pass Type ID")
            .pkey(&self.leaf_key)
            .cert(&self.leaf_cert)
            .build2(password)
            .unwrap()
            .to_der()
            .unwrap()
    }

    pub fn pkcs12_without_key(&self, password: &str) -> Vec<u8> {
        Pkcs12::builder()
            .name("Pass Type ID")
            .cert(&self.leaf_cert)
            .build2(password)
            .unwrap()
            .to_der()
            .unwrap()
    }

    pub fn pkcs12_without_certificate(&self, password: &str) -> Vec<u8> {
        Pkcs12::builder()
            .name("Pass Type ID")
            .pkey(&self.leaf_key)
            .build2(password)
            .unwrap()
            .to_der()
            .unwrap()
    }
}

/// Options for [`TestPki`] generation.
#[derive(Debug, Clone, Default)]
pub struct TestPkiBuilder {
    chained: bool,
    code_signing: bool,
    team_identifier: Option<String>,
}

impl TestPkiBuilder {
    /// Sign the issuer with a separate self-signed root.
    pub fn chained(mut self) -> Self {
        self.chained = true;
        self
    }

    /// Restrict the leaf's extended key usage to code signing.
    pub fn code_signing(mut self) -> Self {
        self.code_signing = true;
        self
    }

    /// Leaf subject OU (default: [`TestPki::TEAM_IDENTIFIER`]).
    pub fn team_identifier(mut self, team: impl Into<String>) -> Self {
        self.team_identifier = Some(team.into());
        self
    }

    pub fn generate(self) -> TestPki {
        let issuer_key = generate_key();
        let issuer_name = name(&[("CN", "Test WWDR Intermediate")]);

        let (root_cert, issuer_cert) = if self.chained {
            let root_key = generate_key();
            let root_name = name(&[("CN", "Test Root CA")]);
            let root = build_cert(&root_name, &root_name, &root_key, &root_key, 1, Profile::Ca);
            let issuer = build_cert(&issuer_name, &root_name, &issuer_key, &root_key, 2, Profile::Ca);
            (Some(root), issuer)
        } else {
            let issuer =
                build_cert(&issuer_name, &issuer_name, &issuer_key, &issuer_key, 1, Profile::Ca);
            (None, issuer)
        };

        let team = self
            .team_identifier
            .as_deref()
            .unwrap_or(TestPki::TEAM_IDENTIFIER);
        let leaf_key = generate_key();
        let mut leaf_name = X509NameBuilder::new().unwrap();
        leaf_name
            .append_entry_by_nid(Nid::USERID, TestPki::PASS_TYPE_IDENTIFIER)
            .unwrap();
        leaf_name.append_entry_by_text("CN", "Pass Type ID: test").unwrap();
        leaf_name.append_entry_by_text("OU", team).unwrap();
        let leaf_name = leaf_name.build();

        let profile = if self.code_signing {
            Profile::CodeSigning
        } else {
            Profile::Leaf
        };
        let leaf_cert = build_cert(&leaf_name, &issuer_name, &leaf_key, &issuer_key, 3, profile);

        TestPki {
            root_cert,
            issuer_cert,
            leaf_cert,
            leaf_key,
        }
    }
}

pub fn generate_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Profile {
    Ca,
    Leaf,
    CodeSigning,
}

fn name(entries: &[(&str, &str)]) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    for (field, value) in entries {
        builder.append_entry_by_text(field, value).unwrap();
    }
    builder.build()
}

fn build_cert(
    subject: &X509Name,
    issuer: &X509Name,
    subject_key: &PKey<Private>,
    issuer_key: &PKey<Private>,
    serial: u32,
    profile: Profile,
) -> X509 {
    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(serial).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(subject).unwrap();
    builder.set_issuer_name(issuer).unwrap();
    builder.set_pubkey(subject_key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();

    let usage = if profile == Profile::Ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        KeyUsage::new().critical().key_cert_sign().crl_sign().build()
    } else {
        KeyUsage::new().critical().digital_signature().build()
    };
    builder.append_extension(usage.unwrap()).unwrap();

    if profile == Profile::CodeSigning {
        builder
            .append_extension(ExtendedKeyUsage::new().code_signing().build().unwrap())
            .unwrap();
    }

    builder.sign(issuer_key, MessageDigest::sha256()).unwrap();
    builder.build()
}
