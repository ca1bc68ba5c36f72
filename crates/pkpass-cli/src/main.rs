//! Command-line interface for the pkpass signing pipeline.
//!
//! Builds signed `.pkpass` archives from a `pass.json` document and a template
//! directory, and checks or lists existing archives.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use openssl::pkcs7::Pkcs7;
use openssl::x509::X509;
use pkpass::bundle::{MANIFEST_FILE, PASS_FILE, SIGNATURE_FILE};
use pkpass::crypto::{load_certificate, verify_signature};
use pkpass::{read_archive, Compression, Manifest, PassDocument, PassSigner, SignerConfig};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pkpass")]
#[command(about = "Build, sign and inspect wallet passes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and sign a pass archive
    Build(BuildArgs),
    /// Check an archive's manifest digests and signature
    Verify {
        /// Pass archive (.pkpass)
        archive: PathBuf,

        /// Trusted issuer certificate (PEM or DER), repeatable
        #[arg(short = 'i', long = "issuer", required = true)]
        issuers: Vec<PathBuf>,
    },
    /// List archive entries and manifest digests
    Inspect {
        /// Pass archive (.pkpass)
        archive: PathBuf,
    },
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Serialized pass document (pass.json)
    pass: PathBuf,

    /// Output archive
    #[arg(short, long)]
    output: PathBuf,

    /// TOML signer configuration; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Template directory with images and localizations
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// PKCS#12 file (.p12)
    #[arg(short = 'p', long)]
    pkcs12: Option<PathBuf>,

    /// Password for the PKCS#12 file
    #[arg(long, env = "PKPASS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Issuer (WWDR intermediate) certificate
    #[arg(short = 'i', long)]
    issuer: Option<PathBuf>,

    /// Parent directory for working directories
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// ZIP compression level (0-9, default: 0)
    /// 0 = store entries uncompressed
    #[arg(short = 'z', long)]
    zip_level: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build(args) => build(args).await,
        Commands::Verify { archive, issuers } => verify(&archive, &issuers),
        Commands::Inspect { archive } => inspect(&archive),
    }
}

async fn build(args: BuildArgs) -> Result<()> {
    let signer = configure_signer(&args)?;

    let data = fs::read(&args.pass)
        .with_context(|| format!("Failed to read {}", args.pass.display()))?;
    let document = PassDocument::from_json_bytes(data)?;

    let archive = signer
        .build_async(document, Some(args.output.clone()))
        .await
        .map_err(|e| match e.stage() {
            Some(stage) => anyhow::Error::new(e).context(format!("{stage} stage failed")),
            None => anyhow::Error::new(e),
        })?;

    println!("Built: {} ({} bytes)", args.output.display(), archive.len());
    Ok(())
}

fn configure_signer(args: &BuildArgs) -> Result<PassSigner> {
    let mut signer = match args.config {
        Some(ref path) => {
            log::debug!("Loading signer config from {}", path.display());
            let config = SignerConfig::load(path)?;
            PassSigner::from_config(&config)
        }
        None => PassSigner::new(),
    };

    if let Some(ref path) = args.pkcs12 {
        signer = signer.pkcs12(path);
    }
    if let Some(ref password) = args.password {
        signer = signer.password(password.as_str());
    }
    if let Some(ref path) = args.issuer {
        signer = signer.issuer_certificate(path);
    }
    if let Some(ref dir) = args.template {
        signer = signer.template_dir(dir);
    }
    if let Some(ref dir) = args.work_dir {
        signer = signer.work_dir(dir);
    }
    if let Some(level) = args.zip_level {
        signer = signer.compression(Compression::from_level(level));
    }

    signer.validate()?;
    Ok(signer)
}

fn verify(archive: &Path, issuers: &[PathBuf]) -> Result<()> {
    let files = read_pass_archive(archive)?;

    let manifest_bytes = files
        .get(MANIFEST_FILE)
        .with_context(|| format!("{MANIFEST_FILE} missing from archive"))?;
    let signature = files
        .get(SIGNATURE_FILE)
        .with_context(|| format!("{SIGNATURE_FILE} missing from archive"))?;

    let manifest = Manifest::from_json(manifest_bytes)?;
    let mismatched = manifest.verify_files(&files);
    if !mismatched.is_empty() {
        bail!("Manifest does not match archive: {}", mismatched.join(", "));
    }

    let trusted = issuers
        .iter()
        .map(|path| -> Result<X509> {
            let data =
                fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(load_certificate(&data)?)
        })
        .collect::<Result<Vec<_>>>()?;
    verify_signature(signature, manifest_bytes, &trusted)?;

    println!("OK: {} ({} files)", archive.display(), manifest.len());
    Ok(())
}

fn inspect(archive: &Path) -> Result<()> {
    let files = read_pass_archive(archive)?;

    println!("Entries:");
    for (name, data) in &files {
        println!("  {name:<40} {:>8} bytes", data.len());
    }

    if let Some(pass) = files.get(PASS_FILE) {
        let value: serde_json::Value =
            serde_json::from_slice(pass).context("pass.json is not valid JSON")?;
        for key in ["passTypeIdentifier", "teamIdentifier", "serialNumber"] {
            if let Some(v) = value.get(key).and_then(|v| v.as_str()) {
                println!("{key}: {v}");
            }
        }
    }

    if let Some(manifest) = files.get(MANIFEST_FILE) {
        let manifest = Manifest::from_json(manifest)?;
        println!("Manifest:");
        for (path, digest) in manifest.iter() {
            println!("  {digest}  {path}");
        }
    }

    match files.get(SIGNATURE_FILE) {
        Some(signature) => print_signers(signature)?,
        None => println!("Signature: missing"),
    }

    Ok(())
}

fn print_signers(signature: &[u8]) -> Result<()> {
    let pkcs7 = Pkcs7::from_der(signature).context("signature is not DER PKCS#7")?;
    let certs = pkcs7.signed().and_then(|signed| signed.certificates());

    println!("Signature certificates:");
    for cert in certs.into_iter().flatten() {
        let subject = cert
            .subject_name()
            .entries()
            .filter_map(|e| e.data().to_string().ok())
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {subject}");
    }
    Ok(())
}

fn read_pass_archive(path: &Path) -> Result<std::collections::BTreeMap<String, Vec<u8>>> {
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(read_archive(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_build_args() {
        let cli = Cli::try_parse_from([
            "pkpass", "build", "pass.json", "-o", "out.pkpass", "-p", "pass.p12", "-i", "wwdr.pem",
            "-z", "6",
        ])
        .unwrap();

        let Commands::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.pass, PathBuf::from("pass.json"));
        assert_eq!(args.pkcs12, Some(PathBuf::from("pass.p12")));
        assert_eq!(args.zip_level, Some(6));
        assert!(configure_signer(&args).is_ok());
    }

    #[test]
    fn test_build_requires_issuer() {
        let cli =
            Cli::try_parse_from(["pkpass", "build", "pass.json", "-o", "out.pkpass", "-p", "a.p12"])
                .unwrap();
        let Commands::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert!(configure_signer(&args).is_err());
    }

    #[test]
    fn test_verify_requires_issuer() {
        assert!(Cli::try_parse_from(["pkpass", "verify", "Event.pkpass"]).is_err());
    }
}
