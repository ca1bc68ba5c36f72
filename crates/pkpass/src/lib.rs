pub mod archive;
pub mod bundle;
pub mod config;
pub mod crypto;
pub mod digest;
pub mod error;
pub mod manifest;
pub mod pass;
pub mod pipeline;

pub use archive::{create_archive, read_archive, Compression};
pub use bundle::WorkingBundle;
pub use config::SignerConfig;
pub use crypto::Credentials;
pub use error::{CredentialError, Error, Stage};
pub use manifest::Manifest;
pub use pass::{Pass, PassDocument, PassStyle};
pub use pipeline::PassSigner;

pub type Result<T> = std::result::Result<T, Error>;
