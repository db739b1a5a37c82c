// Key/Certificate provider seam
//
// The wizard never touches crypto crates directly: everything goes through `KeyCertProvider`
// so the step logic can be tested with a stub and the implementation can be swapped.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PkiError {
    #[error("Unable to decrypt the private key: {0}")]
    Decrypt(String),
    #[error("Invalid certificate or key material: {0}")]
    Parse(String),
    #[error("The private key does not match the certificate")]
    KeyMismatch,
    #[error("Unable to sign the certificate request: {0}")]
    Sign(String),
    #[error("Unable to generate key material: {0}")]
    Generate(String),
    #[error("Unable to encrypt the private key: {0}")]
    Encrypt(String),
}

/// Root certificate + encrypted private key + the passphrase protecting it.
#[derive(Clone, PartialEq, Eq)]
pub struct RootMaterial {
    pub certificate_pem: String,
    pub encrypted_key_pem: String,
    pub passphrase: String,
}

impl fmt::Debug for RootMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootMaterial")
            .field("certificate_pem", &format!("{} bytes", self.certificate_pem.len()))
            .field(
                "encrypted_key_pem",
                &format!("{} bytes", self.encrypted_key_pem.len()),
            )
            .field("passphrase", &"***")
            .finish()
    }
}

/// Output of root generation. The idmg is derived from the new certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedRoot {
    pub idmg: String,
    pub material: RootMaterial,
}

/// A root whose private key has been decrypted and checked against its certificate.
#[derive(Clone, PartialEq, Eq)]
pub struct LoadedRoot {
    pub idmg: String,
    pub material: RootMaterial,
    key_pkcs8_der: Vec<u8>,
}

impl LoadedRoot {
    pub fn new(idmg: String, material: RootMaterial, key_pkcs8_der: Vec<u8>) -> Self {
        Self {
            idmg,
            material,
            key_pkcs8_der,
        }
    }

    /// Decrypted PKCS#8 DER of the root key. Never log this.
    pub fn key_der(&self) -> &[u8] {
        &self.key_pkcs8_der
    }
}

impl fmt::Debug for LoadedRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedRoot")
            .field("idmg", &self.idmg)
            .field("material", &self.material)
            .field("key_pkcs8_der", &"***")
            .finish()
    }
}

pub trait KeyCertProvider: Send + Sync {
    /// Create a new self-signed root, encrypt its key under a fresh passphrase, derive its idmg.
    fn generate_root(&self) -> Result<GeneratedRoot, PkiError>;

    /// Decrypt a root key and check it belongs to `certificate_pem`.
    fn load_root(
        &self,
        certificate_pem: &str,
        encrypted_key_pem: &str,
        passphrase: &str,
    ) -> Result<LoadedRoot, PkiError>;

    /// Issue an intermediate CA certificate for the instance CSR. Returns the PEM.
    fn sign_csr(&self, root: &LoadedRoot, csr_pem: &str) -> Result<String, PkiError>;

    fn derive_idmg(&self, certificate_pem: &str) -> Result<String, PkiError>;
}
