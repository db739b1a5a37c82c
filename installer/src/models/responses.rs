// Installer backend response models

use serde::{Deserialize, Serialize};

/// Certificate field of `/info`: a single PEM or a chain (leaf first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PemChain {
    Single(String),
    Chain(Vec<String>),
}

impl PemChain {
    pub fn leaf(&self) -> Option<String> {
        let leaf = match self {
            PemChain::Single(pem) => pem.as_str(),
            PemChain::Chain(chain) => chain.first().map(String::as_str).unwrap_or_default(),
        };
        let leaf = leaf.trim();
        if leaf.is_empty() {
            None
        } else {
            Some(leaf.to_string())
        }
    }
}

/// Snapshot returned by `GET /installation/api/info`.
///
/// Every field is optional: a fresh node reports nothing but its instance id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub securite: Option<String>,
    #[serde(default)]
    pub idmg: Option<String>,
    #[serde(default)]
    pub domaine: Option<String>,
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub certificat: Option<PemChain>,
    #[serde(default)]
    pub fqdn_detecte: Option<String>,
    #[serde(default)]
    pub ip_detectee: Option<String>,
}

/// `GET /installation/api/etatCertificatWeb`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateStatus {
    #[serde(default)]
    pub pret: bool,
}
