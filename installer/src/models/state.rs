// Installation state (in-memory)
//
// NOTE: This is NOT persisted. It is an immutable value: every wizard transition produces a new
// state through the reducer methods below, and only the UI thread holds the current one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::responses::BackendInfo;
use crate::pki::{GeneratedRoot, LoadedRoot};

/// Instance role. The wire form is the prefixed string (`"3.protege"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityLevel {
    #[serde(rename = "1.public")]
    Public,
    #[serde(rename = "2.prive")]
    Private,
    #[serde(rename = "3.protege")]
    Protected,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown security level '{0}'")]
pub struct UnknownSecurityLevel(pub String);

impl SecurityLevel {
    pub const ALL: [SecurityLevel; 3] = [
        SecurityLevel::Protected,
        SecurityLevel::Private,
        SecurityLevel::Public,
    ];

    pub fn as_wire(&self) -> &'static str {
        match self {
            SecurityLevel::Public => "1.public",
            SecurityLevel::Private => "2.prive",
            SecurityLevel::Protected => "3.protege",
        }
    }

    /// Short form used when the operator picks a role.
    pub fn as_short(&self) -> &'static str {
        match self {
            SecurityLevel::Public => "public",
            SecurityLevel::Private => "prive",
            SecurityLevel::Protected => "protege",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SecurityLevel::Public => "Public",
            SecurityLevel::Private => "Private",
            SecurityLevel::Protected => "Protected",
        }
    }
}

impl FromStr for SecurityLevel {
    type Err = UnknownSecurityLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.public" | "public" => Ok(SecurityLevel::Public),
            "2.prive" | "prive" => Ok(SecurityLevel::Private),
            "3.protege" | "protege" => Ok(SecurityLevel::Protected),
            other => Err(UnknownSecurityLevel(other.to_string())),
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// How the node obtains its public TLS certificate.
#[derive(Clone, PartialEq, Eq)]
pub enum CertificateCreationMode {
    /// HTTP challenge on port 80.
    Webroot,
    DnsCloudns {
        subauthid: String,
        password: String,
        dns_sleep_secs: u32,
    },
}

impl CertificateCreationMode {
    pub fn as_wire(&self) -> &'static str {
        match self {
            CertificateCreationMode::Webroot => "webroot",
            CertificateCreationMode::DnsCloudns { .. } => "dns_cloudns",
        }
    }
}

impl fmt::Debug for CertificateCreationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateCreationMode::Webroot => f.write_str("Webroot"),
            CertificateCreationMode::DnsCloudns {
                subauthid,
                dns_sleep_secs,
                ..
            } => f
                .debug_struct("DnsCloudns")
                .field("subauthid", subauthid)
                .field("password", &"***")
                .field("dns_sleep_secs", dns_sleep_secs)
                .finish(),
        }
    }
}

pub const DEFAULT_DNS_SLEEP_SECS: u32 = 240;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub internet_available: bool,
    pub domain: String,
    pub additional_domains: Vec<String>,
    /// Request a staging (test) certificate.
    pub test_certificate: bool,
    pub creation_mode: CertificateCreationMode,
}

impl NetworkConfig {
    pub fn offline() -> Self {
        Self {
            internet_available: false,
            domain: String::new(),
            additional_domains: Vec::new(),
            test_certificate: false,
            creation_mode: CertificateCreationMode::Webroot,
        }
    }

    /// Parse the comma separated extra domains field.
    pub fn parse_additional_domains(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallationState {
    pub idmg: Option<String>,
    pub security_level: Option<SecurityLevel>,
    pub domain: Option<String>,
    pub instance_id: Option<String>,
    pub instance_certificate_pem: Option<String>,
    pub ca_certificate_pem: Option<String>,
    pub detected_fqdn: Option<String>,
    pub detected_ip: Option<String>,

    /// Newly generated root awaiting backup confirmation.
    pub generated_root: Option<GeneratedRoot>,
    pub backup_confirmed: bool,
    /// Root whose key has been decrypted in this session.
    pub root: Option<LoadedRoot>,
    pub intermediate_certificate_pem: Option<String>,
    pub network: Option<NetworkConfig>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl InstallationState {
    /// Seed a state from the backend snapshot.
    pub fn from_backend(info: &BackendInfo) -> Self {
        Self {
            idmg: non_empty(&info.idmg),
            security_level: non_empty(&info.securite).and_then(|s| match s.parse() {
                Ok(level) => Some(level),
                Err(e) => {
                    log::warn!("[PHASE: initialization] [STEP: snapshot] {}", e);
                    None
                }
            }),
            domain: non_empty(&info.domaine),
            instance_id: non_empty(&info.instance_id),
            instance_certificate_pem: info.certificat.as_ref().and_then(|c| c.leaf()),
            ca_certificate_pem: non_empty(&info.ca),
            detected_fqdn: non_empty(&info.fqdn_detecte),
            detected_ip: non_empty(&info.ip_detectee),
            ..Self::default()
        }
    }

    pub fn is_protected(&self) -> bool {
        self.security_level == Some(SecurityLevel::Protected)
    }

    pub fn internet_enabled(&self) -> bool {
        self.network.as_ref().is_some_and(|n| n.internet_available)
    }

    pub fn with_security_level(self, level: SecurityLevel) -> Self {
        Self {
            security_level: Some(level),
            ..self
        }
    }

    pub fn with_generated_root(self, generated: GeneratedRoot) -> Self {
        Self {
            generated_root: Some(generated),
            backup_confirmed: false,
            ..self
        }
    }

    pub fn with_backup_confirmed(self) -> Self {
        Self {
            backup_confirmed: true,
            ..self
        }
    }

    /// Store a decrypted root; its idmg becomes the instance idmg.
    pub fn with_loaded_root(self, root: LoadedRoot) -> Self {
        Self {
            idmg: Some(root.idmg.clone()),
            ca_certificate_pem: Some(root.material.certificate_pem.clone()),
            root: Some(root),
            intermediate_certificate_pem: None,
            ..self
        }
    }

    pub fn with_intermediate(self, pem: String) -> Self {
        Self {
            intermediate_certificate_pem: Some(pem),
            ..self
        }
    }

    pub fn with_idmg(self, idmg: String) -> Self {
        Self {
            idmg: Some(idmg),
            ..self
        }
    }

    pub fn with_network(self, network: NetworkConfig) -> Self {
        let domain = if network.internet_available {
            Some(network.domain.clone())
        } else {
            self.domain.clone()
        };
        Self {
            domain,
            network: Some(network),
            ..self
        }
    }

    /// Drop everything the operator entered; keep what the backend reported.
    pub fn reset_to_backend_facts(self) -> Self {
        Self {
            instance_id: self.instance_id,
            instance_certificate_pem: self.instance_certificate_pem,
            detected_fqdn: self.detected_fqdn,
            detected_ip: self.detected_ip,
            ..Self::default()
        }
    }
}
