// Installer backend request models

use serde::Serialize;

use super::state::{CertificateCreationMode, NetworkConfig, SecurityLevel};

/// Public-domain fields merged into the install / configure calls when internet is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domaine: Option<String>,
    #[serde(rename = "domainesAdditionnels", skip_serializing_if = "Vec::is_empty")]
    pub domaines_additionnels: Vec<String>,
    #[serde(rename = "modeTest", skip_serializing_if = "Option::is_none")]
    pub mode_test: Option<bool>,
    #[serde(rename = "modeCreation", skip_serializing_if = "Option::is_none")]
    pub mode_creation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloudns_subauthid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloudns_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dnssleep: Option<String>,
}

impl DomainParams {
    /// Empty when internet access is disabled.
    pub fn from_network(network: Option<&NetworkConfig>) -> Self {
        let Some(n) = network.filter(|n| n.internet_available) else {
            return Self::default();
        };
        let mut params = Self {
            domaine: Some(n.domain.clone()),
            domaines_additionnels: n.additional_domains.clone(),
            mode_test: Some(n.test_certificate),
            mode_creation: Some(n.creation_mode.as_wire().to_string()),
            ..Self::default()
        };
        if let CertificateCreationMode::DnsCloudns {
            subauthid,
            password,
            dns_sleep_secs,
        } = &n.creation_mode
        {
            params.cloudns_subauthid = Some(subauthid.clone());
            params.cloudns_password = Some(password.clone());
            params.dnssleep = Some(dns_sleep_secs.to_string());
        }
        params
    }
}

/// `POST /installation/api/installer` (protected install and intermediate renewal)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequest {
    pub idmg: String,
    pub securite: SecurityLevel,
    pub certificat_millegrille: String,
    pub certificat_intermediaire: String,
    #[serde(flatten)]
    pub domain: DomainParams,
}

/// `POST /installation/api/configurerIdmg` (private / public nodes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigureIdmgRequest {
    pub idmg: String,
    pub securite: SecurityLevel,
    #[serde(flatten)]
    pub domain: DomainParams,
}

/// `POST /installation/api/initialisation`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializationRequest {
    pub certificat_pem: String,
    pub chaine_pem: Vec<String>,
    pub securite: SecurityLevel,
}
