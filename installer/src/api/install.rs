// Role-specific install calls
//
// Protected nodes receive their root and freshly signed intermediate through `/installer`.
// Private and public nodes only learn their idmg through `/configurerIdmg`.

use log::info;
use thiserror::Error;

use super::client::InstallerBackend;
use super::error::ApiError;
use crate::models::requests::{
    ConfigureIdmgRequest, DomainParams, InitializationRequest, InstallRequest,
};
use crate::models::state::{InstallationState, SecurityLevel};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("No instance type has been selected")]
    MissingSecurityLevel,
    #[error("The instance has no idmg yet")]
    MissingIdmg,
    #[error("The root certificate has not been loaded")]
    MissingRoot,
    #[error("No intermediate certificate has been issued")]
    MissingIntermediate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallPlan {
    Protected(InstallRequest),
    Private(ConfigureIdmgRequest),
    Public(ConfigureIdmgRequest),
}

fn root_certificate(state: &InstallationState) -> Option<String> {
    state
        .root
        .as_ref()
        .map(|r| r.material.certificate_pem.clone())
        .or_else(|| state.ca_certificate_pem.clone())
}

fn install_request(
    state: &InstallationState,
    securite: SecurityLevel,
) -> Result<InstallRequest, PlanError> {
    let idmg = state.idmg.clone().ok_or(PlanError::MissingIdmg)?;
    let certificat_millegrille = root_certificate(state).ok_or(PlanError::MissingRoot)?;
    let certificat_intermediaire = state
        .intermediate_certificate_pem
        .clone()
        .ok_or(PlanError::MissingIntermediate)?;
    Ok(InstallRequest {
        idmg,
        securite,
        certificat_millegrille,
        certificat_intermediaire,
        domain: DomainParams::from_network(state.network.as_ref()),
    })
}

impl InstallPlan {
    pub fn from_state(state: &InstallationState) -> Result<Self, PlanError> {
        let level = state
            .security_level
            .ok_or(PlanError::MissingSecurityLevel)?;
        match level {
            SecurityLevel::Protected => Ok(InstallPlan::Protected(install_request(
                state,
                SecurityLevel::Protected,
            )?)),
            SecurityLevel::Private | SecurityLevel::Public => {
                let req = ConfigureIdmgRequest {
                    idmg: state.idmg.clone().ok_or(PlanError::MissingIdmg)?,
                    securite: level,
                    domain: DomainParams::from_network(state.network.as_ref()),
                };
                Ok(if level == SecurityLevel::Private {
                    InstallPlan::Private(req)
                } else {
                    InstallPlan::Public(req)
                })
            }
        }
    }

    pub fn security_level(&self) -> SecurityLevel {
        match self {
            InstallPlan::Protected(_) => SecurityLevel::Protected,
            InstallPlan::Private(_) => SecurityLevel::Private,
            InstallPlan::Public(_) => SecurityLevel::Public,
        }
    }

    /// A public domain was configured, so a web certificate will be requested.
    pub fn has_domain(&self) -> bool {
        let domain = match self {
            InstallPlan::Protected(r) => &r.domain,
            InstallPlan::Private(r) | InstallPlan::Public(r) => &r.domain,
        };
        domain.domaine.is_some()
    }

    pub async fn execute(&self, backend: &dyn InstallerBackend) -> Result<(), ApiError> {
        info!(
            "[PHASE: install] [STEP: configure] Sending {} configuration to backend",
            self.security_level()
        );
        match self {
            InstallPlan::Protected(req) => backend.install(req).await,
            InstallPlan::Private(req) | InstallPlan::Public(req) => {
                backend.configure_idmg(req).await
            }
        }
    }
}

/// Re-submit the node configuration with a renewed intermediate.
pub fn renewal_request(state: &InstallationState) -> Result<InstallRequest, PlanError> {
    let securite = state.security_level.unwrap_or(SecurityLevel::Protected);
    let mut req = install_request(state, securite)?;
    // Renewal never changes the domain setup
    req.domain = DomainParams::default();
    Ok(req)
}

/// Final initialisation call for protected nodes installed without internet access.
pub fn initialization_request(
    state: &InstallationState,
) -> Result<InitializationRequest, PlanError> {
    let intermediate = state
        .intermediate_certificate_pem
        .clone()
        .ok_or(PlanError::MissingIntermediate)?;
    let root = root_certificate(state).ok_or(PlanError::MissingRoot)?;
    Ok(InitializationRequest {
        certificat_pem: intermediate.clone(),
        chaine_pem: vec![intermediate, root],
        securite: SecurityLevel::Protected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::state::NetworkConfig;
    use crate::models::state::CertificateCreationMode;

    fn protected_state() -> InstallationState {
        InstallationState {
            ca_certificate_pem: Some("ROOT".to_string()),
            ..InstallationState::default()
        }
        .with_security_level(SecurityLevel::Protected)
        .with_idmg("zAbc".to_string())
        .with_intermediate("INTER".to_string())
    }

    #[test]
    fn protected_plan_requires_idmg_and_intermediate() {
        let plan = InstallPlan::from_state(&protected_state()).unwrap();
        match &plan {
            InstallPlan::Protected(req) => {
                assert_eq!(req.certificat_millegrille, "ROOT");
                assert_eq!(req.certificat_intermediaire, "INTER");
            }
            other => panic!("unexpected plan {:?}", other),
        }
        assert!(!plan.has_domain());

        let mut no_idmg = protected_state();
        no_idmg.idmg = None;
        assert_eq!(InstallPlan::from_state(&no_idmg), Err(PlanError::MissingIdmg));

        let mut no_inter = protected_state();
        no_inter.intermediate_certificate_pem = None;
        assert_eq!(
            InstallPlan::from_state(&no_inter),
            Err(PlanError::MissingIntermediate)
        );
    }

    #[test]
    fn private_and_public_plans_use_configure_idmg() {
        let network = NetworkConfig {
            internet_available: true,
            domain: "node.example.com".to_string(),
            additional_domains: Vec::new(),
            test_certificate: false,
            creation_mode: CertificateCreationMode::Webroot,
        };
        let state = InstallationState::default()
            .with_security_level(SecurityLevel::Private)
            .with_idmg("zAbc".to_string())
            .with_network(network);
        let plan = InstallPlan::from_state(&state).unwrap();
        assert!(matches!(plan, InstallPlan::Private(_)));
        assert!(plan.has_domain());

        let state = InstallationState::default()
            .with_security_level(SecurityLevel::Public)
            .with_idmg("zAbc".to_string());
        assert!(matches!(
            InstallPlan::from_state(&state).unwrap(),
            InstallPlan::Public(_)
        ));

        assert_eq!(
            InstallPlan::from_state(&InstallationState::default()),
            Err(PlanError::MissingSecurityLevel)
        );
    }

    #[test]
    fn initialization_chain_is_intermediate_then_root() {
        let req = initialization_request(&protected_state()).unwrap();
        assert_eq!(req.certificat_pem, "INTER");
        assert_eq!(req.chaine_pem, vec!["INTER".to_string(), "ROOT".to_string()]);
    }

    #[test]
    fn renewal_defaults_to_protected() {
        let mut state = protected_state();
        state.security_level = None;
        assert_eq!(
            renewal_request(&state).unwrap().securite,
            SecurityLevel::Protected
        );
    }
}
