// Wizard step sequencer
//
// Pure functions only: the TUI owns the current `Step` and `InstallationState` and replaces both
// with whatever `advance` returns. Nothing here performs I/O.

use std::fmt;
use thiserror::Error;

use crate::models::responses::BackendInfo;
use crate::models::state::{InstallationState, NetworkConfig, SecurityLevel};
use crate::pki::{GeneratedRoot, LoadedRoot};
use crate::utils::validation::{is_valid_domain, validate_additional_domains, validate_idmg};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    SelectNodeType,
    LoadPrivateKey,
    GenerateRootKey,
    SetIdmg,
    ConfigureNetwork,
    InstallNode,
    Finalize,
    ShowNodeInfo,
    RenewIntermediate,
}

impl Step {
    pub const ALL: [Step; 9] = [
        Step::SelectNodeType,
        Step::LoadPrivateKey,
        Step::GenerateRootKey,
        Step::SetIdmg,
        Step::ConfigureNetwork,
        Step::InstallNode,
        Step::Finalize,
        Step::ShowNodeInfo,
        Step::RenewIntermediate,
    ];

    /// Stable identifier used on the command line (`--tui-smoke=<key>`).
    pub fn key(&self) -> &'static str {
        match self {
            Step::SelectNodeType => "node-type",
            Step::LoadPrivateKey => "load-key",
            Step::GenerateRootKey => "generate-key",
            Step::SetIdmg => "idmg",
            Step::ConfigureNetwork => "network",
            Step::InstallNode => "install",
            Step::Finalize => "finalize",
            Step::ShowNodeInfo => "node-info",
            Step::RenewIntermediate => "renew",
        }
    }

    pub fn from_key(key: &str) -> Option<Step> {
        let k = key.trim().to_ascii_lowercase();
        Step::ALL.into_iter().find(|s| s.key() == k)
    }

    pub fn title(&self) -> &'static str {
        match self {
            Step::SelectNodeType => "Instance Type",
            Step::LoadPrivateKey => "Load Root Key",
            Step::GenerateRootKey => "Generate Root Key",
            Step::SetIdmg => "Instance Identifier",
            Step::ConfigureNetwork => "Network Configuration",
            Step::InstallNode => "Installing",
            Step::Finalize => "Finalize Installation",
            Step::ShowNodeInfo => "Instance Information",
            Step::RenewIntermediate => "Renew Intermediate Certificate",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// First page to show for a backend snapshot.
pub fn compute_initial_step(info: &BackendInfo) -> Step {
    // An unrecognised level is treated as unset
    let Some(level) = info
        .securite
        .as_deref()
        .and_then(|s| s.trim().parse::<SecurityLevel>().ok())
    else {
        return Step::SelectNodeType;
    };
    if !present(&info.idmg) {
        return if level == SecurityLevel::Protected {
            Step::LoadPrivateKey
        } else {
            Step::SetIdmg
        };
    }
    if !present(&info.domaine) {
        return Step::ConfigureNetwork;
    }
    Step::ShowNodeInfo
}

/// Seed the wizard state from a backend snapshot.
pub fn state_from_info(info: &BackendInfo) -> InstallationState {
    let mut state = InstallationState::from_backend(info);
    if state
        .detected_fqdn
        .as_deref()
        .is_some_and(|fqdn| !is_valid_domain(fqdn))
    {
        state.detected_fqdn = None;
    }
    state
}

#[derive(Debug, Clone)]
pub enum Action {
    SelectNodeType(SecurityLevel),
    GenerateNewRoot,
    RootGenerated(GeneratedRoot),
    /// The backup file was written (or the operator recorded the material by hand).
    BackupSaved,
    BackupConfirmed,
    RootLoaded(LoadedRoot),
    IntermediateIssued(String),
    Next,
    IdmgEntered(String),
    NetworkConfigured(NetworkConfig),
    InstallCompleted,
    Finalized,
    RenewIntermediate,
    RenewalSubmitted,
    Back,
    Cancel,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::SelectNodeType(_) => "select node type",
            Action::GenerateNewRoot => "generate a new root",
            Action::RootGenerated(_) => "store the generated root",
            Action::BackupSaved => "save the backup",
            Action::BackupConfirmed => "confirm the backup",
            Action::RootLoaded(_) => "load the root key",
            Action::IntermediateIssued(_) => "store the intermediate certificate",
            Action::Next => "continue",
            Action::IdmgEntered(_) => "set the idmg",
            Action::NetworkConfigured(_) => "configure the network",
            Action::InstallCompleted => "complete the installation",
            Action::Finalized => "finalize",
            Action::RenewIntermediate => "renew the intermediate certificate",
            Action::RenewalSubmitted => "submit the renewal",
            Action::Back => "go back",
            Action::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub step: Step,
    pub state: InstallationState,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdvanceError {
    #[error("Cannot {action} from the '{step}' page")]
    NotAllowed { action: &'static str, step: Step },
    #[error("No root key has been generated yet")]
    NoRootMaterial,
    #[error("Save the root key backup before continuing")]
    BackupNotConfirmed,
    #[error("The root key does not belong to this instance (expected idmg {expected}, got {found})")]
    IdmgMismatch { expected: String, found: String },
    #[error("Load the root key first")]
    RootNotLoaded,
    #[error("The instance has no idmg; load or generate the root key first")]
    IdmgMissing,
    #[error("The intermediate certificate has not been issued yet")]
    IntermediateMissing,
    #[error("{0}")]
    InvalidIdmg(String),
    #[error("{0}")]
    InvalidDomain(String),
    #[error("Only protected instances hold a renewable intermediate certificate")]
    NotProtected,
}

fn not_allowed(step: Step, action: &Action) -> AdvanceError {
    AdvanceError::NotAllowed {
        action: action.name(),
        step,
    }
}

fn to(step: Step, state: InstallationState) -> Result<Transition, AdvanceError> {
    Ok(Transition { step, state })
}

/// Page reached with Back, if any.
pub fn previous_step(step: Step, state: &InstallationState) -> Option<Step> {
    match step {
        Step::SelectNodeType => None,
        Step::LoadPrivateKey => Some(Step::SelectNodeType),
        Step::GenerateRootKey => Some(Step::LoadPrivateKey),
        Step::SetIdmg => Some(Step::SelectNodeType),
        Step::ConfigureNetwork => Some(if state.is_protected() {
            Step::LoadPrivateKey
        } else {
            Step::SetIdmg
        }),
        // The backend has already been configured past these points
        Step::InstallNode | Step::Finalize | Step::ShowNodeInfo => None,
        Step::RenewIntermediate => Some(Step::ShowNodeInfo),
    }
}

/// The idmg a loaded root must match: the one the backend reported, else the one just generated.
fn known_idmg(state: &InstallationState) -> Option<&str> {
    state
        .idmg
        .as_deref()
        .or_else(|| state.generated_root.as_ref().map(|g| g.idmg.as_str()))
}

/// Compute the next page and state for a user action.
pub fn advance(
    step: Step,
    state: &InstallationState,
    action: Action,
) -> Result<Transition, AdvanceError> {
    let current = state.clone();

    match (step, action) {
        (Step::SelectNodeType, Action::SelectNodeType(level)) => {
            let next = if level == SecurityLevel::Protected {
                Step::LoadPrivateKey
            } else {
                Step::SetIdmg
            };
            to(next, current.with_security_level(level))
        }

        (Step::LoadPrivateKey, Action::GenerateNewRoot) => to(Step::GenerateRootKey, current),

        (Step::GenerateRootKey, Action::RootGenerated(generated)) => {
            to(Step::GenerateRootKey, current.with_generated_root(generated))
        }

        (Step::GenerateRootKey, Action::BackupSaved) => {
            if current.generated_root.is_none() {
                return Err(AdvanceError::NoRootMaterial);
            }
            to(Step::GenerateRootKey, current.with_backup_confirmed())
        }

        (Step::GenerateRootKey, Action::BackupConfirmed) => {
            if current.generated_root.is_none() {
                return Err(AdvanceError::NoRootMaterial);
            }
            if !current.backup_confirmed {
                return Err(AdvanceError::BackupNotConfirmed);
            }
            to(Step::LoadPrivateKey, current)
        }

        (s @ (Step::LoadPrivateKey | Step::RenewIntermediate), Action::RootLoaded(root)) => {
            if let Some(expected) = known_idmg(&current) {
                if expected != root.idmg {
                    return Err(AdvanceError::IdmgMismatch {
                        expected: expected.to_string(),
                        found: root.idmg.clone(),
                    });
                }
            }
            to(s, current.with_loaded_root(root))
        }

        (s @ (Step::LoadPrivateKey | Step::RenewIntermediate), Action::IntermediateIssued(pem)) => {
            if current.root.is_none() {
                return Err(AdvanceError::RootNotLoaded);
            }
            to(s, current.with_intermediate(pem))
        }

        (Step::LoadPrivateKey, Action::Next) => {
            if current.root.is_none() {
                return Err(AdvanceError::RootNotLoaded);
            }
            if current.idmg.is_none() {
                return Err(AdvanceError::IdmgMissing);
            }
            if current.intermediate_certificate_pem.is_none() {
                return Err(AdvanceError::IntermediateMissing);
            }
            to(Step::ConfigureNetwork, current)
        }

        (Step::SetIdmg, Action::IdmgEntered(idmg)) => {
            let idmg = idmg.trim().to_string();
            validate_idmg(&idmg).map_err(|e| AdvanceError::InvalidIdmg(e.to_string()))?;
            to(Step::ConfigureNetwork, current.with_idmg(idmg))
        }

        (Step::ConfigureNetwork, Action::NetworkConfigured(network)) => {
            if network.internet_available {
                if !is_valid_domain(&network.domain) {
                    return Err(AdvanceError::InvalidDomain(format!(
                        "'{}' is not a valid domain name",
                        network.domain.trim()
                    )));
                }
                validate_additional_domains(&network.additional_domains)
                    .map_err(|e| AdvanceError::InvalidDomain(e.to_string()))?;
            }
            if current.idmg.is_none() {
                return Err(AdvanceError::IdmgMissing);
            }
            if current.is_protected() && current.intermediate_certificate_pem.is_none() {
                // Reached directly from the backend snapshot; the key was never loaded
                return Err(AdvanceError::RootNotLoaded);
            }
            to(Step::InstallNode, current.with_network(network))
        }

        (Step::InstallNode, Action::InstallCompleted) => {
            let next = if current.is_protected() && !current.internet_enabled() {
                Step::Finalize
            } else {
                Step::ShowNodeInfo
            };
            to(next, current)
        }

        (Step::Finalize, Action::Finalized) => to(Step::ShowNodeInfo, current),

        (Step::ShowNodeInfo, Action::RenewIntermediate) => {
            if !current.is_protected() {
                return Err(AdvanceError::NotProtected);
            }
            let state = InstallationState {
                root: None,
                intermediate_certificate_pem: None,
                ..current
            };
            to(Step::RenewIntermediate, state)
        }

        (Step::RenewIntermediate, Action::RenewalSubmitted) => {
            if current.intermediate_certificate_pem.is_none() {
                return Err(AdvanceError::IntermediateMissing);
            }
            to(Step::ShowNodeInfo, current)
        }

        (s, Action::Back) => match previous_step(s, &current) {
            Some(prev) => to(prev, current),
            None => Err(not_allowed(s, &Action::Back)),
        },

        (Step::InstallNode, action @ Action::Cancel) => Err(not_allowed(Step::InstallNode, &action)),
        (_, Action::Cancel) => to(Step::SelectNodeType, current.reset_to_backend_facts()),

        (s, action) => Err(not_allowed(s, &action)),
    }
}

/// Values typed on the current page that have not been submitted yet.
#[derive(Debug, Clone, Default)]
pub struct PageFields<'a> {
    pub selected_level: Option<SecurityLevel>,
    pub idmg_input: &'a str,
    pub internet: bool,
    pub domain_input: &'a str,
    /// Comma separated, as typed.
    pub additional_domains_input: &'a str,
    pub dns_challenge: bool,
    pub cloudns_subauthid: &'a str,
    pub cloudns_password: &'a str,
    pub dns_sleep_input: &'a str,
    pub install_complete: bool,
}

/// Network page inputs that `NetworkConfigured` would accept.
fn network_fields_ok(fields: &PageFields<'_>) -> bool {
    if !fields.internet {
        return true;
    }
    if !is_valid_domain(fields.domain_input) {
        return false;
    }
    let additional = NetworkConfig::parse_additional_domains(fields.additional_domains_input);
    if validate_additional_domains(&additional).is_err() {
        return false;
    }
    if fields.dns_challenge {
        let sleep = fields.dns_sleep_input.trim();
        return !fields.cloudns_subauthid.trim().is_empty()
            && !fields.cloudns_password.trim().is_empty()
            && (sleep.is_empty() || sleep.parse::<u32>().is_ok());
    }
    true
}

/// Whether the Next button is enabled.
pub fn can_go_next(step: Step, state: &InstallationState, fields: &PageFields<'_>) -> bool {
    match step {
        Step::SelectNodeType => fields.selected_level.is_some(),
        Step::LoadPrivateKey => {
            state.root.is_some()
                && state.idmg.is_some()
                && state.intermediate_certificate_pem.is_some()
        }
        Step::GenerateRootKey => state.generated_root.is_some() && state.backup_confirmed,
        Step::SetIdmg => validate_idmg(fields.idmg_input).is_ok(),
        Step::ConfigureNetwork => {
            network_fields_ok(fields)
                && state.idmg.is_some()
                && (!state.is_protected() || state.intermediate_certificate_pem.is_some())
        }
        Step::InstallNode => fields.install_complete,
        Step::Finalize => state.intermediate_certificate_pem.is_some(),
        Step::ShowNodeInfo => false,
        Step::RenewIntermediate => {
            state.root.is_some() && state.intermediate_certificate_pem.is_some()
        }
    }
}

pub fn can_go_back(step: Step, state: &InstallationState) -> bool {
    previous_step(step, state).is_some()
}

pub fn can_cancel(step: Step) -> bool {
    !matches!(step, Step::InstallNode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::state::CertificateCreationMode;
    use crate::pki::RootMaterial;

    fn info(securite: Option<&str>, idmg: Option<&str>, domaine: Option<&str>) -> BackendInfo {
        BackendInfo {
            securite: securite.map(str::to_string),
            idmg: idmg.map(str::to_string),
            domaine: domaine.map(str::to_string),
            ..BackendInfo::default()
        }
    }

    fn sample_idmg(fill: u8) -> String {
        let mut bytes = vec![0x02, 0x10, 0x27, 0x00, 0x00, 0xe0, 0xe4, 0x02, 0x20];
        bytes.extend_from_slice(&[fill; 32]);
        format!("z{}", bs58::encode(bytes).into_string())
    }

    fn material() -> RootMaterial {
        RootMaterial {
            certificate_pem: "ROOT CERT".to_string(),
            encrypted_key_pem: "ENC KEY".to_string(),
            passphrase: "pass".to_string(),
        }
    }

    fn loaded(idmg: &str) -> LoadedRoot {
        LoadedRoot::new(idmg.to_string(), material(), vec![1, 2, 3])
    }

    fn online(domain: &str) -> NetworkConfig {
        NetworkConfig {
            internet_available: true,
            domain: domain.to_string(),
            additional_domains: Vec::new(),
            test_certificate: false,
            creation_mode: CertificateCreationMode::Webroot,
        }
    }

    #[test]
    fn initial_step_follows_backend_snapshot() {
        assert_eq!(compute_initial_step(&info(None, None, None)), Step::SelectNodeType);
        assert_eq!(
            compute_initial_step(&info(Some("3.protege"), None, None)),
            Step::LoadPrivateKey
        );
        assert_eq!(
            compute_initial_step(&info(Some("2.prive"), Some("abc"), None)),
            Step::ConfigureNetwork
        );
        assert_eq!(
            compute_initial_step(&info(Some("1.public"), None, None)),
            Step::SetIdmg
        );
        assert_eq!(
            compute_initial_step(&info(Some("2.prive"), Some("abc"), Some("a.example.com"))),
            Step::ShowNodeInfo
        );
        // Empty strings count as absent
        assert_eq!(compute_initial_step(&info(Some(""), None, None)), Step::SelectNodeType);
        assert_eq!(
            compute_initial_step(&info(Some("3.protege"), Some(" "), None)),
            Step::LoadPrivateKey
        );
    }

    #[test]
    fn unrecognised_security_level_starts_at_node_type() {
        let snapshot = info(Some("9.inconnu"), None, None);
        assert_eq!(compute_initial_step(&snapshot), Step::SelectNodeType);
        assert_eq!(state_from_info(&snapshot).security_level, None);

        let with_idmg = info(Some("4.secure"), Some(&sample_idmg(3)), None);
        assert_eq!(compute_initial_step(&with_idmg), Step::SelectNodeType);
    }

    #[test]
    fn initial_step_is_deterministic() {
        let snapshot = info(Some("3.protege"), Some("zAbc"), None);
        let first = compute_initial_step(&snapshot);
        for _ in 0..5 {
            assert_eq!(compute_initial_step(&snapshot.clone()), first);
        }
    }

    #[test]
    fn state_from_info_drops_invalid_detected_fqdn() {
        let mut snapshot = info(None, None, None);
        snapshot.fqdn_detecte = Some("localhost".to_string());
        snapshot.ip_detectee = Some("10.0.0.5".to_string());
        let state = state_from_info(&snapshot);
        assert_eq!(state.detected_fqdn, None);
        assert_eq!(state.detected_ip.as_deref(), Some("10.0.0.5"));

        snapshot.fqdn_detecte = Some("node.example.com".to_string());
        assert_eq!(
            state_from_info(&snapshot).detected_fqdn.as_deref(),
            Some("node.example.com")
        );
    }

    #[test]
    fn protected_path_requires_loaded_root_and_intermediate() {
        let state = InstallationState::default();
        let t = advance(
            Step::SelectNodeType,
            &state,
            Action::SelectNodeType(SecurityLevel::Protected),
        )
        .unwrap();
        assert_eq!(t.step, Step::LoadPrivateKey);

        // Next is refused until the root is loaded
        assert_eq!(
            advance(t.step, &t.state, Action::Next).unwrap_err(),
            AdvanceError::RootNotLoaded
        );

        let idmg = sample_idmg(1);
        let t = advance(t.step, &t.state, Action::RootLoaded(loaded(&idmg))).unwrap();
        assert_eq!(t.step, Step::LoadPrivateKey);
        assert_eq!(t.state.idmg.as_deref(), Some(idmg.as_str()));
        assert_eq!(
            advance(t.step, &t.state, Action::Next).unwrap_err(),
            AdvanceError::IntermediateMissing
        );

        let t = advance(t.step, &t.state, Action::IntermediateIssued("INTER".into())).unwrap();
        assert!(can_go_next(t.step, &t.state, &PageFields::default()));
        let t = advance(t.step, &t.state, Action::Next).unwrap();
        assert_eq!(t.step, Step::ConfigureNetwork);

        let t = advance(
            t.step,
            &t.state,
            Action::NetworkConfigured(NetworkConfig::offline()),
        )
        .unwrap();
        assert_eq!(t.step, Step::InstallNode);

        // Offline protected installs go through finalization
        let t = advance(t.step, &t.state, Action::InstallCompleted).unwrap();
        assert_eq!(t.step, Step::Finalize);
        let t = advance(t.step, &t.state, Action::Finalized).unwrap();
        assert_eq!(t.step, Step::ShowNodeInfo);
    }

    #[test]
    fn protected_without_idmg_cannot_reach_install() {
        let state = InstallationState::default().with_security_level(SecurityLevel::Protected);
        assert_eq!(
            advance(
                Step::ConfigureNetwork,
                &state,
                Action::NetworkConfigured(NetworkConfig::offline())
            )
            .unwrap_err(),
            AdvanceError::IdmgMissing
        );
        assert!(!can_go_next(
            Step::ConfigureNetwork,
            &state,
            &PageFields::default()
        ));

        // Known idmg but the key was never loaded in this session
        let state = state.with_idmg(sample_idmg(2));
        assert_eq!(
            advance(
                Step::ConfigureNetwork,
                &state,
                Action::NetworkConfigured(NetworkConfig::offline())
            )
            .unwrap_err(),
            AdvanceError::RootNotLoaded
        );
    }

    #[test]
    fn root_from_another_instance_is_rejected() {
        let state = InstallationState::default()
            .with_security_level(SecurityLevel::Protected)
            .with_idmg(sample_idmg(1));
        let err = advance(
            Step::LoadPrivateKey,
            &state,
            Action::RootLoaded(loaded(&sample_idmg(9))),
        )
        .unwrap_err();
        assert!(matches!(err, AdvanceError::IdmgMismatch { .. }));
    }

    #[test]
    fn generated_root_needs_backup_before_loading() {
        let state = InstallationState::default().with_security_level(SecurityLevel::Protected);
        let t = advance(Step::LoadPrivateKey, &state, Action::GenerateNewRoot).unwrap();
        assert_eq!(t.step, Step::GenerateRootKey);

        assert_eq!(
            advance(t.step, &t.state, Action::BackupConfirmed).unwrap_err(),
            AdvanceError::NoRootMaterial
        );

        let idmg = sample_idmg(3);
        let generated = GeneratedRoot {
            idmg: idmg.clone(),
            material: material(),
        };
        let t = advance(t.step, &t.state, Action::RootGenerated(generated)).unwrap();
        assert_eq!(
            advance(t.step, &t.state, Action::BackupConfirmed).unwrap_err(),
            AdvanceError::BackupNotConfirmed
        );
        assert!(!can_go_next(t.step, &t.state, &PageFields::default()));

        let t = advance(t.step, &t.state, Action::BackupSaved).unwrap();
        let t = advance(t.step, &t.state, Action::BackupConfirmed).unwrap();
        assert_eq!(t.step, Step::LoadPrivateKey);

        // Loading must use the root that was just generated
        assert!(advance(t.step, &t.state, Action::RootLoaded(loaded(&sample_idmg(4)))).is_err());
        assert!(advance(t.step, &t.state, Action::RootLoaded(loaded(&idmg))).is_ok());
    }

    #[test]
    fn private_path_validates_idmg_and_domain() {
        let t = advance(
            Step::SelectNodeType,
            &InstallationState::default(),
            Action::SelectNodeType(SecurityLevel::Private),
        )
        .unwrap();
        assert_eq!(t.step, Step::SetIdmg);

        assert!(matches!(
            advance(t.step, &t.state, Action::IdmgEntered("not-an-idmg".into())),
            Err(AdvanceError::InvalidIdmg(_))
        ));
        let t = advance(t.step, &t.state, Action::IdmgEntered(sample_idmg(5))).unwrap();
        assert_eq!(t.step, Step::ConfigureNetwork);

        assert!(matches!(
            advance(t.step, &t.state, Action::NetworkConfigured(online("bad_domain"))),
            Err(AdvanceError::InvalidDomain(_))
        ));
        let t = advance(
            t.step,
            &t.state,
            Action::NetworkConfigured(online("node.example.com")),
        )
        .unwrap();
        assert_eq!(t.step, Step::InstallNode);
        assert_eq!(t.state.domain.as_deref(), Some("node.example.com"));

        let t = advance(t.step, &t.state, Action::InstallCompleted).unwrap();
        assert_eq!(t.step, Step::ShowNodeInfo);
    }

    #[test]
    fn back_follows_previous_table() {
        let protected = InstallationState::default().with_security_level(SecurityLevel::Protected);
        let private = InstallationState::default().with_security_level(SecurityLevel::Private);

        assert_eq!(
            advance(Step::ConfigureNetwork, &protected, Action::Back).unwrap().step,
            Step::LoadPrivateKey
        );
        assert_eq!(
            advance(Step::ConfigureNetwork, &private, Action::Back).unwrap().step,
            Step::SetIdmg
        );
        assert_eq!(
            advance(Step::GenerateRootKey, &protected, Action::Back).unwrap().step,
            Step::LoadPrivateKey
        );
        for step in [Step::SelectNodeType, Step::InstallNode, Step::ShowNodeInfo] {
            assert!(advance(step, &protected, Action::Back).is_err(), "{}", step);
        }
    }

    #[test]
    fn cancel_resets_operator_input_but_keeps_backend_facts() {
        let state = InstallationState {
            instance_id: Some("abcd".to_string()),
            detected_ip: Some("10.0.0.5".to_string()),
            ..InstallationState::default()
        }
        .with_security_level(SecurityLevel::Private)
        .with_idmg(sample_idmg(6));

        let t = advance(Step::ConfigureNetwork, &state, Action::Cancel).unwrap();
        assert_eq!(t.step, Step::SelectNodeType);
        assert_eq!(t.state.security_level, None);
        assert_eq!(t.state.idmg, None);
        assert_eq!(t.state.instance_id.as_deref(), Some("abcd"));
        assert_eq!(t.state.detected_ip.as_deref(), Some("10.0.0.5"));

        assert!(advance(Step::InstallNode, &state, Action::Cancel).is_err());
        assert!(!can_cancel(Step::InstallNode));
    }

    #[test]
    fn renewal_is_protected_only() {
        let private = InstallationState::default().with_security_level(SecurityLevel::Private);
        assert_eq!(
            advance(Step::ShowNodeInfo, &private, Action::RenewIntermediate).unwrap_err(),
            AdvanceError::NotProtected
        );

        let idmg = sample_idmg(7);
        let protected = InstallationState::default()
            .with_security_level(SecurityLevel::Protected)
            .with_idmg(idmg.clone())
            .with_intermediate("OLD".into());
        let t = advance(Step::ShowNodeInfo, &protected, Action::RenewIntermediate).unwrap();
        assert_eq!(t.step, Step::RenewIntermediate);
        assert_eq!(t.state.intermediate_certificate_pem, None);

        assert_eq!(
            advance(t.step, &t.state, Action::RenewalSubmitted).unwrap_err(),
            AdvanceError::IntermediateMissing
        );
        let t = advance(t.step, &t.state, Action::RootLoaded(loaded(&idmg))).unwrap();
        let t = advance(t.step, &t.state, Action::IntermediateIssued("NEW".into())).unwrap();
        let t = advance(t.step, &t.state, Action::RenewalSubmitted).unwrap();
        assert_eq!(t.step, Step::ShowNodeInfo);
        assert_eq!(t.state.intermediate_certificate_pem.as_deref(), Some("NEW"));
    }

    #[test]
    fn unexpected_actions_are_rejected_without_changing_state() {
        let state = InstallationState::default();
        let err = advance(Step::SelectNodeType, &state, Action::Finalized).unwrap_err();
        assert!(matches!(err, AdvanceError::NotAllowed { step: Step::SelectNodeType, .. }));
        assert!(err.to_string().contains("node-type"));
    }

    #[test]
    fn next_enablement_per_page() {
        let state = InstallationState::default().with_idmg(sample_idmg(8));
        assert!(!can_go_next(Step::SelectNodeType, &state, &PageFields::default()));
        assert!(can_go_next(
            Step::SelectNodeType,
            &state,
            &PageFields {
                selected_level: Some(SecurityLevel::Public),
                ..PageFields::default()
            }
        ));
        assert!(can_go_next(
            Step::ConfigureNetwork,
            &state,
            &PageFields {
                internet: true,
                domain_input: "node.example.com",
                ..PageFields::default()
            }
        ));
        assert!(!can_go_next(
            Step::ConfigureNetwork,
            &state,
            &PageFields {
                internet: true,
                domain_input: "node",
                ..PageFields::default()
            }
        ));
        assert!(!can_go_next(Step::ShowNodeInfo, &state, &PageFields::default()));
    }

    #[test]
    fn network_next_needs_intermediate_for_resumed_protected_instance() {
        let snapshot = info(Some("3.protege"), Some(&sample_idmg(5)), None);
        assert_eq!(compute_initial_step(&snapshot), Step::ConfigureNetwork);
        let state = state_from_info(&snapshot);
        let fields = PageFields {
            internet: true,
            domain_input: "node.example.com",
            ..PageFields::default()
        };

        assert!(!can_go_next(Step::ConfigureNetwork, &state, &fields));
        let err = advance(
            Step::ConfigureNetwork,
            &state,
            Action::NetworkConfigured(online("node.example.com")),
        )
        .unwrap_err();
        assert!(matches!(err, AdvanceError::RootNotLoaded));

        let state = state.with_intermediate("INTERMEDIATE".to_string());
        assert!(can_go_next(Step::ConfigureNetwork, &state, &fields));
    }

    #[test]
    fn network_next_checks_additional_domains_and_dns_inputs() {
        let state = InstallationState::default().with_idmg(sample_idmg(6));
        let base = PageFields {
            internet: true,
            domain_input: "node.example.com",
            ..PageFields::default()
        };

        let additional = |raw: &'static str| PageFields {
            additional_domains_input: raw,
            ..base.clone()
        };
        assert!(can_go_next(
            Step::ConfigureNetwork,
            &state,
            &additional("a.example.com, b.example.com")
        ));
        assert!(!can_go_next(
            Step::ConfigureNetwork,
            &state,
            &additional("a.example.com, not a domain")
        ));

        let dns = PageFields {
            dns_challenge: true,
            cloudns_subauthid: "1234",
            cloudns_password: "secret",
            ..base.clone()
        };
        assert!(can_go_next(Step::ConfigureNetwork, &state, &dns));
        assert!(can_go_next(
            Step::ConfigureNetwork,
            &state,
            &PageFields { dns_sleep_input: "240", ..dns.clone() }
        ));
        assert!(!can_go_next(
            Step::ConfigureNetwork,
            &state,
            &PageFields { dns_sleep_input: "soon", ..dns.clone() }
        ));
        assert!(!can_go_next(
            Step::ConfigureNetwork,
            &state,
            &PageFields { cloudns_subauthid: " ", ..dns.clone() }
        ));
        assert!(!can_go_next(
            Step::ConfigureNetwork,
            &state,
            &PageFields { cloudns_password: "", ..dns.clone() }
        ));

        // Offline ignores every network input
        let offline = PageFields {
            internet: false,
            additional_domains_input: "not a domain",
            ..dns
        };
        assert!(can_go_next(Step::ConfigureNetwork, &state, &offline));
    }

    #[test]
    fn step_keys_roundtrip() {
        for step in Step::ALL {
            assert_eq!(Step::from_key(step.key()), Some(step));
        }
        assert_eq!(Step::from_key("NETWORK"), Some(Step::ConfigureNetwork));
        assert_eq!(Step::from_key("nope"), None);
    }
}
