//! Headless terminal wizard.
//!
//! Layout:
//! - Centered "installer window" frame
//! - Left banner panel with the logo and what is known about the instance so far
//! - Main content panel with one page per wizard step
//! - Bottom button row: [ Back ] [ Next ] [ Cancel ]
//! - Modal confirmations and error messages
//!
//! Page order and guards come from `crate::wizard`; this module only collects input, runs the
//! backend/PKI work on worker threads and renders.
//!
//! Note: Logging is file-only in TUI mode (stdout logging is disabled) to avoid corrupting the terminal UI.

use crate::api::install::{initialization_request, renewal_request, InstallPlan};
use crate::api::{HttpInstallerBackend, InstallerBackend};
use crate::config::{BackendSettings, InstallerConfig};
use crate::installation::{DomainPoller, PollPhase, ProgressEmitter, ProgressPayload};
use crate::models::responses::BackendInfo;
use crate::models::state::{
    CertificateCreationMode, InstallationState, NetworkConfig, SecurityLevel,
    DEFAULT_DNS_SLEEP_SECS,
};
use crate::pki::backup::{load_backup_file, write_backup, write_fragments, RootKeyBackup};
use crate::pki::idmg::parse_idmg;
use crate::pki::{GeneratedRoot, KeyCertProvider, LoadedRoot, RootAuthority};
use crate::security::crypto::sha256_hex;
use crate::utils::logging::mask_sensitive;
use crate::utils::validation::{validate_domain, validate_idmg};
use crate::wizard::{self, Action, PageFields, Step};
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use log::{info, warn};
use ratatui::backend::{CrosstermBackend, TestBackend};
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Margin, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::future::Future;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const APP_TITLE: &str = "Instance Installer";

const ASCII_LOGO: &str = r#"  _           _        _ _
 (_)_ __  ___| |_ __ _| | |
 | | '_ \(_-<|  _/ _` | | |
 |_|_| |_/__/ \__\__,_|_|_|"#;

const INSTALL_LOG_LINES: usize = 20;

const INSTALL_STEPS: [&str; 4] = [
    "Testing connection to the instance",
    "Configuring the instance",
    "Waiting for the TLS certificate",
    "Waiting for the server to restart",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ButtonFocus {
    Back,
    Next,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Modal {
    /// Discard entered values and return to the first page.
    ConfirmCancel,
    ConfirmQuit,
    Message { title: String, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FocusTarget {
    Field(usize),
    Button(ButtonFocus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputId {
    BackupPath,
    Passphrase,
    Idmg,
    Domain,
    AdditionalDomains,
    CloudnsSubauthid,
    CloudnsPassword,
    DnsSleep,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TextInput {
    value: String,
    /// Cursor position in characters.
    cursor: usize,
    masked: bool,
}

impl TextInput {
    fn new(value: impl Into<String>, masked: bool) -> Self {
        let v = value.into();
        Self {
            cursor: v.chars().count(),
            value: v,
            masked,
        }
    }

    fn display(&self) -> String {
        if self.masked {
            "*".repeat(self.value.chars().count())
        } else {
            self.value.clone()
        }
    }

    fn set(&mut self, value: impl Into<String>) {
        self.value = value.into();
        self.cursor = self.value.chars().count();
    }

    fn clear(&mut self) {
        self.set("");
    }

    fn byte_index(&self, char_idx: usize) -> usize {
        self.value
            .char_indices()
            .nth(char_idx)
            .map(|(i, _)| i)
            .unwrap_or(self.value.len())
    }

    fn handle_key(&mut self, code: KeyCode) -> bool {
        let len = self.value.chars().count();
        match code {
            KeyCode::Char(c) => {
                let idx = self.byte_index(self.cursor);
                self.value.insert(idx, c);
                self.cursor += 1;
                true
            }
            KeyCode::Backspace => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    let idx = self.byte_index(self.cursor);
                    self.value.remove(idx);
                }
                true
            }
            KeyCode::Delete => {
                if self.cursor < len {
                    let idx = self.byte_index(self.cursor);
                    self.value.remove(idx);
                }
                true
            }
            KeyCode::Left => {
                self.cursor = self.cursor.saturating_sub(1);
                true
            }
            KeyCode::Right => {
                self.cursor = (self.cursor + 1).min(len);
                true
            }
            KeyCode::Home => {
                self.cursor = 0;
                true
            }
            KeyCode::End => {
                self.cursor = len;
                true
            }
            _ => false,
        }
    }
}

enum UiMsg {
    InfoLoaded {
        /// First snapshot of the session: it decides the starting page.
        initial: bool,
        result: std::result::Result<BackendInfo, String>,
    },
    RootGenerated(std::result::Result<GeneratedRoot, String>),
    RootLoaded(std::result::Result<LoadedRoot, String>),
    IntermediateIssued(std::result::Result<String, String>),
    InstallProgress(ProgressPayload),
    InstallFinished(PollPhase),
    Finalized(std::result::Result<(), String>),
    RenewalSubmitted(std::result::Result<(), String>),
}

struct WizardState {
    step: Step,
    install: InstallationState,
    config: InstallerConfig,
    provider: Arc<dyn KeyCertProvider>,

    modal: Option<Modal>,
    focus: FocusTarget,
    quit: bool,
    /// Description of the in-flight background action, if any.
    busy: Option<String>,

    backend_info: Option<BackendInfo>,
    info_error: Option<String>,

    // Node type
    selected_level: Option<SecurityLevel>,

    // Root key
    backup_path: TextInput,
    passphrase: TextInput,
    backup_written: Option<PathBuf>,
    fragments_written: Option<PathBuf>,

    // idmg
    idmg_input: TextInput,

    // Network
    internet: bool,
    domain: TextInput,
    additional_domains: TextInput,
    test_certificate: bool,
    dns_challenge: bool,
    cloudns_subauthid: TextInput,
    cloudns_password: TextInput,
    dns_sleep: TextInput,

    // Install
    install_phase: Option<PollPhase>,
    /// Furthest happy-path phase reached by the current run.
    install_reached: usize,
    install_log: Vec<String>,
    install_cancel: Option<CancellationToken>,
    install_correlation_id: Option<String>,
}

impl WizardState {
    fn new(config: InstallerConfig) -> Self {
        let provider: Arc<dyn KeyCertProvider> =
            Arc::new(RootAuthority::with_kdf_iterations(config.pki.kdf_iterations));
        Self {
            step: Step::SelectNodeType,
            install: InstallationState::default(),
            config,
            provider,
            modal: None,
            focus: FocusTarget::Button(ButtonFocus::Next),
            quit: false,
            busy: None,
            backend_info: None,
            info_error: None,
            selected_level: None,
            backup_path: TextInput::new("", false),
            passphrase: TextInput::new("", true),
            backup_written: None,
            fragments_written: None,
            idmg_input: TextInput::new("", false),
            internet: false,
            domain: TextInput::new("", false),
            additional_domains: TextInput::new("", false),
            test_certificate: false,
            dns_challenge: false,
            cloudns_subauthid: TextInput::new("", false),
            cloudns_password: TextInput::new("", true),
            dns_sleep: TextInput::new(DEFAULT_DNS_SLEEP_SECS.to_string(), false),
            install_phase: None,
            install_reached: 0,
            install_log: Vec::new(),
            install_cancel: None,
            install_correlation_id: None,
        }
    }

    /// Forget everything typed so far (used when the operator starts over).
    fn reset_inputs(&mut self) {
        self.selected_level = None;
        self.backup_path.clear();
        self.passphrase.clear();
        self.backup_written = None;
        self.fragments_written = None;
        self.idmg_input.clear();
        self.internet = false;
        self.domain.clear();
        self.additional_domains.clear();
        self.test_certificate = false;
        self.dns_challenge = false;
        self.cloudns_subauthid.clear();
        self.cloudns_password.clear();
        self.dns_sleep.set(DEFAULT_DNS_SLEEP_SECS.to_string());
        self.install_phase = None;
        self.install_reached = 0;
        self.install_log.clear();
        self.install_correlation_id = None;
    }

    fn install_running(&self) -> bool {
        self.install_cancel.is_some()
    }

    fn page_fields(&self) -> PageFields<'_> {
        PageFields {
            selected_level: self.selected_level,
            idmg_input: self.idmg_input.value.trim(),
            internet: self.internet,
            domain_input: self.domain.value.trim(),
            additional_domains_input: &self.additional_domains.value,
            dns_challenge: self.dns_challenge,
            cloudns_subauthid: self.cloudns_subauthid.value.trim(),
            cloudns_password: self.cloudns_password.value.trim(),
            dns_sleep_input: self.dns_sleep.value.trim(),
            install_complete: matches!(self.install_phase, Some(PollPhase::Complete)),
        }
    }
}

fn page_inputs(state: &WizardState) -> Vec<InputId> {
    match state.step {
        Step::LoadPrivateKey | Step::RenewIntermediate if state.install.root.is_none() => {
            vec![InputId::BackupPath, InputId::Passphrase]
        }
        Step::SetIdmg => vec![InputId::Idmg],
        Step::ConfigureNetwork if state.internet => {
            let mut ids = vec![InputId::Domain, InputId::AdditionalDomains];
            if state.dns_challenge {
                ids.extend([
                    InputId::CloudnsSubauthid,
                    InputId::CloudnsPassword,
                    InputId::DnsSleep,
                ]);
            }
            ids
        }
        _ => Vec::new(),
    }
}

fn page_field_count(state: &WizardState) -> usize {
    page_inputs(state).len()
}

fn focused_input(state: &WizardState) -> Option<InputId> {
    match state.focus {
        FocusTarget::Field(i) => page_inputs(state).get(i).copied(),
        FocusTarget::Button(_) => None,
    }
}

fn input_mut(state: &mut WizardState, id: InputId) -> &mut TextInput {
    match id {
        InputId::BackupPath => &mut state.backup_path,
        InputId::Passphrase => &mut state.passphrase,
        InputId::Idmg => &mut state.idmg_input,
        InputId::Domain => &mut state.domain,
        InputId::AdditionalDomains => &mut state.additional_domains,
        InputId::CloudnsSubauthid => &mut state.cloudns_subauthid,
        InputId::CloudnsPassword => &mut state.cloudns_password,
        InputId::DnsSleep => &mut state.dns_sleep,
    }
}

fn focused_text_input_mut(state: &mut WizardState) -> Option<&mut TextInput> {
    let id = focused_input(state)?;
    Some(input_mut(state, id))
}

fn next_label(state: &WizardState) -> &'static str {
    match state.step {
        Step::LoadPrivateKey | Step::RenewIntermediate => {
            if state.install.root.is_none() {
                "Load key"
            } else if state.install.intermediate_certificate_pem.is_none() {
                "Sign"
            } else if state.step == Step::RenewIntermediate {
                "Submit"
            } else {
                "Next"
            }
        }
        Step::ConfigureNetwork => "Install",
        Step::InstallNode => match state.install_phase {
            Some(PollPhase::Error { .. }) | Some(PollPhase::Cancelled) => "Retry",
            _ => "Next",
        },
        Step::Finalize => "Finalize",
        Step::ShowNodeInfo => "Finish",
        _ => "Next",
    }
}

fn cancel_label(state: &WizardState) -> &'static str {
    match state.step {
        Step::InstallNode if state.install_running() => "Stop",
        Step::InstallNode | Step::ShowNodeInfo => "Quit",
        _ => "Cancel",
    }
}

fn can_go_back(state: &WizardState) -> bool {
    state.busy.is_none() && wizard::can_go_back(state.step, &state.install)
}

fn can_go_next(state: &WizardState) -> bool {
    if state.busy.is_some() {
        return false;
    }
    match state.step {
        Step::LoadPrivateKey | Step::RenewIntermediate if state.install.root.is_none() => {
            !state.backup_path.value.trim().is_empty() && !state.passphrase.value.is_empty()
        }
        // Sign / Submit once the key is loaded
        Step::LoadPrivateKey | Step::RenewIntermediate => true,
        Step::InstallNode => state
            .install_phase
            .as_ref()
            .is_some_and(PollPhase::is_terminal),
        Step::ShowNodeInfo => true,
        step => wizard::can_go_next(step, &state.install, &state.page_fields()),
    }
}

fn can_cancel(state: &WizardState) -> bool {
    match state.step {
        Step::InstallNode => true,
        Step::ShowNodeInfo => true,
        step => state.busy.is_none() && wizard::can_cancel(step),
    }
}

pub fn run(config: InstallerConfig) -> Result<()> {
    info!("[PHASE: tui] [STEP: start] Starting TUI wizard");

    let mut terminal = setup_terminal()?;
    let result = run_loop(&mut terminal, config);
    restore_terminal(&mut terminal)?;

    result
}

fn sample_idmg() -> String {
    let mut bytes = vec![0x02, 0x10, 0x27, 0x00, 0x00, 0xe0, 0xe4, 0x02, 0x20];
    bytes.extend_from_slice(&[0x5a; 32]);
    format!("z{}", bs58::encode(bytes).into_string())
}

fn new_smoke_wizard_state(config: &InstallerConfig, step: Step) -> WizardState {
    // Smoke-only: seeded state for deterministic page rendering in CI/tooling.
    let mut state = WizardState::new(config.clone());
    let idmg = sample_idmg();
    state.install = InstallationState {
        instance_id: Some("8f0c6b4e-smoke".to_string()),
        detected_fqdn: Some("node.example.com".to_string()),
        detected_ip: Some("192.168.2.10".to_string()),
        ..InstallationState::default()
    };
    state.backend_info = Some(BackendInfo::default());
    state.step = step;

    match step {
        Step::SelectNodeType => {
            state.selected_level = Some(SecurityLevel::Protected);
        }
        Step::LoadPrivateKey | Step::RenewIntermediate => {
            state.install = state
                .install
                .with_security_level(SecurityLevel::Protected)
                .with_idmg(idmg.clone());
            state
                .backup_path
                .set(format!("/root/backupCle_{}.json", idmg));
            state.passphrase.set("XXXX-XXXX-XXXX-XXXX-XXXX-XXXX");
        }
        Step::GenerateRootKey => {
            state.install = state
                .install
                .with_security_level(SecurityLevel::Protected)
                .with_generated_root(GeneratedRoot {
                    idmg: idmg.clone(),
                    material: crate::pki::RootMaterial {
                        certificate_pem: String::new(),
                        encrypted_key_pem: String::new(),
                        passphrase: "Ab3d-9xYz-Qr7t-Mn2p-Lk5j-Hg8f".to_string(),
                    },
                });
        }
        Step::SetIdmg => {
            state.install = state.install.with_security_level(SecurityLevel::Private);
            state.idmg_input.set(idmg.clone());
        }
        Step::ConfigureNetwork => {
            state.install = state
                .install
                .with_security_level(SecurityLevel::Public)
                .with_idmg(idmg.clone());
            state.internet = true;
            state.domain.set("node.example.com");
            state.additional_domains.set("www.example.com");
            state.dns_challenge = true;
            state.cloudns_subauthid.set("12345");
            state.cloudns_password.set("smoke-password");
        }
        Step::InstallNode => {
            state.install = state
                .install
                .with_security_level(SecurityLevel::Public)
                .with_idmg(idmg.clone());
            state.internet = true;
            state.install_phase = Some(PollPhase::AwaitingCertificate { attempt: 3 });
            state.install_reached = 2;
            state.install_correlation_id = Some("00000000-0000-4000-8000-000000000000".into());
            state.install_log = vec![
                PollPhase::TestingReachability.to_string(),
                PollPhase::ConfiguringDomain.to_string(),
                PollPhase::AwaitingCertificate { attempt: 3 }.to_string(),
            ];
        }
        Step::Finalize => {
            state.install = state
                .install
                .with_security_level(SecurityLevel::Protected)
                .with_idmg(idmg.clone())
                .with_intermediate("-----BEGIN CERTIFICATE-----".to_string());
        }
        Step::ShowNodeInfo => {
            state.install = state
                .install
                .with_security_level(SecurityLevel::Protected)
                .with_idmg(idmg.clone());
            state.install.domain = Some("node.example.com".to_string());
        }
    }

    prepare_page(&mut state);
    set_focused_button(&mut state, ButtonFocus::Next);
    state
}

/// Non-interactive smoke mode: render a single frame and exit.
/// Targets: any page key (`node-type`, `load-key`, `network`, ...) or `all`.
pub fn smoke(config: &InstallerConfig, target: &str) -> Result<()> {
    info!(
        "[PHASE: tui] [STEP: smoke] Rendering single-frame TUI smoke target={}",
        target
    );

    let t = target.trim().to_ascii_lowercase();
    let steps: Vec<Step> = if t == "all" {
        Step::ALL.to_vec()
    } else {
        match Step::from_key(&t) {
            Some(step) => vec![step],
            None => {
                let known: Vec<&str> = Step::ALL.iter().map(Step::key).collect();
                anyhow::bail!(
                    "Unknown smoke target '{}' (expected all or one of: {})",
                    target,
                    known.join(", ")
                );
            }
        }
    };

    for step in steps {
        let state = new_smoke_wizard_state(config, step);
        // In-memory backend: no raw mode / alternate screen.
        let backend = TestBackend::new(100, 30);
        let mut terminal = Terminal::new(backend)?;
        terminal.draw(|f| draw(f.size(), f, &state))?;
    }

    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    config: InstallerConfig,
) -> Result<()> {
    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();
    let mut state = WizardState::new(config);
    let (tx, rx) = mpsc::channel::<UiMsg>();

    start_info_refresh(&mut state, &tx, true);

    while !state.quit {
        drain_messages(&mut state, &rx, &tx);
        terminal.draw(|f| draw(f.size(), f, &state))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_millis(0));

        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) => handle_key(&mut state, key.code, &tx),
                Event::Resize(_, _) => {}
                _ => {}
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }

    if let Some(token) = state.install_cancel.take() {
        token.cancel();
    }
    info!("[PHASE: tui] [STEP: end] Wizard closed on '{}'", state.step);
    Ok(())
}

fn focused_button(state: &WizardState) -> ButtonFocus {
    match state.focus {
        FocusTarget::Button(b) => b,
        _ => ButtonFocus::Next,
    }
}

fn set_focused_button(state: &mut WizardState, b: ButtonFocus) {
    state.focus = FocusTarget::Button(b);
}

fn reset_focus(state: &mut WizardState) {
    if page_field_count(state) > 0 {
        state.focus = FocusTarget::Field(0);
    } else {
        set_focused_button(state, ButtonFocus::Next);
    }
}

/// Keep focus valid after a toggle changed the number of fields.
fn clamp_focus(state: &mut WizardState) {
    if let FocusTarget::Field(i) = state.focus {
        if i >= page_field_count(state) {
            reset_focus(state);
        }
    }
}

fn show_message(state: &mut WizardState, title: &str, body: impl Into<String>) {
    state.modal = Some(Modal::Message {
        title: title.to_string(),
        body: body.into(),
    });
}

fn drain_messages(state: &mut WizardState, rx: &mpsc::Receiver<UiMsg>, tx: &mpsc::Sender<UiMsg>) {
    while let Ok(msg) = rx.try_recv() {
        handle_message(state, msg, tx);
    }
}

fn handle_message(state: &mut WizardState, msg: UiMsg, tx: &mpsc::Sender<UiMsg>) {
    match msg {
        UiMsg::InfoLoaded { initial, result } => {
            state.busy = None;
            match result {
                Ok(info) => {
                    state.info_error = None;
                    if initial {
                        state.install = wizard::state_from_info(&info);
                        state.step = wizard::compute_initial_step(&info);
                        info!(
                            "[PHASE: tui] [STEP: resume] Backend snapshot resumes the wizard at '{}'",
                            state.step
                        );
                        prepare_page(state);
                    } else {
                        merge_backend_facts(&mut state.install, &info);
                    }
                    state.backend_info = Some(info);
                }
                Err(e) => {
                    warn!("[PHASE: tui] [STEP: info] Instance status unavailable: {}", e);
                    state.info_error = Some(e.clone());
                    show_message(
                        state,
                        "Instance not reachable",
                        format!("{}\n\nPress F5 to try again.", e),
                    );
                }
            }
        }
        UiMsg::RootGenerated(result) => {
            state.busy = None;
            match result {
                Ok(generated) => {
                    apply(state, Action::RootGenerated(generated), tx);
                }
                Err(e) => show_message(state, "Root key generation failed", e),
            }
        }
        UiMsg::RootLoaded(result) => {
            state.busy = None;
            match result {
                Ok(root) => {
                    if apply(state, Action::RootLoaded(root), tx) {
                        state.passphrase.clear();
                        reset_focus(state);
                        start_sign_intermediate(state, tx);
                    }
                }
                Err(e) => show_message(state, "Cannot load the root key", e),
            }
        }
        UiMsg::IntermediateIssued(result) => {
            state.busy = None;
            match result {
                Ok(pem) => {
                    apply(state, Action::IntermediateIssued(pem), tx);
                }
                Err(e) => show_message(state, "Intermediate certificate not issued", e),
            }
        }
        UiMsg::InstallProgress(p) => {
            if state.step == Step::InstallNode {
                record_progress(state, p);
            }
        }
        UiMsg::InstallFinished(phase) => {
            state.install_cancel = None;
            if state.step != Step::InstallNode {
                return;
            }
            if let PollPhase::Error { message, .. } = &phase {
                show_message(state, "Installation failed", message.clone());
            }
            state.install_phase = Some(phase);
            set_focused_button(state, ButtonFocus::Next);
        }
        UiMsg::Finalized(result) => {
            state.busy = None;
            match result {
                Ok(()) => {
                    apply(state, Action::Finalized, tx);
                }
                Err(e) => show_message(state, "Finalization failed", e),
            }
        }
        UiMsg::RenewalSubmitted(result) => {
            state.busy = None;
            match result {
                Ok(()) => {
                    apply(state, Action::RenewalSubmitted, tx);
                }
                Err(e) => show_message(state, "Renewal failed", e),
            }
        }
    }
}

fn record_progress(state: &mut WizardState, p: ProgressPayload) {
    if state.install_correlation_id.is_none() {
        state.install_correlation_id = Some(p.correlation_id.clone());
    }
    let line = p.phase.to_string();
    if state.install_log.last() != Some(&line) {
        state.install_log.push(line);
        if state.install_log.len() > INSTALL_LOG_LINES {
            let start = state.install_log.len() - INSTALL_LOG_LINES;
            state.install_log.drain(..start);
        }
    }
    let ordinal = p.phase.ordinal();
    if ordinal != usize::MAX {
        state.install_reached = ordinal;
    }
    state.install_phase = Some(p.phase);
}

/// Refresh what the backend reports without dropping what this session already holds.
fn merge_backend_facts(install: &mut InstallationState, info: &BackendInfo) {
    let fresh = wizard::state_from_info(info);
    install.instance_id = fresh.instance_id.or(install.instance_id.take());
    install.instance_certificate_pem = fresh
        .instance_certificate_pem
        .or(install.instance_certificate_pem.take());
    install.ca_certificate_pem = fresh.ca_certificate_pem.or(install.ca_certificate_pem.take());
    install.idmg = fresh.idmg.or(install.idmg.take());
    install.security_level = fresh.security_level.or(install.security_level.take());
    install.domain = fresh.domain.or(install.domain.take());
    install.detected_fqdn = fresh.detected_fqdn.or(install.detected_fqdn.take());
    install.detected_ip = fresh.detected_ip.or(install.detected_ip.take());
}

fn handle_key(state: &mut WizardState, code: KeyCode, tx: &mpsc::Sender<UiMsg>) {
    // Modal handling
    if let Some(modal) = state.modal.clone() {
        match modal {
            Modal::ConfirmCancel | Modal::ConfirmQuit => match code {
                KeyCode::Left | KeyCode::Right | KeyCode::Tab => {
                    let next = match focused_button(state) {
                        ButtonFocus::Cancel => ButtonFocus::Next,
                        _ => ButtonFocus::Cancel,
                    };
                    set_focused_button(state, next);
                }
                KeyCode::Enter => {
                    let confirm = focused_button(state) == ButtonFocus::Cancel;
                    state.modal = None;
                    set_focused_button(state, ButtonFocus::Next);
                    if confirm {
                        if modal == Modal::ConfirmQuit {
                            quit(state);
                        } else {
                            start_over(state, tx);
                        }
                    }
                }
                KeyCode::Esc => {
                    state.modal = None;
                    set_focused_button(state, ButtonFocus::Next);
                }
                _ => {}
            },
            Modal::Message { .. } => {
                if matches!(code, KeyCode::Enter | KeyCode::Esc) {
                    state.modal = None;
                }
            }
        }
        return;
    }

    // Global keys
    match code {
        KeyCode::Esc => {
            request_cancel(state);
            return;
        }
        KeyCode::F(10) => {
            open_confirm(state, Modal::ConfirmQuit);
            return;
        }
        KeyCode::F(5) => {
            refresh_info(state, tx);
            return;
        }
        _ => {}
    }

    // Text input handling (when a field is focused)
    if let Some(input) = focused_text_input_mut(state) {
        if input.handle_key(code) {
            return;
        }
    }

    if handle_page_key(state, code, tx) {
        return;
    }

    match code {
        KeyCode::Tab => {
            let fields = page_field_count(state);
            state.focus = match state.focus {
                FocusTarget::Button(ButtonFocus::Back) => FocusTarget::Button(ButtonFocus::Next),
                FocusTarget::Button(ButtonFocus::Next) => FocusTarget::Button(ButtonFocus::Cancel),
                FocusTarget::Button(ButtonFocus::Cancel) if fields > 0 => FocusTarget::Field(0),
                FocusTarget::Button(ButtonFocus::Cancel) => FocusTarget::Button(ButtonFocus::Back),
                FocusTarget::Field(i) if i + 1 < fields => FocusTarget::Field(i + 1),
                FocusTarget::Field(_) => FocusTarget::Button(ButtonFocus::Back),
            };
        }
        KeyCode::Enter => match focused_button(state) {
            ButtonFocus::Back => {
                if can_go_back(state) {
                    apply(state, Action::Back, tx);
                }
            }
            ButtonFocus::Next => {
                if can_go_next(state) {
                    on_next(state, tx);
                }
            }
            ButtonFocus::Cancel => {
                if can_cancel(state) {
                    request_cancel(state);
                }
            }
        },
        _ => {}
    }
}

/// Page-specific shortcuts. Returns true when the key was consumed.
fn handle_page_key(state: &mut WizardState, code: KeyCode, tx: &mpsc::Sender<UiMsg>) -> bool {
    match (state.step, code) {
        (Step::SelectNodeType, KeyCode::Up | KeyCode::Down) => {
            let levels = SecurityLevel::ALL;
            let len = levels.len();
            let current = state
                .selected_level
                .and_then(|l| levels.iter().position(|x| *x == l));
            let next = match (current, code) {
                (None, _) => 0,
                (Some(i), KeyCode::Up) => (i + len - 1) % len,
                (Some(i), _) => (i + 1) % len,
            };
            state.selected_level = Some(levels[next]);
            true
        }
        (Step::LoadPrivateKey, KeyCode::F(2)) => {
            if state.busy.is_none() {
                apply(state, Action::GenerateNewRoot, tx);
            }
            true
        }
        (Step::GenerateRootKey, KeyCode::F(2)) => {
            save_backup(state, tx);
            true
        }
        (Step::GenerateRootKey, KeyCode::F(3)) => {
            // Material recorded by hand
            apply(state, Action::BackupSaved, tx);
            true
        }
        (Step::GenerateRootKey, KeyCode::F(4)) => {
            save_fragments(state, tx);
            true
        }
        (Step::ConfigureNetwork, KeyCode::F(2)) => {
            state.internet = !state.internet;
            if state.internet && state.domain.value.trim().is_empty() {
                prefill_domain(state);
            }
            clamp_focus(state);
            true
        }
        (Step::ConfigureNetwork, KeyCode::F(3)) => {
            if state.internet {
                state.test_certificate = !state.test_certificate;
            }
            true
        }
        (Step::ConfigureNetwork, KeyCode::F(4)) => {
            if state.internet {
                state.dns_challenge = !state.dns_challenge;
                clamp_focus(state);
            }
            true
        }
        (Step::ShowNodeInfo, KeyCode::F(3)) => {
            if state.busy.is_none() {
                apply(state, Action::RenewIntermediate, tx);
            }
            true
        }
        _ => false,
    }
}

fn open_confirm(state: &mut WizardState, modal: Modal) {
    state.modal = Some(modal);
    set_focused_button(state, ButtonFocus::Next); // "No"
}

fn request_cancel(state: &mut WizardState) {
    match state.step {
        Step::InstallNode => {
            if let Some(token) = &state.install_cancel {
                if !token.is_cancelled() {
                    info!("[PHASE: tui] [STEP: cancel] Stopping the install run");
                    token.cancel();
                    state
                        .install_log
                        .push("Stopping the installation...".to_string());
                }
            } else {
                open_confirm(state, Modal::ConfirmQuit);
            }
        }
        Step::ShowNodeInfo => open_confirm(state, Modal::ConfirmQuit),
        step => {
            if state.busy.is_none() && wizard::can_cancel(step) {
                open_confirm(state, Modal::ConfirmCancel);
            }
        }
    }
}

fn quit(state: &mut WizardState) {
    if let Some(token) = &state.install_cancel {
        token.cancel();
    }
    state.quit = true;
}

fn start_over(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>) {
    if apply(state, Action::Cancel, tx) {
        info!("[PHASE: tui] [STEP: cancel] Operator input discarded");
        state.reset_inputs();
        prepare_page(state);
    }
}

fn refresh_info(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>) {
    if state.busy.is_some() {
        return;
    }
    let initial = state.backend_info.is_none() && state.step == Step::SelectNodeType;
    start_info_refresh(state, tx, initial);
}

/// Run `action` through the sequencer. Returns whether it was accepted.
fn apply(state: &mut WizardState, action: Action, tx: &mpsc::Sender<UiMsg>) -> bool {
    let from = state.step;
    match wizard::advance(from, &state.install, action) {
        Ok(t) => {
            state.install = t.state;
            if t.step != from {
                info!("[PHASE: tui] [STEP: navigate] {} -> {}", from, t.step);
                state.step = t.step;
                enter_step(state, tx);
            }
            true
        }
        Err(e) => {
            warn!("[PHASE: tui] [STEP: navigate] Refused on '{}': {}", from, e);
            show_message(state, "Cannot continue", e.to_string());
            false
        }
    }
}

fn on_next(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>) {
    match state.step {
        Step::SelectNodeType => {
            if let Some(level) = state.selected_level {
                apply(state, Action::SelectNodeType(level), tx);
            }
        }
        Step::LoadPrivateKey | Step::RenewIntermediate => {
            if state.install.root.is_none() {
                start_load_root(state, tx);
            } else if state.install.intermediate_certificate_pem.is_none() {
                start_sign_intermediate(state, tx);
            } else if state.step == Step::LoadPrivateKey {
                apply(state, Action::Next, tx);
            } else {
                start_renewal(state, tx);
            }
        }
        Step::GenerateRootKey => {
            apply(state, Action::BackupConfirmed, tx);
        }
        Step::SetIdmg => {
            let idmg = state.idmg_input.value.clone();
            apply(state, Action::IdmgEntered(idmg), tx);
        }
        Step::ConfigureNetwork => match build_network(state) {
            Ok(network) => {
                if let CertificateCreationMode::DnsCloudns { subauthid, .. } =
                    &network.creation_mode
                {
                    info!(
                        "[PHASE: tui] [STEP: network] DNS challenge with ClouDNS sub-auth id {}",
                        mask_sensitive(subauthid)
                    );
                }
                apply(state, Action::NetworkConfigured(network), tx);
            }
            Err(e) => show_message(state, "Network configuration", e),
        },
        Step::InstallNode => match state.install_phase {
            Some(PollPhase::Complete) => {
                apply(state, Action::InstallCompleted, tx);
            }
            Some(PollPhase::Error { .. }) | Some(PollPhase::Cancelled) => start_install(state, tx),
            _ => {}
        },
        Step::Finalize => start_finalize(state, tx),
        Step::ShowNodeInfo => quit(state),
    }
}

/// Fill defaults and place focus for the current page. No background work.
fn prepare_page(state: &mut WizardState) {
    match state.step {
        Step::SelectNodeType => {
            if state.selected_level.is_none() {
                state.selected_level = state.install.security_level;
            }
        }
        Step::LoadPrivateKey | Step::RenewIntermediate => {
            if state.backup_path.value.trim().is_empty() {
                let idmg = state
                    .install
                    .generated_root
                    .as_ref()
                    .map(|g| g.idmg.clone())
                    .or_else(|| state.install.idmg.clone());
                let path = state.backup_written.clone().or_else(|| {
                    idmg.map(|i| state.config.backup.directory.join(format!("backupCle_{}.json", i)))
                });
                if let Some(path) = path {
                    state.backup_path.set(path.display().to_string());
                }
            }
            if state.passphrase.value.is_empty() && state.install.root.is_none() {
                if let Some(generated) = &state.install.generated_root {
                    state.passphrase.set(generated.material.passphrase.clone());
                }
            }
        }
        Step::SetIdmg => {
            if state.idmg_input.value.trim().is_empty() {
                if let Some(idmg) = &state.install.idmg {
                    state.idmg_input.set(idmg.clone());
                }
            }
        }
        Step::ConfigureNetwork => {
            if state.domain.value.trim().is_empty() {
                prefill_domain(state);
            }
        }
        _ => {}
    }
    reset_focus(state);
}

fn prefill_domain(state: &mut WizardState) {
    if let Some(domain) = state
        .install
        .domain
        .clone()
        .or_else(|| state.install.detected_fqdn.clone())
    {
        state.domain.set(domain);
    }
}

/// Page entry: defaults plus the background work the page starts on its own.
fn enter_step(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>) {
    prepare_page(state);
    match state.step {
        Step::GenerateRootKey => {
            if state.install.generated_root.is_none() && state.busy.is_none() {
                start_generate(state, tx);
            }
        }
        Step::InstallNode => start_install(state, tx),
        Step::ShowNodeInfo => start_info_refresh(state, tx, false),
        _ => {}
    }
}

fn build_network(state: &WizardState) -> std::result::Result<NetworkConfig, String> {
    if !state.internet {
        return Ok(NetworkConfig::offline());
    }

    let creation_mode = if state.dns_challenge {
        let subauthid = state.cloudns_subauthid.value.trim().to_string();
        if subauthid.is_empty() {
            return Err("The ClouDNS sub-auth id is required for the DNS challenge".to_string());
        }
        let password = state.cloudns_password.value.trim().to_string();
        if password.is_empty() {
            return Err("The ClouDNS password is required for the DNS challenge".to_string());
        }
        let raw_sleep = state.dns_sleep.value.trim();
        let dns_sleep_secs = if raw_sleep.is_empty() {
            DEFAULT_DNS_SLEEP_SECS
        } else {
            raw_sleep
                .parse::<u32>()
                .map_err(|_| format!("DNS sleep '{}' is not a number of seconds", raw_sleep))?
        };
        CertificateCreationMode::DnsCloudns {
            subauthid,
            password,
            dns_sleep_secs,
        }
    } else {
        CertificateCreationMode::Webroot
    };

    Ok(NetworkConfig {
        internet_available: true,
        domain: state.domain.value.trim().to_string(),
        additional_domains: NetworkConfig::parse_additional_domains(
            &state.additional_domains.value,
        ),
        test_certificate: state.test_certificate,
        creation_mode,
    })
}

fn save_backup(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>) {
    let Some(generated) = state.install.generated_root.clone() else {
        return;
    };
    let backup = RootKeyBackup::from_material(&generated.idmg, &generated.material);
    match write_backup(&state.config.backup.directory, &backup) {
        Ok(path) => {
            state.backup_written = Some(path);
            apply(state, Action::BackupSaved, tx);
        }
        Err(e) => show_message(state, "Backup not written", format!("{:#}", e)),
    }
}

fn save_fragments(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>) {
    let Some(generated) = state.install.generated_root.clone() else {
        return;
    };
    let backup = RootKeyBackup::from_material(&generated.idmg, &generated.material);
    match write_fragments(
        &state.config.backup.directory,
        &backup,
        state.config.backup.fragment_size,
    ) {
        Ok(path) => {
            state.fragments_written = Some(path);
            apply(state, Action::BackupSaved, tx);
        }
        Err(e) => show_message(state, "Fragments not written", format!("{:#}", e)),
    }
}

/// Run `job` on a worker thread with its own current-thread runtime and HTTP client.
fn spawn_worker<E, J, Fut>(settings: BackendSettings, tx: &mpsc::Sender<UiMsg>, on_error: E, job: J)
where
    E: FnOnce(String) -> UiMsg + Send + 'static,
    J: FnOnce(HttpInstallerBackend) -> Fut + Send + 'static,
    Fut: Future<Output = UiMsg>,
{
    let tx = tx.clone();
    thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build();
        let msg = match rt {
            Ok(rt) => rt.block_on(async move {
                match HttpInstallerBackend::new(&settings) {
                    Ok(backend) => job(backend).await,
                    Err(e) => on_error(e.to_string()),
                }
            }),
            Err(e) => on_error(format!("Internal error starting worker: {}", e)),
        };
        let _ = tx.send(msg);
    });
}

fn start_info_refresh(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>, initial: bool) {
    state.busy = Some("Contacting the instance...".to_string());
    spawn_worker(
        state.config.backend.clone(),
        tx,
        move |e| UiMsg::InfoLoaded {
            initial,
            result: Err(e),
        },
        move |backend| async move {
            UiMsg::InfoLoaded {
                initial,
                result: backend.info().await.map_err(|e| e.to_string()),
            }
        },
    );
}

fn start_generate(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>) {
    state.busy = Some("Generating a new root key...".to_string());
    let provider = state.provider.clone();
    let tx = tx.clone();
    thread::spawn(move || {
        let result = provider.generate_root().map_err(|e| e.to_string());
        let _ = tx.send(UiMsg::RootGenerated(result));
    });
}

fn start_load_root(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>) {
    let path = PathBuf::from(state.backup_path.value.trim());
    let passphrase = state.passphrase.value.clone();
    let provider = state.provider.clone();
    state.busy = Some("Decrypting the root key...".to_string());
    info!("[PHASE: tui] [STEP: load-root] Loading root key from {:?}", path);

    let tx = tx.clone();
    thread::spawn(move || {
        let result = load_backup_file(&path)
            .map_err(|e| format!("{:#}", e))
            .and_then(|backup| {
                provider
                    .load_root(
                        &backup.racine.certificat,
                        &backup.racine.cle_chiffree,
                        &passphrase,
                    )
                    .map_err(|e| e.to_string())
            });
        let _ = tx.send(UiMsg::RootLoaded(result));
    });
}

fn start_sign_intermediate(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>) {
    let Some(root) = state.install.root.clone() else {
        return;
    };
    let provider = state.provider.clone();
    state.busy = Some("Signing the instance certificate request...".to_string());
    spawn_worker(
        state.config.backend.clone(),
        tx,
        |e| UiMsg::IntermediateIssued(Err(e)),
        move |backend| async move {
            let result = match backend.csr().await {
                Ok(csr) => provider.sign_csr(&root, &csr).map_err(|e| e.to_string()),
                Err(e) => Err(format!("Could not fetch the instance CSR: {}", e)),
            };
            UiMsg::IntermediateIssued(result)
        },
    );
}

fn start_install(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>) {
    let plan = match InstallPlan::from_state(&state.install) {
        Ok(plan) => plan,
        Err(e) => {
            state.install_phase = Some(PollPhase::Error {
                message: e.to_string(),
                stack: format!("{:?}", e),
            });
            show_message(state, "Installation failed", e.to_string());
            return;
        }
    };

    let cancel = CancellationToken::new();
    state.install_cancel = Some(cancel.clone());
    state.install_phase = Some(PollPhase::TestingReachability);
    state.install_reached = 0;
    state.install_log.clear();
    state.install_correlation_id = None;
    set_focused_button(state, ButtonFocus::Cancel);

    let progress_tx = tx.clone();
    let emit: ProgressEmitter = Arc::new(move |p: ProgressPayload| {
        let _ = progress_tx.send(UiMsg::InstallProgress(p));
    });
    let settings = state.config.poller.clone();

    spawn_worker(
        state.config.backend.clone(),
        tx,
        |e| {
            UiMsg::InstallFinished(PollPhase::Error {
                message: e.clone(),
                stack: e,
            })
        },
        move |backend| async move {
            let poller = DomainPoller::new(&backend, settings, cancel, emit);
            UiMsg::InstallFinished(poller.run(&plan).await)
        },
    );
}

fn start_finalize(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>) {
    let req = match initialization_request(&state.install) {
        Ok(req) => req,
        Err(e) => {
            show_message(state, "Finalization failed", e.to_string());
            return;
        }
    };
    state.busy = Some("Finalizing the instance...".to_string());
    spawn_worker(
        state.config.backend.clone(),
        tx,
        |e| UiMsg::Finalized(Err(e)),
        move |backend| async move {
            UiMsg::Finalized(backend.initialize(&req).await.map_err(|e| e.to_string()))
        },
    );
}

fn start_renewal(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>) {
    let req = match renewal_request(&state.install) {
        Ok(req) => req,
        Err(e) => {
            show_message(state, "Renewal failed", e.to_string());
            return;
        }
    };
    state.busy = Some("Sending the renewed intermediate certificate...".to_string());
    spawn_worker(
        state.config.backend.clone(),
        tx,
        |e| UiMsg::RenewalSubmitted(Err(e)),
        move |backend| async move {
            UiMsg::RenewalSubmitted(backend.install(&req).await.map_err(|e| e.to_string()))
        },
    );
}

/// SHA-256 of the first PEM block's DER, hex encoded.
fn pem_fingerprint(pem_text: &str) -> Option<String> {
    pem::parse(pem_text)
        .ok()
        .map(|p| sha256_hex(p.contents()))
}

fn idmg_expiry(idmg: &str) -> Option<String> {
    parse_idmg(idmg)
        .ok()
        .map(|info| info.expires_at.format("%Y-%m-%d").to_string())
}

fn or_none(value: Option<&str>) -> String {
    value.unwrap_or("(none)").to_string()
}

fn checkbox(on: bool) -> &'static str {
    if on {
        "[x]"
    } else {
        "[ ]"
    }
}

fn field_line(label: &str, input: &TextInput, focused: bool) -> Line<'static> {
    let marker = if focused { ">" } else { " " };
    Line::from(format!("{} {:<22} {}", marker, format!("{}:", label), input.display()))
}

fn error_line(text: impl Into<String>) -> Line<'static> {
    Line::from(Span::styled(text.into(), Style::default().fg(Color::Red)))
}

fn level_blurb(level: SecurityLevel) -> &'static str {
    match level {
        SecurityLevel::Protected => "holds the root key, issues its own intermediate",
        SecurityLevel::Private => "joins an existing idmg, private access",
        SecurityLevel::Public => "joins an existing idmg, publicly reachable",
    }
}

fn node_type_lines(state: &WizardState) -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from("Choose the security level of this instance:"),
        Line::from(""),
    ];
    for level in SecurityLevel::ALL {
        let selected = state.selected_level == Some(level);
        let prefix = if selected { ">" } else { " " };
        let mark = if selected { "(x)" } else { "( )" };
        lines.push(Line::from(format!(
            "{} {} {:<10} {}",
            prefix,
            mark,
            level.display_name(),
            level_blurb(level)
        )));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(format!(
        "Detected host: {} / {}",
        or_none(state.install.detected_fqdn.as_deref()),
        or_none(state.install.detected_ip.as_deref())
    )));
    if let Some(e) = &state.info_error {
        lines.push(Line::from(""));
        lines.push(error_line(format!("Instance not reachable: {}", e)));
    }
    lines.push(Line::from(""));
    lines.push(Line::from("Up/Down selects the type. F5 reloads the instance status."));
    lines
}

fn key_page_lines(state: &WizardState, renew: bool) -> Vec<Line<'static>> {
    let focused = focused_input(state);
    let mut lines = Vec::new();
    if renew {
        lines.push(Line::from(
            "Load the root key to sign a new intermediate certificate for this instance.",
        ));
    } else {
        lines.push(Line::from(
            "Load the root key backup. It signs the intermediate certificate of this instance.",
        ));
    }
    lines.push(Line::from(""));
    let expected = state
        .install
        .idmg
        .clone()
        .or_else(|| state.install.generated_root.as_ref().map(|g| g.idmg.clone()));
    lines.push(Line::from(format!(
        "idmg: {}",
        expected.unwrap_or_else(|| "(new instance)".to_string())
    )));
    lines.push(Line::from(""));

    if state.install.root.is_none() {
        lines.push(field_line(
            "Backup file",
            &state.backup_path,
            focused == Some(InputId::BackupPath),
        ));
        lines.push(field_line(
            "Passphrase",
            &state.passphrase,
            focused == Some(InputId::Passphrase),
        ));
        lines.push(Line::from(""));
    }

    lines.push(Line::from(format!(
        "{} Root key loaded",
        checkbox(state.install.root.is_some())
    )));
    lines.push(Line::from(format!(
        "{} Intermediate certificate issued",
        checkbox(state.install.intermediate_certificate_pem.is_some())
    )));
    lines.push(Line::from(""));
    lines.push(Line::from(
        "The backup is a backupCle_<idmg>.json file or a fragment text file.",
    ));
    if !renew {
        lines.push(Line::from("F2 generates a new root key."));
    }
    lines
}

fn generate_page_lines(state: &WizardState) -> Vec<Line<'static>> {
    let Some(generated) = &state.install.generated_root else {
        return vec![Line::from("Generating a new root key...")];
    };
    let mut lines = vec![
        Line::from("A new root key was generated. Record it before continuing."),
        Line::from(""),
        Line::from(format!("idmg:       {}", generated.idmg)),
        Line::from(format!("Passphrase: {}", generated.material.passphrase)),
        Line::from(""),
        Line::from(format!(
            "Backup folder: {}",
            state.config.backup.directory.display()
        )),
    ];
    match &state.backup_written {
        Some(path) => lines.push(Line::from(format!("[x] Backup file: {}", path.display()))),
        None => lines.push(Line::from("[ ] Backup file")),
    }
    match &state.fragments_written {
        Some(path) => lines.push(Line::from(format!("[x] Fragments: {}", path.display()))),
        None => lines.push(Line::from("[ ] Fragments")),
    }
    lines.push(Line::from(format!(
        "{} Backup confirmed",
        checkbox(state.install.backup_confirmed)
    )));
    lines.push(Line::from(""));
    lines.push(Line::from(
        "F2 writes the backup file. F4 writes printable fragments.",
    ));
    lines.push(Line::from("F3 confirms the material was recorded by hand."));
    lines.push(Line::from(
        "The passphrase is not written to any file. Keep it separately.",
    ));
    lines
}

fn idmg_page_lines(state: &WizardState) -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from("Enter the idmg of the instance group this instance joins."),
        Line::from(""),
        field_line(
            "idmg",
            &state.idmg_input,
            focused_input(state) == Some(InputId::Idmg),
        ),
        Line::from(""),
    ];
    let value = state.idmg_input.value.trim();
    if !value.is_empty() {
        match validate_idmg(value) {
            Ok(()) => {
                if let Some(expiry) = idmg_expiry(value) {
                    lines.push(Line::from(format!("Root certificate expires {}", expiry)));
                }
            }
            Err(e) => lines.push(error_line(e.to_string())),
        }
    }
    lines
}

fn network_page_lines(state: &WizardState) -> Vec<Line<'static>> {
    let focused = focused_input(state);
    let mut lines = vec![
        Line::from(format!("{} Internet access (F2)", checkbox(state.internet))),
        Line::from(""),
    ];

    if state.internet {
        lines.push(field_line(
            "Domain",
            &state.domain,
            focused == Some(InputId::Domain),
        ));
        lines.push(field_line(
            "Additional domains",
            &state.additional_domains,
            focused == Some(InputId::AdditionalDomains),
        ));
        let domain = state.domain.value.trim();
        if !domain.is_empty() {
            if let Err(e) = validate_domain(domain) {
                lines.push(error_line(format!("  {}", e)));
            }
        }
        lines.push(Line::from(""));
        lines.push(Line::from(format!(
            "{} Test certificate (F3)",
            checkbox(state.test_certificate)
        )));
        lines.push(Line::from(format!(
            "{} DNS challenge through ClouDNS (F4)",
            checkbox(state.dns_challenge)
        )));
        if state.dns_challenge {
            lines.push(field_line(
                "ClouDNS sub-auth id",
                &state.cloudns_subauthid,
                focused == Some(InputId::CloudnsSubauthid),
            ));
            lines.push(field_line(
                "ClouDNS password",
                &state.cloudns_password,
                focused == Some(InputId::CloudnsPassword),
            ));
            lines.push(field_line(
                "DNS sleep (seconds)",
                &state.dns_sleep,
                focused == Some(InputId::DnsSleep),
            ));
        } else {
            lines.push(Line::from("    HTTP challenge on port 80"));
        }
    } else {
        lines.push(Line::from(
            "The instance is installed without a public domain.",
        ));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(format!(
        "Detected host: {} / {}",
        or_none(state.install.detected_fqdn.as_deref()),
        or_none(state.install.detected_ip.as_deref())
    )));
    lines
}

fn install_page_lines(state: &WizardState) -> Vec<Line<'static>> {
    let failed = matches!(
        state.install_phase,
        Some(PollPhase::Error { .. }) | Some(PollPhase::Cancelled)
    );
    let complete = matches!(state.install_phase, Some(PollPhase::Complete));
    // Without a domain there is no certificate to wait for
    let offline = state
        .install
        .network
        .as_ref()
        .is_some_and(|n| !n.internet_available);
    let mut lines = Vec::new();

    for (i, label) in INSTALL_STEPS.iter().enumerate() {
        let mark = if offline && i >= 2 {
            "[-]"
        } else if complete || i < state.install_reached {
            "[x]"
        } else if i == state.install_reached {
            if failed {
                "[!]"
            } else {
                "[>]"
            }
        } else {
            "[ ]"
        };
        lines.push(Line::from(format!("{} {}", mark, label)));
    }

    lines.push(Line::from(""));
    if let Some(id) = &state.install_correlation_id {
        lines.push(Line::from(format!("Run: {}", id)));
    }
    for entry in state.install_log.iter().rev().take(6).rev() {
        lines.push(Line::from(format!("  {}", entry)));
    }
    lines.push(Line::from(""));

    match &state.install_phase {
        Some(PollPhase::Error { message, .. }) => {
            lines.push(error_line(message.clone()));
            lines.push(Line::from("Retry runs the installation again."));
        }
        Some(PollPhase::Cancelled) => {
            lines.push(Line::from("Stopped. Retry runs the installation again."));
        }
        Some(PollPhase::Complete) => lines.push(Line::from("Installation complete.")),
        _ if state.install_running() => lines.push(Line::from("Esc stops the installation.")),
        _ => {}
    }
    lines
}

fn finalize_page_lines(state: &WizardState) -> Vec<Line<'static>> {
    vec![
        Line::from("The instance was installed without internet access."),
        Line::from("Finalizing sends its certificate chain so it can start."),
        Line::from(""),
        Line::from(format!("idmg: {}", or_none(state.install.idmg.as_deref()))),
        Line::from(format!(
            "{} Intermediate certificate ready",
            checkbox(state.install.intermediate_certificate_pem.is_some())
        )),
    ]
}

fn node_info_lines(state: &WizardState) -> Vec<Line<'static>> {
    let install = &state.install;
    let idmg = install.idmg.as_deref();
    let mut lines = vec![
        Line::from(format!(
            "Instance id:     {}",
            or_none(install.instance_id.as_deref())
        )),
        Line::from(format!(
            "Security level:  {}",
            install
                .security_level
                .map(|l| l.display_name().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        )),
        Line::from(format!("idmg:            {}", or_none(idmg))),
        Line::from(format!(
            "idmg expires:    {}",
            or_none(idmg.and_then(idmg_expiry).as_deref())
        )),
        Line::from(format!(
            "Domain:          {}",
            or_none(install.domain.as_deref())
        )),
        Line::from(""),
        Line::from("Root certificate (SHA-256):"),
        Line::from(format!(
            "  {}",
            or_none(
                install
                    .ca_certificate_pem
                    .as_deref()
                    .and_then(pem_fingerprint)
                    .as_deref()
            )
        )),
        Line::from("Instance certificate (SHA-256):"),
        Line::from(format!(
            "  {}",
            or_none(
                install
                    .instance_certificate_pem
                    .as_deref()
                    .and_then(pem_fingerprint)
                    .as_deref()
            )
        )),
        Line::from(""),
        Line::from(format!(
            "Detected host:   {} / {}",
            or_none(install.detected_fqdn.as_deref()),
            or_none(install.detected_ip.as_deref())
        )),
        Line::from(""),
    ];
    if install.is_protected() {
        lines.push(Line::from("F3 renews the intermediate certificate."));
    }
    lines.push(Line::from("F5 refreshes. Finish closes the installer."));
    lines
}

fn page_lines(state: &WizardState) -> Vec<Line<'static>> {
    match state.step {
        Step::SelectNodeType => node_type_lines(state),
        Step::LoadPrivateKey => key_page_lines(state, false),
        Step::RenewIntermediate => key_page_lines(state, true),
        Step::GenerateRootKey => generate_page_lines(state),
        Step::SetIdmg => idmg_page_lines(state),
        Step::ConfigureNetwork => network_page_lines(state),
        Step::InstallNode => install_page_lines(state),
        Step::Finalize => finalize_page_lines(state),
        Step::ShowNodeInfo => node_info_lines(state),
    }
}

fn banner_lines(state: &WizardState) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = ASCII_LOGO
        .lines()
        .map(|l| Line::from(l.to_string()))
        .collect();
    lines.push(Line::from(""));
    lines.push(Line::from(format!("Page: {}", state.step.title())));
    if let Some(level) = state.install.security_level {
        lines.push(Line::from(format!("Type: {}", level.display_name())));
    }
    if let Some(idmg) = &state.install.idmg {
        let short: String = idmg.chars().take(16).collect();
        lines.push(Line::from(format!("idmg: {}...", short)));
    }
    if let Some(domain) = &state.install.domain {
        lines.push(Line::from(format!("Domain: {}", domain)));
    }
    lines.push(Line::from(""));
    lines.push(Line::from("Tab: focus  Enter: select"));
    lines.push(Line::from("Esc: cancel  F10: quit"));
    lines
}

fn draw(area: Rect, f: &mut ratatui::Frame<'_>, state: &WizardState) {
    let window_area = centered_window(area, 100, 30);

    // Outer frame
    let outer_block = Block::default().borders(Borders::ALL).title(APP_TITLE);
    f.render_widget(outer_block, window_area);

    // Inner layout: banner + content + buttons row
    let inner = window_area.inner(&Margin {
        vertical: 1,
        horizontal: 1,
    });
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)].as_ref())
        .split(inner);

    let body = rows[0];
    let buttons = rows[1];

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(34), Constraint::Min(0)].as_ref())
        .split(body);

    // Left banner
    let banner = Paragraph::new(Text::from(banner_lines(state)))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Left)
        .wrap(Wrap { trim: false });
    f.render_widget(banner, cols[0]);

    // Right content
    let mut lines = page_lines(state);
    if let Some(busy) = &state.busy {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            busy.clone(),
            Style::default().fg(Color::Yellow),
        )));
    }
    let content = Paragraph::new(Text::from(lines))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(state.step.title()),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(content, cols[1]);

    draw_buttons(f, buttons, state);

    match &state.modal {
        Some(Modal::ConfirmCancel) => draw_confirm_modal(
            f,
            window_area,
            state,
            "Start over?",
            "The values entered so far will be discarded.",
            "Yes, start over",
        ),
        Some(Modal::ConfirmQuit) => draw_confirm_modal(
            f,
            window_area,
            state,
            "Quit installer?",
            "The instance keeps the configuration it has already received.",
            "Yes, quit",
        ),
        Some(Modal::Message { title, body }) => {
            draw_message_modal(f, window_area, title, body);
        }
        None => {}
    }
}

fn centered_window(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width.saturating_sub(2)).max(60).min(area.width);
    let h = height.min(area.height.saturating_sub(2)).max(20).min(area.height);
    let x = area.x + (area.width.saturating_sub(w)) / 2;
    let y = area.y + (area.height.saturating_sub(h)) / 2;
    Rect {
        x,
        y,
        width: w,
        height: h,
    }
}

fn draw_buttons(f: &mut ratatui::Frame<'_>, area: Rect, state: &WizardState) {
    let back = button_text(
        "Back",
        matches!(state.focus, FocusTarget::Button(ButtonFocus::Back)),
        can_go_back(state),
    );
    let next = button_text(
        next_label(state),
        matches!(state.focus, FocusTarget::Button(ButtonFocus::Next)),
        can_go_next(state),
    );
    let cancel = button_text(
        cancel_label(state),
        matches!(state.focus, FocusTarget::Button(ButtonFocus::Cancel)),
        can_cancel(state),
    );

    let line = Line::from(vec![back, Span::raw(" "), next, Span::raw(" "), cancel]);

    let p = Paragraph::new(Text::from(line)).alignment(Alignment::Right);
    f.render_widget(p, area);
}

fn button_text(label: &str, focused: bool, enabled: bool) -> Span<'static> {
    let mut style = Style::default();
    if !enabled {
        style = style.fg(Color::DarkGray);
    }
    if focused && enabled {
        style = style.add_modifier(Modifier::REVERSED);
    }
    Span::styled(format!("[ {} ]", label), style)
}

fn modal_area(window_area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(window_area.width.saturating_sub(4)).max(40);
    let h = height.min(window_area.height.saturating_sub(4)).max(7);
    Rect {
        x: window_area.x + (window_area.width.saturating_sub(w)) / 2,
        y: window_area.y + (window_area.height.saturating_sub(h)) / 2,
        width: w,
        height: h,
    }
}

fn modal_buttons_area(area: Rect) -> Rect {
    Rect {
        x: area.x + 1,
        y: area.y + area.height - 2,
        width: area.width - 2,
        height: 1,
    }
}

fn draw_confirm_modal(
    f: &mut ratatui::Frame<'_>,
    window_area: Rect,
    state: &WizardState,
    title: &str,
    body: &str,
    yes_label: &str,
) {
    let area = modal_area(window_area, 60, 7);
    f.render_widget(ratatui::widgets::Clear, area);

    let block = Block::default().borders(Borders::ALL).title(title.to_string());
    let p = Paragraph::new(Text::from(vec![Line::from(body.to_string())]))
        .block(block)
        .wrap(Wrap { trim: false });
    f.render_widget(p, area);

    // Buttons: [Yes] [No] (primary on right)
    let yes_focused = focused_button(state) == ButtonFocus::Cancel;
    let no_focused = focused_button(state) == ButtonFocus::Next;
    let line = Line::from(vec![
        button_text(yes_label, yes_focused, true),
        Span::raw(" "),
        button_text("No", no_focused, true),
    ]);
    let p = Paragraph::new(Text::from(line)).alignment(Alignment::Right);
    f.render_widget(p, modal_buttons_area(area));
}

fn draw_message_modal(f: &mut ratatui::Frame<'_>, window_area: Rect, title: &str, body: &str) {
    let area = modal_area(window_area, 70, 10);
    f.render_widget(ratatui::widgets::Clear, area);

    let block = Block::default().borders(Borders::ALL).title(title.to_string());
    let p = Paragraph::new(Text::from(body.to_string()))
        .block(block)
        .wrap(Wrap { trim: false });
    f.render_widget(p, area);

    let ok = button_text("OK", true, true);
    let p = Paragraph::new(Text::from(Line::from(vec![ok]))).alignment(Alignment::Right);
    f.render_widget(p, modal_buttons_area(area));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> InstallerConfig {
        let mut config = InstallerConfig::default();
        config.pki.kdf_iterations = 10;
        config.backup.directory = dir.to_path_buf();
        config
    }

    fn test_state(dir: &std::path::Path) -> (WizardState, mpsc::Sender<UiMsg>, mpsc::Receiver<UiMsg>) {
        let (tx, rx) = mpsc::channel();
        (WizardState::new(test_config(dir)), tx, rx)
    }

    fn render(state: &WizardState) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|f| draw(f.size(), f, state)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    fn press(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>, keys: &[KeyCode]) {
        for key in keys {
            handle_key(state, *key, tx);
        }
    }

    fn type_text(state: &mut WizardState, tx: &mpsc::Sender<UiMsg>, text: &str) {
        for c in text.chars() {
            handle_key(state, KeyCode::Char(c), tx);
        }
    }

    #[test]
    fn smoke_renders_every_page() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        assert!(smoke(&config, "all").is_ok());
        for step in Step::ALL {
            assert!(smoke(&config, step.key()).is_ok(), "{}", step);
        }
        assert!(smoke(&config, "license").is_err());
    }

    #[test]
    fn logo_fits_the_banner() {
        for line in ASCII_LOGO.lines() {
            assert!(line.chars().count() <= 32, "{:?}", line);
        }
    }

    #[test]
    fn text_input_edits_by_character() {
        let mut input = TextInput::new("été", false);
        assert_eq!(input.cursor, 3);
        input.handle_key(KeyCode::Left);
        input.handle_key(KeyCode::Char('x'));
        assert_eq!(input.value, "étxé");
        input.handle_key(KeyCode::Home);
        input.handle_key(KeyCode::Delete);
        assert_eq!(input.value, "txé");
        input.handle_key(KeyCode::End);
        input.handle_key(KeyCode::Backspace);
        input.handle_key(KeyCode::Backspace);
        assert_eq!(input.value, "t");
        input.handle_key(KeyCode::Delete);
        assert_eq!(input.value, "t");
        assert!(!input.handle_key(KeyCode::F(2)));

        let secret = TextInput::new("pässe", true);
        assert_eq!(secret.display(), "*****");
    }

    #[test]
    fn node_type_selection_leads_to_key_page() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());

        // Nothing selected yet: Next is disabled
        press(&mut state, &tx, &[KeyCode::Enter]);
        assert_eq!(state.step, Step::SelectNodeType);

        press(&mut state, &tx, &[KeyCode::Down]);
        assert_eq!(state.selected_level, Some(SecurityLevel::Protected));
        press(&mut state, &tx, &[KeyCode::Up]);
        assert_eq!(state.selected_level, Some(SecurityLevel::Public));
        press(&mut state, &tx, &[KeyCode::Down]);
        assert!(render(&state).contains("(x) Protected"));

        press(&mut state, &tx, &[KeyCode::Enter]);
        assert_eq!(state.step, Step::LoadPrivateKey);
        assert_eq!(state.install.security_level, Some(SecurityLevel::Protected));
        assert_eq!(state.focus, FocusTarget::Field(0));
        assert_eq!(next_label(&state), "Load key");
        assert!(!can_go_next(&state));
    }

    #[test]
    fn private_flow_validates_idmg_before_network_page() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        state.install.detected_fqdn = Some("node.example.com".to_string());

        press(&mut state, &tx, &[KeyCode::Down, KeyCode::Down, KeyCode::Enter]);
        assert_eq!(state.step, Step::SetIdmg);

        type_text(&mut state, &tx, "not-an-idmg");
        press(&mut state, &tx, &[KeyCode::Enter]);
        assert_eq!(state.step, Step::SetIdmg);
        assert!(state.modal.is_none());

        state.idmg_input.clear();
        let idmg = sample_idmg();
        type_text(&mut state, &tx, &idmg);
        press(&mut state, &tx, &[KeyCode::Enter]);
        assert_eq!(state.step, Step::ConfigureNetwork);
        assert_eq!(state.install.idmg.as_deref(), Some(idmg.as_str()));
        assert_eq!(state.domain.value, "node.example.com");

        // Back returns to the idmg page with the value kept
        press(&mut state, &tx, &[KeyCode::Tab, KeyCode::Tab, KeyCode::Enter]);
        assert_eq!(state.step, Step::SetIdmg);
        assert_eq!(state.idmg_input.value, idmg);
    }

    #[test]
    fn tab_cycles_fields_then_buttons() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        state.install = state.install.with_security_level(SecurityLevel::Protected);
        state.step = Step::LoadPrivateKey;
        prepare_page(&mut state);

        let mut seen = vec![state.focus];
        for _ in 0..5 {
            handle_key(&mut state, KeyCode::Tab, &tx);
            seen.push(state.focus);
        }
        assert_eq!(
            seen,
            vec![
                FocusTarget::Field(0),
                FocusTarget::Field(1),
                FocusTarget::Button(ButtonFocus::Back),
                FocusTarget::Button(ButtonFocus::Next),
                FocusTarget::Button(ButtonFocus::Cancel),
                FocusTarget::Field(0),
            ]
        );
    }

    #[test]
    fn network_form_builds_creation_mode() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _tx, _rx) = test_state(dir.path());
        assert_eq!(build_network(&state).unwrap(), NetworkConfig::offline());

        state.internet = true;
        state.domain.set(" node.example.com ");
        state.additional_domains.set("a.example.com, ,b.example.com");
        state.test_certificate = true;
        let network = build_network(&state).unwrap();
        assert_eq!(network.domain, "node.example.com");
        assert_eq!(network.additional_domains, vec!["a.example.com", "b.example.com"]);
        assert_eq!(network.creation_mode, CertificateCreationMode::Webroot);
        assert!(network.test_certificate);

        state.dns_challenge = true;
        assert!(build_network(&state).is_err());
        state.cloudns_subauthid.set("1234");
        state.cloudns_password.set("secret");
        state.dns_sleep.set("");
        assert_eq!(
            build_network(&state).unwrap().creation_mode,
            CertificateCreationMode::DnsCloudns {
                subauthid: "1234".to_string(),
                password: "secret".to_string(),
                dns_sleep_secs: DEFAULT_DNS_SLEEP_SECS,
            }
        );
        state.dns_sleep.set("soon");
        assert!(build_network(&state).is_err());
    }

    #[test]
    fn network_next_disabled_until_form_builds() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _tx, _rx) = test_state(dir.path());
        state.install = state
            .install
            .clone()
            .with_security_level(SecurityLevel::Private)
            .with_idmg(sample_idmg());
        state.step = Step::ConfigureNetwork;
        state.internet = true;
        state.domain.set("node.example.com");
        assert!(can_go_next(&state));

        state.additional_domains.set("a.example.com, not a domain");
        assert!(!can_go_next(&state));
        state.additional_domains.set("a.example.com");
        assert!(can_go_next(&state));

        state.dns_challenge = true;
        assert!(!can_go_next(&state));
        state.cloudns_subauthid.set("1234");
        state.cloudns_password.set("secret");
        assert!(can_go_next(&state));
        state.dns_sleep.set("soon");
        assert!(!can_go_next(&state));
    }

    #[test]
    fn network_toggles_change_field_count() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        state.step = Step::ConfigureNetwork;
        prepare_page(&mut state);
        assert_eq!(page_field_count(&state), 0);

        press(&mut state, &tx, &[KeyCode::F(2)]);
        assert!(state.internet);
        assert_eq!(page_field_count(&state), 2);
        press(&mut state, &tx, &[KeyCode::F(4)]);
        assert_eq!(page_field_count(&state), 5);

        state.focus = FocusTarget::Field(4);
        press(&mut state, &tx, &[KeyCode::F(4)]);
        assert!(!state.dns_challenge);
        assert_eq!(state.focus, FocusTarget::Field(0));

        let screen = render(&state);
        assert!(screen.contains("[x] Internet access"));
    }

    #[test]
    fn esc_asks_before_starting_over() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        state.install.instance_id = Some("abcd".to_string());
        state.install = state.install.clone().with_security_level(SecurityLevel::Private);
        state.step = Step::SetIdmg;
        state.idmg_input.set("zSomething");

        press(&mut state, &tx, &[KeyCode::Esc]);
        assert_eq!(state.modal, Some(Modal::ConfirmCancel));
        // Default answer is "No"
        press(&mut state, &tx, &[KeyCode::Enter]);
        assert_eq!(state.modal, None);
        assert_eq!(state.step, Step::SetIdmg);

        press(&mut state, &tx, &[KeyCode::Esc, KeyCode::Left]);
        assert!(render(&state).contains("Start over?"));
        press(&mut state, &tx, &[KeyCode::Enter]);
        assert_eq!(state.step, Step::SelectNodeType);
        assert_eq!(state.install.security_level, None);
        assert_eq!(state.install.instance_id.as_deref(), Some("abcd"));
        assert!(state.idmg_input.value.is_empty());
        assert!(!state.quit);
    }

    #[test]
    fn generated_root_must_be_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        state.install = state.install.with_security_level(SecurityLevel::Protected);
        state.step = Step::GenerateRootKey;
        prepare_page(&mut state);

        let generated = state.provider.generate_root().unwrap();
        let passphrase = generated.material.passphrase.clone();
        handle_message(&mut state, UiMsg::RootGenerated(Ok(generated.clone())), &tx);
        assert_eq!(state.install.generated_root.as_ref(), Some(&generated));
        assert!(!can_go_next(&state));
        assert!(render(&state).contains(&passphrase));

        press(&mut state, &tx, &[KeyCode::F(2)]);
        let written = state.backup_written.clone().unwrap();
        assert!(written.exists());
        assert!(state.install.backup_confirmed);

        press(&mut state, &tx, &[KeyCode::F(4)]);
        let fragments = std::fs::read_to_string(state.fragments_written.clone().unwrap()).unwrap();
        assert!(!fragments.contains(&passphrase));

        press(&mut state, &tx, &[KeyCode::Enter]);
        assert_eq!(state.step, Step::LoadPrivateKey);
        assert_eq!(state.backup_path.value, written.display().to_string());
        assert_eq!(state.passphrase.value, passphrase);
        assert!(can_go_next(&state));
    }

    #[test]
    fn loaded_root_from_other_instance_shows_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        state.install = state
            .install
            .with_security_level(SecurityLevel::Protected)
            .with_idmg(sample_idmg());
        state.step = Step::LoadPrivateKey;

        let other = state.provider.generate_root().unwrap();
        let loaded = state
            .provider
            .load_root(
                &other.material.certificate_pem,
                &other.material.encrypted_key_pem,
                &other.material.passphrase,
            )
            .unwrap();
        handle_message(&mut state, UiMsg::RootLoaded(Ok(loaded)), &tx);
        assert!(state.install.root.is_none());
        assert!(matches!(state.modal, Some(Modal::Message { .. })));
        assert!(state.busy.is_none());
    }

    #[test]
    fn install_progress_and_failure_are_shown() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        state.step = Step::InstallNode;
        let token = CancellationToken::new();
        state.install_cancel = Some(token.clone());

        let progress = |phase: PollPhase| {
            UiMsg::InstallProgress(ProgressPayload {
                correlation_id: "run-1".to_string(),
                phase,
                elapsed_ms: 10,
            })
        };
        handle_message(&mut state, progress(PollPhase::TestingReachability), &tx);
        handle_message(&mut state, progress(PollPhase::ConfiguringDomain), &tx);
        handle_message(
            &mut state,
            progress(PollPhase::AwaitingCertificate { attempt: 4 }),
            &tx,
        );
        assert_eq!(state.install_correlation_id.as_deref(), Some("run-1"));
        assert_eq!(state.install_reached, 2);
        assert_eq!(state.install_log.len(), 3);
        assert!(!can_go_next(&state));
        assert_eq!(cancel_label(&state), "Stop");

        let failure = PollPhase::Error {
            message: "Timeout waiting for TLS certificate".to_string(),
            stack: "gave up after 25 polls".to_string(),
        };
        handle_message(&mut state, UiMsg::InstallFinished(failure), &tx);
        assert!(state.install_cancel.is_none());
        assert_eq!(next_label(&state), "Retry");
        assert!(can_go_next(&state));
        assert!(render(&state).contains("Installation failed"));
    }

    #[test]
    fn install_log_keeps_recent_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        state.step = Step::InstallNode;
        for attempt in 0..30 {
            handle_message(
                &mut state,
                UiMsg::InstallProgress(ProgressPayload {
                    correlation_id: "run".to_string(),
                    phase: PollPhase::AwaitingCertificate { attempt },
                    elapsed_ms: 0,
                }),
                &tx,
            );
        }
        assert_eq!(state.install_log.len(), INSTALL_LOG_LINES);
        assert!(state.install_log[INSTALL_LOG_LINES - 1].contains("check 30"));
    }

    #[test]
    fn progress_for_another_page_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        state.step = Step::ShowNodeInfo;
        handle_message(
            &mut state,
            UiMsg::InstallProgress(ProgressPayload {
                correlation_id: "late".to_string(),
                phase: PollPhase::Complete,
                elapsed_ms: 0,
            }),
            &tx,
        );
        assert!(state.install_phase.is_none());
        assert!(state.install_log.is_empty());
    }

    #[test]
    fn esc_on_install_page_stops_then_offers_quit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        state.step = Step::InstallNode;
        let token = CancellationToken::new();
        state.install_cancel = Some(token.clone());

        press(&mut state, &tx, &[KeyCode::Esc]);
        assert!(token.is_cancelled());
        assert!(state.modal.is_none());

        handle_message(&mut state, UiMsg::InstallFinished(PollPhase::Cancelled), &tx);
        assert_eq!(next_label(&state), "Retry");

        press(&mut state, &tx, &[KeyCode::Esc]);
        assert_eq!(state.modal, Some(Modal::ConfirmQuit));
        press(&mut state, &tx, &[KeyCode::Right, KeyCode::Enter]);
        assert!(state.quit);
    }

    #[test]
    fn initial_snapshot_picks_the_starting_page() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        state.busy = Some("Contacting the instance...".to_string());

        let info = BackendInfo {
            securite: Some("2.prive".to_string()),
            idmg: Some(sample_idmg()),
            fqdn_detecte: Some("node.example.com".to_string()),
            ..BackendInfo::default()
        };
        handle_message(
            &mut state,
            UiMsg::InfoLoaded {
                initial: true,
                result: Ok(info),
            },
            &tx,
        );
        assert_eq!(state.step, Step::ConfigureNetwork);
        assert_eq!(state.install.security_level, Some(SecurityLevel::Private));
        assert!(state.busy.is_none());
        assert!(state.backend_info.is_some());

        press(&mut state, &tx, &[KeyCode::F(2)]);
        assert_eq!(state.domain.value, "node.example.com");
    }

    #[test]
    fn unreachable_instance_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        handle_message(
            &mut state,
            UiMsg::InfoLoaded {
                initial: true,
                result: Err("connection refused".to_string()),
            },
            &tx,
        );
        assert_eq!(state.step, Step::SelectNodeType);
        assert_eq!(state.info_error.as_deref(), Some("connection refused"));
        assert!(render(&state).contains("Instance not reachable"));

        // Dismiss
        press(&mut state, &tx, &[KeyCode::Enter]);
        assert!(state.modal.is_none());
    }

    #[test]
    fn refresh_merges_backend_facts() {
        let mut install = InstallationState::default()
            .with_security_level(SecurityLevel::Protected)
            .with_idmg(sample_idmg())
            .with_intermediate("INTER".to_string());
        let info = BackendInfo {
            instance_id: Some("abcd".to_string()),
            domaine: Some("node.example.com".to_string()),
            ..BackendInfo::default()
        };
        merge_backend_facts(&mut install, &info);
        assert_eq!(install.instance_id.as_deref(), Some("abcd"));
        assert_eq!(install.domain.as_deref(), Some("node.example.com"));
        assert_eq!(install.idmg, Some(sample_idmg()));
        assert_eq!(install.security_level, Some(SecurityLevel::Protected));
        assert_eq!(install.intermediate_certificate_pem.as_deref(), Some("INTER"));
    }

    #[test]
    fn renewal_is_offered_to_protected_instances_only() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        state.step = Step::ShowNodeInfo;
        state.install = state.install.with_security_level(SecurityLevel::Public);
        press(&mut state, &tx, &[KeyCode::F(3)]);
        assert_eq!(state.step, Step::ShowNodeInfo);
        assert!(matches!(state.modal, Some(Modal::Message { .. })));

        state.modal = None;
        state.install = InstallationState::default()
            .with_security_level(SecurityLevel::Protected)
            .with_idmg(sample_idmg())
            .with_intermediate("OLD".to_string());
        press(&mut state, &tx, &[KeyCode::F(3)]);
        assert_eq!(state.step, Step::RenewIntermediate);
        assert_eq!(next_label(&state), "Load key");
        assert!(state.backup_path.value.contains(&sample_idmg()));
    }

    #[test]
    fn node_info_shows_certificate_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _tx, _rx) = test_state(dir.path());
        let root = state.provider.generate_root().unwrap();
        let cert = root.material.certificate_pem.clone();

        let der = pem::parse(&cert).unwrap();
        let fingerprint = pem_fingerprint(&cert).unwrap();
        assert_eq!(fingerprint, sha256_hex(der.contents()));
        assert_eq!(pem_fingerprint("not a pem"), None);

        state.step = Step::ShowNodeInfo;
        state.install.idmg = Some(root.idmg.clone());
        state.install.ca_certificate_pem = Some(cert);
        let screen = render(&state);
        assert!(screen.contains(&fingerprint[..32]));
        assert!(screen.contains("idmg expires:"));
        assert!(idmg_expiry(&root.idmg).is_some());
    }

    #[test]
    fn finish_quits_from_node_info() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, tx, _rx) = test_state(dir.path());
        state.step = Step::ShowNodeInfo;
        prepare_page(&mut state);
        assert_eq!(next_label(&state), "Finish");
        press(&mut state, &tx, &[KeyCode::Enter]);
        assert!(state.quit);
    }
}
