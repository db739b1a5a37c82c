// Domain-configuration poller
//
// Drives one install attempt against the backend:
//   TestingReachability -> ConfiguringDomain -> AwaitingCertificate -> AwaitingRestart -> Complete
// Any phase can end in Error; cancellation ends in Cancelled. Each `run` starts from scratch.

use log::{debug, error, info, warn};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::install::InstallPlan;
use crate::api::InstallerBackend;
use crate::config::PollerSettings;

pub const CERTIFICATE_TIMEOUT_MESSAGE: &str = "Timeout waiting for TLS certificate";
pub const RESTART_TIMEOUT_MESSAGE: &str = "Timeout waiting for server restart";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollPhase {
    TestingReachability,
    ConfiguringDomain,
    AwaitingCertificate { attempt: u32 },
    AwaitingRestart { attempt: u32 },
    Complete,
    Error { message: String, stack: String },
    Cancelled,
}

impl PollPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollPhase::Complete | PollPhase::Error { .. } | PollPhase::Cancelled
        )
    }

    /// Position in the happy path (used to tick off the TUI step list).
    pub fn ordinal(&self) -> usize {
        match self {
            PollPhase::TestingReachability => 0,
            PollPhase::ConfiguringDomain => 1,
            PollPhase::AwaitingCertificate { .. } => 2,
            PollPhase::AwaitingRestart { .. } => 3,
            PollPhase::Complete => 4,
            PollPhase::Error { .. } | PollPhase::Cancelled => usize::MAX,
        }
    }
}

impl fmt::Display for PollPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollPhase::TestingReachability => write!(f, "Testing connection to the instance"),
            PollPhase::ConfiguringDomain => write!(f, "Configuring the instance"),
            PollPhase::AwaitingCertificate { attempt } => {
                write!(f, "Waiting for the TLS certificate (check {})", attempt + 1)
            }
            PollPhase::AwaitingRestart { attempt } => {
                write!(f, "Waiting for the server to restart (check {})", attempt + 1)
            }
            PollPhase::Complete => write!(f, "Installation complete"),
            PollPhase::Error { message, .. } => write!(f, "Error: {}", message),
            PollPhase::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct PollError {
    pub message: String,
    pub stack: String,
}

impl PollError {
    fn from_cause<E: fmt::Debug + fmt::Display>(context: &str, cause: E) -> Self {
        Self {
            message: format!("{}: {}", context, cause),
            stack: format!("{:?}", cause),
        }
    }

    fn timeout(message: &str, polls: u32) -> Self {
        Self {
            message: message.to_string(),
            stack: format!("gave up after {} polls", polls),
        }
    }
}

impl From<PollError> for PollPhase {
    fn from(e: PollError) -> Self {
        PollPhase::Error {
            message: e.message,
            stack: e.stack,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressPayload {
    pub correlation_id: String,
    pub phase: PollPhase,
    pub elapsed_ms: u128,
}

pub type ProgressEmitter = Arc<dyn Fn(ProgressPayload) + Send + Sync>;

/// Inner result: `None` means the run was cancelled.
type PollResult<T> = Result<Option<T>, PollError>;

pub struct DomainPoller<'a> {
    backend: &'a dyn InstallerBackend,
    settings: PollerSettings,
    cancel: CancellationToken,
    emit_progress: ProgressEmitter,
}

impl<'a> DomainPoller<'a> {
    pub fn new(
        backend: &'a dyn InstallerBackend,
        settings: PollerSettings,
        cancel: CancellationToken,
        emit_progress: ProgressEmitter,
    ) -> Self {
        Self {
            backend,
            settings,
            cancel,
            emit_progress,
        }
    }

    /// Run the whole sequence and return the terminal phase.
    pub async fn run(&self, plan: &InstallPlan) -> PollPhase {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        info!(
            "[PHASE: install] [STEP: start] Install run {} for a {} instance (domain: {})",
            correlation_id,
            plan.security_level(),
            plan.has_domain()
        );

        let emit = |phase: PollPhase| {
            debug!("[PHASE: install] [STEP: progress] {}", phase);
            (self.emit_progress)(ProgressPayload {
                correlation_id: correlation_id.clone(),
                phase,
                elapsed_ms: started.elapsed().as_millis(),
            });
        };

        let terminal = match self.drive(plan, &emit).await {
            Ok(Some(())) => PollPhase::Complete,
            Ok(None) => PollPhase::Cancelled,
            Err(e) => {
                error!("[PHASE: install] [STEP: failed] {}", e.message);
                e.into()
            }
        };

        info!(
            "[PHASE: install] [STEP: end] Install run {} finished: {} ({} ms)",
            correlation_id,
            terminal,
            started.elapsed().as_millis()
        );
        emit(terminal.clone());
        terminal
    }

    async fn drive(&self, plan: &InstallPlan, emit: &dyn Fn(PollPhase)) -> PollResult<()> {
        emit(PollPhase::TestingReachability);
        match self
            .guarded(self.backend.check_reachable(self.settings.reachability_timeout()))
            .await
        {
            None => return Ok(None),
            Some(Err(e)) => return Err(PollError::from_cause("The instance is not reachable", e)),
            Some(Ok(())) => {}
        }

        emit(PollPhase::ConfiguringDomain);
        match self.guarded(plan.execute(self.backend)).await {
            None => return Ok(None),
            Some(Err(e)) => {
                return Err(PollError::from_cause("The instance configuration failed", e))
            }
            Some(Ok(())) => {}
        }

        if !plan.has_domain() {
            // No public certificate to wait for; the node restarts on its own
            info!("[PHASE: install] [STEP: restart] No domain configured, waiting for restart");
            if self.pause(self.settings.restart_initial_delay()).await.is_none() {
                return Ok(None);
            }
            return Ok(Some(()));
        }

        if self.await_certificate(emit).await?.is_none() {
            return Ok(None);
        }
        self.await_restart(emit).await
    }

    async fn await_certificate(&self, emit: &dyn Fn(PollPhase)) -> PollResult<()> {
        let max = self.settings.certificate_max_attempts;
        let mut attempt: u32 = 0;
        while attempt < max {
            emit(PollPhase::AwaitingCertificate { attempt });

            match self.guarded(self.backend.certificate_status()).await {
                None => return Ok(None),
                Some(Ok(status)) if status.pret => {
                    info!(
                        "[PHASE: install] [STEP: certificate] Certificate ready after {} checks",
                        attempt + 1
                    );
                    return Ok(Some(()));
                }
                Some(Ok(_)) => {
                    attempt += 1;
                    // No wait after the last poll
                    if attempt < max
                        && self.pause(self.settings.certificate_interval()).await.is_none()
                    {
                        return Ok(None);
                    }
                }
                Some(Err(e)) => {
                    return Err(PollError::from_cause(
                        "Unable to read the certificate status",
                        e,
                    ))
                }
            }
        }
        Err(PollError::timeout(CERTIFICATE_TIMEOUT_MESSAGE, attempt))
    }

    async fn await_restart(&self, emit: &dyn Fn(PollPhase)) -> PollResult<()> {
        emit(PollPhase::AwaitingRestart { attempt: 0 });
        if self.pause(self.settings.restart_initial_delay()).await.is_none() {
            return Ok(None);
        }

        let max = self.settings.restart_max_attempts;
        let mut attempt: u32 = 0;
        while attempt < max {
            emit(PollPhase::AwaitingRestart { attempt });

            match self.guarded(self.backend.certificate_status()).await {
                None => return Ok(None),
                Some(Ok(_)) => return Ok(Some(())),
                Some(Err(e)) => {
                    // Expected while the server restarts
                    warn!(
                        "[PHASE: install] [STEP: restart] Server not back yet (check {}): {}",
                        attempt + 1,
                        e
                    );
                    attempt += 1;
                    if attempt < max
                        && self.pause(self.settings.restart_interval()).await.is_none()
                    {
                        return Ok(None);
                    }
                }
            }
        }
        Err(PollError::timeout(RESTART_TIMEOUT_MESSAGE, attempt))
    }

    /// Await `fut` unless the run is cancelled first.
    async fn guarded<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    async fn pause(&self, d: Duration) -> Option<()> {
        self.guarded(tokio::time::sleep(d)).await
    }
}
