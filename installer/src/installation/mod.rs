// Installation run against the node backend
//
// IMPORTANT:
// - Never log secrets (passphrases, private keys, ClouDNS passwords).
// - Every wait must stay cancellable.

pub mod poller;

pub use poller::{DomainPoller, PollPhase, ProgressEmitter, ProgressPayload};
