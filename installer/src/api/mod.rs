pub mod client;
pub mod error;
pub mod install;

pub use client::{HttpInstallerBackend, InstallerBackend};
pub use error::ApiError;
