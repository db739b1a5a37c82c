//! Root-of-trust material: key/certificate provider, idmg derivation, PEM fragments, backups.

pub mod authority;
pub mod backup;
pub mod idmg;
pub mod pem_chunks;
pub mod provider;

pub use authority::RootAuthority;
pub use provider::{GeneratedRoot, KeyCertProvider, LoadedRoot, PkiError, RootMaterial};
