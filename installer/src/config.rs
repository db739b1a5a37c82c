// Installer configuration
//
// Layered with the `config` crate: built-in defaults, then `installer.toml` next to the binary
// or in the working directory, then an explicit `--config <path>`, then environment variables
// (`INSTANCE_INSTALLER_BACKEND__BASE_URL=...`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pki::authority::DEFAULT_KDF_ITERATIONS;
use crate::pki::pem_chunks::DEFAULT_FRAGMENT_SIZE;

pub const CONFIG_FILE_NAME: &str = "installer.toml";
pub const ENV_PREFIX: &str = "INSTANCE_INSTALLER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// The node serves a self-signed certificate until installation completes.
    pub accept_invalid_certs: bool,
    pub info_retries: usize,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:2443".to_string(),
            request_timeout_secs: 20,
            accept_invalid_certs: true,
            info_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    pub reachability_timeout_secs: u64,
    pub certificate_interval_secs: u64,
    pub certificate_max_attempts: u32,
    pub restart_initial_delay_secs: u64,
    pub restart_interval_secs: u64,
    pub restart_max_attempts: u32,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            reachability_timeout_secs: 5,
            certificate_interval_secs: 5,
            certificate_max_attempts: 25,
            restart_initial_delay_secs: 15,
            restart_interval_secs: 5,
            restart_max_attempts: 10,
        }
    }
}

impl PollerSettings {
    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_secs(self.reachability_timeout_secs)
    }

    pub fn certificate_interval(&self) -> Duration {
        Duration::from_secs(self.certificate_interval_secs)
    }

    pub fn restart_initial_delay(&self) -> Duration {
        Duration::from_secs(self.restart_initial_delay_secs)
    }

    pub fn restart_interval(&self) -> Duration {
        Duration::from_secs(self.restart_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub directory: PathBuf,
    pub fragment_size: usize,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            directory: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            fragment_size: DEFAULT_FRAGMENT_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiSettings {
    pub kdf_iterations: u32,
}

impl Default for PkiSettings {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub backend: BackendSettings,
    pub poller: PollerSettings,
    pub backup: BackupSettings,
    pub pki: PkiSettings,
}

impl InstallerConfig {
    /// Load the layered configuration. `explicit` must exist when given.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&InstallerConfig::default())?);

        for dir in default_config_dirs() {
            builder = builder.add_source(
                config::File::from(dir.join(CONFIG_FILE_NAME))
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        if let Some(path) = explicit {
            builder = builder.add_source(
                config::File::from(path.to_path_buf())
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: Self = builder
            .build()
            .context("Failed to read installer configuration")?
            .try_deserialize()
            .context("Invalid installer configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.backend.base_url)
            .with_context(|| format!("backend.base_url '{}' is not a URL", self.backend.base_url))?;
        if self.backup.fragment_size == 0 {
            anyhow::bail!("backup.fragment_size must be greater than zero");
        }
        if self.poller.certificate_max_attempts == 0 || self.poller.restart_max_attempts == 0 {
            anyhow::bail!("poller attempt ceilings must be greater than zero");
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn default_config_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(dir);
    }
    if let Ok(cwd) = std::env::current_dir() {
        if !dirs.contains(&cwd) {
            dirs.push(cwd);
        }
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_poller_contract() {
        let cfg = InstallerConfig::default();
        assert_eq!(cfg.poller.certificate_max_attempts, 25);
        assert_eq!(cfg.poller.restart_max_attempts, 10);
        assert_eq!(cfg.poller.restart_initial_delay(), Duration::from_secs(15));
        assert_eq!(cfg.poller.reachability_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.backup.fragment_size, 800);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[backend]\nbase_url = \"https://node.example.com:2443\"\n\n[poller]\nrestart_max_attempts = 3\n",
        )
        .unwrap();

        let cfg = InstallerConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.backend.base_url, "https://node.example.com:2443");
        assert_eq!(cfg.poller.restart_max_attempts, 3);
        // Untouched keys keep their defaults
        assert_eq!(cfg.poller.certificate_max_attempts, 25);
        assert!(cfg.backend.accept_invalid_certs);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(InstallerConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn toml_output_roundtrips() {
        let cfg = InstallerConfig::default();
        let text = cfg.to_toml().unwrap();
        assert!(text.contains("[backend]"));
        let back: InstallerConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = InstallerConfig::default();
        cfg.backend.base_url = "not a url".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = InstallerConfig::default();
        cfg.backup.fragment_size = 0;
        assert!(cfg.validate().is_err());
    }
}
