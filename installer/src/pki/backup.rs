// Root key backup file (`backupCle_<idmg>.json`) and its printable fragment form.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::authority::{decode_pem, TAG_CERTIFICATE};
use super::idmg;
use super::pem_chunks::{self, FragmentSet, LABEL_ROOT_CERT, LABEL_ROOT_KEY};
use super::provider::RootMaterial;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootKeyBackup {
    pub idmg: String,
    pub racine: BackupRoot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRoot {
    pub certificat: String,
    pub cle_chiffree: String,
}

impl RootKeyBackup {
    pub fn from_material(idmg: &str, material: &RootMaterial) -> Self {
        Self {
            idmg: idmg.to_string(),
            racine: BackupRoot {
                certificat: material.certificate_pem.clone(),
                cle_chiffree: material.encrypted_key_pem.clone(),
            },
        }
    }

    pub fn file_name(&self) -> String {
        format!("backupCle_{}.json", self.idmg)
    }

    /// Check the recorded idmg against the certificate it claims to describe.
    pub fn verify(&self) -> Result<()> {
        let der = decode_pem(&self.racine.certificat, TAG_CERTIFICATE)?;
        if !idmg::matches_certificate(&self.idmg, &der) {
            anyhow::bail!(
                "Backup idmg {} does not match its root certificate",
                self.idmg
            );
        }
        Ok(())
    }
}

/// Write the backup into `dir` and return the file path.
pub fn write_backup(dir: &Path, backup: &RootKeyBackup) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create backup folder {:?}", dir))?;
    let path = dir.join(backup.file_name());
    let json = serde_json::to_string_pretty(backup)?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
    log::info!(
        "[PHASE: pki] [STEP: backup] Root key backup written to {:?}",
        path
    );
    Ok(path)
}

pub fn read_backup(path: &Path) -> Result<RootKeyBackup> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let backup: RootKeyBackup = serde_json::from_str(&raw)
        .with_context(|| format!("{:?} is not a root key backup file", path))?;
    backup.verify()?;
    Ok(backup)
}

/// Printable fragment payloads for a backup: certificate fragments then key fragments,
/// separated by blank lines. The passphrase is never part of this output.
pub fn export_fragments(backup: &RootKeyBackup, fragment_size: usize) -> Result<String> {
    let mut blocks = pem_chunks::chunk(&backup.racine.certificat, LABEL_ROOT_CERT, fragment_size)?;
    blocks.extend(pem_chunks::chunk(
        &backup.racine.cle_chiffree,
        LABEL_ROOT_KEY,
        fragment_size,
    )?);

    let mut out = format!("# idmg: {}\n\n", backup.idmg);
    out.push_str(&blocks.join("\n\n"));
    out.push('\n');
    Ok(out)
}

/// Write the fragment export next to the backup file (`backupCle_<idmg>.fragments.txt`).
pub fn write_fragments(dir: &Path, backup: &RootKeyBackup, fragment_size: usize) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create backup folder {:?}", dir))?;
    let path = dir.join(format!("backupCle_{}.fragments.txt", backup.idmg));
    let text = export_fragments(backup, fragment_size)?;
    std::fs::write(&path, text).with_context(|| format!("Failed to write {:?}", path))?;
    log::info!(
        "[PHASE: pki] [STEP: fragments] Root key fragments written to {:?}",
        path
    );
    Ok(path)
}

/// Rebuild a backup from scanned fragment payloads (any order, blank-line separated).
pub fn import_fragments(text: &str) -> Result<RootKeyBackup> {
    let mut cert = FragmentSet::new();
    let mut key = FragmentSet::new();

    let normalized = text.replace("\r\n", "\n");
    for block in normalized.split("\n\n") {
        let block = block.trim();
        if block.is_empty() || block.starts_with('#') {
            continue;
        }
        let label = block.split(';').next().unwrap_or_default();
        match label {
            LABEL_ROOT_CERT => cert.insert(block)?,
            LABEL_ROOT_KEY => key.insert(block)?,
            other => anyhow::bail!("Unexpected fragment label '{}'", other),
        }
    }

    let certificat = pem_chunks::assemble(&cert).context("Root certificate fragments")?;
    let cle_chiffree = pem_chunks::assemble(&key).context("Root key fragments")?;
    let der = decode_pem(&certificat, TAG_CERTIFICATE)?;
    let idmg = idmg::derive_idmg(&der)?;

    Ok(RootKeyBackup {
        idmg,
        racine: BackupRoot {
            certificat,
            cle_chiffree,
        },
    })
}

/// Read a backup from either a `.json` backup file or a fragment text file.
pub fn load_backup_file(path: &Path) -> Result<RootKeyBackup> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        return read_backup(path);
    }
    let text =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    import_fragments(&text).with_context(|| format!("{:?} does not hold valid fragments", path))
}
