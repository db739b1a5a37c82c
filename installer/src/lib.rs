// Instance Installer
// Main library entry point

mod api;
mod config;
mod installation;
mod models;
mod pki;
mod security;
mod tui;
mod utils;
mod wizard;

use anyhow::{Context, Result};
use log::{error, info};
use std::path::{Path, PathBuf};

use crate::api::{HttpInstallerBackend, InstallerBackend};
use crate::config::InstallerConfig;

/// Initialize logging system with dual format (JSON + human-readable)
fn init_logging(with_stdout: bool, run_id: &str) -> Result<PathBuf> {
    let log_dir = utils::path_resolver::resolve_log_folder()?;
    std::fs::create_dir_all(&log_dir)?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");

    // JSON log file for structured parsing
    let json_log_file = log_dir.join(format!("installer-{}.log", timestamp));

    // Human-readable log file (.txt)
    let txt_log_file = log_dir.join(format!("installer-{}.txt", timestamp));

    // Configure dual-format logging:
    // - JSON format to .log file
    // - Human-readable format to .txt file
    // - Optional: human-readable to stdout (disabled for TUI to avoid corrupting the terminal UI)
    let mut dispatch = fern::Dispatch::new().level(log::LevelFilter::Debug);

    if with_stdout {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Info)
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = utils::logging::redact_secrets(&message.to_string());
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", txt_line));
                })
                .chain(std::io::stdout()),
        );
    }

    let json_run_id = run_id.to_string();
    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = utils::logging::redact_secrets(&message.to_string());
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let json_line = utils::logging::format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                        Some(json_run_id.as_str()),
                        None,
                    );
                    out.finish(format_args!("{}\n", json_line));
                })
                .chain(fern::log_file(json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = utils::logging::redact_secrets(&message.to_string());
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", txt_line));
                })
                .chain(fern::log_file(txt_log_file)?),
        );

    dispatch.apply()?;

    log::info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(log_dir)
}

fn start_session(with_stdout: bool, mode: &str) {
    let run_id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = init_logging(with_stdout, &run_id) {
        eprintln!("Failed to initialize logging: {:#}", e);
    }

    info!(
        "[PHASE: initialization] [STEP: {}] Installer {} starting at {} (run {})",
        mode,
        env!("CARGO_PKG_VERSION"),
        chrono::Utc::now(),
        run_id
    );

    match utils::path_resolver::resolve_deployment_folder() {
        Ok(folder) => info!(
            "[PHASE: initialization] [STEP: deployment_folder] Deployment folder: {:?}",
            folder
        ),
        Err(e) => error!(
            "[PHASE: initialization] [STEP: deployment_folder] {:#}",
            e
        ),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<InstallerConfig> {
    let cfg = InstallerConfig::load(explicit)?;
    info!(
        "[PHASE: initialization] [STEP: config] Backend {} (backup folder {:?})",
        cfg.backend.base_url, cfg.backup.directory
    );
    Ok(cfg)
}

/// Interactive wizard.
pub fn run_tui(config_path: Option<&Path>) -> Result<()> {
    // Initialize logging (no stdout to avoid corrupting the TUI)
    start_session(false, "tui");
    let cfg = load_config(config_path)?;

    if let Err(e) = tui::run(cfg) {
        error!("[PHASE: tui] [STEP: fatal] {:#}", e);
        return Err(e);
    }
    Ok(())
}

/// Render one frame of `target` (a page key or `all`) into an in-memory terminal.
pub fn run_tui_smoke(config_path: Option<&Path>, target: Option<String>) -> Result<()> {
    // Initialize logging (no stdout to avoid corrupting the terminal)
    start_session(false, "tui_smoke");
    let cfg = load_config(config_path)?;

    let target = target.as_deref().unwrap_or("all");
    tui::smoke(&cfg, target)?;
    info!(
        "[PHASE: tui] [STEP: smoke] TUI smoke render OK (target={})",
        target
    );
    Ok(())
}

/// Print the backend snapshot and the page the wizard would open on.
pub fn run_status(config_path: Option<&Path>) -> Result<()> {
    start_session(false, "status");
    let cfg = load_config(config_path)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let info = rt.block_on(async {
        let backend = HttpInstallerBackend::new(&cfg.backend)?;
        backend.info().await
    })?;

    let step = wizard::compute_initial_step(&info);
    info!(
        "[PHASE: status] [STEP: snapshot] Backend reports initial step '{}'",
        step
    );

    println!("{}", serde_json::to_string_pretty(&info)?);
    println!();
    println!("Initial step: {} ({})", step.title(), step.key());
    Ok(())
}

/// Write the printable fragments of a backup file.
pub fn run_export_fragments(
    config_path: Option<&Path>,
    backup_path: &Path,
    out: Option<&Path>,
) -> Result<()> {
    start_session(false, "export_fragments");
    let cfg = load_config(config_path)?;

    let backup = pki::backup::read_backup(backup_path)?;
    let text = pki::backup::export_fragments(&backup, cfg.backup.fragment_size)?;

    match out {
        Some(path) => {
            std::fs::write(path, &text).with_context(|| format!("Failed to write {:?}", path))?;
            info!(
                "[PHASE: pki] [STEP: fragments] Fragments for {} written to {:?}",
                backup.idmg, path
            );
            println!("{}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

/// Rebuild a backup JSON file from a fragment text file.
pub fn run_import_fragments(
    config_path: Option<&Path>,
    fragments_path: &Path,
    out_dir: Option<&Path>,
) -> Result<()> {
    start_session(false, "import_fragments");
    let cfg = load_config(config_path)?;

    let text = std::fs::read_to_string(fragments_path)
        .with_context(|| format!("Failed to read {:?}", fragments_path))?;
    let backup = pki::backup::import_fragments(&text)?;
    let dir = out_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cfg.backup.directory.clone());
    let path = pki::backup::write_backup(&dir, &backup)?;

    println!("{}", path.display());
    Ok(())
}

/// Print the effective layered configuration.
pub fn run_print_config(config_path: Option<&Path>) -> Result<()> {
    let cfg = InstallerConfig::load(config_path)?;
    print!("{}", cfg.to_toml()?);
    Ok(())
}
