use std::path::PathBuf;

/// Value following `flag` (`--flag value`).
fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .filter(|v| !v.starts_with("--"))
        .cloned()
}

fn exit_on_error(result: anyhow::Result<()>) {
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Explicit config file layered over installer.toml and the defaults
    let config_path = flag_value(&args, "--config").map(PathBuf::from);
    let config = config_path.as_deref();
    if args.iter().any(|a| a == "--config") && config.is_none() {
        eprintln!("--config requires a path");
        std::process::exit(2);
    }

    if args.iter().any(|a| a == "--print-config") {
        exit_on_error(instance_installer::run_print_config(config));
        return;
    }

    // Non-interactive: print the /info snapshot and the page the wizard would start on.
    if args.iter().any(|a| a == "--status") {
        exit_on_error(instance_installer::run_status(config));
        return;
    }

    // Usage: --export-fragments <backupCle_<idmg>.json> [--out <file>]
    if args.iter().any(|a| a == "--export-fragments") {
        let Some(input) = flag_value(&args, "--export-fragments") else {
            eprintln!("--export-fragments requires a backup file");
            std::process::exit(2);
        };
        let out = flag_value(&args, "--out").map(PathBuf::from);
        exit_on_error(instance_installer::run_export_fragments(
            config,
            &PathBuf::from(input),
            out.as_deref(),
        ));
        return;
    }

    // Usage: --import-fragments <fragments.txt> [--out <folder>]
    if args.iter().any(|a| a == "--import-fragments") {
        let Some(input) = flag_value(&args, "--import-fragments") else {
            eprintln!("--import-fragments requires a fragment file");
            std::process::exit(2);
        };
        let out = flag_value(&args, "--out").map(PathBuf::from);
        exit_on_error(instance_installer::run_import_fragments(
            config,
            &PathBuf::from(input),
            out.as_deref(),
        ));
        return;
    }

    // Non-interactive TUI smoke test mode (for automated checks).
    // Renders a single frame for a specific page and exits 0.
    // Usage: --tui-smoke or --tui-smoke=all|node-type|load-key|generate-key|idmg|network|install|finalize|node-info|renew
    if let Some(arg) = args
        .iter()
        .find(|a| a.as_str() == "--tui-smoke" || a.starts_with("--tui-smoke="))
    {
        let target = arg
            .split_once('=')
            .map(|(_, v)| v.to_string())
            .filter(|v| !v.trim().is_empty());
        exit_on_error(instance_installer::run_tui_smoke(config, target));
        return;
    }

    // Default (and --tui): interactive wizard
    exit_on_error(instance_installer::run_tui(config));
}
