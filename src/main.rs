mod signals;

use clap::Parser;
use instance_guard::config::{self, GuardConfig, DEFAULT_CONFIG_FILE};
use instance_guard::{read_status, ChannelDispatcher, GuardError, InstanceGuard, InstanceNames};
use signals::SignalHandler;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Run a host loop guarded by a single-instance lock: the first launch stays
/// up and reacts to wake signals, every later launch wakes it and exits.
#[derive(Parser, Debug)]
#[command(name = "instance-guard", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Application id used to namespace the lock and wake names (overrides config)
    #[arg(long)]
    app_id: Option<String>,

    /// Directory holding the named objects (overrides config)
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Validate config and print resolved names, don't run
    #[arg(long)]
    dry_run: bool,

    /// Print whether an instance is running and exit
    #[arg(long)]
    status: bool,

    /// Extra logging (watcher lifecycle, config resolution)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("instance_guard={default_level}"))),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match resolve_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let names = InstanceNames::from_config(&config);

    if cli.dry_run {
        let resolved = serde_json::json!({
            "app_id": names.app_id(),
            "scope": names.scope(),
            "lock": names.lock(),
            "wake": names.wake(),
            "poll_interval_ms": config.watcher.poll_interval_ms,
            "on_wake": config.host.on_wake,
        });
        println!("{resolved:#}");
        return ExitCode::SUCCESS;
    }

    if cli.status {
        return match read_status(&names.lock()) {
            Ok(status) => {
                println!("{:#}", serde_json::json!(status));
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(lock = %names.lock().display(), "failed to read instance status: {e}");
                ExitCode::FAILURE
            }
        };
    }

    run(config).await
}

fn resolve_config(cli: &Cli) -> Result<GuardConfig, config::ConfigError> {
    let mut config = config::load_config(&cli.config)?;
    if let Some(app_id) = &cli.app_id {
        config.instance.app_id = app_id.clone();
    }
    if let Some(dir) = &cli.runtime_dir {
        config.instance.runtime_dir = Some(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

/// Primary: drain foreground requests on the main task until SIGINT/SIGTERM.
async fn run(config: GuardConfig) -> ExitCode {
    let mut signals = match SignalHandler::install() {
        Ok(s) => s,
        Err(e) => {
            error!("failed to install signal handlers: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (dispatcher, mut actions) = ChannelDispatcher::new();
    let on_wake = config.host.on_wake.clone();

    let mut guard = match InstanceGuard::force_single_instance(&config, dispatcher, move || {
        bring_to_foreground(&on_wake)
    }) {
        Ok(guard) => guard,
        Err(e @ GuardError::AlreadyRunning { .. }) => {
            info!("{e}, exiting");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    loop {
        tokio::select! {
            Some(action) = actions.recv() => action(),
            name = signals.recv() => {
                info!(signal = name, "shutting down");
                break;
            }
        }
    }

    guard.dispose();
    ExitCode::SUCCESS
}

/// The foreground action. Runs on the main task, so it may spawn.
fn bring_to_foreground(command: &[String]) {
    info!("foreground requested by another launch");
    let Some((program, args)) = command.split_first() else {
        return;
    };

    match tokio::process::Command::new(program).args(args).spawn() {
        Ok(mut child) => {
            let program = program.clone();
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) if !status.success() => {
                        warn!(%program, %status, "on_wake command failed")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(%program, error = %e, "failed to wait for on_wake command"),
                }
            });
        }
        Err(e) => warn!(%program, error = %e, "failed to spawn on_wake command"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cli_overrides_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(
            &path,
            "[instance]\napp_id = \"from-file\"\n[watcher]\npoll_interval_ms = 200\n",
        )
        .unwrap();

        let cli = Cli::parse_from([
            "instance-guard",
            "--config",
            path.to_str().unwrap(),
            "--app-id",
            "from-cli",
            "--runtime-dir",
            "/tmp/guard-test",
        ]);
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.instance.app_id, "from-cli");
        assert_eq!(
            config.instance.runtime_dir,
            Some(PathBuf::from("/tmp/guard-test"))
        );
        assert_eq!(config.watcher.poll_interval_ms, 200);
    }

    #[test]
    fn test_invalid_cli_app_id_is_rejected() {
        let dir = tempdir().unwrap();
        let cli = Cli::parse_from([
            "instance-guard",
            "--config",
            dir.path().join("missing.toml").to_str().unwrap(),
            "--app-id",
            "no spaces allowed",
        ]);
        assert!(resolve_config(&cli).is_err());
    }

    #[test]
    fn test_flags_parse() {
        let cli = Cli::parse_from(["instance-guard", "--status", "-q"]);
        assert!(cli.status);
        assert!(cli.quiet);
        assert!(!cli.dry_run);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }
}
