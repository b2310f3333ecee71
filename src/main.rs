use clap::{Parser, Subcommand};
use sdnat::config;
use sdnat::event;
use sdnat::nat::{NatMappings, NatProcessor, SessionTable};
use sdnat::telemetry::{MetricsRegistry, init_logging};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "sdnat")]
#[command(about = "Session-based address/port translator for SDN controllers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Translate flow events read from stdin
    Run {
        /// Path to config.lock file
        #[arg(short, long, default_value = "config.lock")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate config.lock from config.toml
    Generate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// Output path for config.lock
        #[arg(short, long, default_value = "config.lock")]
        output: PathBuf,
    },
    /// Validate config.toml without generating lock file
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Config { action }) => {
            init_logging(None);
            match action {
                ConfigAction::Generate {
                    config: config_path,
                    output,
                } => cmd_config_generate(&config_path, &output),
                ConfigAction::Validate {
                    config: config_path,
                } => cmd_config_validate(&config_path),
            }
        }
        Some(Commands::Run { config: lock_path }) => cmd_run(&lock_path),
        None => cmd_run(Path::new("config.lock")),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_run(lock_path: &Path) -> Result<(), String> {
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::runtime::Runtime;
    use tracing::{error, warn};

    let lock = config::load_lock(lock_path)
        .map_err(|e| format!("Failed to load {}: {}", lock_path.display(), e))?;

    // Logging settings come from the lock file, RUST_LOG still wins
    init_logging(Some(&lock.logging));
    info!("Loaded {} (generated {})", lock_path.display(), lock.generated_at);

    let settings = lock
        .nat
        .settings()
        .map_err(|e| format!("Invalid NAT settings: {}", e))?;

    let metrics = Arc::new(MetricsRegistry::new());
    let mappings = Arc::new(NatMappings::new(SessionTable::new(
        settings.pool(),
        settings.idle_timeout,
    )));
    let processor = Arc::new(NatProcessor::new(
        settings.boundary(),
        mappings,
        metrics.clone(),
    ));

    info!(
        "NAT ready: {} external addresses, {} ports, idle timeout {}s, sweep every {}s",
        settings.external_addresses.len(),
        settings.external_ports.len(),
        settings.idle_timeout.as_secs(),
        settings.sweep_interval.as_secs()
    );

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        // Sweep runs on its own task, independent of event arrival
        let sweeper = processor.clone();
        let sweep_interval = settings.sweep_interval;
        let sweep_task: tokio::task::JoinHandle<()> = tokio::spawn(async move {
            let mut timer = tokio::time::interval(sweep_interval);
            loop {
                timer.tick().await;
                sweeper.run_maintenance();
            }
        });

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Interrupted, shutting down");
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match event::parse_line(&line) {
                        Ok(Some(ev)) => {
                            let verdict = processor.process_raw(ev.src, ev.dst, ev.ip_protocol);
                            println!("{} -> {} [{}]: {}", ev.src, ev.dst, ev.ip_protocol, verdict);
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Skipping event: {}", e),
                    },
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        error!("Receive error: {}", e);
                        break;
                    }
                },
            }
        }

        sweep_task.abort();
        processor.run_maintenance();
        for (name, value) in metrics.export() {
            info!("{} = {}", name, value);
        }
    });

    Ok(())
}

fn cmd_config_generate(config_path: &Path, output_path: &Path) -> Result<(), String> {
    println!("[INFO] Loading {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        return Err("Validation failed with errors".to_string());
    }

    let lock =
        config::generate_lock(&cfg).map_err(|e| format!("Failed to generate lock: {}", e))?;

    let lock_toml =
        toml::to_string_pretty(&lock).map_err(|e| format!("Failed to serialize lock: {}", e))?;

    let output = format!(
        "# Generated by sdnat - DO NOT EDIT\n# Source: {}\n\n{}",
        config_path.display(),
        lock_toml
    );

    std::fs::write(output_path, output).map_err(|e| format!("Failed to write lock file: {}", e))?;

    println!(
        "[INFO] Generated {} ({} external sockets)",
        output_path.display(),
        lock.nat.pool_size
    );
    Ok(())
}

fn cmd_config_validate(config_path: &Path) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}
