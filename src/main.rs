//! Isobench - isochronous stream benchmarking harness
//!
//! Entry point for the console front end. Runs benchmark passes against the
//! simulated transport, either interactively or for a fixed role.

use anyhow::{bail, Result};
use isobench::config::AppConfig;
use isobench::prompt::{PromptError, Prompter};
use isobench::{
    run_role_loop, BenchConfig, BenchContext, ConfigError, EventHub, IsoTransport, Orchestrator,
    Role, RoleSource, ScriptedRoles, SessionResult, SimTransport, TransportLimits,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Options parsed from the command line
#[derive(Debug, Default)]
struct Options {
    config_path: Option<PathBuf>,
    role: Option<Role>,
    sessions: Option<usize>,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("isobench=info".parse()?)
                .add_directive("isobench_core=info".parse()?),
        )
        .init();

    let Some(options) = parse_args()? else {
        return Ok(());
    };

    println!("════════════════════════════════════════════════════════════");
    println!(
        "  Isobench v{} ({}) - Isochronous Stream Benchmark",
        isobench::VERSION,
        isobench::BUILD_DATE
    );
    println!("════════════════════════════════════════════════════════════");
    println!();

    let (app, config_path) = AppConfig::load_with_override(options.config_path.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(app, config_path, options))
}

/// Parse command line arguments
///
/// # Returns
/// None if the process should exit right away (help or version shown)
fn parse_args() -> Result<Option<Options>> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("isobench {} ({})", isobench::VERSION, isobench::BUILD_DATE);
                return Ok(None);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            "--config" | "-c" => {
                let Some(path) = args.get(i + 1) else {
                    bail!("--config requires a path");
                };
                options.config_path = Some(PathBuf::from(path));
                i += 2;
                continue;
            }
            "--role" | "-r" => {
                let Some(role) = args.get(i + 1) else {
                    bail!("--role requires initiator or responder");
                };
                options.role = Some(role.parse().map_err(anyhow::Error::msg)?);
                i += 2;
                continue;
            }
            "--sessions" | "-n" => {
                let Some(count) = args.get(i + 1) else {
                    bail!("--sessions requires a count");
                };
                match count.parse::<usize>() {
                    Ok(n) if n > 0 => options.sessions = Some(n),
                    _ => bail!("Invalid session count: {}", count),
                }
                i += 2;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(None);
            }
        }
    }

    Ok(Some(options))
}

fn print_help() {
    println!("Usage: isobench [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config PATH       Use this config file instead of the default");
    println!("  -r, --role ROLE         Run as initiator or responder without prompting");
    println!("  -n, --sessions N        Stop after N sessions (default: 1 with --role)");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Examples:");
    println!("  isobench --role initiator --sessions 5");
    println!("  isobench --config ./bench.json");
    println!();
    println!("Without --role, asks for the role before every session.");
    println!("Ctrl+C tears down the running session, or exits when idle.");
}

async fn run(app: AppConfig, config_path: PathBuf, options: Options) -> Result<()> {
    let ctx = Arc::new(BenchContext::new());
    let hub = EventHub::new(ctx, app.service_name.clone(), app.sim.max_streams);
    let transport = Arc::new(SimTransport::new(Arc::clone(&hub), app.sim.clone())?);
    let limits = transport.limits();

    info!(
        service = %app.service_name,
        max_streams = limits.max_streams,
        mtu = limits.tx_mtu,
        "Simulated transport ready"
    );

    let teardown_hub = Arc::clone(&hub);
    if let Err(e) = ctrlc::set_handler(move || {
        if !teardown_hub.request_local_teardown() {
            println!();
            println!("Exiting.");
            std::process::exit(0);
        }
    }) {
        warn!("Failed to install Ctrl+C handler: {}", e);
    }

    let mut orchestrator = Orchestrator::new(transport, hub, app.bench.clone());

    let summary = match options.role {
        Some(role) => {
            let mut source = ScriptedRoles::repeat(role, options.sessions.unwrap_or(1));
            run_role_loop(&mut orchestrator, &mut source).await
        }
        None => {
            let mut source = InteractiveRoles {
                app,
                config_path,
                limits,
                remaining: options.sessions,
            };
            run_role_loop(&mut orchestrator, &mut source).await
        }
    };

    println!();
    println!(
        "Sessions: {} run, {} succeeded, {} failed",
        summary.passes, summary.succeeded, summary.failed
    );
    Ok(())
}

/// Asks the user for a role (and settings) before every pass
struct InteractiveRoles {
    app: AppConfig,
    config_path: PathBuf,
    limits: TransportLimits,
    remaining: Option<usize>,
}

impl RoleSource for InteractiveRoles {
    fn next_role(&mut self) -> Option<Role> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }

        let selected = tokio::task::block_in_place(|| {
            Prompter::new(io::stdin().lock(), io::stdout()).select_role()
        });
        match selected {
            Ok(role) => role,
            Err(e) => {
                error!("Failed to read role: {}", e);
                None
            }
        }
    }

    fn reconfigure(&mut self, current: &BenchConfig) -> Result<Option<BenchConfig>, ConfigError> {
        let limits = self.limits;
        let edited = tokio::task::block_in_place(|| {
            Prompter::new(io::stdin().lock(), io::stdout()).edit_bench(current, &limits)
        });

        match edited {
            Ok(Some(config)) => {
                self.app.bench = config.clone();
                if let Err(e) = self.app.save(&self.config_path) {
                    warn!("Failed to save config: {}", e);
                }
                Ok(Some(config))
            }
            Ok(None) => Ok(None),
            Err(PromptError::Config(e)) => Err(e),
            Err(e) => {
                warn!("Keeping current settings: {}", e);
                Ok(None)
            }
        }
    }

    fn report(&mut self, role: Role, result: &SessionResult) {
        match result {
            Ok(summary) => println!(
                "[{}] {} session done: {} streams, {} sent, {}",
                summary
                    .ended_at
                    .with_timezone(&chrono::Local)
                    .format("%H:%M:%S"),
                role,
                summary.streams,
                summary.packets_sent,
                summary.session_stats
            ),
            Err(e) => println!("{} session failed: {}", role, e),
        }
        println!();
    }
}
