//! gantry CLI
//!
//! Provisions Gunicorn services: allocates the next unit name and port,
//! writes the systemd unit and the update script, and runs updates.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use gantry::external::system_backends;
use gantry::{
    inventory, ProvisionConfig, ProvisionPlan, ProvisionReport, ProvisionRequest, Provisioner,
    UpdateOutcome, Updater,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "gantry",
    about = "Gunicorn service provisioner - allocates unit names and ports, writes systemd units and update scripts",
    version,
    author
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "GANTRY_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Unit directory (overrides configuration)
    #[arg(long, global = true)]
    unit_dir: Option<PathBuf>,

    /// Allocator state directory (overrides configuration)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate the next service and write its unit and update script
    Provision {
        /// Application directory (defaults to the current directory)
        #[arg(short, long)]
        working_dir: Option<PathBuf>,

        /// Update script path (defaults to /home/<app>/pull.sh)
        #[arg(short, long)]
        script_path: Option<PathBuf>,

        /// Render and print without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the identifier and port the next provision would use
    Next {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the unit and update script for an identifier
    Render {
        /// Service identifier
        #[arg(long)]
        id: u32,

        /// Application directory (defaults to the current directory)
        #[arg(short, long)]
        working_dir: Option<PathBuf>,
    },

    /// Pull and restart a service if an update is pending
    Update {
        /// Update even without the sentinel file
        #[arg(short, long)]
        force: bool,

        /// Service identifier
        #[arg(long, conflicts_with = "unit", required_unless_present = "unit")]
        id: Option<u32>,

        /// Unit name
        #[arg(long)]
        unit: Option<String>,

        /// Application directory (defaults to the current directory)
        #[arg(short, long)]
        working_dir: Option<PathBuf>,
    },

    /// List provisioned services
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config =
        ProvisionConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = cli.unit_dir {
        config.unit_dir = dir;
    }
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }

    let (systemctl, git) = system_backends(&config.commands);

    match cli.command {
        Commands::Provision {
            working_dir,
            script_path,
            dry_run,
            json,
        } => {
            let mut request = ProvisionRequest::new(resolve_working_dir(working_dir)?);
            if let Some(path) = script_path {
                request = request.with_script_path(path);
            }

            let provisioner = Provisioner::new(config, Arc::new(systemctl));

            if dry_run {
                let plan = provisioner.preview(&request)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                } else {
                    print_plan(&plan);
                }
                return Ok(ExitCode::SUCCESS);
            }

            let report = provisioner
                .provision(&request)
                .await
                .context("Provisioning failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }

            Ok(if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::Next { json } => {
            let record = gantry::Allocator::new(&config).peek()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("Next service: {}", config.unit_name(record.new_number));
                println!("   Port: {}", record.port);
                println!("   Last identifier: {}", record.last_number);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Render { id, working_dir } => {
            let working_dir = resolve_working_dir(working_dir)?;
            let port = gantry::compute_port(config.base_port, id)?;
            let provisioner = Provisioner::new(config, Arc::new(systemctl));
            let plan = provisioner.plan(
                &ProvisionRequest::new(working_dir),
                gantry::AllocationRecord {
                    last_number: id.saturating_sub(1),
                    new_number: id,
                    port,
                },
            )?;
            print_plan(&plan);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Update {
            force,
            id,
            unit,
            working_dir,
        } => {
            let working_dir = resolve_working_dir(working_dir)?;
            let unit = match (id, unit) {
                (_, Some(unit)) => unit,
                (Some(id), None) => config.unit_name(id),
                (None, None) => anyhow::bail!("Either --id or --unit is required"),
            };

            let updater = Updater::new(Arc::new(systemctl), Arc::new(git), &config.sentinel);
            match updater.run(&working_dir, &unit, force).await? {
                UpdateOutcome::NothingToDo => {
                    println!("No update pending for {}, nothing to do", unit);
                }
                UpdateOutcome::Updated { sentinel_removed } => {
                    println!("Updated {}", unit);
                    if sentinel_removed {
                        println!("   Cleared {}", config.sentinel);
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::List { json } => {
            let entries = inventory::scan(&config)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No services found in {}", config.unit_dir.display());
            } else {
                for entry in entries {
                    let port = entry
                        .port
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    let dir = entry
                        .working_directory
                        .map(|d| d.display().to_string())
                        .unwrap_or_else(|| "-".to_string());
                    match entry.error {
                        Some(err) => println!("  {:<20} {:>6}  {} ({})", entry.unit_name, port, dir, err),
                        None => println!("  {:<20} {:>6}  {}", entry.unit_name, port, dir),
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "gantry", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn resolve_working_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    Ok(match dir {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => cwd.join(dir),
        None => cwd,
    })
}

fn print_plan(plan: &ProvisionPlan) {
    println!("# {} (port {})", plan.unit_name, plan.record.port);
    println!("# {}", plan.descriptor_path.display());
    print!("{}", plan.descriptor);
    println!();
    println!("# {}", plan.script_path.display());
    print!("{}", plan.script);
}

fn print_report(report: &ProvisionReport) {
    println!("Provisioned {}", report.unit_name);
    println!("   Port: {}", report.record.port);
    println!("   Unit: {}", report.descriptor_path.display());
    println!("   Reload: {}", report.reload);
    println!("   Script: {} ({})", report.script_path.display(), report.script);
}
