//! orgmapper: keep Grafana's SSO org mapping in step with tenant records.
//!
//! # Usage
//!
//! ```text
//! orgmapper tenant apply <file>
//! orgmapper tenant list [--json]
//! orgmapper tenant delete <name> [--namespace <ns>]
//! orgmapper mapping show [--json]
//! orgmapper mapping diff
//! orgmapper reconcile [--tenant <name>] [--namespace <ns>]
//! orgmapper run
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    mapping::MappingCommand, reconcile::ReconcileArgs, run::RunArgs, tenant::TenantCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "orgmapper",
    version,
    about = "Reconcile tenant records into Grafana's SSO org mapping",
    long_about = None,
)]
struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage tenant records in the local store.
    Tenant {
        #[command(subcommand)]
        command: TenantCommand,
    },

    /// Inspect the orgMapping document.
    Mapping {
        #[command(subcommand)]
        command: MappingCommand,
    },

    /// Run a single reconciliation pass and exit.
    Reconcile(ReconcileArgs),

    /// Run the controller until interrupted.
    Run(RunArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = commands::CliContext::load(cli.log_json)?;
    match cli.command {
        Commands::Tenant { command } => commands::tenant::run(&ctx, command),
        Commands::Mapping { command } => commands::mapping::run(&ctx, command),
        Commands::Reconcile(args) => args.run(&ctx),
        Commands::Run(args) => args.run(ctx),
    }
}
