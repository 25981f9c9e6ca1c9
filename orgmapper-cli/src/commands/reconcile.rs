//! `orgmapper reconcile`: one pass against the live Grafana, then exit.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use orgmapper_controller::{reconcile_tenant, run_once, CycleSummary};
use orgmapper_core::types::{ResourceKey, DEFAULT_NAMESPACE};

use super::CliContext;

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Reconcile only this tenant.
    #[arg(long)]
    pub tenant: Option<String>,

    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Print the pass summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ReconcileArgs {
    pub fn run(self, ctx: &CliContext) -> Result<()> {
        let engine = ctx.engine()?;

        if let Some(name) = self.tenant {
            let key = ResourceKey::new(self.namespace, name);
            let outcome = reconcile_tenant(&engine, &key)
                .with_context(|| format!("reconcile of tenant '{key}' failed"))?;
            println!("{} {key}: {outcome:?}", "reconciled".green().bold());
            return Ok(());
        }

        let summary = run_once(&engine).context("reconcile pass failed")?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("failed to serialize summary")?
            );
        } else {
            print_summary(&summary);
        }
        if summary.failed > 0 {
            bail!("{} tenant(s) failed to reconcile; see 'orgmapper tenant list'", summary.failed);
        }
        Ok(())
    }
}

fn print_summary(summary: &CycleSummary) {
    println!(
        "{} {} tenants in {}ms: {} created, {} updated, {} up to date, {} finalized, {} failed",
        "reconciled".green().bold(),
        summary.tenants,
        summary.duration_ms,
        summary.created,
        summary.updated,
        summary.up_to_date,
        summary.finalized,
        if summary.failed > 0 {
            summary.failed.to_string().red().bold().to_string()
        } else {
            summary.failed.to_string()
        },
    );
}
