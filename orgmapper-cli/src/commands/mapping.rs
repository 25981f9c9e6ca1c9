//! `orgmapper mapping`: render the desired orgMapping document and compare
//! it with what Grafana holds.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use orgmapper_grafana::{current_org_mapping, mapping_diff};
use orgmapper_mapping::{decode, MappingEntry};

use super::CliContext;

#[derive(Subcommand, Debug)]
pub enum MappingCommand {
    /// Print the document the current tenant records produce. Offline.
    Show {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Compare Grafana's orgMapping with the desired document.
    Diff,
}

pub fn run(ctx: &CliContext, command: MappingCommand) -> Result<()> {
    match command {
        MappingCommand::Show { json } => show(ctx, json),
        MappingCommand::Diff => diff(ctx),
    }
}

#[derive(Serialize)]
struct MappingJson {
    document: String,
    entries: Vec<MappingEntry>,
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "group / user")]
    subject: String,
    #[tabled(rename = "org")]
    org_id: String,
    #[tabled(rename = "role")]
    role: String,
}

fn show(ctx: &CliContext, json: bool) -> Result<()> {
    let document = ctx
        .offline_engine()
        .desired_document()
        .context("failed to build the desired orgMapping")?;
    let entries = decode(&document).context("desired orgMapping does not decode")?;

    if json {
        let payload = MappingJson { document, entries };
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to serialize mapping JSON")?
        );
        return Ok(());
    }

    if entries.is_empty() {
        println!("No mapping entries. Tenants without groups contribute nothing.");
        return Ok(());
    }

    println!("{}", document);
    let rows: Vec<EntryRow> = entries
        .into_iter()
        .map(|entry| EntryRow {
            subject: entry.subject,
            org_id: entry.org_id,
            role: entry.role.to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn diff(ctx: &CliContext) -> Result<()> {
    let desired = ctx
        .offline_engine()
        .desired_document()
        .context("failed to build the desired orgMapping")?;
    let grafana = ctx.grafana()?;
    let current = current_org_mapping(grafana.as_ref())
        .context("failed to read orgMapping from Grafana")?;

    let Some(current) = current else {
        println!(
            "{} generic_oauth is not configured in Grafana; the next reconcile writes {} entries",
            "!".yellow().bold(),
            desired.split(',').filter(|e| !e.trim().is_empty()).count(),
        );
        return Ok(());
    };

    match mapping_diff(&current, &desired) {
        None => println!("{} orgMapping is up to date", "✓".green().bold()),
        Some(diff) => {
            print!("{}", diff.unified_diff);
            println!(
                "{} added, {} removed",
                format!("+{}", diff.added).green(),
                format!("-{}", diff.removed).red(),
            );
        }
    }
    Ok(())
}
