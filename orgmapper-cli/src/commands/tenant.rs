//! `orgmapper tenant`: manage tenant records in the local store.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use orgmapper_core::types::{
    ConditionReason, ConditionStatus, ConditionType, ResourceKey, Tenant, DEFAULT_NAMESPACE,
};
use orgmapper_core::TenantStore;

use super::CliContext;

#[derive(Subcommand, Debug)]
pub enum TenantCommand {
    /// Create or update a tenant from a YAML manifest.
    Apply {
        /// Path to the manifest.
        file: PathBuf,
    },

    /// List tenants and their reconcile state.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Mark a tenant for deletion. The next reconcile drops it from the
    /// mapping and removes the record.
    Delete {
        name: String,

        #[arg(long, default_value = DEFAULT_NAMESPACE)]
        namespace: String,
    },
}

pub fn run(ctx: &CliContext, command: TenantCommand) -> Result<()> {
    match command {
        TenantCommand::Apply { file } => apply(ctx, &file),
        TenantCommand::List { json } => list(ctx, json),
        TenantCommand::Delete { name, namespace } => delete(ctx, &ResourceKey::new(namespace, name)),
    }
}

// ---------------------------------------------------------------------------
// apply / delete
// ---------------------------------------------------------------------------

fn apply(ctx: &CliContext, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read '{}'", file.display()))?;
    let tenant: Tenant = serde_yaml::from_str(&raw)
        .with_context(|| format!("'{}' is not a valid Tenant manifest", file.display()))?;
    if !tenant.is_tenant_kind() {
        bail!("'{}' has kind '{}', expected 'Tenant'", file.display(), tenant.kind);
    }
    if tenant.spec.tenant_id.as_str().is_empty() {
        bail!("'{}' has an empty spec.tenantId", file.display());
    }

    let stored = ctx
        .store()
        .apply(tenant)
        .context("failed to write tenant record")?;
    println!(
        "{} tenant {} (tenantId {}, org {})",
        "applied".green().bold(),
        stored.key(),
        stored.spec.tenant_id,
        stored.spec.org_id,
    );
    Ok(())
}

fn delete(ctx: &CliContext, key: &ResourceKey) -> Result<()> {
    ctx.store()
        .mark_deleted(key)
        .with_context(|| format!("failed to mark tenant '{key}' for deletion"))?;
    println!("{} tenant {key} for deletion", "marked".yellow().bold());
    Ok(())
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum TenantState {
    Ready,
    Pending,
    Error,
    Deleting,
}

impl TenantState {
    fn of(tenant: &Tenant) -> Self {
        if tenant.is_deleting() {
            return TenantState::Deleting;
        }
        let synced = tenant.status.condition(ConditionType::Synced);
        if synced.is_some_and(|c| c.reason == ConditionReason::ReconcileError) {
            return TenantState::Error;
        }
        let ready = tenant.status.condition(ConditionType::Ready);
        match ready {
            Some(c) if c.status == ConditionStatus::True => TenantState::Ready,
            _ => TenantState::Pending,
        }
    }

    fn label(self) -> String {
        match self {
            TenantState::Ready => "READY".green().bold().to_string(),
            TenantState::Pending => "PENDING".yellow().bold().to_string(),
            TenantState::Error => "ERROR".red().bold().to_string(),
            TenantState::Deleting => "DELETING".magenta().bold().to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TenantJson {
    namespace: String,
    name: String,
    tenant_id: String,
    org_id: String,
    state: TenantState,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_synced: Option<DateTime<Utc>>,
}

#[derive(Tabled)]
struct TenantTableRow {
    #[tabled(rename = "tenant")]
    key: String,
    #[tabled(rename = "tenant id")]
    tenant_id: String,
    #[tabled(rename = "org")]
    org_id: String,
    #[tabled(rename = "groups")]
    groups: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "last sync")]
    last_synced: String,
    #[tabled(rename = "detail")]
    detail: String,
}

fn list(ctx: &CliContext, json: bool) -> Result<()> {
    let tenants = ctx.store().list().context("failed to list tenant records")?;
    if json {
        let payload: Vec<TenantJson> = tenants.iter().map(tenant_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to serialize tenant JSON")?
        );
        return Ok(());
    }

    if tenants.is_empty() {
        println!("No tenants found. Add one with 'orgmapper tenant apply <file>'.");
        return Ok(());
    }

    let separator = "■".repeat(67).bright_black().to_string();
    let rows: Vec<TenantTableRow> = tenants
        .iter()
        .map(|tenant| TenantTableRow {
            key: tenant.key().to_string(),
            tenant_id: tenant.spec.tenant_id.to_string(),
            org_id: tenant.spec.org_id.to_string(),
            groups: group_summary(tenant),
            state: TenantState::of(tenant).label(),
            last_synced: last_synced(tenant)
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string()),
            detail: condition_message(tenant).unwrap_or_default(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{separator}");
    println!("{table}");
    println!("{separator}");
    Ok(())
}

fn tenant_json(tenant: &Tenant) -> TenantJson {
    TenantJson {
        namespace: tenant.metadata.namespace.clone(),
        name: tenant.metadata.name.clone(),
        tenant_id: tenant.spec.tenant_id.to_string(),
        org_id: tenant.spec.org_id.to_string(),
        state: TenantState::of(tenant),
        message: condition_message(tenant),
        last_synced: last_synced(tenant),
    }
}

fn last_synced(tenant: &Tenant) -> Option<DateTime<Utc>> {
    tenant
        .status
        .at_provider
        .as_ref()
        .and_then(|obs| obs.last_updated)
}

fn condition_message(tenant: &Tenant) -> Option<String> {
    tenant
        .status
        .condition(ConditionType::Synced)
        .and_then(|c| c.message.clone())
}

fn group_summary(tenant: &Tenant) -> String {
    let spec = &tenant.spec;
    format!(
        "{}v/{}e/{}a",
        spec.viewer_groups.len(),
        spec.editor_groups.len(),
        spec.admin_groups.len(),
    )
}
