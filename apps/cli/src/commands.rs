//! Subcommand implementations

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use horizon_backend::{BackendSettings, HorizonBackend, HttpConnector};
use horizon_core::{CredentialKey, FileStorage};
use horizon_rotation::{DeploymentRole, RotationIntent, WalId};
use serde::Serialize;

use crate::args::{Command, StoreArgs};

pub async fn run(command: Command) -> Result<()> {
    match command {
        Command::Run { store, role } => serve(&store, role).await,
        Command::Wal { store, json } => wal(&store, json).await,
        Command::Queue { store, json } => queue(&store, json).await,
        Command::Release { store, id } => release(&store, id).await,
    }
}

async fn open(store: &StoreArgs) -> Result<HorizonBackend> {
    let settings = match &store.settings {
        Some(path) => BackendSettings::load(path)
            .await
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => BackendSettings::default(),
    };
    let storage = FileStorage::open(&store.data_dir)
        .await
        .with_context(|| format!("opening data directory {}", store.data_dir.display()))?;
    let connector = HttpConnector::with_timeout(settings.request_timeout)?;

    Ok(HorizonBackend::new(
        Arc::new(storage),
        settings,
        Arc::new(connector),
    )?)
}

async fn serve(store: &StoreArgs, role: Option<DeploymentRole>) -> Result<()> {
    let backend = open(store).await?;
    let role = role.unwrap_or(backend.settings().deployment_role);

    let report = backend.setup(role).await?;
    tracing::info!(
        %role,
        data_dir = %store.data_dir.display(),
        queued = report.queued,
        replayed = report.replayed,
        failed = report.failed,
        discarded = report.discarded,
        quarantined = report.quarantined,
        "horizond started"
    );
    for (key, ids) in backend.scheduler().paused_keys() {
        tracing::warn!(instance = %key, intents = ids.len(), "rotation paused by quarantined intents");
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for the interrupt signal")?;
    tracing::info!("shutting down");
    backend.teardown().await;
    Ok(())
}

#[derive(Debug, Serialize)]
struct PendingRow {
    id: WalId,
    instance: CredentialKey,
    principal: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct QuarantinedRow {
    id: WalId,
    instance: Option<CredentialKey>,
    reason: String,
    quarantined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct WalReport {
    pending: Vec<PendingRow>,
    quarantined: Vec<QuarantinedRow>,
}

async fn wal(store: &StoreArgs, json: bool) -> Result<()> {
    let backend = open(store).await?;
    let scheduler = backend.scheduler();

    let mut pending = Vec::new();
    for entry in scheduler.pending_intents().await? {
        let intent = RotationIntent::from_entry(entry)?;
        pending.push(PendingRow {
            id: intent.id,
            instance: intent.key,
            principal: intent.principal_username,
            created_at: intent.created_at,
        });
    }
    let quarantined = scheduler
        .quarantined()
        .await?
        .into_iter()
        .map(|q| QuarantinedRow {
            id: q.id,
            instance: q.key,
            reason: q.reason,
            quarantined_at: q.quarantined_at,
        })
        .collect();
    let report = WalReport {
        pending,
        quarantined,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("pending intents: {}", report.pending.len());
    for row in &report.pending {
        println!(
            "  {}  {:<24} {:<16} {}",
            row.id,
            row.instance.as_str(),
            row.principal,
            row.created_at.to_rfc3339()
        );
    }
    println!("quarantined intents: {}", report.quarantined.len());
    for row in &report.quarantined {
        let instance = row.instance.as_ref().map_or("-", CredentialKey::as_str);
        println!(
            "  {}  {:<24} {}  {}",
            row.id,
            instance,
            row.quarantined_at.to_rfc3339(),
            row.reason
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct QueueRow {
    instance: CredentialKey,
    due: DateTime<Utc>,
    overdue: bool,
}

async fn queue(store: &StoreArgs, json: bool) -> Result<()> {
    let backend = open(store).await?;
    // a standby builds the queue without replaying or rotating anything
    backend.setup(DeploymentRole::PerformanceStandby).await?;

    let now = Utc::now();
    let rows: Vec<QueueRow> = backend
        .scheduler()
        .planned()
        .into_iter()
        .map(|(instance, due)| QueueRow {
            instance,
            due,
            overdue: due <= now,
        })
        .collect();
    let paused = backend.scheduler().paused_keys();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("queued rotations: {}", rows.len());
    for row in &rows {
        let marker = if row.overdue { "  (overdue)" } else { "" };
        println!(
            "  {:<24} {}{marker}",
            row.instance.as_str(),
            row.due.to_rfc3339()
        );
    }
    if !paused.is_empty() {
        println!("paused: {}", paused.len());
        for (key, ids) in paused {
            println!("  {:<24} {} quarantined intent(s)", key.as_str(), ids.len());
        }
    }
    Ok(())
}

async fn release(store: &StoreArgs, id: WalId) -> Result<()> {
    let backend = open(store).await?;
    if backend.scheduler().release_quarantine(id).await? {
        println!("released {id}");
        Ok(())
    } else {
        anyhow::bail!("no quarantined intent with id {id}")
    }
}
