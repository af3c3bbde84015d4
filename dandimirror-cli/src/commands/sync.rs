//! `dandimirror sync`: bring mirrors up to date with the archive.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use dandimirror_core::CollectionId;
use dandimirror_sync::{cancel_pair, ExitStatus, SyncError, SyncResult};

use super::{build_mirrorer, load_config, parse_collection_id, ArchiveArgs};

/// Arguments for `dandimirror sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Collections to sync; every collection in the archive when omitted.
    pub ids: Vec<String>,

    #[command(flatten)]
    pub archive: ArchiveArgs,

    /// Concurrent asset fetches per collection.
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Collections synced concurrently.
    #[arg(long)]
    pub collection_jobs: Option<usize>,

    /// Exit successfully even if individual assets failed.
    #[arg(short = 'i', long)]
    pub ignore_errors: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub async fn run(self) -> Result<ExitCode> {
        let mut config = load_config(&self.archive)?;
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(collection_jobs) = self.collection_jobs {
            config.collection_jobs = collection_jobs;
        }
        let ignore_errors = self.ignore_errors || config.ignore_errors;
        let mirrorer = build_mirrorer(&config)?;

        let (handle, token) = cancel_pair();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping before commit");
                handle.cancel();
            }
        });

        let results = if self.ids.is_empty() {
            mirrorer
                .sync_all(&token)
                .await
                .context("failed to enumerate collections")?
        } else {
            let ids = self.ids.iter().map(|raw| parse_collection_id(raw)).collect();
            mirrorer.sync_many(ids, &token).await
        };

        if self.json {
            print_json(&results)?;
        } else {
            print_results(&results);
        }

        let partial = results
            .iter()
            .any(|(_, r)| matches!(r, Ok(res) if !res.is_clean()));
        if ignore_errors && partial {
            tracing::warn!("some assets failed; exiting 0 because errors are ignored");
        }
        Ok(ExitCode::from(ExitStatus::from_results(&results, ignore_errors).code()))
    }
}

#[derive(Serialize)]
struct CollectionJson<'a> {
    collection: &'a CollectionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a SyncResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn print_json(results: &[(CollectionId, Result<SyncResult, SyncError>)]) -> Result<()> {
    let payload: Vec<CollectionJson<'_>> = results
        .iter()
        .map(|(id, result)| match result {
            Ok(res) => CollectionJson {
                collection: id,
                result: Some(res),
                error: None,
            },
            Err(err) => CollectionJson {
                collection: id,
                result: None,
                error: Some(err.to_string()),
            },
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize sync JSON")?
    );
    Ok(())
}

fn print_results(results: &[(CollectionId, Result<SyncResult, SyncError>)]) {
    if results.is_empty() {
        println!("No collections to sync.");
        return;
    }
    for (id, result) in results {
        match result {
            Err(err) => println!("{} {id}: {err}", "✗".red().bold()),
            Ok(res) => {
                let mark = if res.is_clean() {
                    "✓".green().bold()
                } else {
                    "!".yellow().bold()
                };
                let snapshot = res
                    .snapshot
                    .as_deref()
                    .map(|s| format!(", snapshot {}", &s[..s.len().min(12)]))
                    .unwrap_or_default();
                println!(
                    "{mark} {id}: {} synced, {} deleted, {} unchanged, {} failed{snapshot}",
                    res.synced.len(),
                    res.deleted.len(),
                    res.unchanged,
                    res.errors.len(),
                );
                for err in &res.errors {
                    println!("  {}  {}: {}", "✗".red(), err.path, err.kind);
                }
                for notice in &res.notices {
                    println!(
                        "  {}  {}: no archive hash, verified by size only",
                        "~".yellow(),
                        notice.path
                    );
                }
            }
        }
    }
}
