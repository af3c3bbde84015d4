//! `dandimirror status`: what each mirror under the target holds.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use dandimirror_sync::{mirror_status, MirrorStatus};

use super::{load_config, target_dir, ArchiveArgs};

/// Arguments for `dandimirror status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Directory holding the mirrors [default: configured target, else current directory].
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusReportJson<'a> {
    target: &'a PathBuf,
    mirrors: &'a [MirrorStatus],
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "collection")]
    collection: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "head")]
    head: String,
    #[tabled(rename = "authored")]
    authored: String,
    #[tabled(rename = "snapshots")]
    snapshots: usize,
    #[tabled(rename = "files")]
    tracked: usize,
}

impl StatusArgs {
    pub fn run(self) -> Result<ExitCode> {
        let archive = ArchiveArgs {
            target: self.target.clone(),
            ..Default::default()
        };
        let config = load_config(&archive)?;
        let target = target_dir(&config)?;
        let mirrors = mirror_status(&target)
            .with_context(|| format!("failed to read mirrors under {}", target.display()))?;

        if self.json {
            let payload = StatusReportJson {
                target: &target,
                mirrors: &mirrors,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
            );
            return Ok(ExitCode::SUCCESS);
        }

        print_table(&target, mirrors);
        Ok(ExitCode::SUCCESS)
    }
}

fn print_table(target: &std::path::Path, mirrors: Vec<MirrorStatus>) {
    println!(
        "dandimirror v{} | {} | {} mirrors",
        env!("CARGO_PKG_VERSION"),
        target.display(),
        mirrors.len()
    );
    if mirrors.is_empty() {
        println!("No mirrors found.");
        return;
    }

    let uncommitted = mirrors.iter().filter(|m| m.head.is_none()).count();
    let rows: Vec<StatusTableRow> = mirrors
        .into_iter()
        .map(|m| StatusTableRow {
            collection: m.collection.0,
            name: m.name.unwrap_or_default(),
            head: match m.head {
                Some(id) => id[..id.len().min(12)].green().to_string(),
                None => "none".bright_black().to_string(),
            },
            authored: m
                .author_timestamp
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
            snapshots: m.snapshots,
            tracked: m.tracked,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if uncommitted > 0 {
        println!("{uncommitted} mirror(s) have no snapshot yet; run 'dandimirror sync'.");
    }
}
