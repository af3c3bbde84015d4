//! `dandimirror diff <id>`: show what a sync would change, without writing.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use dandimirror_sync::SyncAction;

use super::{build_mirrorer, load_config, parse_collection_id, ArchiveArgs};

/// Arguments for `dandimirror diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Collection to diff.
    pub id: String,

    #[command(flatten)]
    pub archive: ArchiveArgs,
}

impl DiffArgs {
    pub async fn run(self) -> Result<ExitCode> {
        let config = load_config(&self.archive)?;
        let mirrorer = build_mirrorer(&config)?;
        let id = parse_collection_id(&self.id);

        let result = mirrorer
            .plan_collection(&id)
            .await
            .with_context(|| format!("diff failed for '{id}'"))?;

        if result.plan.is_noop() && result.metadata_diff.is_empty() {
            println!("No differences for '{id}'.");
            return Ok(ExitCode::SUCCESS);
        }

        for (path, action) in &result.plan.actions {
            match action {
                SyncAction::Unchanged => {}
                SyncAction::FetchNew(_) => println!("{} {path}", "+".green()),
                SyncAction::FetchModified(..) => println!("{} {path}", "~".yellow()),
                SyncAction::Delete(_) => println!("{} {path}", "-".red()),
            }
        }
        let summary = result.plan.summary();
        println!(
            "{id}: {} new, {} modified, {} to delete, {} unchanged",
            summary.new, summary.modified, summary.delete, summary.unchanged
        );

        if !result.metadata_diff.is_empty() {
            print!("{}", result.metadata_diff);
            if !result.metadata_diff.ends_with('\n') {
                println!();
            }
        }

        Ok(ExitCode::SUCCESS)
    }
}
