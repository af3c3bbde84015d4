//! `dandimirror instances`: known archive deployments as YAML.

use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use dandimirror_core::config::known_instances;

/// Arguments for `dandimirror instances`.
#[derive(Args, Debug)]
pub struct InstancesArgs {}

#[derive(Serialize)]
struct InstanceView {
    api: String,
    download_base: String,
}

impl InstancesArgs {
    pub fn run(self) -> Result<ExitCode> {
        let view: BTreeMap<String, InstanceView> = known_instances()
            .into_iter()
            .map(|i| {
                (
                    i.name,
                    InstanceView {
                        api: i.api,
                        download_base: i.download_base,
                    },
                )
            })
            .collect();
        print!(
            "{}",
            serde_yaml::to_string(&view).context("failed to serialize instances")?
        );
        Ok(ExitCode::SUCCESS)
    }
}
