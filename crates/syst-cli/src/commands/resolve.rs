use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use syst_core::serde::to_canonical_json_pretty;
use syst_corr::{load_layers, resolve, Resolution};
use tracing::info;

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Global configuration layer.
    #[arg(long)]
    pub global: PathBuf,
    /// Optional process layer.
    #[arg(long)]
    pub process: Option<PathBuf>,
    /// Optional dataset layer.
    #[arg(long)]
    pub dataset: Option<PathBuf>,
    /// Pipeline stage the corrections are resolved for.
    #[arg(long)]
    pub stage: String,
}

#[derive(Debug, Serialize)]
struct ResolveReport<'a> {
    era: &'a str,
    campaign: &'a str,
    #[serde(flatten)]
    resolution: &'a Resolution,
}

pub fn run(args: &ResolveArgs) -> Result<(), Box<dyn Error>> {
    let config = load_layers(
        &args.global,
        args.process.as_deref(),
        args.dataset.as_deref(),
    )?;
    let era = config.era()?;
    let resolution = resolve(&config, &args.stage)?;
    info!(
        era = era.name(),
        stage = %args.stage,
        active = resolution.active.len(),
        "resolved corrections"
    );
    let report = ResolveReport {
        era: era.name(),
        campaign: era.campaign(),
        resolution: &resolution,
    };
    println!("{}", to_canonical_json_pretty(&report)?);
    Ok(())
}
