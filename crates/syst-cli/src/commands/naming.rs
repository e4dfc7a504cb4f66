use std::error::Error;

use clap::Args;
use serde_json::json;
use syst_core::serde::to_canonical_json_pretty;
use syst_core::{split_systematic_name, systematic_name, Scale, Source};

#[derive(Args, Debug)]
pub struct NameArgs {
    /// Uncertainty source, `Central` for the nominal.
    pub source: String,
    /// `Central`, `Up` or `Down`.
    pub scale: String,
}

#[derive(Args, Debug)]
pub struct SplitArgs {
    /// Systematic name such as `JES_TotalUp`.
    pub name: String,
}

pub fn run_name(args: &NameArgs) -> Result<(), Box<dyn Error>> {
    let scale: Scale = args.scale.parse()?;
    println!("{}", systematic_name(&Source::new(args.source.as_str()), scale)?);
    Ok(())
}

pub fn run_split(args: &SplitArgs) -> Result<(), Box<dyn Error>> {
    let (source, scale) = split_systematic_name(&args.name)?;
    let body = json!({ "source": source.as_str(), "scale": scale.as_str() });
    println!("{}", to_canonical_json_pretty(&body)?);
    Ok(())
}
