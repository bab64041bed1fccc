//! List Command

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;

use crate::output::{print_list, OutputFormat, ScenarioDisplay};

#[derive(Args)]
pub struct ListArgs {
    /// Only list scenarios with this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Scenario directory (overrides the configuration)
    #[arg(long)]
    pub scenarios: Option<PathBuf>,
}

pub fn execute(args: ListArgs, config_path: &Path, format: OutputFormat) -> Result<bool> {
    let config = super::load_config(config_path)?;
    let scenarios = super::load_scenarios(&config, args.scenarios.as_ref(), args.tag.as_deref(), None)?;

    let rows: Vec<ScenarioDisplay> = scenarios.iter().map(ScenarioDisplay::from).collect();
    print_list(&rows, format);
    Ok(true)
}
