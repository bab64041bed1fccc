//! Validate Command

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use uiflow_e2e::scenario::Placeholders;
use uiflow_e2e::Scenario;

use crate::output::{print_error, print_success};

#[derive(Args)]
pub struct ValidateArgs {
    /// Scenario directory (overrides the configuration)
    #[arg(long)]
    pub scenarios: Option<PathBuf>,
}

/// Every file must parse, and every placeholder must resolve against the
/// current configuration. Returns whether all scenarios are valid.
pub fn execute(args: ValidateArgs, config_path: &Path) -> Result<bool> {
    let config = super::load_config(config_path)?;
    let dir = args.scenarios.unwrap_or_else(|| config.scenarios_dir.clone());

    let scenarios = Scenario::load_all(&dir).with_context(|| format!("validating {}", dir.display()))?;
    let placeholders = Placeholders::new(config.template_vars());

    let mut valid = true;
    for scenario in &scenarios {
        if let Err(e) = scenario.expand(&placeholders) {
            print_error(&format!("{}: {}", scenario.name, e));
            valid = false;
        }
    }

    if valid {
        print_success(&format!("{} scenario(s) valid in {}", scenarios.len(), dir.display()));
    }
    Ok(valid)
}
