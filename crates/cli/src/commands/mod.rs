//! CLI Commands

pub mod list;
pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use uiflow_e2e::{HarnessConfig, Scenario};

/// Load configuration from `path`; env overrides already applied
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    HarnessConfig::load(path).with_context(|| format!("loading configuration from {}", path.display()))
}

/// Discover scenarios and keep those matching the filters
pub fn load_scenarios(
    config: &HarnessConfig,
    dir: Option<&PathBuf>,
    tag: Option<&str>,
    name: Option<&str>,
) -> Result<Vec<Scenario>> {
    let dir = dir.unwrap_or(&config.scenarios_dir);
    let scenarios = Scenario::load_all(dir).with_context(|| format!("loading scenarios from {}", dir.display()))?;
    Ok(scenarios.into_iter().filter(|s| s.matches(tag, name)).collect())
}
