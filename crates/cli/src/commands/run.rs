//! Run Command

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use uiflow_e2e::config::BrowserKind;
use uiflow_e2e::driver::{Browser, BrowserLauncher};
use uiflow_e2e::playwright::{check_playwright_installed, PlaywrightBrowser, PlaywrightConfig, PlaywrightLauncher};
use uiflow_e2e::target::TargetProbe;
use uiflow_e2e::{BrowserSource, HarnessConfig, RunnerConfig, ScenarioRunner};

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Only run scenarios with this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Only run the scenario with this name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Scenario directory (overrides the configuration)
    #[arg(long)]
    pub scenarios: Option<PathBuf>,

    /// Application base URL (overrides configuration and UIFLOW_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Scenarios run concurrently
    #[arg(short = 'j', long)]
    pub parallelism: Option<usize>,

    /// Browser engine (chromium, firefox, webkit)
    #[arg(long)]
    pub browser: Option<BrowserKind>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Launch one browser per scenario instead of sharing one
    #[arg(long)]
    pub isolated: bool,

    /// Skip waiting for the application to respond before starting
    #[arg(long)]
    pub no_preflight: bool,

    /// How long the preflight waits for the application, in seconds
    #[arg(long, default_value = "60")]
    pub preflight_timeout: u64,
}

impl RunArgs {
    fn apply(&self, config: &mut HarnessConfig) -> Result<()> {
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(parallelism) = self.parallelism {
            config.parallelism = parallelism;
        }
        if let Some(kind) = self.browser {
            config.browser.kind = kind;
        }
        if self.headed {
            config.browser.headless = false;
        }
        if self.isolated {
            config.browser.shared = false;
        }
        config.validate().context("invalid configuration after command-line overrides")?;
        Ok(())
    }
}

/// Returns whether every scenario passed
pub async fn execute(args: RunArgs, config_path: &Path, format: OutputFormat) -> Result<bool> {
    let mut config = super::load_config(config_path)?;
    args.apply(&mut config)?;

    let scenarios = super::load_scenarios(&config, args.scenarios.as_ref(), args.tag.as_deref(), args.name.as_deref())?;
    if scenarios.is_empty() {
        bail!("no scenarios matched the given filters");
    }
    if config.credentials.email.is_empty() && scenarios.iter().any(|s| s.auth.is_some()) {
        output::print_warning("No credentials configured; set UIFLOW_EMAIL and UIFLOW_PASSWORD");
    }

    if !args.no_preflight {
        preflight(&config.base_url, Duration::from_secs(args.preflight_timeout)).await?;
    }

    let playwright = PlaywrightConfig::from(&config.browser);
    check_playwright_installed(&playwright)?;

    let shared = if config.browser.shared {
        info!("Launching shared {} browser", config.browser.kind.as_str());
        Some(Arc::new(PlaywrightBrowser::launch(&playwright).await?))
    } else {
        None
    };
    let source = match &shared {
        Some(browser) => BrowserSource::Shared(Arc::clone(browser) as Arc<dyn Browser>),
        None => BrowserSource::PerScenario(Arc::new(PlaywrightLauncher::new(playwright)) as Arc<dyn BrowserLauncher>),
    };

    output::print_info(&format!(
        "Running {} scenario(s) against {} (parallelism {})",
        scenarios.len(),
        config.base_url,
        config.parallelism
    ));

    let runner = ScenarioRunner::new(source, RunnerConfig::from(&config));
    let suite = runner.run_suite(&scenarios).await;

    if let Some(browser) = shared {
        if let Err(e) = browser.close().await {
            warn!("Closing shared browser failed: {}", e);
        }
    }

    let path = runner.write_results(&suite)?;
    output::print_suite(&suite, format);
    if matches!(format, OutputFormat::Table) {
        output::print_info(&format!("Results written to {}", path.display()));
    }

    Ok(suite.all_passed())
}

async fn preflight(base_url: &str, timeout: Duration) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()));
    spinner.set_message(format!("Waiting for {}", base_url));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let probe = TargetProbe::new(base_url, timeout);
    let reached = probe.wait_until_reachable().await;
    spinner.finish_and_clear();

    reached.with_context(|| format!("{} is not reachable; start the application or pass --no-preflight", base_url))
}
