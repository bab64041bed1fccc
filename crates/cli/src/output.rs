//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use uiflow_e2e::{Outcome, Scenario, ScenarioResult, SuiteResult};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<Cell>;
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No items found.");
                return;
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(items).unwrap_or_default());
        }
    }
}

/// Scenario row for `uiflow list`
#[derive(Serialize)]
pub struct ScenarioDisplay {
    pub name: String,
    pub tags: Vec<String>,
    pub auth: bool,
    pub steps: usize,
    pub assertions: usize,
    pub source: String,
}

impl From<&Scenario> for ScenarioDisplay {
    fn from(scenario: &Scenario) -> Self {
        Self {
            name: scenario.name.clone(),
            tags: scenario.tags.clone(),
            auth: scenario.auth.is_some(),
            steps: scenario.steps.len(),
            assertions: scenario.assertions.len(),
            source: scenario
                .source
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }
}

impl TableDisplay for ScenarioDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Tags", "Auth", "Steps", "Assertions", "File"]
    }

    fn row(&self) -> Vec<Cell> {
        vec![
            Cell::new(&self.name),
            Cell::new(self.tags.join(", ")),
            Cell::new(if self.auth { "yes" } else { "" }),
            Cell::new(self.steps),
            Cell::new(self.assertions),
            Cell::new(&self.source),
        ]
    }
}

/// Result row for `uiflow run`
#[derive(Serialize)]
#[serde(transparent)]
pub struct ResultDisplay<'a> {
    pub result: &'a ScenarioResult,
}

impl TableDisplay for ResultDisplay<'_> {
    fn headers() -> Vec<&'static str> {
        vec!["Scenario", "Result", "Flow", "Failed at", "Duration", "Diagnostics"]
    }

    fn row(&self) -> Vec<Cell> {
        let r = self.result;
        let status = match &r.outcome {
            Outcome::Pass => Cell::new("✓ pass").fg(Color::Green),
            Outcome::Fail { kind, .. } => Cell::new(format!("✗ {}", kind)).fg(Color::Red),
        };
        let failed_at = match &r.failed_step {
            Some(step) => match step.index {
                Some(i) => format!("{}. {}", i + 1, step.description),
                None => step.description.clone(),
            },
            None if r.passed() => String::new(),
            None => "assertions".to_string(),
        };
        let diagnostics = r
            .final_snapshot()
            .and_then(|s| s.snapshot_path.as_ref())
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        vec![
            Cell::new(&r.name),
            status,
            Cell::new(r.flow_state.to_string()),
            Cell::new(failed_at),
            Cell::new(format!("{:.1}s", r.duration_ms as f64 / 1000.0)),
            Cell::new(diagnostics),
        ]
    }
}

/// Print suite results and a one-line summary
pub fn print_suite(suite: &SuiteResult, format: OutputFormat) {
    let rows: Vec<ResultDisplay<'_>> = suite.results.iter().map(|result| ResultDisplay { result }).collect();

    match format {
        OutputFormat::Table => {
            print_list(&rows, format);
            for report in suite.results.iter().filter_map(|r| r.failure_report()) {
                print_error(&report);
            }
            let summary = format!(
                "{} passed, {} failed, {} total in {:.1}s",
                suite.passed,
                suite.failed,
                suite.total,
                suite.duration_ms as f64 / 1000.0
            );
            if suite.all_passed() {
                print_success(&summary);
            } else {
                println!("{} {}", "✗".red(), summary.red().bold());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(suite).unwrap_or_default());
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(suite).unwrap_or_default());
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message.green());
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message.dimmed());
}
