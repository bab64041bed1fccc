//! Declarative YAML scenarios

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::auth::AuthPrecondition;
use crate::driver::Viewport;
use crate::error::{E2eError, E2eResult};
use crate::executor::UrlPattern;
use crate::step::Step;

/// One end-to-end test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Overrides the configured viewport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,

    /// Sign in before the steps run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthPrecondition>,

    /// Steps to execute in order
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Checks on the final state, evaluated even if a step failed
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub assertions: Vec<Assertion>,

    /// Budget for each assertion; the configured default otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion_timeout_ms: Option<u64>,

    /// File this scenario was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Terminal check on observable state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assertion {
    /// Text is visible somewhere on the page, frames included
    TextVisible(String),
    /// Current URL matches (substring, or regex with `re:`)
    UrlMatches(String),
    /// Current URL does not match
    UrlExcludes(String),
}

impl Assertion {
    pub fn describe(&self) -> String {
        match self {
            Assertion::TextVisible(text) => format!("text visible: {}", text),
            Assertion::UrlMatches(pattern) => format!("url matches: {}", pattern),
            Assertion::UrlExcludes(pattern) => format!("url excludes: {}", pattern),
        }
    }

    fn value(&self) -> &str {
        match self {
            Assertion::TextVisible(v) | Assertion::UrlMatches(v) | Assertion::UrlExcludes(v) => v,
        }
    }

    fn map<F>(&self, f: F) -> E2eResult<Self>
    where
        F: FnOnce(&str) -> E2eResult<String>,
    {
        Ok(match self {
            Assertion::TextVisible(v) => Assertion::TextVisible(f(v)?),
            Assertion::UrlMatches(v) => Assertion::UrlMatches(f(v)?),
            Assertion::UrlExcludes(v) => Assertion::UrlExcludes(f(v)?),
        })
    }
}

impl Scenario {
    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Scenario = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut scenario = Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))?;
        scenario.source = Some(path.to_path_buf());
        Ok(scenario)
    }

    /// Load every `.yaml`/`.yml` scenario under `dir`, sorted by path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(E2eError::SpecParse(format!(
                "scenario directory {} does not exist",
                dir.display()
            )));
        }

        let mut scenarios = Vec::new();
        let mut names = HashSet::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            let scenario = Self::from_file(entry.path())?;
            if !names.insert(scenario.name.clone()) {
                return Err(E2eError::SpecParse(format!(
                    "duplicate scenario name '{}' in {}",
                    scenario.name,
                    entry.path().display()
                )));
            }
            scenarios.push(scenario);
        }

        Ok(scenarios)
    }

    /// Select by tag and/or name
    pub fn matches(&self, tag: Option<&str>, name: Option<&str>) -> bool {
        tag.map_or(true, |t| self.tags.iter().any(|s| s == t)) && name.map_or(true, |n| self.name == n)
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::SpecParse("scenario name must not be empty".into()));
        }
        if self.steps.is_empty() && self.assertions.is_empty() && self.auth.is_none() {
            return Err(E2eError::SpecParse(format!(
                "scenario '{}' has no auth, steps or assertions",
                self.name
            )));
        }
        for assertion in &self.assertions {
            if assertion.value().trim().is_empty() {
                return Err(E2eError::SpecParse(format!(
                    "scenario '{}': empty assertion ({})",
                    self.name,
                    assertion.describe()
                )));
            }
            if let Assertion::UrlMatches(p) | Assertion::UrlExcludes(p) = assertion {
                UrlPattern::parse(p)?;
            }
        }
        Ok(())
    }

    /// Copy with every `${name}` placeholder expanded
    pub fn expand(&self, placeholders: &Placeholders) -> E2eResult<Self> {
        let expand = |s: &str| placeholders.expand(s);

        let steps = self
            .steps
            .iter()
            .map(|step| step.expand(expand))
            .collect::<E2eResult<Vec<_>>>()
            .map_err(|e| self.context(e))?;
        let auth = match &self.auth {
            Some(pre) => Some(pre.expand(expand).map_err(|e| self.context(e))?),
            None => None,
        };
        let assertions = self
            .assertions
            .iter()
            .map(|a| a.map(expand))
            .collect::<E2eResult<Vec<_>>>()
            .map_err(|e| self.context(e))?;

        Ok(Self {
            steps,
            auth,
            assertions,
            ..self.clone()
        })
    }

    fn context(&self, err: E2eError) -> E2eError {
        match err {
            E2eError::SpecParse(msg) => E2eError::SpecParse(format!("scenario '{}': {}", self.name, msg)),
            other => other,
        }
    }
}

/// Values for `${name}` placeholders. `${unique}` is generated once per
/// instance so one run sees one token.
#[derive(Debug, Clone)]
pub struct Placeholders {
    values: BTreeMap<String, String>,
}

impl Placeholders {
    pub fn new(mut values: BTreeMap<String, String>) -> Self {
        values
            .entry("unique".to_string())
            .or_insert_with(|| uuid::Uuid::new_v4().simple().to_string()[..10].to_string());
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn expand(&self, input: &str) -> E2eResult<String> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(E2eError::SpecParse(format!("unterminated placeholder in '{}'", input)));
            };
            let name = &after[..end];
            if !is_identifier(name) {
                return Err(E2eError::SpecParse(format!("invalid placeholder '${{{}}}'", name)));
            }
            let value = self
                .values
                .get(name)
                .ok_or_else(|| E2eError::SpecParse(format!("unknown placeholder '${{{}}}'", name)))?;

            out.push_str(&rest[..start]);
            out.push_str(value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
