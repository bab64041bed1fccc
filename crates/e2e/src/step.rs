//! Typed actions executed in order by a scenario

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::selector::SelectorSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Fill,
    Click,
    Navigate,
    #[serde(alias = "wait", alias = "wait_for")]
    WaitForCondition,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Fill => "fill",
            Action::Click => "click",
            Action::Navigate => "navigate",
            Action::WaitForCondition => "wait",
        };
        f.write_str(s)
    }
}

/// What a `wait_for_condition` step waits for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Target resolves to a visible element
    #[default]
    Visible,
    /// Target no longer resolves to a visible element
    Hidden,
    /// `value` is visible as text in any frame
    TextVisible,
    /// Current URL contains `value`
    UrlMatches,
    /// JavaScript expression `value` evaluates truthy
    Expression,
}

/// One immutable step. Build with the constructors or deserialize; fields are
/// read through accessors only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct Step {
    action: Action,
    target: Option<SelectorSet>,
    value: Option<String>,
    condition: Option<Condition>,
    timeout_ms: Option<u64>,
    label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawStep {
    action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<SelectorSet>,
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
}

impl TryFrom<RawStep> for Step {
    type Error = E2eError;

    fn try_from(raw: RawStep) -> E2eResult<Self> {
        let step = Step {
            action: raw.action,
            target: raw.target,
            value: raw.value,
            condition: raw.condition,
            timeout_ms: raw.timeout_ms,
            label: raw.label,
        };
        step.validate()?;
        Ok(step)
    }
}

impl From<Step> for RawStep {
    fn from(step: Step) -> Self {
        RawStep {
            action: step.action,
            target: step.target,
            value: step.value,
            condition: step.condition,
            timeout_ms: step.timeout_ms,
            label: step.label,
        }
    }
}

impl Step {
    pub fn fill(target: SelectorSet, value: impl Into<String>) -> Self {
        Self::bare(Action::Fill, Some(target), Some(value.into()), None)
    }

    pub fn click(target: SelectorSet) -> Self {
        Self::bare(Action::Click, Some(target), None, None)
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::bare(Action::Navigate, None, Some(url.into()), None)
    }

    pub fn wait_visible(target: SelectorSet) -> Self {
        Self::bare(Action::WaitForCondition, Some(target), None, Some(Condition::Visible))
    }

    pub fn wait_for(condition: Condition, value: impl Into<String>) -> Self {
        Self::bare(Action::WaitForCondition, None, Some(value.into()), Some(condition))
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn bare(action: Action, target: Option<SelectorSet>, value: Option<String>, condition: Option<Condition>) -> Self {
        Self {
            action,
            target,
            value,
            condition,
            timeout_ms: None,
            label: None,
        }
    }

    fn validate(&self) -> E2eResult<()> {
        let missing = |what: &str| Err(E2eError::SpecParse(format!("{} step requires '{}'", self.action, what)));

        match self.action {
            Action::Fill => {
                if self.target.is_none() {
                    return missing("target");
                }
                if self.value.is_none() {
                    return missing("value");
                }
            }
            Action::Click => {
                if self.target.is_none() {
                    return missing("target");
                }
            }
            Action::Navigate => {
                if self.value.is_none() {
                    return missing("url");
                }
            }
            Action::WaitForCondition => match self.condition() {
                Condition::Visible | Condition::Hidden => {
                    if self.target.is_none() {
                        return missing("target");
                    }
                }
                Condition::TextVisible | Condition::UrlMatches | Condition::Expression => {
                    if self.value.is_none() {
                        return missing("value");
                    }
                }
            },
        }
        Ok(())
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn target(&self) -> Option<&SelectorSet> {
        self.target.as_ref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn condition(&self) -> Condition {
        self.condition.unwrap_or_default()
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Copy of this step with every string field passed through `f`
    pub fn expand<F>(&self, mut f: F) -> E2eResult<Self>
    where
        F: FnMut(&str) -> E2eResult<String>,
    {
        let target = match &self.target {
            Some(set) => Some(set.try_map(&mut f)?),
            None => None,
        };
        let value = match &self.value {
            Some(v) => Some(f(v)?),
            None => None,
        };
        Ok(Self {
            target,
            value,
            ..self.clone()
        })
    }

    /// Short human description, e.g. `click:button[type="submit"]`
    pub fn describe(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        match self.action {
            Action::Navigate => format!("navigate:{}", self.value.as_deref().unwrap_or_default()),
            Action::WaitForCondition => match (&self.target, &self.value) {
                (Some(t), _) => format!("wait:{:?}:{}", self.condition(), t),
                (None, Some(v)) => format!("wait:{:?}:{}", self.condition(), v),
                (None, None) => "wait".to_string(),
            },
            _ => format!(
                "{}:{}",
                self.action,
                self.target.as_ref().map(|t| t.to_string()).unwrap_or_default()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_steps() {
        let yaml = r#"
- action: navigate
  url: /dashboard
- action: fill
  target: ['#bucket-name', 'input[name="name"]']
  value: my-bucket
- action: click
  target: 'button:has-text("Create")'
  timeout_ms: 5000
- action: wait
  condition: text_visible
  value: Bucket created
"#;
        let steps: Vec<Step> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].action(), Action::Navigate);
        assert_eq!(steps[0].value(), Some("/dashboard"));
        assert_eq!(steps[1].target().unwrap().len(), 2);
        assert_eq!(steps[2].timeout_ms(), Some(5000));
        assert_eq!(steps[3].condition(), Condition::TextVisible);
    }

    #[test]
    fn test_fill_without_value_rejected() {
        let yaml = "action: fill\ntarget: '#email'\n";
        let err = serde_yaml::from_str::<Step>(yaml).unwrap_err();
        assert!(err.to_string().contains("requires 'value'"), "{err}");
    }

    #[test]
    fn test_click_without_target_rejected() {
        assert!(serde_yaml::from_str::<Step>("action: click\n").is_err());
    }

    #[test]
    fn test_wait_visible_defaults_condition() {
        let step: Step = serde_yaml::from_str("action: wait_for_condition\ntarget: '#app'\n").unwrap();
        assert_eq!(step.condition(), Condition::Visible);
    }

    #[test]
    fn test_expand_leaves_original_untouched() {
        let step = Step::fill(SelectorSet::single("#email"), "${email}");
        let expanded = step
            .expand(|s| Ok(s.replace("${email}", "user@example.com")))
            .unwrap();
        assert_eq!(expanded.value(), Some("user@example.com"));
        assert_eq!(step.value(), Some("${email}"));
    }

    #[test]
    fn test_describe() {
        assert_eq!(Step::click(SelectorSet::single("#go")).describe(), "click:#go");
        assert_eq!(Step::navigate("/x").describe(), "navigate:/x");
        assert_eq!(Step::navigate("/x").with_label("open x").describe(), "open x");
    }
}
