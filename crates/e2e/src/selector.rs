//! Ordered selector candidates for one logical UI target

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};

/// Equivalent selector variants for the same target. Order is preference:
/// the first candidate that matches anywhere wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSelectorSet", into = "Vec<String>")]
pub struct SelectorSet {
    candidates: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSelectorSet {
    One(String),
    Many(Vec<String>),
}

impl TryFrom<RawSelectorSet> for SelectorSet {
    type Error = E2eError;

    fn try_from(raw: RawSelectorSet) -> E2eResult<Self> {
        match raw {
            RawSelectorSet::One(s) => SelectorSet::new([s]),
            RawSelectorSet::Many(v) => SelectorSet::new(v),
        }
    }
}

impl From<SelectorSet> for Vec<String> {
    fn from(set: SelectorSet) -> Self {
        set.candidates
    }
}

impl SelectorSet {
    pub fn new<I, S>(candidates: I) -> E2eResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let candidates: Vec<String> = candidates
            .into_iter()
            .map(Into::into)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if candidates.is_empty() {
            return Err(E2eError::SpecParse("selector set must not be empty".into()));
        }
        Ok(Self { candidates })
    }

    /// Single-candidate set; panics on an empty selector, for literals only
    pub fn single(selector: &str) -> Self {
        Self::new([selector]).unwrap_or_else(|_| panic!("empty selector literal"))
    }

    /// Multi-candidate set from literals; panics if every entry is empty
    pub fn literal(candidates: &[&str]) -> Self {
        Self::new(candidates.iter().copied()).unwrap_or_else(|_| panic!("empty selector literal"))
    }

    /// Matches an element whose visible text contains `text`
    pub fn text(text: &str) -> Self {
        Self::single(&format!("text={}", text))
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// The preferred candidate, used in step descriptions
    pub fn primary(&self) -> &str {
        &self.candidates[0]
    }

    /// Map every candidate, e.g. to expand placeholders
    pub fn try_map<F>(&self, mut f: F) -> E2eResult<Self>
    where
        F: FnMut(&str) -> E2eResult<String>,
    {
        let mapped = self
            .candidates
            .iter()
            .map(|c| f(c))
            .collect::<E2eResult<Vec<_>>>()?;
        Self::new(mapped)
    }
}

impl std::fmt::Display for SelectorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.candidates.len() == 1 {
            write!(f, "{}", self.candidates[0])
        } else {
            write!(f, "[{}]", self.candidates.join(" | "))
        }
    }
}
