//! Name filters applied to simulations during discovery.

use std::collections::BTreeSet;

use regex::Regex;

use crate::error::DiscoveryError;

/// Which simulation names a run selects.
#[derive(Debug, Clone, Default)]
pub enum DiscoveryFilter {
    #[default]
    All,
    /// Exact names to run.
    Names(BTreeSet<String>),
    /// Names matched in full by the pattern.
    Pattern(Regex),
}

impl DiscoveryFilter {
    /// Build a filter from optional selections. A pattern takes precedence over
    /// a name list; neither means "run everything".
    pub fn from_selection(
        names: Option<&[String]>,
        pattern: Option<&str>,
    ) -> Result<Self, DiscoveryError> {
        match (names, pattern) {
            (_, Some(pattern)) => Self::pattern(pattern),
            (Some(names), None) => Ok(Self::names(names.iter().cloned())),
            (None, None) => Ok(Self::All),
        }
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Names(names.into_iter().map(Into::into).collect())
    }

    /// Compile `pattern` so that it must match the whole name.
    pub fn pattern(pattern: &str) -> Result<Self, DiscoveryError> {
        let anchored = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Self::Pattern(anchored))
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            DiscoveryFilter::All => true,
            DiscoveryFilter::Names(names) => names.contains(name),
            DiscoveryFilter::Pattern(regex) => regex.is_match(name),
        }
    }
}
