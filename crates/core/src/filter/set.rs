//! Ordered rule sets compiled from configuration text.

use super::Filter;
use crate::Error;

/// Starter rule text. Every line is a comment, so it compiles to an empty set.
pub const DEFAULT_RULES: &str = "\
# Define the list of rules (one by line)
# A rule is composed of a http method or * followed by a regex that is applied on the url
# Examples:
# GET https://www.google.com/.*
# POST https://www.google.com/.*
# * https://www.google.com/.*";

/// An immutable snapshot of compiled filters.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    /// Compile a full configuration text.
    ///
    /// Blank lines and lines whose first non-space character is `#` are skipped.
    /// The first rule that fails to compile rejects the whole text.
    pub fn compile(text: &str) -> Result<Self, Error> {
        let mut filters = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let filter = Filter::parse(trimmed).map_err(|source| Error::InvalidPattern {
                line: idx + 1,
                rule: trimmed.to_string(),
                source,
            })?;
            filters.push(filter);
        }

        Ok(Self { filters })
    }

    /// True iff any filter matches.
    pub fn should_process(&self, method: &str, url: &str) -> bool {
        self.filters.iter().any(|f| f.matches(method, url))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter()
    }
}
