//! Regex search strategy.

use crate::component::Component;
use crate::error::Result;
use crate::transform::search::SearchStrategy;

/// Matches the query as a case-insensitive regular expression against
/// each candidate's searchable text (name, description, parameter names
/// and descriptions). Candidate order is preserved; there is no ranking.
#[derive(Debug, Default)]
pub struct RegexSearch {
    _private: (),
}

impl RegexSearch {
    /// Creates the strategy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SearchStrategy for RegexSearch {
    fn name(&self) -> &str {
        "regex"
    }

    fn search(
        &self,
        query: &str,
        candidates: &[Component],
        limit: usize,
    ) -> Result<Vec<Component>> {
        let pattern = match ::regex::RegexBuilder::new(query)
            .case_insensitive(true)
            .build()
        {
            Ok(pattern) => pattern,
            Err(e) => {
                // An unparseable query simply matches nothing.
                tracing::debug!(query, error = %e, "search query is not a valid pattern");
                return Ok(Vec::new());
            }
        };
        Ok(candidates
            .iter()
            .filter(|c| pattern.is_match(&c.searchable_text()))
            .take(limit)
            .cloned()
            .collect())
    }
}
