//! BM25 search strategy.
//!
//! Okapi BM25 over component searchable text with an internally cached
//! index. The index is keyed by a SHA-256 hash of the candidate set;
//! when a search observes a stale hash it rebuilds off-lock and swaps
//! the new index in atomically, so concurrent searches keep scoring
//! against the old index until the swap lands and none ever sees a
//! half-built one.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::component::Component;
use crate::error::Result;
use crate::transform::search::{tokenize, SearchStrategy};

const DEFAULT_K1: f64 = 1.5;
const DEFAULT_B: f64 = 0.75;

/// Okapi BM25 ranking with term-saturation parameter `k1` and length
/// normalization `b`.
///
/// # Examples
///
/// ```
/// use mcp_fabric::transform::search::Bm25Search;
///
/// let bm25 = Bm25Search::new();           // k1 = 1.5, b = 0.75
/// let tuned = Bm25Search::with_params(1.2, 0.5);
/// ```
pub struct Bm25Search {
    k1: f64,
    b: f64,
    index: RwLock<Arc<Bm25Index>>,
}

#[derive(Default)]
struct Bm25Index {
    catalog_hash: [u8; 32],
    docs: Vec<Doc>,
    avg_len: f64,
    idf: HashMap<String, f64>,
}

struct Doc {
    key: String,
    len: usize,
    term_freq: HashMap<String, usize>,
}

impl Bm25Search {
    /// Creates the strategy with the standard parameters.
    pub fn new() -> Self {
        Self::with_params(DEFAULT_K1, DEFAULT_B)
    }

    /// Creates the strategy with explicit `k1` and `b`.
    pub fn with_params(k1: f64, b: f64) -> Self {
        Self {
            k1,
            b,
            index: RwLock::new(Arc::new(Bm25Index::default())),
        }
    }

    fn current_index(&self, candidates: &[Component]) -> Arc<Bm25Index> {
        let hash = catalog_hash(candidates);
        {
            let index = self.index.read();
            if index.catalog_hash == hash {
                return Arc::clone(&index);
            }
        }
        // Stale: rebuild without holding the lock, then swap.
        let fresh = Arc::new(Bm25Index::build(candidates, hash));
        let mut slot = self.index.write();
        // Another searcher may have rebuilt for a different snapshot in
        // the meantime; last write wins either way.
        *slot = Arc::clone(&fresh);
        fresh
    }

    fn score(&self, index: &Bm25Index, doc: &Doc, query_terms: &[String]) -> f64 {
        let mut score = 0.0;
        for term in query_terms {
            let Some(&tf) = doc.term_freq.get(term) else {
                continue;
            };
            let Some(&idf) = index.idf.get(term) else {
                continue;
            };
            let tf = tf as f64;
            let norm = self.k1 * (1.0 - self.b + self.b * doc.len as f64 / index.avg_len);
            score += idf * (tf * (self.k1 + 1.0)) / (tf + norm);
        }
        score
    }
}

impl Default for Bm25Search {
    fn default() -> Self {
        Self::new()
    }
}

impl Bm25Index {
    fn build(candidates: &[Component], catalog_hash: [u8; 32]) -> Self {
        let docs: Vec<Doc> = candidates
            .iter()
            .map(|c| {
                let terms = tokenize(&c.searchable_text());
                let mut term_freq = HashMap::new();
                for term in &terms {
                    *term_freq.entry(term.clone()).or_insert(0) += 1;
                }
                Doc {
                    key: c.key(),
                    len: terms.len(),
                    term_freq,
                }
            })
            .collect();

        let n = docs.len() as f64;
        let avg_len = if docs.is_empty() {
            1.0
        } else {
            docs.iter().map(|d| d.len as f64).sum::<f64>() / n
        };

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in &docs {
            for term in doc.term_freq.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }
        let idf = doc_freq
            .into_iter()
            .map(|(term, df)| {
                let df = df as f64;
                (term, ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
            })
            .collect();

        Self {
            catalog_hash,
            docs,
            avg_len: avg_len.max(f64::EPSILON),
            idf,
        }
    }
}

fn catalog_hash(candidates: &[Component]) -> [u8; 32] {
    let mut entries: Vec<String> = candidates
        .iter()
        .map(|c| format!("{}\u{1f}{}", c.key(), c.searchable_text()))
        .collect();
    entries.sort_unstable();
    let mut hasher = Sha256::new();
    for entry in &entries {
        hasher.update(entry.as_bytes());
        hasher.update([0x1e]);
    }
    hasher.finalize().into()
}

impl SearchStrategy for Bm25Search {
    fn name(&self) -> &str {
        "BM25"
    }

    fn search(
        &self,
        query: &str,
        candidates: &[Component],
        limit: usize,
    ) -> Result<Vec<Component>> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }
        let index = self.current_index(candidates);

        let by_key: HashMap<String, &Component> =
            candidates.iter().map(|c| (c.key(), c)).collect();

        let mut scored: Vec<(f64, &Doc)> = index
            .docs
            .iter()
            .map(|doc| (self.score(&index, doc, &query_terms), doc))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(limit)
            .filter_map(|(_, doc)| by_key.get(&doc.key).map(|c| (*c).clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> Component {
        Component::tool(name, |_a, _c| async { Ok(json!(null)) })
            .with_description(description)
    }

    fn corpus() -> Vec<Component> {
        vec![
            tool("add", "Add two numbers and return the sum"),
            tool("fetch", "Fetch a web page over HTTP and return the body"),
            tool("grep", "Search file contents for a pattern"),
        ]
    }

    #[test]
    fn ranks_relevant_document_first() {
        let bm25 = Bm25Search::new();
        let hits = bm25.search("fetch web page", &corpus(), 10).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].name, "fetch");
    }

    #[test]
    fn zero_score_documents_excluded() {
        let bm25 = Bm25Search::new();
        let hits = bm25.search("nonexistent term zzz", &corpus(), 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn empty_query_returns_nothing() {
        let bm25 = Bm25Search::new();
        assert!(bm25.search("", &corpus(), 10).unwrap().is_empty());
        // One-character terms are dropped by tokenization.
        assert!(bm25.search("a b", &corpus(), 10).unwrap().is_empty());
    }

    #[test]
    fn rarer_terms_weigh_more() {
        let candidates = vec![
            tool("t1", "common common unique"),
            tool("t2", "common common common"),
            tool("t3", "common filler words"),
        ];
        let bm25 = Bm25Search::new();
        let hits = bm25.search("unique", &candidates, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "t1");
    }

    #[test]
    fn index_rebuilds_when_catalog_changes() {
        let bm25 = Bm25Search::new();
        let mut candidates = corpus();
        assert_eq!(bm25.search("pattern", &candidates, 10).unwrap().len(), 1);

        candidates.push(tool("ack", "Search a directory tree for a pattern"));
        let hits = bm25.search("pattern", &candidates, 10).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn same_catalog_reuses_index() {
        let bm25 = Bm25Search::new();
        let candidates = corpus();
        bm25.search("sum", &candidates, 10).unwrap();
        let before = Arc::as_ptr(&*bm25.index.read());
        bm25.search("http", &candidates, 10).unwrap();
        let after = Arc::as_ptr(&*bm25.index.read());
        assert_eq!(before, after);
    }

    #[test]
    fn limit_truncates_ranked_list() {
        let candidates: Vec<Component> = (0..6)
            .map(|i| tool(&format!("tool{i}"), "shared vocabulary here"))
            .collect();
        let bm25 = Bm25Search::new();
        assert_eq!(bm25.search("shared", &candidates, 3).unwrap().len(), 3);
    }
}
