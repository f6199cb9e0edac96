use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Document frequencies of a reference corpus, for TF-IDF weighting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentIndex {
    /// document_id -> term -> count
    doc_terms: Vec<HashMap<String, u32>>,
    /// term -> number of documents containing it
    doc_freq: HashMap<String, u32>,
    num_docs: u32,
}

impl DocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents<'a>(docs: impl IntoIterator<Item = &'a [String]>) -> Self {
        let mut index = Self::new();
        for doc in docs {
            index.add_document(doc);
        }
        index
    }

    /// Add a document (as pre-tokenized terms).
    pub fn add_document(&mut self, tokens: &[String]) {
        let counts = count_terms(tokens);
        for term in counts.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.doc_terms.push(counts);
        self.num_docs += 1;
    }

    /// Smoothed IDF: ln((N - df + 0.5) / (df + 0.5) + 1). Always positive.
    pub fn idf(&self, term: &str) -> f64 {
        let df = *self.doc_freq.get(term).unwrap_or(&0) as f64;
        let n = self.num_docs as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// TF-IDF vector of an indexed document.
    pub fn tfidf_vector(&self, doc_idx: usize) -> HashMap<String, f64> {
        let Some(doc) = self.doc_terms.get(doc_idx) else {
            return HashMap::new();
        };
        let dl: u32 = doc.values().sum();
        doc.iter()
            .map(|(term, &count)| (term.clone(), count as f64 / dl as f64 * self.idf(term)))
            .collect()
    }

    pub fn tfidf_vectors(&self) -> Vec<HashMap<String, f64>> {
        (0..self.doc_terms.len()).map(|i| self.tfidf_vector(i)).collect()
    }

    /// Top-N terms by TF-IDF weight for a document.
    pub fn top_terms(&self, doc_idx: usize, n: usize) -> Vec<(String, f64)> {
        let mut tfidf: Vec<(String, f64)> = self.tfidf_vector(doc_idx).into_iter().collect();
        tfidf.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        tfidf.truncate(n);
        tfidf
    }

    /// TF-IDF weights of a document outside the index, against this index's
    /// document frequencies.
    pub fn token_weights(&self, tokens: &[String]) -> HashMap<String, f64> {
        let dl = tokens.len() as f64;
        count_terms(tokens)
            .into_iter()
            .map(|(term, count)| {
                let w = count as f64 / dl * self.idf(&term);
                (term, w)
            })
            .collect()
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }
}

fn count_terms(tokens: &[String]) -> HashMap<String, u32> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for token in tokens {
        *counts.entry(token.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn make_index() -> DocumentIndex {
        let docs = [
            doc(&["mask", "mandate", "county"]),
            doc(&["mask", "vaccine", "clinic"]),
            doc(&["vaccine", "appointments", "mandate"]),
        ];
        DocumentIndex::from_documents(docs.iter().map(Vec::as_slice))
    }

    #[test]
    fn idf_common_term() {
        let c = make_index();
        // both appear in 2 of 3 docs
        assert!((c.idf("mask") - c.idf("vaccine")).abs() < 1e-10);
    }

    #[test]
    fn idf_rare_term() {
        let c = make_index();
        assert!(c.idf("clinic") > c.idf("mask"));
    }

    #[test]
    fn empty_index() {
        let c = DocumentIndex::new();
        assert_eq!(c.num_docs(), 0);
        assert!(c.idf("unknown").is_finite());
        assert!(c.tfidf_vector(0).is_empty());
    }

    #[test]
    fn top_terms_returns_sorted() {
        let c = make_index();
        let top = c.top_terms(0, 2);
        assert_eq!(top.len(), 2);
        assert!(top[0].1 >= top[1].1);
        assert_eq!(c.top_terms(0, 100).len(), 3);
    }

    #[test]
    fn token_weights_favor_rare_terms() {
        let c = make_index();
        let weights = c.token_weights(&doc(&["mask", "clinic"]));
        assert!(weights["clinic"] > weights["mask"]);
    }

    #[test]
    fn tfidf_values_are_non_negative() {
        let c = make_index();
        for v in c.tfidf_vectors() {
            assert!(v.values().all(|&w| w >= 0.0));
        }
    }

    #[test]
    fn serde_roundtrip_preserves_idf() {
        let c = make_index();
        let json = serde_json::to_string(&c).unwrap();
        let back: DocumentIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(back.num_docs(), 3);
        assert!((c.idf("clinic") - back.idf("clinic")).abs() < 1e-10);
    }
}
