use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::tokenizer::is_content_word;

/// Word → occurrence count over a set of documents.
pub type FreqDist = BTreeMap<String, u64>;

pub fn count<'a>(docs: impl IntoIterator<Item = &'a [String]>) -> FreqDist {
    let mut dist = FreqDist::new();
    for doc in docs {
        for token in doc {
            *dist.entry(token.clone()).or_insert(0) += 1;
        }
    }
    dist
}

/// Summed count of the query terms.
pub fn term_total(dist: &FreqDist, terms: &[String]) -> u64 {
    terms.iter().filter_map(|t| dist.get(t)).sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedWord {
    pub word: String,
    pub count: u64,
    /// Count relative to the most frequent word of the cloud, in (0, 1].
    pub weight: f64,
}

/// The `n` most frequent content words, most frequent first (ties
/// alphabetical).
pub fn top_words(dist: &FreqDist, n: usize) -> Vec<WeightedWord> {
    let mut words: Vec<(&String, u64)> = dist
        .iter()
        .filter(|(w, _)| is_content_word(w))
        .map(|(w, &c)| (w, c))
        .collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    words.truncate(n);

    let max = words.first().map(|(_, c)| *c).unwrap_or(0);
    words
        .into_iter()
        .map(|(word, count)| WeightedWord {
            word: word.clone(),
            count,
            weight: if max == 0 { 0.0 } else { count as f64 / max as f64 },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn counts_across_documents() {
        let docs = [doc(&["mask", "the", "mask"]), doc(&["vaccine", "mask"])];
        let dist = count(docs.iter().map(Vec::as_slice));
        assert_eq!(dist["mask"], 3);
        assert_eq!(dist["the"], 1);
        assert_eq!(term_total(&dist, &doc(&["mask", "vaccine", "absent"])), 4);
    }

    #[test]
    fn top_words_skip_stopwords_and_weight() {
        let docs = [doc(&["the", "the", "the", "mask", "mask", "vaccine", "clinic"])];
        let dist = count(docs.iter().map(Vec::as_slice));
        let top = top_words(&dist, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].word, "mask");
        assert_eq!(top[0].weight, 1.0);
        assert_eq!(top[1].word, "clinic");
        assert_eq!(top[1].weight, 0.5);
    }

    #[test]
    fn empty_distribution() {
        assert!(top_words(&FreqDist::new(), 10).is_empty());
        assert_eq!(term_total(&FreqDist::new(), &doc(&["mask"])), 0);
    }
}
