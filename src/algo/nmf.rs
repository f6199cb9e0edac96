use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const EPS: f64 = 1e-10;

/// Non-negative Matrix Factorization for topic modeling.
///
/// Given a term-document matrix V (n_docs × n_terms), decompose into:
///   V ≈ W × H
/// where W (n_docs × k) represents document-topic weights
/// and H (k × n_terms) represents topic-term weights.
///
/// Uses multiplicative update rules (Lee & Seung, 2001).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmfModel {
    /// Document-topic matrix (n_docs × k) of the fitting corpus.
    pub doc_topics: Vec<Vec<f64>>,
    /// Topic-term matrix (k × n_terms). Each row's top entries are that topic's keywords.
    pub topic_terms: Vec<Vec<f64>>,
    /// Vocabulary mapping index → term.
    pub vocabulary: Vec<String>,
    pub k: usize,
}

impl NmfModel {
    /// Top N terms for topic t.
    pub fn top_terms(&self, topic: usize, n: usize) -> Vec<(String, f64)> {
        let Some(row) = self.topic_terms.get(topic) else {
            return vec![];
        };
        let mut indexed: Vec<(usize, f64)> = row.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        indexed
            .into_iter()
            .take(n)
            .filter(|(_, w)| *w > 0.0)
            .map(|(i, w)| (self.vocabulary[i].clone(), w))
            .collect()
    }

    /// Dominant topic for each fitted document.
    pub fn dominant_topics(&self) -> Vec<usize> {
        self.doc_topics
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Share of the fitting corpus attributed to each topic (sums to 1
    /// unless the corpus was empty).
    pub fn prevalence(&self) -> Vec<f64> {
        mean_distribution(self.doc_topics.iter().map(|row| normalize(row)), self.k)
    }

    /// Topic distribution of an unseen document with H held fixed.
    /// All zeros when the document shares no vocabulary with the model.
    pub fn project(&self, weights: &HashMap<String, f64>, max_iter: usize) -> Vec<f64> {
        let term_idx: HashMap<&str, usize> = self
            .vocabulary
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i))
            .collect();
        let v: Vec<(usize, f64)> = weights
            .iter()
            .filter_map(|(t, &w)| term_idx.get(t.as_str()).map(|&i| (i, w)))
            .collect();
        if v.is_empty() || self.k == 0 {
            return vec![0.0; self.k];
        }

        // HH^T is shared by every update.
        let hht = mat_mul_transpose_b(&self.topic_terms, &self.topic_terms, self.k, 0, self.k);
        let hv: Vec<f64> = (0..self.k)
            .map(|t| v.iter().map(|&(i, w)| self.topic_terms[t][i] * w).sum())
            .collect();

        let mut w = vec![1.0 / self.k as f64; self.k];
        for _ in 0..max_iter {
            let whht: Vec<f64> = (0..self.k)
                .map(|j| (0..self.k).map(|t| w[t] * hht[t][j]).sum())
                .collect();
            for j in 0..self.k {
                w[j] *= hv[j] / (whht[j] + EPS);
            }
        }
        normalize(&w)
    }
}

/// Scale a non-negative vector to sum to 1 (zeros stay zeros).
pub fn normalize(row: &[f64]) -> Vec<f64> {
    let sum: f64 = row.iter().sum();
    if sum <= EPS {
        return vec![0.0; row.len()];
    }
    row.iter().map(|x| x / sum).collect()
}

/// Element-wise mean of distributions; zero vector when there are none.
pub fn mean_distribution(rows: impl Iterator<Item = Vec<f64>>, k: usize) -> Vec<f64> {
    let mut acc = vec![0.0; k];
    let mut n = 0usize;
    for row in rows {
        for (a, x) in acc.iter_mut().zip(row) {
            *a += x;
        }
        n += 1;
    }
    if n > 0 {
        for a in &mut acc {
            *a /= n as f64;
        }
    }
    acc
}

/// Run NMF on TF-IDF vectors.
///
/// * `tfidf_vectors` - One HashMap per document, term → weight.
/// * `k` - Number of topics.
/// * `max_iter` - Maximum iterations.
/// * `vocab_limit` - Maximum vocabulary size (top terms by doc frequency).
pub fn nmf(
    tfidf_vectors: &[HashMap<String, f64>],
    k: usize,
    max_iter: usize,
    vocab_limit: usize,
) -> NmfModel {
    let n_docs = tfidf_vectors.len();

    // Vocabulary by doc frequency, ties broken alphabetically so a refit on
    // the same input yields the same model.
    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for vec in tfidf_vectors {
        for term in vec.keys() {
            *doc_freq.entry(term.as_str()).or_insert(0) += 1;
        }
    }
    let mut vocab: Vec<(String, usize)> = doc_freq
        .into_iter()
        .map(|(t, c)| (t.to_string(), c))
        .collect();
    vocab.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    vocab.truncate(vocab_limit);
    let vocabulary: Vec<String> = vocab.into_iter().map(|(t, _)| t).collect();
    let n_terms = vocabulary.len();

    let term_idx: HashMap<&str, usize> = vocabulary
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();

    let mut v = vec![vec![0.0f64; n_terms]; n_docs];
    for (d, vec) in tfidf_vectors.iter().enumerate() {
        for (term, &weight) in vec {
            if let Some(&idx) = term_idx.get(term.as_str()) {
                v[d][idx] = weight;
            }
        }
    }

    if n_docs == 0 || n_terms == 0 || k == 0 {
        return NmfModel {
            doc_topics: vec![vec![0.0; k]; n_docs],
            topic_terms: vec![vec![0.0; n_terms]; k],
            vocabulary,
            k,
        };
    }

    // Deterministic positive initialization.
    let mut w = vec![vec![0.0f64; k]; n_docs];
    let mut h = vec![vec![0.0f64; n_terms]; k];
    for (i, row) in w.iter_mut().enumerate() {
        for (j, x) in row.iter_mut().enumerate() {
            *x = 0.1 + 0.01 * ((i * k + j) % 100) as f64 / 100.0;
        }
    }
    for (i, row) in h.iter_mut().enumerate() {
        for (j, x) in row.iter_mut().enumerate() {
            *x = 0.1 + 0.01 * ((i * n_terms + j) % 100) as f64 / 100.0;
        }
    }

    for _ in 0..max_iter {
        // H = H * (W^T V) / (W^T W H)
        let wt_v = mat_mul_transpose_a(&w, &v, n_docs, k, n_terms);
        let wtw = mat_mul_transpose_a(&w, &w, n_docs, k, k);
        let wtw_h = mat_mul(&wtw, &h, k, k, n_terms);
        for i in 0..k {
            for j in 0..n_terms {
                h[i][j] *= wt_v[i][j] / (wtw_h[i][j] + EPS);
            }
        }

        // W = W * (V H^T) / (W H H^T)
        let v_ht = mat_mul_transpose_b(&v, &h, n_docs, n_terms, k);
        let hht = mat_mul_transpose_b(&h, &h, k, n_terms, k);
        let w_hht = mat_mul(&w, &hht, n_docs, k, k);
        for i in 0..n_docs {
            for j in 0..k {
                w[i][j] *= v_ht[i][j] / (w_hht[i][j] + EPS);
            }
        }
    }

    NmfModel {
        doc_topics: w,
        topic_terms: h,
        vocabulary,
        k,
    }
}

// A^T × B where A is (m × n), result is (n × p)
fn mat_mul_transpose_a(a: &[Vec<f64>], b: &[Vec<f64>], m: usize, n: usize, p: usize) -> Vec<Vec<f64>> {
    let mut result = vec![vec![0.0; p]; n];
    for i in 0..n {
        for j in 0..p {
            let mut sum = 0.0;
            for k in 0..m {
                sum += a[k][i] * b[k][j];
            }
            result[i][j] = sum;
        }
    }
    result
}

// A × B where A is (m × n), B is (n × p)
fn mat_mul(a: &[Vec<f64>], b: &[Vec<f64>], m: usize, n: usize, p: usize) -> Vec<Vec<f64>> {
    let mut result = vec![vec![0.0; p]; m];
    for i in 0..m {
        for j in 0..p {
            let mut sum = 0.0;
            for k in 0..n {
                sum += a[i][k] * b[k][j];
            }
            result[i][j] = sum;
        }
    }
    result
}

// A × B^T where B is (p × n), result is (m × p)
fn mat_mul_transpose_b(a: &[Vec<f64>], b: &[Vec<f64>], m: usize, _n: usize, p: usize) -> Vec<Vec<f64>> {
    let mut result = vec![vec![0.0; p]; m];
    for i in 0..m {
        for j in 0..p {
            let mut sum = 0.0;
            for k in 0..a[i].len().min(b[j].len()) {
                sum += a[i][k] * b[j][k];
            }
            result[i][j] = sum;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<HashMap<String, f64>> {
        vec![
            [("mask".into(), 3.0), ("mandate".into(), 2.0), ("county".into(), 1.0)].into(),
            [("mask".into(), 2.0), ("mandate".into(), 3.0), ("school".into(), 1.0)].into(),
            [("vaccine".into(), 3.0), ("clinic".into(), 2.0), ("dose".into(), 1.0)].into(),
            [("vaccine".into(), 2.0), ("dose".into(), 3.0), ("booster".into(), 1.0)].into(),
        ]
    }

    #[test]
    fn nmf_separates_topics() {
        let model = nmf(&docs(), 2, 200, 1000);
        assert_eq!(model.k, 2);
        assert_eq!(model.doc_topics.len(), 4);
        assert_eq!(model.topic_terms.len(), 2);

        let topics = model.dominant_topics();
        assert_eq!(topics[0], topics[1]);
        assert_eq!(topics[2], topics[3]);
        assert_ne!(topics[0], topics[2]);
    }

    #[test]
    fn nmf_is_deterministic() {
        let a = nmf(&docs(), 2, 50, 1000);
        let b = nmf(&docs(), 2, 50, 1000);
        assert_eq!(a.vocabulary, b.vocabulary);
        assert_eq!(a.dominant_topics(), b.dominant_topics());
    }

    #[test]
    fn top_terms_sorted() {
        let model = nmf(&docs(), 2, 100, 100);
        let top = model.top_terms(0, 2);
        assert_eq!(top.len(), 2);
        assert!(top[0].1 >= top[1].1);
        assert!(model.top_terms(9, 2).is_empty());
    }

    #[test]
    fn prevalence_sums_to_one() {
        let model = nmf(&docs(), 2, 100, 100);
        let p = model.prevalence();
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn project_follows_fitted_topics() {
        let model = nmf(&docs(), 2, 200, 1000);
        let topics = model.dominant_topics();
        let masks: HashMap<String, f64> = [("mask".into(), 1.0), ("mandate".into(), 1.0)].into();
        let dist = model.project(&masks, 100);
        assert!((dist.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        assert!(dist[topics[0]] > dist[topics[2]]);

        let unknown: HashMap<String, f64> = [("zebra".into(), 1.0)].into();
        assert_eq!(model.project(&unknown, 10), vec![0.0, 0.0]);
    }

    #[test]
    fn nmf_empty() {
        let model = nmf(&[], 3, 10, 100);
        assert!(model.doc_topics.is_empty());
        assert_eq!(model.prevalence(), vec![0.0; 3]);
    }
}
