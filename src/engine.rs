//! Analysis engines.
//!
//! The worker only sees [`AnalysisEngine`]. [`CorpusEngine`] is the
//! production implementation: it reads the post corpus and caches every
//! expensive stage in an intermediate namespace, keyed by the inputs of
//! that stage, so requests that share a trajectory or a model share work.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::algo::frequency::{self, FreqDist, WeightedWord};
use crate::algo::nmf::{self, NmfModel};
use crate::algo::tfidf::DocumentIndex;
use crate::algo::timespan::Timespan;
use crate::algo::tokenizer;
use crate::corpus::{Corpus, Segments};
use crate::error::EngineError;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::kind::{Namespace, RequestKind};
use crate::params::{
    RequestParams, RevisionSource, TopicModelingParams, Trajectory, WordCloudParams, WordFrequencyParams,
};
use crate::store::ArtifactStore;

/// Computes the final result of a request from its normalized parameters.
pub trait AnalysisEngine: Send + Sync {
    fn compute(&self, kind: RequestKind, params: &Value) -> Result<Value, EngineError>;
}

/// Tuning knobs of the topic model. Part of the model's cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    pub nmf_iterations: usize,
    pub projection_iterations: usize,
    pub vocab_limit: usize,
    pub topic_terms: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            nmf_iterations: 200,
            projection_iterations: 100,
            vocab_limit: 2000,
            topic_terms: 10,
        }
    }
}

/// Token lists per document per segment.
type SegmentTokens = Vec<Vec<Vec<String>>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TopicModel {
    index: DocumentIndex,
    nmf: NmfModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicTerm {
    pub term: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub id: usize,
    pub terms: Vec<TopicTerm>,
    pub prevalence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub start: chrono::NaiveDate,
    pub end: chrono::NaiveDate,
    pub posts: usize,
    /// Mean topic distribution of the segment's posts.
    pub distribution: Vec<f64>,
}

pub struct CorpusEngine {
    corpus: Corpus,
    artifacts: ArtifactStore,
    options: EngineOptions,
}

impl CorpusEngine {
    pub fn new(corpus: Corpus, artifacts: ArtifactStore) -> Self {
        Self::with_options(corpus, artifacts, EngineOptions::default())
    }

    pub fn with_options(corpus: Corpus, artifacts: ArtifactStore, options: EngineOptions) -> Self {
        Self {
            corpus,
            artifacts,
            options,
        }
    }

    fn revision(&self) -> Result<String, EngineError> {
        self.corpus
            .revision()
            .map_err(|e| EngineError::MissingInput(e.to_string()))
    }

    fn trajectory_key(trajectory: &Trajectory, revision: &str) -> Fingerprint {
        fingerprint(&json!({ "trajectory": trajectory, "corpus_revision": revision }))
    }

    fn segments(&self, trajectory: &Trajectory, key: &Fingerprint) -> Result<Segments, EngineError> {
        self.artifacts.get_or_insert_with(Namespace::Segments, key, || {
            info!(key = key.short(), "partitioning corpus");
            self.corpus
                .load_segments(trajectory)
                .map_err(|e| EngineError::MissingInput(e.to_string()))
        })
    }

    fn tokens(&self, trajectory: &Trajectory, key: &Fingerprint) -> Result<(Vec<Timespan>, SegmentTokens), EngineError> {
        let segments = self.segments(trajectory, key)?;
        let tokens: SegmentTokens = self.artifacts.get_or_insert_with(Namespace::Tokens, key, || {
            debug!(key = key.short(), posts = segments.post_count(), "tokenizing segments");
            Ok::<_, EngineError>(
                segments
                    .documents
                    .iter()
                    .map(|docs| docs.par_iter().map(|t| tokenizer::tokens(t)).collect())
                    .collect(),
            )
        })?;
        Ok((segments.spans, tokens))
    }

    fn word_frequencies(&self, trajectory: &Trajectory, key: &Fingerprint) -> Result<(Vec<Timespan>, Vec<FreqDist>), EngineError> {
        let (spans, tokens) = self.tokens(trajectory, key)?;
        let dists = self.artifacts.get_or_insert_with(Namespace::WordFrequencies, key, || {
            Ok::<_, EngineError>(
                tokens
                    .iter()
                    .map(|docs| frequency::count(docs.iter().map(Vec::as_slice)))
                    .collect::<Vec<FreqDist>>(),
            )
        })?;
        Ok((spans, dists))
    }

    fn word_frequency(&self, p: &WordFrequencyParams) -> Result<Value, EngineError> {
        let revision = self.revision()?;
        let trajectory = p.trajectory();
        let key = Self::trajectory_key(&trajectory, &revision);
        let (spans, dists) = self.word_frequencies(&trajectory, &key)?;

        let points: Vec<Value> = spans
            .iter()
            .zip(&dists)
            .map(|(span, dist)| {
                json!({
                    "date": span.start,
                    "end": span.end,
                    "count": frequency::term_total(dist, &p.terms),
                })
            })
            .collect();
        Ok(json!({ "terms": p.terms, "points": points }))
    }

    fn word_cloud(&self, p: &WordCloudParams) -> Result<Value, EngineError> {
        let revision = self.revision()?;
        let trajectory = p.trajectory();
        let key = Self::trajectory_key(&trajectory, &revision);
        let (spans, dists) = self.word_frequencies(&trajectory, &key)?;

        let cloud_key = fingerprint(&json!({ "trajectory": key.as_str(), "max_word_count": p.max_word_count }));
        let clouds: Vec<Vec<WeightedWord>> =
            self.artifacts.get_or_insert_with(Namespace::WordClouds, &cloud_key, || {
                Ok::<_, EngineError>(
                    dists
                        .iter()
                        .map(|d| frequency::top_words(d, p.max_word_count as usize))
                        .collect(),
                )
            })?;
        Ok(json!({ "timespans": spans, "clouds": clouds }))
    }

    fn topic_model(&self, p: &TopicModelingParams, revision: &str) -> Result<(Fingerprint, TopicModel), EngineError> {
        let support = p.support_trajectory();
        let support_key = Self::trajectory_key(&support, revision);
        let model_key = fingerprint(&json!({
            "support": support_key.as_str(),
            "topic_count": p.topic_count,
            "options": self.options,
        }));

        let model = self.artifacts.get_or_insert_with(Namespace::TopicModel, &model_key, || {
            let (_, tokens) = self.tokens(&support, &support_key)?;
            let docs: Vec<Vec<String>> = tokens
                .into_iter()
                .flatten()
                .map(|doc| doc.into_iter().filter(|w| tokenizer::is_content_word(w)).collect::<Vec<_>>())
                .filter(|doc| !doc.is_empty())
                .collect();
            if docs.is_empty() {
                return Err(EngineError::MissingInput(
                    "no posts match the support institutions and dates".into(),
                ));
            }
            info!(
                key = model_key.short(),
                documents = docs.len(),
                topics = p.topic_count,
                "fitting topic model"
            );
            let index = DocumentIndex::from_documents(docs.iter().map(Vec::as_slice));
            let nmf = nmf::nmf(
                &index.tfidf_vectors(),
                p.topic_count as usize,
                self.options.nmf_iterations,
                self.options.vocab_limit,
            );
            Ok(TopicModel { index, nmf })
        })?;
        Ok((model_key, model))
    }

    fn topic_modeling(&self, p: &TopicModelingParams) -> Result<Value, EngineError> {
        let revision = self.revision()?;
        let (model_key, model) = self.topic_model(p, &revision)?;

        let summary: Vec<TopicSummary> =
            self.artifacts.get_or_insert_with(Namespace::TopicSummary, &model_key, || {
                let prevalence = model.nmf.prevalence();
                Ok::<_, EngineError>(
                    (0..model.nmf.k)
                        .map(|id| TopicSummary {
                            id,
                            terms: model
                                .nmf
                                .top_terms(id, self.options.topic_terms)
                                .into_iter()
                                .map(|(term, weight)| TopicTerm { term, weight })
                                .collect(),
                            prevalence: prevalence.get(id).copied().unwrap_or(0.0),
                        })
                        .collect(),
                )
            })?;

        let query = p.trajectory();
        let query_key = Self::trajectory_key(&query, &revision);
        let trends_key = fingerprint(&json!({ "model": model_key.as_str(), "query": query_key.as_str() }));
        let trends: Vec<TrendPoint> = self.artifacts.get_or_insert_with(Namespace::Trends, &trends_key, || {
            let (spans, tokens) = self.tokens(&query, &query_key)?;
            Ok::<_, EngineError>(
                spans
                    .iter()
                    .zip(&tokens)
                    .map(|(span, docs)| self.trend_point(&model, span, docs))
                    .collect(),
            )
        })?;

        Ok(json!({ "topics": summary, "trends": trends }))
    }

    fn trend_point(&self, model: &TopicModel, span: &Timespan, docs: &[Vec<String>]) -> TrendPoint {
        let distributions: Vec<Vec<f64>> = docs
            .par_iter()
            .filter_map(|doc| {
                let content: Vec<String> = doc.iter().filter(|w| tokenizer::is_content_word(w)).cloned().collect();
                if content.is_empty() {
                    return None;
                }
                let weights: HashMap<String, f64> = model.index.token_weights(&content);
                let dist = model.nmf.project(&weights, self.options.projection_iterations);
                dist.iter().any(|&x| x > 0.0).then_some(dist)
            })
            .collect();
        TrendPoint {
            start: span.start,
            end: span.end,
            posts: docs.len(),
            distribution: nmf::mean_distribution(distributions.into_iter(), model.nmf.k),
        }
    }
}

impl AnalysisEngine for CorpusEngine {
    fn compute(&self, kind: RequestKind, params: &Value) -> Result<Value, EngineError> {
        let params = RequestParams::parse(kind, params)?;
        match &params {
            RequestParams::WordFrequency(p) => self.word_frequency(p),
            RequestParams::WordCloud(p) => self.word_cloud(p),
            RequestParams::TopicModeling(p) => self.topic_modeling(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::tests::sample_corpus;
    use crate::params::identify;
    use crate::store::StoreRoot;

    fn engine(dir: &std::path::Path) -> (CorpusEngine, ArtifactStore) {
        let root = StoreRoot::open(dir.join("cache")).unwrap();
        let artifacts = ArtifactStore::new(root);
        let corpus = sample_corpus(dir);
        (CorpusEngine::new(corpus, artifacts.clone()), artifacts)
    }

    fn normalized(kind: RequestKind, raw: Value) -> Value {
        identify(kind, &raw, None).unwrap().1
    }

    #[test]
    fn word_frequency_counts_terms_per_segment() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, artifacts) = engine(dir.path());
        let params = normalized(
            RequestKind::WordFrequency,
            json!({
                "institutions": ["local health department"],
                "start": "2020-01-01",
                "end": "2020-02-01",
                "step_days": 7,
                "terms": ["mask"],
            }),
        );
        let result = engine.compute(RequestKind::WordFrequency, &params).unwrap();
        let counts: Vec<u64> = result["points"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["count"].as_u64().unwrap())
            .collect();
        assert_eq!(counts, vec![1, 2, 0, 0, 1]);
        assert_eq!(result["points"][0]["date"], json!("2020-01-01"));

        assert_eq!(artifacts.keys(Namespace::Segments).unwrap().len(), 1);
        assert_eq!(artifacts.keys(Namespace::Tokens).unwrap().len(), 1);
        assert_eq!(artifacts.keys(Namespace::WordFrequencies).unwrap().len(), 1);
    }

    #[test]
    fn word_cloud_reuses_trajectory_stages() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, artifacts) = engine(dir.path());
        let base = json!({
            "institutions": ["local health department"],
            "start": "2020-01-01",
            "end": "2020-02-01",
            "step_days": 7,
        });
        let mut wf = base.clone();
        wf["terms"] = json!(["vaccine"]);
        engine
            .compute(RequestKind::WordFrequency, &normalized(RequestKind::WordFrequency, wf))
            .unwrap();

        let mut wc = base;
        wc["max_word_count"] = json!(3);
        let result = engine
            .compute(RequestKind::WordCloud, &normalized(RequestKind::WordCloud, wc))
            .unwrap();
        assert_eq!(result["clouds"].as_array().unwrap().len(), 5);
        assert_eq!(result["clouds"][1][0]["word"], json!("mask"));
        assert!(result["clouds"][1].as_array().unwrap().len() <= 3);

        // one trajectory, so one segments/tokens artifact for both kinds
        assert_eq!(artifacts.keys(Namespace::Segments).unwrap().len(), 1);
        assert_eq!(artifacts.keys(Namespace::WordClouds).unwrap().len(), 1);
    }

    #[test]
    fn topic_modeling_produces_topics_and_trends() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, artifacts) = engine(dir.path());
        let params = normalized(
            RequestKind::TopicModeling,
            json!({
                "support_institutions": ["local health department"],
                "support_start": "2020-01-01",
                "support_end": "2020-02-01",
                "institutions": ["local health department"],
                "start": "2020-01-01",
                "end": "2020-02-01",
                "step_days": 14,
                "topic_count": 2,
            }),
        );
        let result = engine.compute(RequestKind::TopicModeling, &params).unwrap();
        assert_eq!(result["topics"].as_array().unwrap().len(), 2);
        let trends = result["trends"].as_array().unwrap();
        assert_eq!(trends.len(), 3);
        assert_eq!(trends[0]["distribution"].as_array().unwrap().len(), 2);

        assert_eq!(artifacts.keys(Namespace::TopicModel).unwrap().len(), 1);
        assert_eq!(artifacts.keys(Namespace::TopicSummary).unwrap().len(), 1);
        assert_eq!(artifacts.keys(Namespace::Trends).unwrap().len(), 1);

        // same model, different query: the model is not refit
        let mut other = params.clone();
        other["step_days"] = json!(7);
        engine.compute(RequestKind::TopicModeling, &other).unwrap();
        assert_eq!(artifacts.keys(Namespace::TopicModel).unwrap().len(), 1);
        assert_eq!(artifacts.keys(Namespace::Trends).unwrap().len(), 2);
    }

    #[test]
    fn empty_support_corpus_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path());
        let params = normalized(
            RequestKind::TopicModeling,
            json!({
                "support_institutions": ["ethnic media"],
                "support_start": "2020-01-01",
                "support_end": "2020-02-01",
                "institutions": ["local health department"],
                "start": "2020-01-01",
                "end": "2020-02-01",
                "step_days": 7,
                "topic_count": 2,
            }),
        );
        let err = engine.compute(RequestKind::TopicModeling, &params).unwrap_err();
        assert!(matches!(err, EngineError::MissingInput(_)));
    }

    #[test]
    fn invalid_parameters_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path());
        let err = engine
            .compute(RequestKind::WordFrequency, &json!({"terms": ["mask"]}))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameters(_)));
    }
}
