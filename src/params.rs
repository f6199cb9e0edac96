//! Typed request parameters and the one normalization used to identify a
//! request.
//!
//! The coordinator, the queue records and the engine all go through
//! [`identify`] / [`RequestParams::parse`], so a request always hashes the
//! same no matter which path produced it.

use chrono::NaiveDate;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::kind::RequestKind;

pub const MAX_TOPIC_COUNT: u32 = 50;

/// Something that can report a revision of the upstream inputs. Attached to
/// the coordinator so that a changed corpus yields new fingerprints.
pub trait RevisionSource: Send + Sync {
    fn revision(&self) -> Result<String>;
}

/// A selection of institutions over a date range, cut into fixed steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trajectory {
    pub institutions: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub step_days: u32,
}

impl Trajectory {
    fn normalize(&mut self, what: &str) -> Result<()> {
        self.institutions = normalize_set(std::mem::take(&mut self.institutions), |s| s.trim().to_lowercase());
        if self.institutions.is_empty() {
            return Err(Error::Validation(format!("{what}: at least one institution is required")));
        }
        if self.end < self.start {
            return Err(Error::Validation(format!(
                "{what}: end date {} is before start date {}",
                self.end, self.start
            )));
        }
        if self.step_days < 1 {
            return Err(Error::Validation(format!("{what}: step_days must be at least 1")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordFrequencyParams {
    #[serde(alias = "query_institutions", deserialize_with = "one_or_many")]
    pub institutions: Vec<String>,
    #[serde(alias = "query_min_date")]
    pub start: NaiveDate,
    #[serde(alias = "query_max_date")]
    pub end: NaiveDate,
    #[serde(alias = "query_step_in_days", deserialize_with = "lenient_u32")]
    pub step_days: u32,
    #[serde(alias = "query_terms", deserialize_with = "comma_list")]
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordCloudParams {
    #[serde(alias = "query_institutions", deserialize_with = "one_or_many")]
    pub institutions: Vec<String>,
    #[serde(alias = "query_min_date")]
    pub start: NaiveDate,
    #[serde(alias = "query_max_date")]
    pub end: NaiveDate,
    #[serde(alias = "query_step_in_days", deserialize_with = "lenient_u32")]
    pub step_days: u32,
    #[serde(alias = "max_words", deserialize_with = "lenient_u32")]
    pub max_word_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicModelingParams {
    #[serde(deserialize_with = "one_or_many")]
    pub support_institutions: Vec<String>,
    #[serde(alias = "support_min_date")]
    pub support_start: NaiveDate,
    #[serde(alias = "support_max_date")]
    pub support_end: NaiveDate,
    #[serde(alias = "query_institutions", deserialize_with = "one_or_many")]
    pub institutions: Vec<String>,
    #[serde(alias = "query_min_date")]
    pub start: NaiveDate,
    #[serde(alias = "query_max_date")]
    pub end: NaiveDate,
    #[serde(alias = "query_step_in_days", deserialize_with = "lenient_u32")]
    pub step_days: u32,
    #[serde(alias = "topic_counts", deserialize_with = "lenient_u32")]
    pub topic_count: u32,
}

impl WordFrequencyParams {
    pub fn trajectory(&self) -> Trajectory {
        Trajectory {
            institutions: self.institutions.clone(),
            start: self.start,
            end: self.end,
            step_days: self.step_days,
        }
    }
}

impl WordCloudParams {
    pub fn trajectory(&self) -> Trajectory {
        Trajectory {
            institutions: self.institutions.clone(),
            start: self.start,
            end: self.end,
            step_days: self.step_days,
        }
    }
}

impl TopicModelingParams {
    /// The query trajectory the fitted topics are tracked along.
    pub fn trajectory(&self) -> Trajectory {
        Trajectory {
            institutions: self.institutions.clone(),
            start: self.start,
            end: self.end,
            step_days: self.step_days,
        }
    }

    /// The reference corpus the model is fitted on, as one span.
    pub fn support_trajectory(&self) -> Trajectory {
        let days = (self.support_end - self.support_start).num_days().max(1);
        Trajectory {
            institutions: self.support_institutions.clone(),
            start: self.support_start,
            end: self.support_end,
            step_days: u32::try_from(days).unwrap_or(u32::MAX),
        }
    }
}

/// Parameters of any request kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestParams {
    TopicModeling(TopicModelingParams),
    WordCloud(WordCloudParams),
    WordFrequency(WordFrequencyParams),
}

impl RequestParams {
    /// Parse and normalize raw parameters. Unknown fields are dropped.
    pub fn parse(kind: RequestKind, raw: &Value) -> Result<Self> {
        if !raw.is_object() {
            return Err(Error::Validation(format!(
                "{kind} parameters must be a JSON object"
            )));
        }
        let invalid = |e: serde_json::Error| Error::Validation(format!("{kind}: {e}"));
        let mut params = match kind {
            RequestKind::TopicModeling => {
                Self::TopicModeling(serde_json::from_value(raw.clone()).map_err(invalid)?)
            }
            RequestKind::WordCloud => Self::WordCloud(serde_json::from_value(raw.clone()).map_err(invalid)?),
            RequestKind::WordFrequency => {
                Self::WordFrequency(serde_json::from_value(raw.clone()).map_err(invalid)?)
            }
        };
        params.normalize()?;
        Ok(params)
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::TopicModeling(_) => RequestKind::TopicModeling,
            Self::WordCloud(_) => RequestKind::WordCloud,
            Self::WordFrequency(_) => RequestKind::WordFrequency,
        }
    }

    pub fn to_value(&self) -> Value {
        let result = match self {
            Self::TopicModeling(p) => serde_json::to_value(p),
            Self::WordCloud(p) => serde_json::to_value(p),
            Self::WordFrequency(p) => serde_json::to_value(p),
        };
        // Plain structs of strings, dates and integers always serialize.
        result.unwrap_or(Value::Null)
    }

    fn normalize(&mut self) -> Result<()> {
        match self {
            Self::WordFrequency(p) => {
                let mut t = p.trajectory();
                t.normalize("word_frequency")?;
                p.institutions = t.institutions;
                p.terms = normalize_set(std::mem::take(&mut p.terms), |s| s.trim().to_lowercase());
                if p.terms.is_empty() {
                    return Err(Error::Validation("word_frequency: at least one term is required".into()));
                }
            }
            Self::WordCloud(p) => {
                let mut t = p.trajectory();
                t.normalize("word_cloud")?;
                p.institutions = t.institutions;
                if p.max_word_count < 1 {
                    return Err(Error::Validation("word_cloud: max_word_count must be at least 1".into()));
                }
            }
            Self::TopicModeling(p) => {
                let mut query = p.trajectory();
                query.normalize("topic_modeling")?;
                p.institutions = query.institutions;

                let mut support = Trajectory {
                    institutions: std::mem::take(&mut p.support_institutions),
                    start: p.support_start,
                    end: p.support_end,
                    step_days: 1,
                };
                support.normalize("topic_modeling support")?;
                p.support_institutions = support.institutions;

                if !(1..=MAX_TOPIC_COUNT).contains(&p.topic_count) {
                    return Err(Error::Validation(format!(
                        "topic_modeling: topic_count must be between 1 and {MAX_TOPIC_COUNT}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Normalize `raw` for `kind` and derive its fingerprint.
///
/// The hashed identity carries the kind and, when known, the corpus
/// revision. Returns the fingerprint and the normalized parameters to
/// persist with the job.
pub fn identify(kind: RequestKind, raw: &Value, corpus_revision: Option<&str>) -> Result<(Fingerprint, Value)> {
    let normalized = RequestParams::parse(kind, raw)?.to_value();
    let identity = json!({
        "kind": kind.as_str(),
        "parameters": normalized,
        "corpus_revision": corpus_revision,
    });
    Ok((fingerprint(&identity), normalized))
}

fn normalize_set(items: Vec<String>, f: impl Fn(&str) -> String) -> Vec<String> {
    let mut out: Vec<String> = items.iter().map(|s| f(s)).filter(|s| !s.is_empty()).collect();
    out.sort();
    out.dedup();
    out
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match OneOrMany::deserialize(d)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Accepts a list or a comma-separated string (`"mask, vaccine"`).
fn comma_list<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match OneOrMany::deserialize(d)? {
        OneOrMany::One(s) => s.split(',').map(str::to_string).collect(),
        OneOrMany::Many(v) => v,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrString {
    Num(i64),
    Str(String),
}

fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u32, D::Error> {
    let n = match NumOrString::deserialize(d)? {
        NumOrString::Num(n) => n,
        NumOrString::Str(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| de::Error::custom(format!("'{s}' is not an integer")))?,
    };
    u32::try_from(n).map_err(|_| de::Error::custom(format!("{n} is out of range")))
}
