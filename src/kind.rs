//! Request kinds and artifact namespaces.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The analyses a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    TopicModeling,
    WordCloud,
    WordFrequency,
}

impl RequestKind {
    pub const ALL: [RequestKind; 3] = [Self::TopicModeling, Self::WordCloud, Self::WordFrequency];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopicModeling => "topic_modeling",
            Self::WordCloud => "word_cloud",
            Self::WordFrequency => "word_frequency",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().replace('-', "_").as_str() {
            "topic_modeling" => Ok(Self::TopicModeling),
            "word_cloud" => Ok(Self::WordCloud),
            "word_frequency" => Ok(Self::WordFrequency),
            other => Err(Error::Validation(format!(
                "unknown request kind '{other}'. Use: topic_modeling, word_cloud, word_frequency"
            ))),
        }
    }

    /// Namespace holding this kind's finished results.
    pub fn final_namespace(&self) -> Namespace {
        Namespace::Final(*self)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifact tiers. Intermediate tiers are keyed by the fingerprint of the
/// upstream inputs of their stage, so requests sharing a stage share its
/// output even when their final parameters differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    /// Posts of a trajectory, partitioned into time segments.
    Segments,
    /// Preprocessed token lists per segment.
    Tokens,
    WordFrequencies,
    WordClouds,
    /// Fitted topic model.
    TopicModel,
    /// Visualization payload of a fitted topic model.
    TopicSummary,
    /// Topic trajectories of a query against a fitted model.
    Trends,
    Final(RequestKind),
}

impl Namespace {
    pub const ALL: [Namespace; 10] = [
        Self::Segments,
        Self::Tokens,
        Self::WordFrequencies,
        Self::WordClouds,
        Self::TopicModel,
        Self::TopicSummary,
        Self::Trends,
        Self::Final(RequestKind::TopicModeling),
        Self::Final(RequestKind::WordCloud),
        Self::Final(RequestKind::WordFrequency),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Segments => "segments",
            Self::Tokens => "tokens",
            Self::WordFrequencies => "word_frequencies",
            Self::WordClouds => "word_clouds",
            Self::TopicModel => "topic_model",
            Self::TopicSummary => "topic_summary",
            Self::Trends => "trends",
            Self::Final(RequestKind::TopicModeling) => "topic_modeling-final",
            Self::Final(RequestKind::WordCloud) => "word_cloud-final",
            Self::Final(RequestKind::WordFrequency) => "word_frequency-final",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|ns| ns.as_str() == s.trim())
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|ns| ns.as_str()).collect();
                Error::Validation(format!(
                    "unknown namespace '{s}'. Use: {}",
                    known.join(", ")
                ))
            })
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kind_roundtrip() {
        for kind in RequestKind::ALL {
            assert_eq!(RequestKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(RequestKind::parse("word-cloud").unwrap(), RequestKind::WordCloud);
    }

    #[test]
    fn request_kind_unknown() {
        assert!(RequestKind::parse("sentiment").unwrap_err().is_validation());
    }

    #[test]
    fn namespace_roundtrip() {
        for ns in Namespace::ALL {
            assert_eq!(Namespace::parse(ns.as_str()).unwrap(), ns);
        }
    }

    #[test]
    fn final_namespaces_are_prefixed_by_kind() {
        for kind in RequestKind::ALL {
            let ns = kind.final_namespace();
            assert!(ns.is_final());
            assert!(ns.as_str().starts_with(kind.as_str()));
        }
        assert!(!Namespace::Tokens.is_final());
    }

    #[test]
    fn request_kind_serde_is_snake_case() {
        let json = serde_json::to_string(&RequestKind::WordFrequency).unwrap();
        assert_eq!(json, "\"word_frequency\"");
    }
}
