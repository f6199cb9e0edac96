//! Text-analytics building blocks used by the corpus engine.

pub mod frequency;
pub mod nmf;
pub mod tfidf;
pub mod timespan;
pub mod tokenizer;
