use std::sync::LazyLock;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("url pattern"));
static MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@\w+").expect("mention pattern"));
static REPEATED_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([!?.,;:])[!?.,;:]+").expect("punctuation pattern"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Clean a raw post: drop links and @mentions, lowercase, collapse runs of
/// punctuation and whitespace.
pub fn preprocess(text: &str) -> String {
    let text = URL.replace_all(text, " ");
    let text = MENTION.replace_all(&text, " ");
    let text = text.to_lowercase();
    let text = REPEATED_PUNCT.replace_all(&text, "$1");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Every alphabetic word of a post, lowercased. Used for term counts, so
/// stopwords are kept.
pub fn tokens(text: &str) -> Vec<String> {
    preprocess(text)
        .unicode_words()
        .filter(|w| w.chars().all(char::is_alphabetic))
        .map(str::to_string)
        .collect()
}

/// Words that carry meaning: no stopwords, no single letters.
pub fn content_tokens(text: &str) -> Vec<String> {
    tokens(text).into_iter().filter(|w| is_content_word(w)).collect()
}

pub fn is_content_word(word: &str) -> bool {
    word.chars().count() >= 2 && !is_stopword(word)
}

fn is_stopword(word: &str) -> bool {
    matches!(
        word,
        "a" | "an" | "the" | "is" | "it" | "of" | "to" | "in" | "for" | "on" | "with"
        | "at" | "by" | "from" | "as" | "or" | "and" | "but" | "not" | "be" | "are"
        | "was" | "were" | "been" | "being" | "have" | "has" | "had" | "do" | "does"
        | "did" | "will" | "would" | "could" | "should" | "may" | "might" | "shall"
        | "can" | "this" | "that" | "these" | "those" | "there" | "here" | "where"
        | "when" | "what" | "which" | "who" | "whom" | "how" | "all" | "each" | "every"
        | "both" | "few" | "more" | "most" | "other" | "some" | "such" | "no" | "nor"
        | "only" | "own" | "same" | "so" | "than" | "too" | "very" | "just" | "because"
        | "about" | "into" | "through" | "during" | "before" | "after" | "above" | "below"
        | "between" | "under" | "again" | "further" | "then" | "once" | "any" | "its"
        | "your" | "our" | "their" | "his" | "her" | "my" | "if" | "up" | "out" | "also"
        | "we" | "you" | "they" | "he" | "she" | "me" | "us" | "them" | "i" | "am"
        | "rt" | "amp" | "via" | "get" | "now" | "new" | "one" | "today"
    )
}
