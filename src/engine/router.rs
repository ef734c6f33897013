//! Query routing.
//!
//! Classifies a question into one of four processing strategies. The
//! router runs once per job, after retrieval, because the size signal
//! depends on retrieval output. Rules apply first-match-wins.

use std::sync::LazyLock;

use regex::Regex;

use crate::chunking::Gazetteer;

/// Processing strategy for a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// A named financial event; geographic fan-out, strict failure policy.
    Event,
    /// A large topic; period fan-out.
    PeriodTopic,
    /// A multi-place topic; geographic fan-out.
    GeoTopic,
    /// Everything else; single-pass generation.
    SmallTopic,
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event => write!(f, "event"),
            Self::PeriodTopic => write!(f, "period-topic"),
            Self::GeoTopic => write!(f, "geo-topic"),
            Self::SmallTopic => write!(f, "small-topic"),
        }
    }
}

static EVENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)\b(panic|crisis|crash)\s+of\s+\d{4}\b").unwrap()
});

/// Named events recognized without a year pattern, lowercase.
const DEFAULT_EVENT_LEXICON: &[&str] = &[
    "overend gurney",
    "south sea bubble",
    "baring crisis",
    "black friday",
    "great depression",
    "long depression",
    "credit-anstalt collapse",
];

/// First-match-wins strategy classifier.
#[derive(Debug, Clone)]
pub struct QueryRouter {
    large_threshold: usize,
    event_lexicon: Vec<String>,
}

impl QueryRouter {
    /// Creates a router with the default event lexicon.
    #[must_use]
    pub fn new(large_threshold: usize) -> Self {
        Self {
            large_threshold,
            event_lexicon: DEFAULT_EVENT_LEXICON
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Replaces the event lexicon (entries must be lowercase).
    #[must_use]
    pub fn with_event_lexicon(mut self, lexicon: Vec<String>) -> Self {
        self.event_lexicon = lexicon;
        self
    }

    /// Classifies a question given the retrieved passage count.
    #[must_use]
    pub fn route(&self, question: &str, retrieved_count: usize, gazetteer: &Gazetteer) -> QueryType {
        let lowered = question.to_lowercase();
        if EVENT_RE.is_match(question)
            || self.event_lexicon.iter().any(|e| lowered.contains(e.as_str()))
        {
            return QueryType::Event;
        }
        if retrieved_count > self.large_threshold {
            return QueryType::PeriodTopic;
        }
        if gazetteer.regions_in(question).len() >= 2 {
            return QueryType::GeoTopic;
        }
        QueryType::SmallTopic
    }
}
