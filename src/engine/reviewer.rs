//! Draft review loop.
//!
//! Checks a draft narrative against the framework rules and drives
//! targeted corrections: each iteration lists the surviving violations
//! in a review prompt and asks for a rewrite of only those issues. The
//! loop is bounded; hitting the cap returns the last draft with a
//! `capped` flag recorded in telemetry, never surfaced to the user.

use std::sync::LazyLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chunking::{extract_years, sentence_list};
use crate::config::EngineConfig;
use crate::engine::prompt::{PromptSet, build_review_prompt};
use crate::error::QueryError;
use crate::index::{canonicalize, tokenize};
use crate::llm::LlmClient;
use crate::retrieval::RetrievedPassage;

/// Substrings forbidden by corpus naming conventions.
const FORBIDDEN_PHRASES: &[&str] = &["& Co.", "& Company"];

/// Share of sentences whose subject must match the question before the
/// subject check passes.
const SUBJECT_MATCH_MIN: f64 = 0.5;

/// Leading words of a sentence scanned for the subject match.
const SUBJECT_WINDOW: usize = 6;

/// Minimum sentence count before the subject check applies at all.
const SUBJECT_MIN_SENTENCES: usize = 4;

static FOLLOW_UP_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?im)^#+\s*(further|follow[- ]?up)\s+questions?\b").unwrap()
});

/// Kind of framework violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Year mentions regress within a section.
    ChronologyBroken,
    /// Too few sentences keep the question's subject in front position.
    SubjectDrift,
    /// A forbidden naming suffix appears.
    ForbiddenPhrase,
    /// An institution appears without italics, or a person with them.
    Typography,
    /// A year cited in the draft is attested by no retrieved passage.
    UnattestedFact,
    /// Follow-up questions section missing or out of the 3–5 range.
    FollowUpSection,
}

/// One detected violation with a prompt-ready description.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Violation kind.
    pub kind: ViolationKind,
    /// Human-readable detail handed to the review prompt.
    pub detail: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.detail)
    }
}

/// Outcome of the review loop.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    /// Final draft (corrected, or last attempt when capped).
    pub draft: String,
    /// Correction calls issued.
    pub iterations: usize,
    /// `true` when violations remained at the iteration cap.
    pub capped: bool,
}

/// Framework rule checker and correction driver.
#[derive(Debug, Clone)]
pub struct AnswerReviewer {
    institutions: Vec<String>,
    persons: Vec<String>,
    max_iterations: usize,
}

impl AnswerReviewer {
    /// Creates a reviewer from configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            institutions: config.institutions.clone(),
            persons: config.persons.clone(),
            max_iterations: config.max_review_iterations,
        }
    }

    /// Runs every check and returns the violations found.
    #[must_use]
    pub fn check(
        &self,
        draft: &str,
        question: &str,
        passages: &[RetrievedPassage],
    ) -> Vec<Violation> {
        let mut violations = Vec::new();
        Self::check_chronology(draft, &mut violations);
        Self::check_subjects(draft, question, &mut violations);
        Self::check_forbidden(draft, &mut violations);
        self.check_typography(draft, &mut violations);
        Self::check_attestation(draft, passages, &mut violations);
        Self::check_follow_ups(draft, &mut violations);
        violations
    }

    /// Splits a draft into sections at markdown headers. The preamble
    /// before the first header is its own section.
    fn sections(draft: &str) -> Vec<&str> {
        let mut sections = Vec::new();
        let mut start = 0;
        for (offset, _) in draft.match_indices('\n') {
            let rest = &draft[offset + 1..];
            if rest.starts_with('#') {
                if offset > start {
                    sections.push(&draft[start..offset]);
                }
                start = offset + 1;
            }
        }
        if start < draft.len() {
            sections.push(&draft[start..]);
        }
        sections
    }

    /// Years mentioned in narrative lines. Header lines carry period
    /// labels (`## 1850–1899`), which are structure, not claims.
    fn narrative_years(text: &str) -> Vec<i32> {
        text.lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .flat_map(extract_years)
            .collect()
    }

    fn check_chronology(draft: &str, violations: &mut Vec<Violation>) {
        for section in Self::sections(draft) {
            if FOLLOW_UP_HEADER_RE.is_match(section) {
                continue;
            }
            let years = Self::narrative_years(section);
            if let Some(window) = years.windows(2).find(|w| w[1] < w[0]) {
                violations.push(Violation {
                    kind: ViolationKind::ChronologyBroken,
                    detail: format!(
                        "chronology regresses from {} to {} within one section; reorder events",
                        window[0], window[1]
                    ),
                });
                return;
            }
        }
    }

    fn check_subjects(draft: &str, question: &str, violations: &mut Vec<Violation>) {
        let allowed: Vec<String> = tokenize(question);
        if allowed.is_empty() {
            return;
        }
        let body = FOLLOW_UP_HEADER_RE
            .find(draft)
            .map_or(draft, |m| &draft[..m.start()]);
        let sentences = sentence_list(body);
        let narrative: Vec<&&str> = sentences
            .iter()
            .filter(|s| !s.starts_with('#'))
            .collect();
        if narrative.len() < SUBJECT_MIN_SENTENCES {
            return;
        }
        let matching = narrative
            .iter()
            .filter(|sentence| {
                sentence
                    .split_whitespace()
                    .take(SUBJECT_WINDOW)
                    .map(canonicalize)
                    .any(|w| allowed.contains(&w))
            })
            .count();
        #[allow(clippy::cast_precision_loss)]
        let share = matching as f64 / narrative.len() as f64;
        if share < SUBJECT_MATCH_MIN {
            violations.push(Violation {
                kind: ViolationKind::SubjectDrift,
                detail: format!(
                    "only {matching} of {} sentences open on the question's subject; \
                     rewrite drifting sentences subject-active",
                    narrative.len()
                ),
            });
        }
    }

    fn check_forbidden(draft: &str, violations: &mut Vec<Violation>) {
        for phrase in FORBIDDEN_PHRASES {
            if draft.contains(phrase) {
                violations.push(Violation {
                    kind: ViolationKind::ForbiddenPhrase,
                    detail: format!("forbidden suffix '{phrase}' present; use the bare house name"),
                });
            }
        }
    }

    /// Checks that every listed institution occurrence is italicized and
    /// no listed person is.
    fn check_typography(&self, draft: &str, violations: &mut Vec<Violation>) {
        for institution in &self.institutions {
            for (pos, _) in draft.match_indices(institution.as_str()) {
                let before = draft[..pos].chars().next_back();
                let after = draft[pos + institution.len()..].chars().next();
                if before != Some('*') || after != Some('*') {
                    violations.push(Violation {
                        kind: ViolationKind::Typography,
                        detail: format!("institution '{institution}' must appear in *italics*"),
                    });
                    break;
                }
            }
        }
        for person in &self.persons {
            for (pos, _) in draft.match_indices(person.as_str()) {
                let before = draft[..pos].chars().next_back();
                let after = draft[pos + person.len()..].chars().next();
                if before == Some('*') && after == Some('*') {
                    violations.push(Violation {
                        kind: ViolationKind::Typography,
                        detail: format!("person '{person}' must appear in plain text, not italics"),
                    });
                    break;
                }
            }
        }
    }

    /// Every year cited in the draft must appear in at least one
    /// retrieved passage.
    fn check_attestation(
        draft: &str,
        passages: &[RetrievedPassage],
        violations: &mut Vec<Violation>,
    ) {
        let attested: std::collections::HashSet<i32> = passages
            .iter()
            .flat_map(|p| extract_years(&p.text))
            .collect();
        let mut unattested: Vec<i32> = Self::narrative_years(draft)
            .into_iter()
            .filter(|y| !attested.contains(y))
            .collect();
        unattested.sort_unstable();
        unattested.dedup();
        if !unattested.is_empty() {
            violations.push(Violation {
                kind: ViolationKind::UnattestedFact,
                detail: format!(
                    "years {unattested:?} appear in the draft but in no retrieved passage; \
                     remove or correct them"
                ),
            });
        }
    }

    fn check_follow_ups(draft: &str, violations: &mut Vec<Violation>) {
        let Some(header) = FOLLOW_UP_HEADER_RE.find(draft) else {
            violations.push(Violation {
                kind: ViolationKind::FollowUpSection,
                detail: "missing '## Further Questions' section with 3-5 questions".to_string(),
            });
            return;
        };
        let section = &draft[header.end()..];
        let count = section
            .lines()
            .filter(|line| line.trim_end().ends_with('?'))
            .count();
        if !(3..=5).contains(&count) {
            violations.push(Violation {
                kind: ViolationKind::FollowUpSection,
                detail: format!("follow-up question count is {count}, must be between 3 and 5"),
            });
        }
    }

    /// Runs the bounded correction loop.
    ///
    /// Returns early when a check pass comes back clean; otherwise issues
    /// a review call per iteration up to the cap and flags `capped`.
    ///
    /// # Errors
    ///
    /// Propagates [`QueryError::Llm`] from review calls.
    pub async fn review(
        &self,
        client: &LlmClient,
        prompts: &PromptSet,
        question: &str,
        mut draft: String,
        passages: &[RetrievedPassage],
        cancel: &CancellationToken,
    ) -> Result<ReviewOutcome, QueryError> {
        for iteration in 0..self.max_iterations {
            let violations = self.check(&draft, question, passages);
            if violations.is_empty() {
                return Ok(ReviewOutcome {
                    draft,
                    iterations: iteration,
                    capped: false,
                });
            }
            debug!(
                iteration,
                violations = violations.len(),
                "review pass found violations"
            );
            let listed: Vec<String> = violations.iter().map(ToString::to_string).collect();
            let prompt = build_review_prompt(&prompts.review, question, &draft, &listed);
            draft = client.generate(prompt, cancel).await?.text;
        }

        let capped = !self.check(&draft, question, passages).is_empty();
        if capped {
            warn!(
                max_iterations = self.max_iterations,
                "review capped with violations remaining"
            );
        }
        Ok(ReviewOutcome {
            draft,
            iterations: self.max_iterations,
            capped,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::provider::{GenerationRequest, GenerationResponse, LlmProvider, TokenUsage};
    use crate::llm::RateGate;
    use crate::retrieval::SourceTag;
    use std::sync::Arc;

    const CLEAN_DRAFT: &str = "## The Vienna house\n\n\
        Rothschild opened the Vienna house in 1820. Rothschild financed the \
        Nordbahn in 1836. Rothschild weathered the crisis in 1848. Rothschild \
        stood behind the *Credit-Anstalt* in 1857.\n\n\
        ## Further Questions\n\n\
        1. How did Rothschild fund the Nordbahn in 1836?\n\
        2. Who led the house through 1848?\n\
        3. What tied the house to the *Credit-Anstalt*?\n";

    fn passages() -> Vec<RetrievedPassage> {
        vec![RetrievedPassage {
            chunk_id: "c1".to_string(),
            text: "Vienna 1820 1836 1848 1857 archive notes.".to_string(),
            score: 0.0,
            source: SourceTag::Keyword,
        }]
    }

    fn reviewer() -> AnswerReviewer {
        let config = EngineConfig::builder()
            .api_key("test")
            .max_review_iterations(5)
            .build()
            .unwrap_or_else(|_| unreachable!());
        AnswerReviewer::new(&config)
    }

    #[test]
    fn test_clean_draft_passes() {
        let violations = reviewer().check(CLEAN_DRAFT, "Rothschild Vienna", &passages());
        assert!(violations.is_empty(), "unexpected violations: {violations:?}");
    }

    #[test]
    fn test_forbidden_phrase_detected() {
        let draft = CLEAN_DRAFT.replace("Rothschild opened", "Rothschild & Co. opened");
        let violations = reviewer().check(&draft, "Rothschild Vienna", &passages());
        assert!(
            violations
                .iter()
                .any(|v| v.kind == ViolationKind::ForbiddenPhrase)
        );
    }

    #[test]
    fn test_chronology_regression_detected() {
        let draft = CLEAN_DRAFT
            .replace("in 1820", "in 1850")
            .replace("in 1836", "in 1821");
        let violations = reviewer().check(&draft, "Rothschild Vienna", &passages());
        assert!(
            violations
                .iter()
                .any(|v| v.kind == ViolationKind::ChronologyBroken)
        );
    }

    #[test]
    fn test_chronology_ignores_follow_up_section() {
        // Follow-up questions may reference any year in any order.
        let violations = reviewer().check(CLEAN_DRAFT, "Rothschild Vienna", &passages());
        assert!(
            !violations
                .iter()
                .any(|v| v.kind == ViolationKind::ChronologyBroken)
        );
    }

    #[test]
    fn test_period_label_headers_are_not_claims() {
        // A section header like `## 1850–1899` must trip neither the
        // chronology check nor the attestation check.
        let draft = "## 1850–1899\n\n\
            Rothschild acted in 1857.\n\n\
            ## Further Questions\n\n1. a?\n2. b?\n3. c?\n";
        let violations = reviewer().check(draft, "Rothschild Vienna", &passages());
        assert!(
            !violations.iter().any(|v| matches!(
                v.kind,
                ViolationKind::ChronologyBroken | ViolationKind::UnattestedFact
            )),
            "header years misread as claims: {violations:?}"
        );
    }

    #[test]
    fn test_subject_drift_detected() {
        let draft = "## Section\n\n\
            The weather was poor that year. Parliament debated tariffs. \
            The harvest failed again. Prices rose across the continent. \
            Shipping stalled in the ports.\n\n\
            ## Further Questions\n\n1. a?\n2. b?\n3. c?\n";
        let violations = reviewer().check(draft, "Rothschild Vienna", &[]);
        assert!(
            violations
                .iter()
                .any(|v| v.kind == ViolationKind::SubjectDrift)
        );
    }

    #[test]
    fn test_institution_typography_detected() {
        let draft = CLEAN_DRAFT.replace("*Credit-Anstalt*", "Credit-Anstalt");
        let violations = reviewer().check(&draft, "Rothschild Vienna", &passages());
        assert!(violations.iter().any(|v| v.kind == ViolationKind::Typography));
    }

    #[test]
    fn test_person_italics_detected() {
        let draft = CLEAN_DRAFT.replace(
            "Rothschild opened the Vienna house in 1820.",
            "*Nathan Rothschild* opened the Vienna house in 1820.",
        );
        let violations = reviewer().check(&draft, "Rothschild Vienna", &passages());
        assert!(violations.iter().any(|v| v.kind == ViolationKind::Typography));
    }

    #[test]
    fn test_unattested_year_detected() {
        let draft = CLEAN_DRAFT.replace("in 1836", "in 1837");
        let violations = reviewer().check(&draft, "Rothschild Vienna", &passages());
        assert!(
            violations
                .iter()
                .any(|v| v.kind == ViolationKind::UnattestedFact)
        );
    }

    #[test]
    fn test_follow_up_count_enforced() {
        let draft = CLEAN_DRAFT.replace("3. What tied the house to the *Credit-Anstalt*?\n", "");
        let violations = reviewer().check(&draft, "Rothschild Vienna", &passages());
        assert!(
            violations
                .iter()
                .any(|v| v.kind == ViolationKind::FollowUpSection)
        );
    }

    #[test]
    fn test_missing_follow_up_section_detected() {
        let draft = "## Section\n\nRothschild acted in 1820.\n";
        let violations = reviewer().check(draft, "Rothschild Vienna", &passages());
        assert!(
            violations
                .iter()
                .any(|v| v.kind == ViolationKind::FollowUpSection)
        );
    }

    /// Provider scripted with a fixed sequence of responses.
    struct SequenceProvider {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmProvider for SequenceProvider {
        fn name(&self) -> &'static str {
            "sequence"
        }

        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            let mut responses = self.responses.lock().unwrap();
            let text = if responses.is_empty() {
                String::new()
            } else {
                responses.remove(0)
            };
            Ok(GenerationResponse {
                text,
                usage: TokenUsage::default(),
            })
        }
    }

    fn client_with(responses: Vec<String>) -> LlmClient {
        let config = EngineConfig::builder()
            .api_key("test")
            .build()
            .unwrap_or_else(|_| unreachable!());
        LlmClient::new(
            Arc::new(SequenceProvider {
                responses: Mutex::new(responses),
            }),
            RateGate::new(1000, 10_000_000),
            &config,
        )
    }

    #[tokio::test]
    async fn test_review_corrects_forbidden_phrase_in_one_iteration() {
        let dirty = CLEAN_DRAFT.replace("Rothschild opened", "Rothschild & Co. opened");
        let client = client_with(vec![CLEAN_DRAFT.to_string()]);
        let outcome = reviewer()
            .review(
                &client,
                &PromptSet::defaults(),
                "Rothschild Vienna",
                dirty,
                &passages(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!outcome.draft.contains("& Co."));
        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.capped);
    }

    #[tokio::test]
    async fn test_review_caps_on_persistent_violations() {
        let dirty = CLEAN_DRAFT.replace("Rothschild opened", "Rothschild & Co. opened");
        // The stub keeps returning the dirty draft.
        let client = client_with(vec![dirty.clone(); 10]);
        let config = EngineConfig::builder()
            .api_key("test")
            .max_review_iterations(2)
            .build()
            .unwrap_or_else(|_| unreachable!());
        let outcome = AnswerReviewer::new(&config)
            .review(
                &client,
                &PromptSet::defaults(),
                "Rothschild Vienna",
                dirty,
                &passages(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 2);
        assert!(outcome.capped);
    }

    #[tokio::test]
    async fn test_clean_draft_makes_no_calls() {
        let client = client_with(vec!["never used".to_string()]);
        let outcome = reviewer()
            .review(
                &client,
                &PromptSet::defaults(),
                "Rothschild Vienna",
                CLEAN_DRAFT.to_string(),
                &passages(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.draft, CLEAN_DRAFT);
    }
}
