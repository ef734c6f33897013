//! System prompts and template builders for narrative generation.
//!
//! The rule block encoding the analytical framework lives here and only
//! here, so narrative, merge, and review calls all enforce the same
//! conventions. Builders are pure functions of their typed inputs.

use std::fmt::Write;
use std::path::Path;

use crate::chunking::PassageBatch;
use crate::retrieval::{RetrievedPassage, SourceTag};

/// Shared rule block appended to every generation prompt.
pub const FRAMEWORK_RULES: &str = r"## Framework Rules

1. Narrate in strict chronological order. Within every section, events must appear in the order they happened; never loop back to an earlier year inside a section.
2. Write subject-active sentences. The subject of the question acts; avoid passive constructions and sentences whose grammatical subject is an abstraction.
3. Typography: institutions appear in *italics* (e.g. *Bank of England*); persons appear in plain text. Never italicize a person.
4. Maintain the analytical framework in every section: read each episode through the sociology of the family, religious, and ethnic networks that carried the business, and through behavior under financial panics - who withdrew, who extended credit, who was trusted and why.
5. State only facts attested in the provided passages. Do not invent names, dates, figures, or causal claims.
6. Never use the '& Co.' or '& Company' suffix when naming a house; write the bare family or house name.
7. End with a '## Further Questions' section listing 3 to 5 follow-up questions whose answers the narrative above already supports.";

/// System prompt for per-batch narrative generation.
pub const NARRATIVE_SYSTEM_PROMPT: &str = r"You are a historian of banking writing from a fixed corpus of archival passages. Given a question and a set of passages, write a narrative section that answers the question using only what the passages attest.

## Instructions

1. Read every passage. Passages may overlap or disagree; prefer the more specific account and note disagreements in the narrative.
2. Organize strictly by time. Anchor each episode to its explicit years.
3. Analyze, do not summarize: for every episode, say what it shows about the family, religious, and ethnic networks behind the business, and about behavior under panic conditions.
4. Keep to the question's subject. Material in the passages that does not bear on the question is omitted, not mentioned.";

/// System prompt for merging partial narratives.
pub const MERGE_SYSTEM_PROMPT: &str = r"You are a historian of banking merging draft sections into one unified narrative. The drafts cover disjoint slices (periods or regions) of the same question and arrive in their final order.

## Instructions

1. Preserve the given section order; it encodes chronology.
2. Remove redundancy across drafts but keep every attested fact that bears on the question.
3. Smooth transitions so the narrative reads as one account, with a short section heading per slice.
4. Do not introduce facts absent from the drafts.";

/// System prompt for the review pass.
pub const REVIEW_SYSTEM_PROMPT: &str = r"You are correcting a draft narrative that violates specific framework rules. You receive the draft and a list of violations.

## Instructions

1. Fix only the listed violations. Leave correct content, structure, and wording untouched.
2. Never introduce new facts while correcting.
3. Return the full corrected narrative, not a diff or commentary.";

/// Default prompt directory under user config.
const DEFAULT_PROMPT_DIR: &str = ".config/chronicle-rs/prompts";

/// Filename for the narrative prompt template.
const NARRATIVE_FILENAME: &str = "narrative.md";
/// Filename for the merge prompt template.
const MERGE_FILENAME: &str = "merge.md";
/// Filename for the review prompt template.
const REVIEW_FILENAME: &str = "review.md";

/// A set of system prompts for all generation kinds.
///
/// Loaded from external template files when available, falling back to
/// compiled-in defaults. The framework rule block is always appended, so
/// template overrides cannot drop the conventions.
#[derive(Debug, Clone)]
pub struct PromptSet {
    /// System prompt for per-batch narrative calls.
    pub narrative: String,
    /// System prompt for merge calls.
    pub merge: String,
    /// System prompt for review calls.
    pub review: String,
}

impl PromptSet {
    /// Loads prompts from the given directory, falling back to compiled-in
    /// defaults.
    ///
    /// Resolution order for the directory:
    /// 1. Explicit `prompt_dir` argument (from configuration)
    /// 2. `PROMPT_DIR` environment variable
    /// 3. `~/.config/chronicle-rs/prompts/`
    ///
    /// Each file is loaded independently; a missing file uses its default.
    #[must_use]
    pub fn load(prompt_dir: Option<&Path>) -> Self {
        let resolved_dir = prompt_dir
            .map(std::path::PathBuf::from)
            .or_else(|| std::env::var("PROMPT_DIR").ok().map(std::path::PathBuf::from))
            .or_else(|| dirs::home_dir().map(|h| h.join(DEFAULT_PROMPT_DIR)));

        let load_file = |filename: &str, default: &str| -> String {
            resolved_dir
                .as_ref()
                .map(|dir| dir.join(filename))
                .and_then(|path| std::fs::read_to_string(&path).ok())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            narrative: load_file(NARRATIVE_FILENAME, NARRATIVE_SYSTEM_PROMPT),
            merge: load_file(MERGE_FILENAME, MERGE_SYSTEM_PROMPT),
            review: load_file(REVIEW_FILENAME, REVIEW_SYSTEM_PROMPT),
        }
    }

    /// Returns compiled-in defaults without checking the filesystem.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            narrative: NARRATIVE_SYSTEM_PROMPT.to_string(),
            merge: MERGE_SYSTEM_PROMPT.to_string(),
            review: REVIEW_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Writes the compiled-in default prompts to the given directory.
    ///
    /// Creates the directory if needed. Existing files are **not**
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if directory creation or file writing fails.
    pub fn write_defaults(dir: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
        std::fs::create_dir_all(dir)?;

        let templates = [
            (NARRATIVE_FILENAME, NARRATIVE_SYSTEM_PROMPT),
            (MERGE_FILENAME, MERGE_SYSTEM_PROMPT),
            (REVIEW_FILENAME, REVIEW_SYSTEM_PROMPT),
        ];

        let mut written = Vec::new();
        for (filename, content) in &templates {
            let path = dir.join(filename);
            if !path.exists() {
                std::fs::write(&path, content)?;
                written.push(path);
            }
        }

        Ok(written)
    }

    /// Returns the default prompt directory under the user's home.
    #[must_use]
    pub fn default_dir() -> Option<std::path::PathBuf> {
        dirs::home_dir().map(|h| h.join(DEFAULT_PROMPT_DIR))
    }
}

fn source_name(source: SourceTag) -> &'static str {
    match source {
        SourceTag::Keyword => "keyword",
        SourceTag::Semantic => "semantic",
        SourceTag::Endnote => "endnote",
    }
}

fn push_passages(prompt: &mut String, passages: &[RetrievedPassage]) {
    prompt.push_str("<passages>\n");
    for p in passages {
        let _ = write!(
            prompt,
            "<passage id=\"{id}\" source=\"{source}\">\n{text}\n</passage>\n\n",
            id = p.chunk_id,
            source = source_name(p.source),
            text = p.text,
        );
    }
    prompt.push_str("</passages>");
}

/// Builds the full prompt for one narrative batch.
///
/// `section` scopes the draft to a period or region label; `degraded`
/// annotates the prompt when semantic retrieval was unavailable.
#[must_use]
pub fn build_narrative_prompt(
    system: &str,
    question: &str,
    section: Option<&str>,
    batch: &PassageBatch,
    degraded: bool,
) -> String {
    let mut prompt = format!("{system}\n\n{FRAMEWORK_RULES}\n\n<question>{question}</question>\n\n");
    if let Some(label) = section {
        let _ = write!(prompt, "<section scope=\"{label}\"/>\n\n");
    }
    if degraded {
        prompt.push_str(
            "Note: semantic retrieval was unavailable for this question; \
             the passages come from keyword lookup only and may be incomplete.\n\n",
        );
    }
    push_passages(&mut prompt, &batch.passages);
    prompt
}

/// Builds the prompt that merges ordered drafts into one narrative.
///
/// `scope` names the slicing dimension (`"period"` or `"region"`) so the
/// merge keeps the right kind of chronology.
#[must_use]
pub fn build_merge_prompt(system: &str, question: &str, scope: &str, drafts: &[(String, String)]) -> String {
    let mut prompt = format!(
        "{system}\n\n{FRAMEWORK_RULES}\n\n<question>{question}</question>\n\n<drafts scope=\"{scope}\">\n"
    );
    for (label, draft) in drafts {
        let _ = write!(
            prompt,
            "<draft section=\"{label}\">\n{draft}\n</draft>\n\n",
        );
    }
    prompt.push_str("</drafts>\n\nMerge the drafts into one unified narrative in the given order.");
    prompt
}

/// Builds the prompt that corrects only the listed violations.
#[must_use]
pub fn build_review_prompt(
    system: &str,
    question: &str,
    draft: &str,
    violations: &[String],
) -> String {
    let mut prompt = format!(
        "{system}\n\n{FRAMEWORK_RULES}\n\n<question>{question}</question>\n\n<draft>\n{draft}\n</draft>\n\n<violations>\n"
    );
    for violation in violations {
        let _ = writeln!(prompt, "- {violation}");
    }
    prompt.push_str("</violations>\n\nCorrect only the listed violations and return the full narrative.");
    prompt
}
