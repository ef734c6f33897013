//! Query orchestration: routing, prompts, fan-out, review, and the
//! top-level engine composing them.

pub mod fanout;
pub mod processor;
pub mod prompt;
pub mod query;
pub mod reviewer;
pub mod router;

pub use fanout::{FanoutTelemetry, Partition, run_partitioned};
pub use processor::Processor;
pub use prompt::{PromptSet, build_merge_prompt, build_narrative_prompt, build_review_prompt};
pub use query::{QueryEngine, QueryOutcome};
pub use reviewer::{AnswerReviewer, ReviewOutcome, Violation, ViolationKind};
pub use router::{QueryRouter, QueryType};
