//! LLM transport: provider abstraction, rate gate, retrying client.
//!
//! The gate is the single arbiter of admission and the client the single
//! owner of retries; nothing else in the system sleeps or retries.

pub mod client;
pub mod provider;
pub mod providers;
pub mod rate_gate;

pub use client::LlmClient;
pub use provider::{GenerationRequest, GenerationResponse, LlmProvider, TokenUsage, create_provider};
pub use rate_gate::{RateGate, RatePermit};
