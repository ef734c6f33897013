//! HTTP job API: the in-memory job registry and the axum surface.

pub mod http;
pub mod jobs;

pub use http::{AppState, router, serve};
pub use jobs::{JobRecord, JobStatus, JobStore};
