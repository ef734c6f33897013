//! Canonical terms, the identity hierarchy, and the artifact store.
//!
//! Everything in this module is loaded once at startup and immutable
//! thereafter; lookups are pure and safe to share across tasks.

pub mod canonical;
pub mod hierarchy;
pub mod store;

pub use canonical::{canonicalize, is_stop_word, tokenize};
pub use hierarchy::IdentityHierarchy;
pub use store::IndexStore;
