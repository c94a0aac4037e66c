//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The sync logic
//! depends only on these traits, not on concrete implementations.

mod fee_source;

pub use fee_source::{FeeSource, FetchFeesResult};
