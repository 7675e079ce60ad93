//! mirrorpost adapters crate
//!
//! This crate contains infrastructure adapters implementing the domain ports:
//! - `timeline`: HTTP ingestion of the watched user's timeline
//! - `media_cache`: streaming HTTP media staging cache
//! - `ledger`: file-backed and in-memory sync ledgers
//! - `mastodon` / `bluesky`: publish targets

#![recursion_limit = "256"]

pub mod bluesky;
pub mod mastodon;
pub mod media_cache;
pub mod timeline;

mod ledger_file;
mod ledger_memory;

/// Re-exports for ledger adapters
pub mod ledger {
    pub use crate::ledger_file::FileLedger;
    pub use crate::ledger_memory::MemoryLedger;
}

pub use bluesky::BlueskyTarget;
pub use mastodon::MastodonTarget;
pub use media_cache::HttpMediaCache;
pub use timeline::TimelineSource;
