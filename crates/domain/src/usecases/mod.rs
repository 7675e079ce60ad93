//! Application use cases / business logic

pub mod filter;
pub mod normalize;
pub mod sync_loop;

pub use filter::FilterPipeline;
pub use normalize::{NormalizeError, normalize};
pub use sync_loop::{SyncConfig, SyncEngine, SyncError};
