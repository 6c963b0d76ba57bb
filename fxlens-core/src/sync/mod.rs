//! Watermark resolution and incremental sync.

pub mod syncer;
pub mod watermark;

pub use syncer::{IncrementalSyncer, SyncError, SyncJob, SyncOutcome, SyncReport};
pub use watermark::WatermarkPolicy;
