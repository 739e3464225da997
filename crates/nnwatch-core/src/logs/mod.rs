// Log stream handling: buffer reconciliation and filtered views.

pub mod reconcile;
pub mod view;

/// Cap on the live in-memory log buffer.
pub const MAX_LOG_LINES: usize = 5000;

/// Cap on the log slice written to durable storage.
pub const PERSISTED_LOG_LINES: usize = 2000;
