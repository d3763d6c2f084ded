/*
[INPUT]:  Public API exports for tradestream-watch crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod config;
pub mod runner;
pub mod snapshot;

// Re-export main types for convenience
pub use config::{WatchConfig, WatchStreamConfig};
pub use runner::WatchRunner;
pub use snapshot::StreamSnapshot;
