//! Progressive loading: quality selection, load sessions and progress
//! reporting.
//!
//! # Invariants
//! - A session always has exactly one instance attached, from the moment
//!   `start_session` returns until it is disposed.
//! - Displayed quality never decreases within a session.
//! - The active view mode survives every quality swap.
//! - A result arriving after disposal is discarded, never applied.

mod config;
mod controller;
mod progress;
mod selector;
mod session;

pub use config::{ConfigError, LoaderConfig};
pub use controller::{
    ApplyOutcome, ControllerBuilder, DiscardReason, LoadError, LoaderStats,
    ProgressiveLoadController,
};
pub use progress::{
    COMPLETE_PERCENT, FALLBACK_PERCENT, ProgressEvent, ProgressHub, ProgressStage,
    SubscriptionId, level_percent,
};
pub use selector::{DeviceProfile, GpuTier, QualitySelector, SelectorThresholds};
pub use session::{LoadOptions, SessionHandle, SessionState, SessionStatus};

pub fn crate_info() -> &'static str {
    "vetscan-stream v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("stream"));
    }
}
