use crate::error_sink::ErrorSink;
use crate::stats::StatsAggregator;

/// Shared mutable state of one run. Workers only reach it through these
/// two synchronized facilities.
#[derive(Debug, Default)]
pub struct SharedRunState {
    pub stats: StatsAggregator,
    pub errors: ErrorSink,
}

impl SharedRunState {
    pub fn new() -> Self {
        Self::default()
    }
}
