//! Freshness gate: bounds how far a submission's claimed timestamp may stray
//! from the aggregator's clock.

/// Accepted age of a signed submission, in seconds.
pub const DEFAULT_FRESHNESS_WINDOW_SECS: u64 = 120;

/// Where a claimed timestamp falls relative to `[now - window, now]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    TooOld,
    InFuture,
}

impl Freshness {
    /// Classify `claimed` against `[now - window, now]`, bounds inclusive.
    pub fn check(claimed: i64, now: i64, window_secs: u64) -> Self {
        let window = i64::try_from(window_secs).unwrap_or(i64::MAX);
        if claimed > now {
            Self::InFuture
        } else if claimed < now.saturating_sub(window) {
            Self::TooOld
        } else {
            Self::Fresh
        }
    }

    pub fn is_fresh(self) -> bool {
        self == Self::Fresh
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::TooOld => "too old",
            Self::InFuture => "in the future",
        }
    }
}

/// Whether `claimed` lies within `[now - window, now]`.
pub fn is_fresh(claimed: i64, now: i64, window_secs: u64) -> bool {
    Freshness::check(claimed, now, window_secs).is_fresh()
}
