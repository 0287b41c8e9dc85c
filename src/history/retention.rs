/// Bounds on how many and how old history entries are kept.
///
/// Either bound may be unset; with both unset nothing is pruned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep at most this many entries (oldest dropped first)
    pub max_entries: Option<usize>,

    /// Drop entries older than `now - max_age_millis`
    pub max_age_millis: Option<i64>,
}

impl RetentionPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_entries: None,
            max_age_millis: None,
        }
    }

    /// Oldest timestamp still retained at `now`, if an age window is set
    pub fn cutoff(&self, now: i64) -> Option<i64> {
        self.max_age_millis.map(|window| now.saturating_sub(window))
    }
}

impl Default for RetentionPolicy {
    /// 100 entries, 24 hours
    fn default() -> Self {
        Self {
            max_entries: Some(100),
            max_age_millis: Some(24 * 60 * 60 * 1000),
        }
    }
}
