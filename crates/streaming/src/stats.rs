/// Running counters for one tile scheduler.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FetchStats {
    /// Reconciliation passes run.
    pub passes: u64,
    /// New tasks created and issued.
    pub issued: u64,
    /// Cancelled or failed tasks issued again.
    pub refetched: u64,
    /// In-flight tasks cancelled because their tile left the view.
    pub cancelled: u64,
    /// Tiles handed to the sink.
    pub finished: u64,
    /// Fetches that failed with an error.
    pub failed: u64,
    /// Fetches that reported their own cancellation.
    pub aborted: u64,
    /// Completions discarded because their attempt was superseded.
    pub stale: u64,
}

impl std::fmt::Display for FetchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "passes={} issued={} refetched={} cancelled={} finished={} failed={} aborted={} stale={}",
            self.passes,
            self.issued,
            self.refetched,
            self.cancelled,
            self.finished,
            self.failed,
            self.aborted,
            self.stale
        )
    }
}
