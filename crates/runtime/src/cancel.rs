use tokio_util::sync::CancellationToken;

/// Marker returned when cooperative work observes an abort request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation was cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Shared cancellation context handed to every fetch.
///
/// Clones observe the same signal. Raising it never blocks and never interrupts the
/// work directly: the work polls [`CancelHandle::is_cancelled`] (or awaits
/// [`CancelHandle::cancelled`]) at points of its own choosing.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn request_cancel(&self) {
        self.token.cancel();
    }

    /// `Err(Cancelled)` once an abort was requested.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when an abort is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::{CancelHandle, Cancelled};

    #[test]
    fn clones_share_the_signal() {
        let a = CancelHandle::new();
        let b = a.clone();
        assert_eq!(b.check(), Ok(()));
        a.request_cancel();
        assert!(b.is_cancelled());
        assert_eq!(b.check(), Err(Cancelled));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_request() {
        let h = CancelHandle::new();
        let waiter = h.clone();
        let join = tokio::spawn(async move { waiter.cancelled().await });
        h.request_cancel();
        join.await.unwrap();
    }
}
