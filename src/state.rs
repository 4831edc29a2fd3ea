use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runtime handles owned by a running dashboard. Cancelling the token is the
/// intentional close; both tasks exit without reconnecting.
pub struct FeedStreamHandle {
    pub cancellation_token: CancellationToken,
    pub stream_task: JoinHandle<()>,
    pub resubscribe_task: JoinHandle<()>,
}

impl Drop for FeedStreamHandle {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
