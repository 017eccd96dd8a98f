use std::time::Duration;

use tokio::{sync::oneshot::Receiver, time::timeout};

use super::{ReceiveTimeoutError, TimeoutReceiver};

/// Response channels used by request/reply commands. A sender dropped
/// without replying reads as closed.
impl<T> TimeoutReceiver<T> for Receiver<T>
where
    T: Send + Sync,
{
    async fn recv_timeout(&mut self, duration: Duration) -> Result<T, ReceiveTimeoutError> {
        match timeout(duration, self).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ReceiveTimeoutError::Closed),
            Err(_) => Err(ReceiveTimeoutError::Timeout),
        }
    }
}
