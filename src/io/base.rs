use crate::error::{PopError, PushError};
use std::time::Duration;

/// Producing capability of a queue endpoint.
///
/// A module declares the capability it needs per endpoint, not the concrete
/// channel type; both halves of [`SpscQueue`](crate::io::SpscQueue)
/// implement one of these seams.
pub trait QueueSink<T: Send>: Send {
    /// Endpoint name, for logs and diagnostics.
    fn name(&self) -> &str;

    /// Move `value` into the queue, waiting at most `timeout` for room.
    /// On timeout the value comes back inside the error.
    fn push_wait_for(&mut self, value: T, timeout: Duration) -> Result<(), PushError<T>>;

    /// Single non-blocking attempt.
    fn push(&mut self, value: T) -> Result<(), PushError<T>> {
        self.push_wait_for(value, Duration::ZERO)
    }

    /// Copying form for callers that still need the value afterwards.
    /// Distinct from the moving form by signature, never by a runtime branch.
    fn push_clone_wait_for(&mut self, value: &T, timeout: Duration) -> Result<(), PushError<T>>
    where
        T: Clone,
    {
        self.push_wait_for(value.clone(), timeout)
    }
}

/// Consuming capability of a queue endpoint.
pub trait QueueSource<T: Send>: Send {
    /// Endpoint name, for logs and diagnostics.
    fn name(&self) -> &str;

    /// Wait at most `timeout` for a value. Timeout is an outcome, not a fault.
    fn pop_wait_for(&mut self, timeout: Duration) -> Result<T, PopError>;

    /// Single non-blocking attempt.
    fn pop(&mut self) -> Result<T, PopError> {
        self.pop_wait_for(Duration::ZERO)
    }
}
