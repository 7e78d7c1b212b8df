//! Outgoing command queue and FIFO response correlation.
//!
//! The wire protocol carries no request identifier, so responses are matched
//! to commands purely by order. Each `send_command` call creates one reply
//! placeholder that travels with its command through the [`CommandQueue`].
//! The sender loop moves the placeholder into the [`Correlator`] right before
//! the frame is written, so the correlator always holds exactly the commands
//! that were transmitted and not yet answered, oldest first.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::{Notify, oneshot};

/// Receiving half of a reply placeholder.
pub type ReplyReceiver = oneshot::Receiver<String>;

/// A queued command and its reply placeholder.
#[derive(Debug)]
pub struct PendingCommand {
    /// Command text as given by the caller.
    pub code: String,
    reply: oneshot::Sender<String>,
}

impl PendingCommand {
    /// Whether the caller stopped waiting for this command.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Unbounded FIFO of commands waiting to be transmitted.
///
/// Survives reconnects: commands queued while disconnected are sent once a
/// connection comes up.
#[derive(Debug, Default)]
pub struct CommandQueue {
    queue: Mutex<VecDeque<PendingCommand>>,
    notify: Notify,
}

impl CommandQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a command and return the receiver for its response.
    pub fn push(&self, code: String) -> ReplyReceiver {
        let (reply, rx) = oneshot::channel();
        lock(&self.queue).push_back(PendingCommand { code, reply });
        self.notify.notify_one();
        rx
    }

    /// Take the oldest command without waiting.
    pub fn try_next(&self) -> Option<PendingCommand> {
        lock(&self.queue).pop_front()
    }

    /// Wait for the oldest command.
    ///
    /// Cancel-safe: a command is only removed from the queue when this
    /// future completes.
    pub async fn next(&self) -> PendingCommand {
        loop {
            if let Some(command) = self.try_next() {
                return command;
            }
            self.notify.notified().await;
        }
    }

    /// Number of commands waiting to be sent.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Whether no command is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued command, cancelling its caller. Returns how many were dropped.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = lock(&self.queue).drain(..).collect();
        drained.len()
    }
}

/// Outcome of resolving the oldest in-flight placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The waiting caller received the payload.
    Delivered,
    /// A placeholder was consumed but its caller had already given up.
    Abandoned,
    /// Nothing was in flight; the message was unsolicited.
    Unsolicited,
}

/// FIFO of reply placeholders for transmitted commands.
#[derive(Debug, Default)]
pub struct Correlator {
    in_flight: Mutex<VecDeque<oneshot::Sender<String>>>,
}

impl Correlator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a command's placeholder in flight and return its text for sending.
    pub fn register(&self, command: PendingCommand) -> String {
        let PendingCommand { code, reply } = command;
        lock(&self.in_flight).push_back(reply);
        code
    }

    /// Resolve the oldest in-flight placeholder with `payload`.
    pub fn resolve(&self, payload: String) -> Resolution {
        let Some(reply) = lock(&self.in_flight).pop_front() else {
            return Resolution::Unsolicited;
        };
        match reply.send(payload) {
            Ok(()) => Resolution::Delivered,
            Err(_) => Resolution::Abandoned,
        }
    }

    /// Number of transmitted commands still awaiting a response.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Whether no command is awaiting a response.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail every in-flight placeholder. Returns how many were failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = lock(&self.in_flight).drain(..).collect();
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot::error::TryRecvError;

    use super::*;

    fn send_all(queue: &CommandQueue, correlator: &Correlator) -> Vec<String> {
        std::iter::from_fn(|| queue.try_next())
            .map(|command| correlator.register(command))
            .collect()
    }

    #[tokio::test]
    async fn test_fifo_correlation() {
        let queue = CommandQueue::new();
        let correlator = Correlator::new();

        let a = queue.push("A".into());
        let b = queue.push("B".into());
        let c = queue.push("C".into());

        assert_eq!(send_all(&queue, &correlator), ["A", "B", "C"]);
        assert_eq!(correlator.len(), 3);

        assert_eq!(correlator.resolve("r1".into()), Resolution::Delivered);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(correlator.resolve("r2".into()), Resolution::Delivered);
        assert_eq!(correlator.resolve("r3".into()), Resolution::Delivered);

        assert_eq!(a.await.unwrap(), "r1");
        assert_eq!(b.await.unwrap(), "r2");
        assert_eq!(c.await.unwrap(), "r3");
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_unsolicited_when_nothing_in_flight() {
        let queue = CommandQueue::new();
        let correlator = Correlator::new();

        // Queued but not yet sent: a response must not resolve it.
        let mut rx = queue.push("pending".into());
        assert_eq!(correlator.resolve("hello".into()), Resolution::Unsolicited);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_abandoned_placeholder_still_consumed() {
        let queue = CommandQueue::new();
        let correlator = Correlator::new();

        let first = queue.push("first".into());
        let mut second = queue.push("second".into());
        send_all(&queue, &correlator);

        drop(first);
        assert_eq!(correlator.resolve("r1".into()), Resolution::Abandoned);
        assert_eq!(correlator.resolve("r2".into()), Resolution::Delivered);
        assert_eq!(second.try_recv().unwrap(), "r2");
    }

    #[test]
    fn test_abandoned_detection() {
        let queue = CommandQueue::new();
        let rx = queue.push("x".into());
        drop(rx);
        assert!(queue.try_next().unwrap().is_abandoned());
    }

    #[test]
    fn test_fail_all_cancels_callers() {
        let queue = CommandQueue::new();
        let correlator = Correlator::new();

        let mut sent = queue.push("sent".into());
        send_all(&queue, &correlator);
        let mut queued = queue.push("queued".into());

        assert_eq!(correlator.fail_all(), 1);
        assert_eq!(queue.cancel_all(), 1);

        assert!(matches!(sent.try_recv(), Err(TryRecvError::Closed)));
        assert!(matches!(queued.try_recv(), Err(TryRecvError::Closed)));
        assert!(correlator.is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_next_wakes_on_push() {
        let queue = CommandQueue::new();
        let mut next = tokio_test::task::spawn(queue.next());

        tokio_test::assert_pending!(next.poll());
        let _rx = queue.push("late".into());

        assert!(next.is_woken());
        let command = tokio_test::assert_ready!(next.poll());
        assert_eq!(command.code, "late");
    }
}
