//! Collaborator callbacks and error deduplication.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crate::ConnectionState;

/// Callbacks invoked by the connection manager.
///
/// All methods default to no-ops. They run on the manager's tasks, so
/// implementations should return quickly; push onto a channel (see
/// [`EventStore`](crate::EventStore)) for anything heavier.
pub trait ConnectionHandler: Send + Sync {
    /// Fired on every state transition and on each backoff tick.
    ///
    /// `retry_in` is the remaining wait before the next connect attempt and
    /// is only set while counting down in [`ConnectionState::Disconnected`].
    fn on_state_change(&self, state: ConnectionState, retry_in: Option<Duration>) {
        let _ = (state, retry_in);
    }

    /// Fired for every decoded inbound message, solicited or not.
    fn on_response(&self, payload: &str) {
        let _ = payload;
    }

    /// Fired for every recoverable failure.
    ///
    /// Consecutive identical messages arrive once each with a `(×N)` suffix
    /// and `repeat` set.
    fn on_error(&self, message: &str, repeat: bool) {
        let _ = (message, repeat);
    }
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl ConnectionHandler for NoopHandler {}

impl<H: ConnectionHandler + ?Sized> ConnectionHandler for Arc<H> {
    fn on_state_change(&self, state: ConnectionState, retry_in: Option<Duration>) {
        (**self).on_state_change(state, retry_in);
    }

    fn on_response(&self, payload: &str) {
        (**self).on_response(payload);
    }

    fn on_error(&self, message: &str, repeat: bool) {
        (**self).on_error(message, repeat);
    }
}

/// Collapses runs of identical error messages.
#[derive(Debug, Default)]
pub struct ErrorDedup {
    last: Option<String>,
    count: u32,
}

impl ErrorDedup {
    /// Record `message`, returning the text to emit and whether it repeats
    /// the previous one.
    pub fn record(&mut self, message: &str) -> (String, bool) {
        if self.last.as_deref() == Some(message) {
            self.count += 1;
            (format!("{message} (×{})", self.count), true)
        } else {
            self.last = Some(message.to_string());
            self.count = 1;
            (message.to_string(), false)
        }
    }

    /// Forget the previous message.
    pub fn reset(&mut self) {
        self.last = None;
        self.count = 0;
    }
}

/// Dispatches events to the handler, applying error dedup.
pub(crate) struct Notifier {
    handler: Arc<dyn ConnectionHandler>,
    dedup: Mutex<ErrorDedup>,
}

impl Notifier {
    pub(crate) fn new(handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            handler,
            dedup: Mutex::new(ErrorDedup::default()),
        }
    }

    pub(crate) fn state(&self, state: ConnectionState, retry_in: Option<Duration>) {
        self.handler.on_state_change(state, retry_in);
    }

    pub(crate) fn response(&self, payload: &str) {
        self.handler.on_response(payload);
    }

    pub(crate) fn error(&self, message: &str) {
        let (text, repeat) = self
            .dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(message);
        if repeat {
            tracing::debug!(%text, "repeated error");
        } else {
            tracing::warn!(%text, "connection error");
        }
        self.handler.on_error(&text, repeat);
    }

    pub(crate) fn reset_errors(&self) {
        self.dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        errors: Mutex<Vec<(String, bool)>>,
    }

    impl ConnectionHandler for Recorder {
        fn on_error(&self, message: &str, repeat: bool) {
            self.errors.lock().unwrap().push((message.to_string(), repeat));
        }
    }

    #[test]
    fn test_dedup_counts_repeats() {
        let mut dedup = ErrorDedup::default();
        assert_eq!(dedup.record("refused"), ("refused".to_string(), false));
        assert_eq!(dedup.record("refused"), ("refused (×2)".to_string(), true));
        assert_eq!(dedup.record("refused"), ("refused (×3)".to_string(), true));
        assert_eq!(dedup.record("timeout"), ("timeout".to_string(), false));
        assert_eq!(dedup.record("refused"), ("refused".to_string(), false));
    }

    #[test]
    fn test_reset_forgets_last() {
        let mut dedup = ErrorDedup::default();
        dedup.record("refused");
        dedup.reset();
        assert_eq!(dedup.record("refused"), ("refused".to_string(), false));
    }

    #[test]
    fn test_notifier_forwards_deduped() {
        let recorder = Arc::new(Recorder::default());
        let notifier = Notifier::new(recorder.clone());

        notifier.error("boom");
        notifier.error("boom");
        notifier.reset_errors();
        notifier.error("boom");

        let errors = recorder.errors.lock().unwrap();
        assert_eq!(
            *errors,
            vec![
                ("boom".to_string(), false),
                ("boom (×2)".to_string(), true),
                ("boom".to_string(), false),
            ]
        );
    }
}
