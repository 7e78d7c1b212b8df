//! Broadcast + history event store for connection events.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
    time::Duration,
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{ConnectionHandler, ConnectionState};

/// Default number of events kept for late subscribers.
const HISTORY_LEN: usize = 1000;

/// Typed connection event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// State transition or backoff tick.
    StateChanged {
        state: ConnectionState,
        /// Seconds until the next connect attempt.
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_in: Option<f64>,
    },
    /// Inbound message payload.
    Response { payload: String },
    /// Recoverable failure, already deduplicated.
    Error { message: String, repeat: bool },
}

impl ConnectionEvent {
    /// Serialize as a single JSON line.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Event store with broadcast and bounded history.
///
/// Implements [`ConnectionHandler`], turning callbacks into a stream of
/// [`ConnectionEvent`]s so consumers own their own dispatch loop. New
/// subscribers receive history then live events.
pub struct EventStore {
    history: RwLock<VecDeque<ConnectionEvent>>,
    capacity: usize,
    sender: broadcast::Sender<ConnectionEvent>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    /// Create an event store with the default history size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_LEN)
    }

    /// Create an event store keeping at most `capacity` past events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            sender,
        }
    }

    /// Push an event to both live listeners and history.
    pub fn push(&self, event: ConnectionEvent) {
        let _ = self.sender.send(event.clone()); // live listeners

        let mut history = self
            .history
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.capacity == 0 {
            return;
        }
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn history(&self) -> Vec<ConnectionEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live events.
    ///
    /// Live events that lag behind the broadcast buffer are skipped.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, ConnectionEvent> {
        let rx = self.subscribe();
        let history = self.history();

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }

    /// Stream of response payloads only (live).
    #[must_use]
    pub fn response_stream(&self) -> futures::stream::BoxStream<'static, String> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|res| async move {
                match res {
                    Ok(ConnectionEvent::Response { payload }) => Some(payload),
                    _ => None,
                }
            })
            .boxed()
    }
}

impl ConnectionHandler for EventStore {
    fn on_state_change(&self, state: ConnectionState, retry_in: Option<Duration>) {
        self.push(ConnectionEvent::StateChanged {
            state,
            retry_in: retry_in.map(|d| d.as_secs_f64()),
        });
    }

    fn on_response(&self, payload: &str) {
        self.push(ConnectionEvent::Response {
            payload: payload.to_string(),
        });
    }

    fn on_error(&self, message: &str, repeat: bool) {
        self.push(ConnectionEvent::Error {
            message: message.to_string(),
            repeat,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(payload: &str) -> ConnectionEvent {
        ConnectionEvent::Response {
            payload: payload.to_string(),
        }
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let store = EventStore::new();
        store.on_state_change(ConnectionState::Connected, None);
        store.on_response("2");

        let mut stream = store.history_plus_stream();
        store.on_error("lost", false);

        assert_eq!(
            stream.next().await.unwrap(),
            ConnectionEvent::StateChanged {
                state: ConnectionState::Connected,
                retry_in: None
            }
        );
        assert_eq!(stream.next().await.unwrap(), response("2"));
        assert_eq!(
            stream.next().await.unwrap(),
            ConnectionEvent::Error {
                message: "lost".to_string(),
                repeat: false
            }
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let store = EventStore::with_capacity(2);
        for payload in ["a", "b", "c"] {
            store.on_response(payload);
        }
        assert_eq!(store.history(), vec![response("b"), response("c")]);
    }

    #[tokio::test]
    async fn test_response_stream_filters() {
        let store = EventStore::new();
        let mut responses = store.response_stream();

        store.on_state_change(ConnectionState::Connecting, None);
        store.on_response("first");
        store.on_error("oops", false);
        store.on_response("second");

        assert_eq!(responses.next().await.unwrap(), "first");
        assert_eq!(responses.next().await.unwrap(), "second");
    }

    #[test]
    fn test_event_json() {
        let tick = ConnectionEvent::StateChanged {
            state: ConnectionState::Disconnected,
            retry_in: Some(4.0),
        };
        assert_eq!(
            tick.to_json().unwrap(),
            r#"{"type":"state_changed","state":"disconnected","retry_in":4.0}"#
        );

        let plain = ConnectionEvent::StateChanged {
            state: ConnectionState::Connected,
            retry_in: None,
        };
        assert_eq!(
            plain.to_json().unwrap(),
            r#"{"type":"state_changed","state":"connected"}"#
        );
    }
}
