//! Connection manager: socket lifecycle, sender/receiver loops, reconnect.
//!
//! One background task owns the socket. While connected it drives a sender
//! loop and a receiver loop over the two halves of the stream; whichever
//! ends first cancels the other, the connection is torn down, and the task
//! waits out the backoff delay before connecting again.

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use remote_console_protocol::{HEADER_SIZE, codec};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::watch,
    task::JoinHandle,
};

use crate::{
    Backoff, CommandError, ConfigError, ConnectionConfig, ConnectionError, ConnectionHandler,
    ConnectionState, NoopHandler,
    backoff::countdown,
    correlator::{CommandQueue, Correlator, Resolution},
    handler::Notifier,
};

/// Error text emitted when a command gets no response in time.
pub const COMMAND_TIMEOUT_MESSAGE: &str = "Command timed out waiting for response";

/// State shared between the manager handle and its background task.
struct Shared {
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    commands: CommandQueue,
    correlator: Correlator,
    notifier: Notifier,
}

/// Background task handle with its own shutdown signal.
struct Running {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Resilient command/response connection to a single remote endpoint.
///
/// `start` spawns the background task on the current Tokio runtime;
/// `stop` must be awaited before exit to close the socket cleanly.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    task: Mutex<Option<Running>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn shutdown_signaled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

impl ConnectionManager {
    /// Create a manager that reports nothing to collaborators.
    ///
    /// # Errors
    /// Returns error if the config is invalid.
    pub fn new(config: ConnectionConfig) -> Result<Self, ConfigError> {
        Self::with_handler(config, NoopHandler)
    }

    /// Create a manager reporting to `handler`.
    ///
    /// # Errors
    /// Returns error if the config is invalid.
    pub fn with_handler(
        config: ConnectionConfig,
        handler: impl ConnectionHandler + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state,
                commands: CommandQueue::new(),
                correlator: Correlator::new(),
                notifier: Notifier::new(Arc::new(handler)),
            }),
            task: Mutex::new(None),
        })
    }

    /// Configuration this manager was built with.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Whether the socket is currently established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Whether the background task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Commands queued but not yet transmitted.
    #[must_use]
    pub fn queued_commands(&self) -> usize {
        self.shared.commands.len()
    }

    /// Commands transmitted and still awaiting a response.
    #[must_use]
    pub fn in_flight_commands(&self) -> usize {
        self.shared.correlator.len()
    }

    /// Human-readable connection status.
    #[must_use]
    pub fn status_line(&self) -> String {
        let address = self.shared.config.address();
        match self.state() {
            ConnectionState::Connected => format!("Connected to {address}"),
            ConnectionState::Connecting => format!("Connecting to {address}..."),
            ConnectionState::Disconnected if self.is_running() => {
                format!("Disconnected from {address}. Waiting to reconnect...")
            }
            ConnectionState::Disconnected => format!("Disconnected from {address}"),
        }
    }

    /// Begin connecting. No-op if already running.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) {
        let mut task = lock(&self.task);
        if task
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
        {
            return;
        }

        let (shutdown, rx) = watch::channel(false);
        tracing::info!(address = %self.shared.config.address(), "starting connection manager");
        *task = Some(Running {
            handle: tokio::spawn(Arc::clone(&self.shared).run(rx)),
            shutdown,
        });
    }

    /// Shut down: stop all loops, close the socket, and cancel every
    /// outstanding command. Safe to call repeatedly or before `start`.
    pub async fn stop(&self) {
        let running = lock(&self.task).take();
        if let Some(Running { handle, shutdown }) = running {
            shutdown.send_replace(true);
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!("connection task panicked: {e}");
                }
            }
        }

        // A `start` that raced this call owns the queue and the state now.
        if lock(&self.task).is_some() {
            tracing::debug!("restarted while stopping");
            return;
        }

        let cancelled = self.shared.correlator.fail_all() + self.shared.commands.cancel_all();
        if cancelled > 0 {
            tracing::info!(cancelled, "cancelled outstanding commands on shutdown");
        }

        if self.state() != ConnectionState::Disconnected {
            self.shared.set_state(ConnectionState::Disconnected, None);
        }
    }

    /// Queue a command and wait for its response.
    ///
    /// # Errors
    /// - `Empty` if `code` is blank (nothing is queued)
    /// - `TimedOut` if no response arrives within the command timeout
    /// - `Cancelled` if the connection drops or shuts down first
    pub async fn execute(&self, code: &str) -> Result<String, CommandError> {
        if code.trim().is_empty() {
            return Err(CommandError::Empty);
        }

        let reply = self.shared.commands.push(code.to_string());
        let timeout = self.shared.config.command_timeout;

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(CommandError::Cancelled),
            Err(_) => {
                self.shared.notifier.error(COMMAND_TIMEOUT_MESSAGE);
                Err(CommandError::TimedOut(timeout))
            }
        }
    }

    /// Queue a command and wait for its response, or `None` on timeout,
    /// cancellation, or empty input.
    pub async fn send_command(&self, code: &str) -> Option<String> {
        self.execute(code).await.ok()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(running) = lock(&self.task).take() {
            tracing::warn!("connection manager dropped without stop()");
            running.handle.abort();
        }
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState, retry_in: Option<Duration>) {
        self.state.send_replace(state);
        self.notifier.state(state, retry_in);
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::from_config(&self.config);

        while !*shutdown.borrow() {
            tokio::select! {
                () = self.connect_and_serve(&mut backoff) => {}
                () = shutdown_signaled(&mut shutdown) => break,
            }

            self.close_connection();

            let delay = backoff.next_delay();
            tokio::select! {
                () = self.wait_for_retry(delay) => {}
                () = shutdown_signaled(&mut shutdown) => break,
            }
        }

        // The socket closes with this task; nothing sent on it can be answered.
        let failed = self.correlator.fail_all();
        if failed > 0 {
            tracing::debug!(failed, "in-flight commands dropped on shutdown");
        }
        tracing::debug!("connection task exiting");
    }

    async fn connect(&self) -> Result<TcpStream, ConnectionError> {
        let address = (self.config.host.as_str(), self.config.port);
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ConnectionError::Timeout(self.config.connect_timeout))?
            .map_err(ConnectionError::Connect)?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("failed to set TCP_NODELAY: {e}");
        }
        Ok(stream)
    }

    async fn connect_and_serve(&self, backoff: &mut Backoff) {
        self.set_state(ConnectionState::Connecting, None);

        let stream = match self.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                self.notifier.error(&e.to_string());
                return;
            }
        };

        backoff.reset();
        self.notifier.reset_errors();
        self.set_state(ConnectionState::Connected, None);
        tracing::info!(address = %self.config.address(), "connected");

        let (reader, writer) = stream.into_split();
        let outcome = tokio::select! {
            result = self.send_loop(writer) => result,
            result = self.receive_loop(reader) => result,
        };

        match outcome {
            Ok(()) => tracing::info!("remote closed the connection"),
            Err(e) => self.notifier.error(&e.to_string()),
        }
    }

    fn close_connection(&self) {
        let failed = self.correlator.fail_all();
        if failed > 0 {
            tracing::warn!(failed, "in-flight commands lost with the connection");
        }
        self.set_state(ConnectionState::Disconnected, None);
    }

    async fn wait_for_retry(&self, delay: Duration) {
        tracing::info!(?delay, "waiting before reconnect");
        for remaining in countdown(delay) {
            self.set_state(ConnectionState::Disconnected, Some(remaining));
            tokio::time::sleep(remaining.min(Duration::from_secs(1))).await;
        }
    }

    async fn send_loop(&self, mut writer: OwnedWriteHalf) -> Result<(), ConnectionError> {
        loop {
            let command = self.commands.next().await;
            if command.is_abandoned() {
                tracing::debug!("skipping command abandoned by its caller");
                continue;
            }

            let frame = match codec::encode(&command.code) {
                Ok(frame) => frame,
                Err(e) => {
                    // Dropping the command cancels its caller.
                    self.notifier.error(&ConnectionError::from(e).to_string());
                    continue;
                }
            };

            let code = self.correlator.register(command);
            tracing::debug!(
                bytes = frame.len(),
                in_flight = self.correlator.len(),
                "sending command"
            );
            tracing::trace!(%code, "command text");

            writer
                .write_all(&frame)
                .await
                .map_err(ConnectionError::Send)?;
            writer.flush().await.map_err(ConnectionError::Send)?;
        }
    }

    async fn receive_loop(&self, mut reader: OwnedReadHalf) -> Result<(), ConnectionError> {
        let mut header = [0u8; HEADER_SIZE];

        loop {
            if !read_or_eof(&mut reader, &mut header).await? {
                return Ok(());
            }
            let length = codec::decode_header(&header)?.payload_len(self.config.max_payload_len)?;

            let mut payload = vec![0u8; length];
            if !read_or_eof(&mut reader, &mut payload).await? {
                return Ok(());
            }

            let message = codec::decode_message(&header, &payload)?;
            tracing::debug!(length, "received message");

            self.notifier.response(&message.payload);
            match self.correlator.resolve(message.payload) {
                Resolution::Delivered => {}
                Resolution::Abandoned => {
                    tracing::debug!("response arrived after its caller gave up");
                }
                Resolution::Unsolicited => {
                    tracing::debug!("unsolicited message");
                }
            }
        }
    }
}

/// Fill `buf` completely. `Ok(false)` means the peer closed the stream.
async fn read_or_eof(reader: &mut OwnedReadHalf, buf: &mut [u8]) -> Result<bool, ConnectionError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(ConnectionError::Receive(e)),
    }
}
