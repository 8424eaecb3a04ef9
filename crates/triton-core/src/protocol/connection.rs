//! Connection management
//!
//! Owns the lifecycle of the single serial connection to the device: opening
//! the port, the background read loop, serialized writes and an idempotent
//! teardown that always runs to completion.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    ack::AckDetector,
    events::EventSink,
    frame::Frame,
    lines::LineAssembler,
    serial::{BoxedPort, PortProvider},
    ProtocolError, ACK_DISCONNECT_DELAY_MS, DEFAULT_BAUD_RATE, READER_RELEASE_TIMEOUT_MS,
    READ_BUFFER_SIZE,
};
use crate::clock::Clock;
use crate::params::{ParameterSet, ParameterSource};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Port being requested and opened
    Connecting,
    /// Port open, read loop running
    Connected,
    /// Teardown in progress
    Disconnecting,
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Baud rate
    pub baud_rate: u32,
    /// Wait between the device's acknowledgement and closing the port
    pub ack_disconnect_delay: Duration,
    /// Size of a single read from the port
    pub read_buffer_size: usize,
    /// How long teardown waits for the read loop before aborting it
    pub reader_release_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            ack_disconnect_delay: Duration::from_millis(ACK_DISCONNECT_DELAY_MS),
            read_buffer_size: READ_BUFFER_SIZE,
            reader_release_timeout: Duration::from_millis(READER_RELEASE_TIMEOUT_MS),
        }
    }
}

/// One open serial session
struct ConnectionHandle {
    port_name: String,
    writer: WriteHalf<BoxedPort>,
    /// Yields the reader half back once the loop exits
    read_task: JoinHandle<ReadHalf<BoxedPort>>,
    session: CancellationToken,
}

/// Held for the duration of a teardown.
///
/// Dropping it clears the teardown flag and, if the teardown was abandoned
/// half way, moves the state from Disconnecting to Disconnected.
struct TeardownGuard<'a> {
    flag: &'a AtomicBool,
    state: &'a watch::Sender<ConnectionState>,
}

impl<'a> TeardownGuard<'a> {
    fn acquire(flag: &'a AtomicBool, state: &'a watch::Sender<ConnectionState>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag, state })
    }
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        let abandoned = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnecting {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if abandoned {
            warn!("teardown abandoned before completion");
        }
        self.flag.store(false, Ordering::Release);
    }
}

struct Shared {
    config: ConnectionConfig,
    provider: Arc<dyn PortProvider>,
    sink: Arc<dyn EventSink>,
    ack: AckDetector,
    state: watch::Sender<ConnectionState>,
    handle: AsyncMutex<Option<ConnectionHandle>>,
    disconnecting: AtomicBool,
    /// Current session token, reachable without the handle lock
    session: Mutex<Option<CancellationToken>>,
    ack_timer: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn report(&self, line: &str) {
        self.sink.on_log(line);
    }

    /// Cancel the live session so pending reads and writes give up
    fn cancel_session(&self) {
        if let Ok(mut session) = self.session.lock() {
            if let Some(token) = session.take() {
                token.cancel();
            }
        }
    }

    fn cancel_ack_timer(&self) {
        if let Ok(mut timer) = self.ack_timer.lock() {
            if let Some(task) = timer.take() {
                task.abort();
            }
        }
    }

    /// Close the connection once the acknowledgement delay has passed.
    ///
    /// At most one timer is pending; it is dropped if the session ends first.
    fn schedule_ack_disconnect(self: &Arc<Self>, session: &CancellationToken) {
        let Ok(mut timer) = self.ack_timer.lock() else {
            return;
        };
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("acknowledgement disconnect already scheduled");
            return;
        }

        let delay = self.config.ack_disconnect_delay;
        self.report(&format!(
            "Checksum valid. Closing connection in {} seconds...",
            delay.as_secs()
        ));

        let shared = Arc::downgrade(self);
        let session = session.clone();
        *timer = Some(tokio::spawn(async move {
            tokio::select! {
                _ = session.cancelled() => {
                    debug!("acknowledgement disconnect cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            if session.is_cancelled() {
                return;
            }
            if let Some(shared) = shared.upgrade() {
                ConnectionController { shared }.disconnect().await;
            }
        }));
    }

    async fn close_handle(&self, handle: ConnectionHandle) {
        let ConnectionHandle {
            port_name,
            mut writer,
            mut read_task,
            session,
        } = handle;
        let limit = self.config.reader_release_timeout;

        // Reader: wake the pending read and take the half back
        session.cancel();
        let reader = match tokio::time::timeout(limit, &mut read_task).await {
            Ok(Ok(reader)) => Some(reader),
            Ok(Err(e)) => {
                warn!(error = %e, "read loop task failed");
                None
            }
            Err(_) => {
                warn!("read loop did not stop in time, aborting it");
                read_task.abort();
                None
            }
        };

        // Writer
        match tokio::time::timeout(limit, writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "closing writer failed");
                self.report(&format!("Warning during port close: {e}"));
            }
            Err(_) => {
                warn!("closing writer timed out");
                self.report("Warning during port close: timed out");
            }
        }

        // Port: both halves dropped together release the device
        match reader {
            Some(reader) => drop(reader.unsplit(writer)),
            None => drop(writer),
        }
        debug!(port = %port_name, "serial port released");
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.session.cancel();
        }
        self.cancel_session();
        self.cancel_ack_timer();
    }
}

/// Controller for the single serial connection to the device.
///
/// Cloning is cheap; all clones drive the same connection. Every outcome is
/// reported to the [`EventSink`] before a method returns, so callers may
/// ignore the returned `Result`.
#[derive(Clone)]
pub struct ConnectionController {
    shared: Arc<Shared>,
}

impl ConnectionController {
    /// Create a controller (not yet connected)
    pub fn new(
        config: ConnectionConfig,
        provider: Arc<dyn PortProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                provider,
                sink,
                ack: AckDetector::default(),
                state,
                handle: AsyncMutex::new(None),
                disconnecting: AtomicBool::new(false),
                session: Mutex::new(None),
                ack_timer: Mutex::new(None),
            }),
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Check if the port is open
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Whether the environment offers serial ports at all
    pub fn environment_available(&self) -> bool {
        self.shared.provider.is_available()
    }

    /// Open a port and start reading from it
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        let shared = &self.shared;

        if shared.disconnecting.load(Ordering::Acquire) {
            shared.report("Disconnection in progress, please wait...");
            return Err(ProtocolError::DisconnectInProgress);
        }

        let mut observed = ConnectionState::Disconnected;
        let claimed = shared.state.send_if_modified(|state| {
            observed = *state;
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        match observed {
            _ if claimed => {}
            ConnectionState::Disconnecting => {
                shared.report("Disconnection in progress, please wait...");
                return Err(ProtocolError::DisconnectInProgress);
            }
            _ => {
                shared.report("Already connected to a serial port");
                return Err(ProtocolError::AlreadyConnected);
            }
        }

        shared.cancel_ack_timer();

        let opened = shared.provider.request_port().and_then(|port| {
            let stream = shared.provider.open(&port, shared.config.baud_rate)?;
            Ok((port, stream))
        });
        let (port, stream) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(error = %e, "connect failed");
                match &e {
                    ProtocolError::EnvironmentUnavailable(_) => shared.report(&e.to_string()),
                    _ => shared.report(&format!("Error connecting: {e}")),
                }
                shared.state.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        let session = CancellationToken::new();

        // Held until the handle is stored so an immediate EOF teardown finds it
        let mut slot = shared.handle.lock().await;
        shared.state.send_replace(ConnectionState::Connected);
        shared.sink.on_connection_state_change(true);
        shared.report("Connected to serial port");
        info!(port = %port.name, baud_rate = shared.config.baud_rate, "connected");

        if let Ok(mut current) = shared.session.lock() {
            *current = Some(session.clone());
        }
        let read_task = tokio::spawn(read_loop(
            Arc::downgrade(&self.shared),
            reader,
            session.clone(),
        ));
        *slot = Some(ConnectionHandle {
            port_name: port.name,
            writer,
            read_task,
            session,
        });

        Ok(())
    }

    /// Send hex text to the device, newline-terminated
    pub async fn write(&self, hex: &str) -> Result<(), ProtocolError> {
        let shared = &self.shared;

        let result = {
            let mut slot = shared.handle.lock().await;
            let connected = self.is_connected();
            let handle = match slot.as_mut() {
                Some(handle) if connected => handle,
                _ => {
                    shared.report("Not connected to a serial port");
                    return Err(ProtocolError::NotConnected);
                }
            };

            shared.report(&format!("Sending data: {hex}"));

            let mut payload = Vec::with_capacity(hex.len() + 1);
            payload.extend_from_slice(hex.as_bytes());
            payload.push(b'\n');

            let session = handle.session.clone();
            let writer = &mut handle.writer;
            tokio::select! {
                biased;
                _ = session.cancelled() => None,
                result = async {
                    match writer.write_all(&payload).await {
                        Ok(()) => writer.flush().await,
                        Err(e) => Err(e),
                    }
                } => Some(result),
            }
        };

        match result {
            Some(Ok(())) => {
                shared.report("Data sent successfully");
                Ok(())
            }
            // Teardown started while the device was not draining
            None => {
                debug!("write interrupted by disconnect");
                shared.report("Error sending data: connection closed");
                Err(ProtocolError::NotConnected)
            }
            Some(Err(e)) => {
                warn!(error = %e, "write failed");
                shared.report(&format!("Error sending data: {e}"));
                self.disconnect().await;
                Err(e.into())
            }
        }
    }

    /// Encode `params` stamped with `now` and send the frame
    pub async fn send_parameters(
        &self,
        params: &ParameterSet,
        now: &NaiveDateTime,
    ) -> Result<Frame, ProtocolError> {
        let frame = Frame::encode(params, now);
        self.write(&frame.to_hex()).await?;
        Ok(frame)
    }

    /// Send whatever the collaborator currently holds
    pub async fn send_current(
        &self,
        source: &dyn ParameterSource,
        clock: &dyn Clock,
    ) -> Result<Frame, ProtocolError> {
        self.send_parameters(&source.current_parameters(), &clock.now())
            .await
    }

    /// Close the connection.
    ///
    /// Safe to call at any time and from several tasks at once; a call made
    /// while another teardown is running returns immediately. Every step is
    /// best-effort and the controller always ends up Disconnected.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        let Some(_guard) = TeardownGuard::acquire(&shared.disconnecting, &shared.state) else {
            debug!("disconnect already in progress");
            return;
        };

        let previous = shared.state.send_replace(ConnectionState::Disconnecting);
        // Before the lock: a write stuck on a full port holds it
        shared.cancel_session();

        let handle = shared.handle.lock().await.take();
        if let Some(handle) = handle {
            shared.close_handle(handle).await;
        }

        shared.state.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            shared.sink.on_connection_state_change(false);
        }
        shared.report("Disconnected from serial port");
        info!("disconnected");
    }
}

/// Pull chunks from the port until EOF, error or cancellation.
///
/// Returns the reader half so teardown can reunite it with the writer.
async fn read_loop(
    shared: Weak<Shared>,
    mut reader: ReadHalf<BoxedPort>,
    session: CancellationToken,
) -> ReadHalf<BoxedPort> {
    let Some((sink, ack, buffer_size)) = shared.upgrade().map(|s| {
        (
            s.sink.clone(),
            s.ack.clone(),
            s.config.read_buffer_size.max(1),
        )
    }) else {
        return reader;
    };

    let mut lines = LineAssembler::new();
    let mut buf = vec![0u8; buffer_size];

    let ended_by_port = loop {
        let read = tokio::select! {
            biased;
            _ = session.cancelled() => break false,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                sink.on_log("Serial port closed");
                break true;
            }
            Ok(n) => {
                for line in lines.feed_bytes(&buf[..n]) {
                    sink.on_log(&format!("Received: {line}"));
                    if ack.matches(&line) {
                        if let Some(shared) = shared.upgrade() {
                            shared.schedule_ack_disconnect(&session);
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "read failed");
                sink.on_log(&format!("Error reading from port: {e}"));
                break true;
            }
        }
    };
    debug!(ended_by_port, "read loop exited");

    // A dead port means a dead connection; teardown runs in its own task
    // because it waits for this one to finish.
    if ended_by_port && !session.is_cancelled() {
        spawn_session_teardown(shared, session);
    }

    reader
}

/// Disconnect in a separate task, unless `session` has already ended by the
/// time the task runs (a later session must not be torn down).
fn spawn_session_teardown(shared: Weak<Shared>, session: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if session.is_cancelled() {
            debug!("session already closed, skipping teardown");
            return;
        }
        if let Some(shared) = shared.upgrade() {
            ConnectionController { shared }.disconnect().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::console::ConsoleLog;
    use crate::demo::SimulatedPortProvider;

    #[test]
    fn test_teardown_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let first = TeardownGuard::acquire(&flag, &state);
        assert!(first.is_some());
        assert!(TeardownGuard::acquire(&flag, &state).is_none());
        drop(first);
        assert!(TeardownGuard::acquire(&flag, &state).is_some());
    }

    #[test]
    fn test_dropped_guard_leaves_disconnecting() {
        let flag = AtomicBool::new(false);
        let (state, _) = watch::channel(ConnectionState::Connected);

        let guard = TeardownGuard::acquire(&flag, &state);
        state.send_replace(ConnectionState::Disconnecting);
        drop(guard);

        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
        assert!(!flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_connect_while_disconnecting_reports_progress() {
        let console = Arc::new(ConsoleLog::new());
        let controller = ConnectionController::new(
            ConnectionConfig::default(),
            Arc::new(SimulatedPortProvider::with_seed(5)),
            console.clone(),
        );
        controller
            .shared
            .state
            .send_replace(ConnectionState::Disconnecting);

        let result = controller.connect().await;

        assert!(matches!(result, Err(ProtocolError::DisconnectInProgress)));
        assert_eq!(
            console.messages(),
            vec!["Disconnection in progress, please wait..."]
        );
        assert_eq!(controller.state(), ConnectionState::Disconnecting);
    }

    #[tokio::test]
    async fn test_stale_session_teardown_spares_new_session() {
        let controller = ConnectionController::new(
            ConnectionConfig::default(),
            Arc::new(SimulatedPortProvider::with_seed(3)),
            Arc::new(ConsoleLog::new()),
        );

        controller.connect().await.unwrap();
        let first = controller
            .shared
            .session
            .lock()
            .unwrap()
            .clone()
            .unwrap();
        controller.disconnect().await;
        assert!(first.is_cancelled());

        controller.connect().await.unwrap();
        spawn_session_teardown(Arc::downgrade(&controller.shared), first)
            .await
            .unwrap();
        assert!(controller.is_connected());

        controller.disconnect().await;
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.ack_disconnect_delay, Duration::from_secs(3));
    }
}
