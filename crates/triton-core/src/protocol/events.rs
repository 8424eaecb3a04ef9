//! Connection events reported to the host application

/// Receives everything the controller reports, in chronological order
pub trait EventSink: Send + Sync {
    /// A user-facing log line (connect, send, receive, errors...)
    fn on_log(&self, line: &str);

    /// The connection was opened (`true`) or closed (`false`)
    fn on_connection_state_change(&self, _connected: bool) {}
}
