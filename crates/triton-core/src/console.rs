//! Timestamped console output
//!
//! Collects the controller's log lines the way the operator sees them, each
//! stamped with local wall-clock time.

use chrono::{Local, NaiveTime};
use std::fmt;
use std::sync::Mutex;
use tracing::debug;

use crate::protocol::EventSink;

/// One console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    /// Local time the line was logged
    pub time: NaiveTime,
    /// The message itself
    pub message: String,
}

impl fmt::Display for ConsoleLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.time.format("%H:%M:%S"), self.message)
    }
}

/// In-memory console, optionally echoed to stdout
#[derive(Debug, Default)]
pub struct ConsoleLog {
    lines: Mutex<Vec<ConsoleLine>>,
    echo: bool,
}

impl ConsoleLog {
    /// Silent console
    pub fn new() -> Self {
        Self::default()
    }

    /// Console that also prints every line as it arrives
    pub fn with_echo() -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            echo: true,
        }
    }

    /// Append a message stamped with the current local time
    pub fn push(&self, message: impl Into<String>) {
        let line = ConsoleLine {
            time: Local::now().time(),
            message: message.into(),
        };
        if self.echo {
            println!("{line}");
        }
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }

    /// Snapshot of all lines
    pub fn lines(&self) -> Vec<ConsoleLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Messages without their timestamps
    pub fn messages(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|l| l.iter().map(|line| line.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of lines logged so far
    pub fn len(&self) -> usize {
        self.lines.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// True when nothing has been logged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget all lines
    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

impl EventSink for ConsoleLog {
    fn on_log(&self, line: &str) {
        self.push(line);
    }

    fn on_connection_state_change(&self, connected: bool) {
        debug!(connected, "connection state changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        let line = ConsoleLine {
            time: NaiveTime::from_hms_opt(9, 5, 7).unwrap(),
            message: "Connected to serial port".to_string(),
        };
        assert_eq!(line.to_string(), "[09:05:07] Connected to serial port");
    }

    #[test]
    fn test_push_and_clear() {
        let console = ConsoleLog::new();
        console.on_log("first");
        console.push("second");
        assert_eq!(console.messages(), vec!["first", "second"]);
        assert_eq!(console.len(), 2);

        console.clear();
        assert!(console.is_empty());
    }
}
