//! Device acknowledgement detection

/// Text the device prints once it has accepted a frame
pub const ACK_MARKER: &str = "Checksum valid: true";

/// Recognizes the device's acknowledgement in received lines
#[derive(Debug, Clone)]
pub struct AckDetector {
    marker: String,
}

impl Default for AckDetector {
    fn default() -> Self {
        Self::new(ACK_MARKER)
    }
}

impl AckDetector {
    /// Detector for a custom marker
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// True when `line` contains the marker anywhere
    pub fn matches(&self, line: &str) -> bool {
        line.contains(&self.marker)
    }
}
