//! Line re-assembly for fragmented serial input

/// Accumulates text across reads and yields complete lines.
///
/// Serial data arrives in arbitrary fragments; a line is only emitted once its
/// `\n` terminator has been seen. Whatever follows the last terminator stays
/// buffered for the next call.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: String,
    /// Bytes of a UTF-8 sequence split across reads
    pending: Vec<u8>,
}

impl LineAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every line it completes.
    ///
    /// Lines are trimmed; lines that are empty after trimming are consumed
    /// without being returned.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };

        let remainder = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, remainder);

        complete
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Decode raw bytes and feed them.
    ///
    /// A multi-byte character cut off at the end of `chunk` is held back until
    /// the rest arrives. Invalid sequences become U+FFFD.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let bytes = std::mem::take(&mut self.pending);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to() guarantees this prefix is UTF-8
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        self.feed(&text)
    }

    /// Text received after the last complete line
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    /// Drop any buffered partial line
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending.clear();
    }
}
