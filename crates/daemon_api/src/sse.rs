/// Sentinel some producers send as the last `data:` value.
const DONE_SENTINEL: &str = "[DONE]";

/// Incremental parser for `text/event-stream` framing.
///
/// Bytes are fed in whatever chunks the connection delivers. Complete records
/// (terminated by a blank line) are drained on every [`feed`](Self::feed); the
/// trailing partial record stays buffered until more bytes arrive or
/// [`finish`](Self::finish) flushes it.
#[derive(Debug, Default)]
pub struct SseFrameParser {
    buffer: String,
    /// Incomplete UTF-8 sequence carried over from the previous chunk.
    pending_bytes: Vec<u8>,
}

impl SseFrameParser {
    /// Feed arbitrary bytes into the parser and drain complete payloads.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.push_decoded(bytes);
        let mut payloads = Vec::new();

        while let Some(split) = self.buffer.find("\n\n") {
            let frame = self.buffer[..split].to_string();
            self.buffer.drain(0..split + 2);

            if let Some(payload) = extract_data_payload(&frame) {
                payloads.push(payload);
            }
        }

        payloads
    }

    /// Signal end-of-stream and flush the trailing record, if any.
    ///
    /// Producers may omit the final blank line, so a non-empty remainder is
    /// treated as one last complete record.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending_bytes.is_empty() {
            let tail = std::mem::take(&mut self.pending_bytes);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }

        let frame = std::mem::take(&mut self.buffer);
        if frame.trim().is_empty() {
            return None;
        }
        extract_data_payload(frame.trim_end_matches('\n'))
    }

    /// Parse a complete SSE body in one shot, including the end-of-stream flush.
    pub fn parse_frames(input: &str) -> Vec<String> {
        let mut parser = Self::default();
        let mut payloads = parser.feed(input.as_bytes());
        payloads.extend(parser.finish());
        payloads
    }

    /// True when no partial record or split UTF-8 sequence is pending.
    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty() && self.pending_bytes.is_empty()
    }

    fn push_decoded(&mut self, bytes: &[u8]) {
        let joined;
        let input = if self.pending_bytes.is_empty() {
            bytes
        } else {
            let mut carried = std::mem::take(&mut self.pending_bytes);
            carried.extend_from_slice(bytes);
            joined = carried;
            joined.as_slice()
        };

        let mut rest = input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(error) => {
                    let valid = error.valid_up_to();
                    // Validated just above, so this cannot fail.
                    self.buffer
                        .push_str(std::str::from_utf8(&rest[..valid]).unwrap_or_default());
                    match error.error_len() {
                        Some(invalid) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + invalid..];
                        }
                        None => {
                            self.pending_bytes = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }

        // A `\r` at the very end may still pair with a `\n` from the next chunk,
        // and it is retained in the buffer until then.
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data_lines.is_empty() {
        return None;
    }

    let payload = data_lines.join("\n");
    if payload.trim() == DONE_SENTINEL {
        None
    } else {
        Some(payload)
    }
}
