//! Event-stream framing: a frame is the text before a blank-line separator
//! (`\n\n`). Only LF terminators are recognised.

const SEPARATOR: &[u8] = b"\n\n";

/// Incremental splitter turning arbitrary byte chunks into frames.
///
/// Bytes are buffered until a separator arrives, so multi-byte characters
/// split across reads are decoded intact.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Feeds bytes and returns every frame completed by them.
    ///
    /// Empty frames (consecutive separators) are skipped.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(idx) = find_separator(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..idx + SEPARATOR.len()).take(idx).collect();
            if !frame.is_empty() {
                frames.push(String::from_utf8_lossy(&frame).into_owned());
            }
        }
        frames
    }

    /// Returns the non-terminated remainder at end of stream, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

fn find_separator(buf: &[u8]) -> Option<usize> {
    buf.windows(SEPARATOR.len()).position(|w| w == SEPARATOR)
}
