// src/ingest/reassembler.rs
//
// Newline framing over decoded text chunks. Mirrors the delimiter framer
// used for binary serial streams, but works on `str` and never force-splits:
// a line is only emitted once its terminator has been seen.

/// Reassembles complete lines from arbitrarily split text chunks.
#[derive(Debug, Default)]
pub struct LineReassembler {
    /// Unterminated tail of the previous chunk
    leftover: String,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completes, in order.
    ///
    /// The leftover from the previous call is prefixed onto this chunk before
    /// splitting. The final fragment after the last `\n` (possibly empty) is
    /// stored as the new leftover and never returned. An empty chunk returns
    /// nothing and leaves the leftover untouched. Only `\n` terminates a
    /// line; any `\r` stays part of the line content.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }

        let mut buffer = std::mem::take(&mut self.leftover);
        buffer.push_str(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = buffer[start..].find('\n') {
            let end = start + offset;
            lines.push(buffer[start..end].to_string());
            start = end + 1;
        }

        self.leftover = buffer.split_off(start);
        lines
    }

    /// The unterminated fragment currently being carried.
    pub fn leftover(&self) -> &str {
        &self.leftover
    }
}
