// src/io/mod.rs
//
// Byte-channel abstraction and the chunk reader that sits on top of it.
// The engine only ever talks to a `ByteChannel`; the serial implementation
// lives in `serial`.

pub mod serial;

use std::time::Duration;

use crate::error::DriverError;

// ============================================================================
// Byte Channel
// ============================================================================

/// Bidirectional byte transport to the device.
pub trait ByteChannel: Send {
    /// Return whatever bytes are currently available, waiting at most
    /// `timeout` for the first one. An empty vector means nothing arrived.
    fn read_available(&mut self, timeout: Duration) -> std::io::Result<Vec<u8>>;

    /// Write all of `bytes` and flush them to the device.
    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()>;
}

impl<T: ByteChannel + ?Sized> ByteChannel for Box<T> {
    fn read_available(&mut self, timeout: Duration) -> std::io::Result<Vec<u8>> {
        (**self).read_available(timeout)
    }

    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        (**self).write_all(bytes)
    }
}

// ============================================================================
// Chunk Reader
// ============================================================================

/// Text decoded from a single transport read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Raw bytes received by the read. Non-zero even when every byte was
    /// held back as an incomplete UTF-8 sequence.
    pub byte_len: usize,
}

impl Chunk {
    /// True when the read returned no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.byte_len == 0
    }
}

/// Reads chunks off a `ByteChannel` and decodes them as UTF-8.
///
/// Malformed sequences become U+FFFD. A multi-byte character cut off at the
/// end of a read is held back and completed by the next read, so decoding
/// does not depend on where the transport split the stream.
pub struct ChunkReader<C: ByteChannel> {
    channel: C,
    timeout: Duration,
    pending: Vec<u8>,
}

impl<C: ByteChannel> ChunkReader<C> {
    pub fn new(channel: C, timeout: Duration) -> Self {
        Self {
            channel,
            timeout,
            pending: Vec::new(),
        }
    }

    /// Read and decode the next chunk. Transport failures are fatal.
    pub fn read_chunk(&mut self) -> Result<Chunk, DriverError> {
        let bytes = self
            .channel
            .read_available(self.timeout)
            .map_err(|e| DriverError::transport("reading from device", e))?;

        if bytes.is_empty() {
            return Ok(Chunk {
                text: String::new(),
                byte_len: 0,
            });
        }

        Ok(Chunk {
            text: self.decode(&bytes),
            byte_len: bytes.len(),
        })
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid_up_to]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid_up_to + bad..];
                        }
                        None => {
                            // Truncated sequence at the end of the read
                            rest = &rest[valid_up_to..];
                            break;
                        }
                    }
                }
            }
        }

        let tail = rest.to_vec();
        self.pending = tail;
        out
    }
}

// ============================================================================
// Test Support
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::ByteChannel;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// In-memory channel that replays a fixed script of reads and records writes.
    /// Once the script is exhausted every read returns no bytes.
    #[derive(Default)]
    pub struct ScriptedChannel {
        reads: VecDeque<std::io::Result<Vec<u8>>>,
        pub written: Vec<u8>,
        pub fail_writes: bool,
    }

    impl ScriptedChannel {
        pub fn new<I, B>(chunks: I) -> Self
        where
            I: IntoIterator<Item = B>,
            B: AsRef<[u8]>,
        {
            Self {
                reads: chunks.into_iter().map(|c| Ok(c.as_ref().to_vec())).collect(),
                ..Self::default()
            }
        }

        pub fn with_failing_writes(mut self) -> Self {
            self.fail_writes = true;
            self
        }

        pub fn push_error(&mut self, kind: std::io::ErrorKind) {
            self.reads
                .push_back(Err(std::io::Error::new(kind, "scripted failure")));
        }

        pub fn remaining(&self) -> usize {
            self.reads.len()
        }

        pub fn written_text(&self) -> String {
            String::from_utf8_lossy(&self.written).into_owned()
        }
    }

    impl ByteChannel for ScriptedChannel {
        fn read_available(&mut self, _timeout: Duration) -> std::io::Result<Vec<u8>> {
            self.reads.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
            if self.fail_writes {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "scripted write failure",
                ));
            }
            self.written.extend_from_slice(bytes);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedChannel;
    use super::*;

    fn reader(chunks: Vec<&[u8]>) -> ChunkReader<ScriptedChannel> {
        ChunkReader::new(ScriptedChannel::new(chunks), Duration::from_millis(10))
    }

    #[test]
    fn test_empty_read_yields_empty_chunk() {
        let mut r = reader(vec![]);
        let chunk = r.read_chunk().unwrap();
        assert!(chunk.is_empty());
        assert_eq!(chunk.text, "");
    }

    #[test]
    fn test_invalid_bytes_are_substituted() {
        let mut r = reader(vec![&b"ab\xFFcd\n"[..]]);
        let chunk = r.read_chunk().unwrap();
        assert_eq!(chunk.text, "ab\u{FFFD}cd\n");
        assert_eq!(chunk.byte_len, 6);
    }

    #[test]
    fn test_split_multibyte_character_is_carried() {
        // "é" is 0xC3 0xA9
        let mut r = reader(vec![&b"caf\xC3"[..], &b"\xA9\n"[..]]);
        let first = r.read_chunk().unwrap();
        assert_eq!(first.text, "caf");
        assert!(!first.is_empty());
        let second = r.read_chunk().unwrap();
        assert_eq!(second.text, "\u{e9}\n");
    }

    #[test]
    fn test_read_error_is_transport_error() {
        let mut channel = ScriptedChannel::default();
        channel.push_error(std::io::ErrorKind::BrokenPipe);
        let mut r = ChunkReader::new(channel, Duration::from_millis(10));
        let err = r.read_chunk().unwrap_err();
        assert!(err.is_transport());
    }
}
