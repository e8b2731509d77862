//! Response cleaning and newline framing for the notification stream

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec};
use tracing::debug;

/// Longest notification line kept before the assembler gives up on it
const MAX_LINE_LENGTH: usize = 256;

/// Strip surrounding whitespace and the NUL padding the firmware emits
pub fn clean_response(raw: &str) -> String {
    raw.trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}

/// Buffers inbound bytes until a `\n` arrives, then yields the cleaned line
pub struct LineAssembler {
    codec: LinesCodec,
    buffer: BytesMut,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self {
            codec: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            buffer: BytesMut::new(),
        }
    }

    /// Feed received bytes, returning every line they complete
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(data);

        let mut lines = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(line)) => {
                    let line = clean_response(&line);
                    if !line.is_empty() {
                        lines.push(line);
                    }
                }
                Ok(None) => break,
                // The codec has already split off (or is skipping to the end of)
                // the offending line; whatever follows it is still decodable
                Err(e) => debug!("Dropping unframeable notification: {}", e),
            }
        }
        lines
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_response() {
        assert_eq!(clean_response("  1\r\n\0"), "1");
        assert_eq!(clean_response("\0\0INIT\r\n"), "INIT");
        assert_eq!(clean_response("\r\n"), "");
    }

    #[test]
    fn test_lines_split_across_reads() {
        let mut assembler = LineAssembler::new();

        assert!(assembler.push(b"PAS").is_empty());
        assert_eq!(assembler.pending(), 3);

        let lines = assembler.push(b"S:4\r\nPASS:5\nPA");
        assert_eq!(lines, vec!["PASS:4".to_string(), "PASS:5".to_string()]);
        assert_eq!(assembler.pending(), 2);
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut assembler = LineAssembler::new();
        assert_eq!(assembler.push(b"\n\0\r\nPASS:1\n"), vec!["PASS:1".to_string()]);
    }

    #[test]
    fn test_overlong_line_is_discarded_up_to_its_terminator() {
        let mut assembler = LineAssembler::new();
        let junk = vec![b'x'; MAX_LINE_LENGTH + 10];

        assert!(assembler.push(&junk).is_empty());
        assert_eq!(assembler.pending(), 0);
        // The rest of the overlong line is still dropped, the next line is kept
        assert_eq!(assembler.push(b"xxxx\nPASS:2\n"), vec!["PASS:2".to_string()]);
    }

    #[test]
    fn test_overlong_line_keeps_following_lines_in_same_read() {
        let mut assembler = LineAssembler::new();
        let mut chunk = vec![b'x'; MAX_LINE_LENGTH + 10];
        chunk.extend_from_slice(b"\nPASS:2\nPASS:3\n");

        assert_eq!(
            assembler.push(&chunk),
            vec!["PASS:2".to_string(), "PASS:3".to_string()]
        );
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_invalid_utf8_drops_only_that_line() {
        let mut assembler = LineAssembler::new();

        assert_eq!(
            assembler.push(b"\xff\xfe\nPASS:3\n"),
            vec!["PASS:3".to_string()]
        );
        assert_eq!(assembler.push(b"PASS:4\n"), vec!["PASS:4".to_string()]);
    }
}
