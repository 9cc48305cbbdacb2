//! Turns a stream of raw bytes from a tool's stdout into complete lines.
//!
//! One [`LineFramer`] per tool (never a single loop-global buffer — see SPEC_FULL.md §4.E's
//! REDESIGN FLAG: the reference implementation shares one buffer across every tool, which garbles
//! interleaved output from two tools mid-line).

/// Longest line the framer will assemble before truncating, matching the reference
/// implementation's 8 KiB line buffer (capacity 8192, usable length 8191 plus the newline).
pub const MAX_LINE_LEN: usize = 8191;

/// Carry-over buffer for one tool's stdout stream.
#[derive(Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    /// Creates an empty framer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feeds newly-read bytes, returning every complete line assembled (without the trailing
    /// newline), in order. Bytes after a partial line at the end of `chunk` are retained for the
    /// next call. A line longer than [`MAX_LINE_LEN`] is still dispatched, truncated to its first
    /// `MAX_LINE_LEN` bytes; only the tail past that boundary is discarded (SPEC_FULL.md §4.E,
    /// §9).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(String::from_utf8_lossy(&self.buf).into_owned());
                self.buf.clear();
            } else if self.buf.len() < MAX_LINE_LEN {
                self.buf.push(byte);
            }
            // else: past the cap, drop the byte but keep scanning for the terminating newline.
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_a_line_split_across_two_feeds() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"foo|bar|ba").is_empty());
        assert_eq!(framer.feed(b"z\n"), vec!["foo|bar|baz".to_string()]);
    }

    #[test]
    fn one_chunk_can_carry_several_lines() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"a|b|c\nd|e|f\n");
        assert_eq!(lines, vec!["a|b|c".to_string(), "d|e|f".to_string()]);
    }

    #[test]
    fn oversized_line_is_dispatched_truncated_and_tail_is_discarded() {
        let mut framer = LineFramer::new();
        let mut chunk = vec![b'x'; MAX_LINE_LEN + 50];
        chunk.push(b'\n');
        chunk.extend_from_slice(b"next|ok|line\n");
        let lines = framer.feed(&chunk);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_LINE_LEN);
        assert_eq!(lines[1], "next|ok|line");
    }

    #[test]
    fn preserves_non_utf8_bytes_via_lossy_conversion_without_panicking() {
        let mut framer = LineFramer::new();
        let mut chunk = vec![b't', b'|', b's', b'|'];
        chunk.push(0xFF);
        chunk.push(b'\n');
        let lines = framer.feed(&chunk);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("t|s|"));
    }
}
