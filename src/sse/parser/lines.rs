//! Byte chunk to line splitting.

/// Accumulates byte chunks and yields complete `\n`-terminated lines.
///
/// Bytes are buffered until a newline arrives so multi-byte characters
/// split across chunks decode intact. Invalid UTF-8 is replaced rather
/// than dropped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk, returning every line it completed (without the
    /// trailing `\r\n` / `\n`).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.pending, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Drain a final unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&line);
        Some(text.trim_end_matches('\r').to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_complete_lines() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"a\nb\r\nc"), vec!["a", "b"]);
        assert_eq!(buffer.push(b"d\n"), vec!["cd"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let bytes = "héllo\n".as_bytes();
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&bytes[..2]).is_empty());
        assert_eq!(buffer.push(&bytes[2..]), vec!["héllo"]);
    }

    #[test]
    fn test_finish_returns_tail() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"data: [DONE]");
        assert_eq!(buffer.finish().as_deref(), Some("data: [DONE]"));
        assert_eq!(buffer.finish(), None);
    }
}
