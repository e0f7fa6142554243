//! Bounded diagnostic capture for subprocess output.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Maximum characters of output kept for an error message.
pub const MAX_ERROR_CHARS: usize = 2000;

/// Bound an error message to its last [`MAX_ERROR_CHARS`] characters.
pub fn truncate_error(message: &str) -> String {
    crate::workspace::command::tail_chars(message, MAX_ERROR_CHARS)
}

/// Keeps only the last `max_chars` characters of everything pushed.
#[derive(Debug, Clone)]
pub struct TailBuffer {
    buf: String,
    max_chars: usize,
}

impl Default for TailBuffer {
    fn default() -> Self {
        Self::new(MAX_ERROR_CHARS)
    }
}

impl TailBuffer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            buf: String::new(),
            max_chars,
        }
    }

    /// Append a line (a newline is added) and trim from the front.
    pub fn push_line(&mut self, line: &str) {
        self.buf.push_str(line);
        self.buf.push('\n');
        self.trim();
    }

    fn trim(&mut self) {
        let count = self.buf.chars().count();
        if count <= self.max_chars {
            return;
        }
        let excess = count - self.max_chars;
        let cut = self
            .buf
            .char_indices()
            .nth(excess)
            .map(|(idx, _)| idx)
            .unwrap_or(self.buf.len());
        self.buf.drain(..cut);
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn is_blank(&self) -> bool {
        self.buf.trim().is_empty()
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

/// Feed every line of `reader` to `on_line`, decoding lossily. Stops at EOF or
/// on the first read error.
pub async fn read_lines<R, F>(reader: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes);
                on_line(line.trim_end_matches('\r'));
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "error reading subprocess output");
                break;
            }
        }
    }
}

/// Drain `reader`, keeping only its last `max_chars` characters.
pub async fn collect_tail<R: AsyncRead + Unpin>(reader: R, max_chars: usize) -> TailBuffer {
    let mut tail = TailBuffer::new(max_chars);
    read_lines(reader, |line| tail.push_line(line)).await;
    tail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_everything_under_limit() {
        let mut tail = TailBuffer::new(100);
        tail.push_line("first");
        tail.push_line("second");
        assert_eq!(tail.as_str(), "first\nsecond\n");
    }

    #[test]
    fn test_truncates_from_front() {
        let mut tail = TailBuffer::new(8);
        tail.push_line("abcdef");
        tail.push_line("ghij");
        assert_eq!(tail.as_str(), "ef\nghij\n");
    }

    #[test]
    fn test_multibyte_boundaries() {
        let mut tail = TailBuffer::new(3);
        tail.push_line("日本語テキスト");
        assert_eq!(tail.as_str(), "スト\n");
    }

    #[test]
    fn test_bounded_under_large_input() {
        let mut tail = TailBuffer::default();
        for _ in 0..1000 {
            tail.push_line(&"x".repeat(100));
        }
        assert_eq!(tail.as_str().chars().count(), MAX_ERROR_CHARS);
    }

    #[test]
    fn test_blank() {
        let mut tail = TailBuffer::default();
        assert!(tail.is_blank());
        tail.push_line("  ");
        assert!(tail.is_blank());
    }

    #[tokio::test]
    async fn test_collect_tail_keeps_only_the_end() {
        let input: String = (0..1000).map(|i| format!("line {}\n", i)).collect();
        let tail = collect_tail(input.as_bytes(), 20).await;
        assert_eq!(tail.as_str().chars().count(), 20);
        assert!(tail.as_str().ends_with("line 999\n"));
    }
}
