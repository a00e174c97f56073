//! Length-capped line reading for the read loops.
//!
//! `tokio`'s stock `Lines` buffers an entire line before handing it over, so
//! a peer streaming bytes with no terminator would grow memory without bound.
//! [`LineReader`] enforces the frame cap during the read: once a line exceeds
//! the cap it reports the overflow immediately and discards the rest of that
//! line as it arrives, never holding more than the cap plus one buffer chunk.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Outcome of one [`LineReader::next`] call.
pub(crate) enum LineEvent {
    /// A complete line, terminator stripped.
    Line(String),
    /// The current line passed the cap. `seen` is how many bytes had arrived
    /// when the cap tripped; the line's remainder is discarded silently.
    Oversized { seen: usize },
    /// Clean end of stream.
    Eof,
}

pub(crate) struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    max: usize,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
            max,
            discarding: false,
        }
    }

    /// Read the next line event. Cancel-safe: a partial line stays buffered
    /// in `self` across a cancelled call.
    pub async fn next(&mut self) -> std::io::Result<LineEvent> {
        loop {
            let (consumed, event) = {
                let chunk = self.inner.fill_buf().await?;
                if chunk.is_empty() {
                    self.discarding = false;
                    if self.buf.is_empty() {
                        return Ok(LineEvent::Eof);
                    }
                    // Trailing line without a terminator.
                    let line = finish_line(&mut self.buf);
                    return Ok(LineEvent::Line(line));
                }
                match chunk.iter().position(|&b| b == b'\n') {
                    Some(pos) if self.discarding => {
                        // Tail of an already-reported oversized line.
                        self.discarding = false;
                        (pos + 1, None)
                    }
                    Some(pos) if self.buf.len() + pos > self.max => {
                        let seen = self.buf.len() + pos;
                        self.buf.clear();
                        (pos + 1, Some(LineEvent::Oversized { seen }))
                    }
                    Some(pos) => {
                        self.buf.extend_from_slice(&chunk[..pos]);
                        let line = finish_line(&mut self.buf);
                        (pos + 1, Some(LineEvent::Line(line)))
                    }
                    None if self.discarding => (chunk.len(), None),
                    None if self.buf.len() + chunk.len() > self.max => {
                        let seen = self.buf.len() + chunk.len();
                        self.buf.clear();
                        self.discarding = true;
                        (chunk.len(), Some(LineEvent::Oversized { seen }))
                    }
                    None => {
                        self.buf.extend_from_slice(chunk);
                        (chunk.len(), None)
                    }
                }
            };
            self.inner.consume(consumed);
            if let Some(event) = event {
                return Ok(event);
            }
        }
    }
}

fn finish_line(buf: &mut Vec<u8>) -> String {
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn collect(input: &[u8], max: usize) -> Vec<String> {
        let mut reader = LineReader::new(input, max);
        let mut out = Vec::new();
        loop {
            match reader.next().await.unwrap() {
                LineEvent::Line(line) => out.push(line),
                LineEvent::Oversized { seen } => out.push(format!("<oversized {seen}>")),
                LineEvent::Eof => return out,
            }
        }
    }

    #[tokio::test]
    async fn test_plain_lines_with_and_without_crlf() {
        let out = collect(b"one\r\ntwo\nthree", 64).await;
        assert_eq!(out, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_empty_lines_survive() {
        let out = collect(b"\n\nx\n", 64).await;
        assert_eq!(out, vec!["", "", "x"]);
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped_and_stream_continues() {
        let mut input = vec![b'a'; 70];
        input.extend_from_slice(b"\n$X=1\n");
        let out = collect(&input, 64).await;
        assert_eq!(out, vec!["<oversized 70>", "$X=1"]);
    }

    #[tokio::test]
    async fn test_cap_trips_before_the_terminator_arrives() {
        // Small pipe chunks: the overflow must be reported while the line is
        // still streaming, long before any newline shows up.
        let (mut tx, rx) = tokio::io::duplex(16);
        let writer = tokio::spawn(async move {
            tx.write_all(&[b'a'; 600]).await.unwrap();
            tx.write_all(b"\nok\n").await.unwrap();
        });

        let mut reader = LineReader::new(rx, 10);
        match reader.next().await.unwrap() {
            LineEvent::Oversized { seen } => {
                assert!(seen <= 26, "cap should trip within one chunk, saw {seen}")
            }
            _ => panic!("expected an overflow before any newline"),
        }
        match reader.next().await.unwrap() {
            LineEvent::Line(line) => assert_eq!(line, "ok"),
            _ => panic!("expected the next line after the discarded one"),
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_mid_discard_is_clean() {
        let out = collect(&[b'a'; 100], 10).await;
        assert_eq!(out, vec!["<oversized 100>"]);
    }
}
