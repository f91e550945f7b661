//! Line-oriented scanner for agent log output
//!
//! Child process output arrives in arbitrary chunks. [`LineScanner`] buffers
//! bytes until a full line is available and classifies each line against the
//! agent's readiness patterns.

use crate::ProtocolError;
use bytes::BytesMut;
use regex::Regex;
use std::sync::LazyLock;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Agent URL marker, e.g. `ServerURLHere->http://127.0.0.1:8100<-ServerURLHere`.
/// Group 1 is the URL.
pub const AGENT_URL_PATTERN: &str = r"ServerURLHere->(\S+?)<-ServerURLHere";

/// Build stamp the agent prints when its web server comes up,
/// e.g. `Built at Mar  4 2024 10:21:07`.
pub const AGENT_LAUNCHED_PATTERN: &str = r"Built at [A-Z][a-z]{2}\s+\d{1,2} \d{4} \d{2}:\d{2}:\d{2}";

/// Lines longer than this are cut and emitted in pieces (64KB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

static AGENT_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(AGENT_URL_PATTERN).expect("invalid agent url pattern"));

static AGENT_LAUNCHED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(AGENT_LAUNCHED_PATTERN).expect("invalid agent launched pattern"));

/// Structured event recognised in a log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// The agent announced the URL it listens on
    EndpointDiscovered(String),
    /// The agent reported that it has started
    AgentLaunched,
}

/// Match a single line against both agent patterns
pub fn scan_line(line: &str) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    
    if AGENT_LAUNCHED.is_match(line) {
        events.push(ScanEvent::AgentLaunched);
    }
    
    if let Some(url) = AGENT_URL.captures(line).and_then(|caps| caps.get(1)) {
        events.push(ScanEvent::EndpointDiscovered(url.as_str().to_string()));
    }
    
    events
}

/// Splits a byte stream into lines
pub struct LineScanner {
    /// Bytes not yet terminated by a newline
    read_buf: BytesMut,
    /// Longest line emitted in one piece
    max_line_length: usize,
}

impl Default for LineScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl LineScanner {
    /// Create a scanner with the default line limit
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }
    
    /// Create a scanner with a custom line limit
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_line_length: max_line_length.max(1),
        }
    }
    
    /// Append raw output
    pub fn push(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
    }
    
    /// Take the next complete line out of the buffer
    pub fn try_decode_line(&mut self) -> Option<String> {
        let raw = match self.read_buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                let mut raw = self.read_buf.split_to(pos + 1);
                raw.truncate(pos);
                raw
            }
            None if self.read_buf.len() >= self.max_line_length => {
                self.read_buf.split_to(self.max_line_length)
            }
            None => return None,
        };
        
        Some(decode(&raw))
    }
    
    /// Flush whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.read_buf.is_empty() {
            return None;
        }
        let raw = self.read_buf.split();
        Some(decode(&raw))
    }
    
    /// Push a chunk and return every event found in the lines it completed
    pub fn feed(&mut self, data: &[u8]) -> Vec<ScanEvent> {
        self.push(data);
        let mut events = Vec::new();
        while let Some(line) = self.try_decode_line() {
            events.extend(scan_line(&line));
        }
        events
    }
    
    /// Read the next line from an async reader; `None` at end of stream
    pub async fn read_line<R>(&mut self, reader: &mut R) -> Result<Option<String>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(line) = self.try_decode_line() {
                return Ok(Some(line));
            }
            
            let mut temp_buf = [0u8; 4096];
            let n = reader.read(&mut temp_buf).await?;
            
            if n == 0 {
                return Ok(self.finish());
            }
            
            self.read_buf.extend_from_slice(&temp_buf[..n]);
        }
    }
    
    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }
}

fn decode(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    
    const URL_LINE: &str =
        "Mar  4 10:21:07 host XCTRunner[123]: ServerURLHere->http://127.0.0.1:8100<-ServerURLHere";
    
    #[test]
    fn test_scan_agent_url() {
        assert_eq!(
            scan_line(URL_LINE),
            vec![ScanEvent::EndpointDiscovered("http://127.0.0.1:8100".to_string())]
        );
    }
    
    #[test]
    fn test_scan_launched_marker() {
        let line = "Mar  4 10:21:07 host XCTRunner[123]: Built at Mar  4 2024 10:20:59";
        assert_eq!(scan_line(line), vec![ScanEvent::AgentLaunched]);
    }
    
    #[test]
    fn test_scan_unmatched() {
        assert!(scan_line("Test Suite 'All tests' started").is_empty());
        assert!(scan_line("ServerURLHere->http://127.0.0.1:8100").is_empty());
    }
    
    #[test]
    fn test_feed_across_chunks() {
        let mut scanner = LineScanner::new();
        let (head, tail) = URL_LINE.split_at(40);
        
        assert!(scanner.feed(head.as_bytes()).is_empty());
        assert!(scanner.buffer_size() > 0);
        
        let mut chunk = tail.as_bytes().to_vec();
        chunk.push(b'\n');
        let events = scanner.feed(&chunk);
        
        assert_eq!(events.len(), 1);
        assert_eq!(scanner.buffer_size(), 0);
    }
    
    #[test]
    fn test_crlf_and_multiple_lines() {
        let mut scanner = LineScanner::new();
        scanner.push(b"first\r\nsecond\nthird");
        
        assert_eq!(scanner.try_decode_line().as_deref(), Some("first"));
        assert_eq!(scanner.try_decode_line().as_deref(), Some("second"));
        assert_eq!(scanner.try_decode_line(), None);
        assert_eq!(scanner.finish().as_deref(), Some("third"));
        assert_eq!(scanner.finish(), None);
    }
    
    #[test]
    fn test_overlong_line_is_cut() {
        let mut scanner = LineScanner::with_max_line_length(4);
        scanner.push(b"abcdefg");
        
        assert_eq!(scanner.try_decode_line().as_deref(), Some("abcd"));
        assert_eq!(scanner.try_decode_line(), None);
        assert_eq!(scanner.buffer_size(), 3);
    }
    
    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut scanner = LineScanner::new();
        scanner.push(b"ok \xff\n");
        assert_eq!(scanner.try_decode_line().as_deref(), Some("ok \u{fffd}"));
    }
    
    #[tokio::test]
    async fn test_read_line_from_stream() {
        let data = format!("noise\n{}\npartial", URL_LINE);
        let mut reader = data.as_bytes();
        let mut scanner = LineScanner::new();
        
        let mut lines = Vec::new();
        while let Some(line) = scanner.read_line(&mut reader).await.unwrap() {
            lines.push(line);
        }
        
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "noise");
        assert_eq!(lines[2], "partial");
        assert_eq!(scan_line(&lines[1]).len(), 1);
    }
    
    #[tokio::test]
    async fn test_read_line_across_reads() {
        let (head, tail) = URL_LINE.split_at(25);
        let mut reader = tokio_test::io::Builder::new()
            .read(head.as_bytes())
            .read(tail.as_bytes())
            .read(b"\nnext\n")
            .build();
        let mut scanner = LineScanner::new();
        
        assert_eq!(scanner.read_line(&mut reader).await.unwrap().as_deref(), Some(URL_LINE));
        assert_eq!(scanner.read_line(&mut reader).await.unwrap().as_deref(), Some("next"));
        assert_eq!(scanner.read_line(&mut reader).await.unwrap(), None);
    }
    
    #[tokio::test]
    async fn test_read_error_surfaces() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"half a line")
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
            .build();
        let mut scanner = LineScanner::new();
        
        let err = scanner.read_line(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Read(_)));
    }
}
