//! Incremental scanner over bulk files
//!
//! Bulk files are a top-level JSON array of objects, sometimes gigabytes long. The
//! scanner reads the byte stream once and yields each top-level element as raw bytes
//! without building the whole document, regardless of how elements are laid out
//! across lines (compact, one per line, or pretty-printed).
//!
//! Files that are not wrapped in an array are read as newline-delimited JSON. In both
//! layouts a newline outside of any object terminates the current element, so a
//! garbage line is yielded on its own and rejected by [`parse_record`].
//!
//! A truncated element (an unclosed `{`, `[` or string) keeps the tokenizer nested and
//! would swallow every following line. When an element spanning several lines does
//! not parse, its first line is yielded as the malformed element and the remaining
//! lines are scanned again, so only the broken record is lost.

use std::collections::VecDeque;
use std::path::Path;

use serde::de::IgnoredAny;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

const READ_BUFFER_SIZE: usize = 64 * 1024;
const PREVIEW_LEN: usize = 120;

/// Why one element could not become a record
#[derive(Debug, thiserror::Error)]
pub enum RecordParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("element is not a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Before the first significant byte
    Start,
    /// Inside the top-level array
    Array,
    /// Newline-delimited objects, no enclosing array
    Lines,
    /// Past the closing bracket; trailing bytes are ignored
    Finished,
}

#[derive(Debug)]
struct Tokenizer {
    mode: Mode,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// The closing bracket of the top-level array was seen
    closed: bool,
    current: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
}

impl Tokenizer {
    fn new() -> Self {
        Self {
            mode: Mode::Start,
            depth: 0,
            in_string: false,
            escaped: false,
            closed: false,
            current: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    /// Tokenizer continuing mid-stream in `mode`
    fn resume(mode: Mode) -> Self {
        Self {
            mode,
            ..Self::new()
        }
    }

    fn feed(&mut self, b: u8) {
        match self.mode {
            Mode::Finished => {},
            Mode::Start => match b {
                b'[' => self.mode = Mode::Array,
                // Whitespace and a UTF-8 byte order mark
                b' ' | b'\t' | b'\r' | b'\n' | 0xEF | 0xBB | 0xBF => {},
                _ => {
                    self.mode = Mode::Lines;
                    self.element_byte(b);
                },
            },
            Mode::Array | Mode::Lines => self.element_byte(b),
        }
    }

    fn element_byte(&mut self, b: u8) {
        if self.in_string {
            self.current.push(b);
            if self.escaped {
                self.escaped = false;
            } else if b == b'\\' {
                self.escaped = true;
            } else if b == b'"' {
                self.in_string = false;
            }
            return;
        }

        if self.depth == 0 {
            match b {
                b',' | b'\n' => self.emit(),
                b']' if self.mode == Mode::Array => {
                    self.emit();
                    self.mode = Mode::Finished;
                    self.closed = true;
                },
                _ => {
                    self.current.push(b);
                    match b {
                        b'{' | b'[' => self.depth += 1,
                        b'"' => self.in_string = true,
                        _ => {},
                    }
                },
            }
            return;
        }

        self.current.push(b);
        match b {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' => {
                self.depth -= 1;
                if self.depth == 0 {
                    self.emit();
                }
            },
            _ => {},
        }
    }

    fn emit(&mut self) {
        let element = trim(&self.current).to_vec();
        self.current.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;

        if element.is_empty() {
            return;
        }
        if element.contains(&b'\n') && !is_record(&element) {
            self.recover(element);
        } else {
            self.ready.push_back(element);
        }
    }

    /// Split a multi-line malformed element after its first line and rescan the rest
    fn recover(&mut self, element: Vec<u8>) {
        let Some(split) = element.iter().position(|&b| b == b'\n') else {
            self.ready.push_back(element);
            return;
        };

        self.ready.push_back(trim(&element[..split]).to_vec());

        let mut rest = Tokenizer::resume(self.mode);
        for &b in &element[split + 1..] {
            rest.feed(b);
        }
        rest.finish();

        self.ready.append(&mut rest.ready);
        if rest.closed {
            self.mode = Mode::Finished;
            self.closed = true;
        }
    }

    fn finish(&mut self) {
        if matches!(self.mode, Mode::Array | Mode::Lines) {
            self.emit();
        }
        self.mode = Mode::Finished;
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Yields top-level elements of a bulk file
pub struct ElementScanner<R> {
    reader: R,
    state: Tokenizer,
    eof: bool,
}

impl ElementScanner<BufReader<File>> {
    /// Open a file for scanning
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self::new(BufReader::with_capacity(READ_BUFFER_SIZE, file)))
    }
}

impl<R: AsyncBufRead + Unpin> ElementScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: Tokenizer::new(),
            eof: false,
        }
    }

    /// Next raw element, trimmed of surrounding whitespace
    pub async fn next_element(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(element) = self.state.ready.pop_front() {
                return Ok(Some(element));
            }
            if self.eof {
                return Ok(None);
            }

            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                self.state.finish();
                self.eof = true;
                continue;
            }

            let consumed = buf.len();
            for &b in buf {
                self.state.feed(b);
            }
            self.reader.consume(consumed);
        }
    }
}

/// Whether `element` is a well-formed JSON object
pub fn is_record(element: &[u8]) -> bool {
    element.first() == Some(&b'{') && serde_json::from_slice::<IgnoredAny>(element).is_ok()
}

/// Parse one element into a JSON object
pub fn parse_record(element: &[u8]) -> Result<Value, RecordParseError> {
    let value: Value = serde_json::from_slice(element)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(RecordParseError::NotAnObject)
    }
}

/// Short lossy rendering of an element for log lines
pub fn preview(element: &[u8]) -> String {
    let text = String::from_utf8_lossy(element);
    match text.char_indices().nth(PREVIEW_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &str) -> Vec<String> {
        let mut scanner = ElementScanner::new(input.as_bytes());
        let mut out = Vec::new();
        while let Some(element) = scanner.next_element().await.unwrap() {
            out.push(String::from_utf8(element).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_compact_array() {
        let elements = collect(r#"[{"id":1},{"id":2},{"id":3}]"#).await;
        assert_eq!(elements, vec![r#"{"id":1}"#, r#"{"id":2}"#, r#"{"id":3}"#]);
    }

    #[tokio::test]
    async fn test_one_record_per_line() {
        let input = "[\n{\"id\":1},\n{\"id\":2}\n]\n";
        let elements = collect(input).await;
        assert_eq!(elements, vec![r#"{"id":1}"#, r#"{"id":2}"#]);
    }

    #[tokio::test]
    async fn test_pretty_printed_array() {
        let input = r#"[
  {
    "id": 1,
    "name": "Llanowar Elves",
    "colors": ["G"]
  },
  {
    "id": 2,
    "name": "Counterspell",
    "colors": ["U"]
  }
]"#;
        let elements = collect(input).await;
        assert_eq!(elements.len(), 2);
        assert!(elements.iter().all(|e| is_record(e.as_bytes())));
        let second = parse_record(elements[1].as_bytes()).unwrap();
        assert_eq!(second["name"], "Counterspell");
    }

    #[tokio::test]
    async fn test_strings_with_structural_characters() {
        let input = r#"[{"text":"Draw a card, then discard a card.\n]"},{"text":"\"quoted\" {brace}"}]"#;
        let elements = collect(input).await;
        assert_eq!(elements.len(), 2);
        assert!(elements.iter().all(|e| is_record(e.as_bytes())));
    }

    #[tokio::test]
    async fn test_garbage_line_is_isolated() {
        let input = "[\n{\"id\":1},\nnot json at all\n{\"id\":2}\n]";
        let elements = collect(input).await;
        assert_eq!(elements, vec![r#"{"id":1}"#, "not json at all", r#"{"id":2}"#]);
        assert!(!is_record(elements[1].as_bytes()));
    }

    #[tokio::test]
    async fn test_truncated_record_does_not_swallow_the_rest() {
        let input = "[\n{\"id\":\"1\"},\n{\"id\":\"2\",\n{\"id\":\"3\"},\n{\"id\":\"4\"}\n]";
        let elements = collect(input).await;
        let records: Vec<&String> = elements.iter().filter(|e| is_record(e.as_bytes())).collect();
        assert_eq!(records, vec![r#"{"id":"1"}"#, r#"{"id":"3"}"#, r#"{"id":"4"}"#]);
        assert!(elements.contains(&r#"{"id":"2","#.to_string()));
    }

    #[tokio::test]
    async fn test_unclosed_string_does_not_swallow_the_rest() {
        let input = "{\"id\":1}\n{\"id\":2,\"name\":\"Llanow\n{\"id\":3}\n{\"id\":4}\n";
        let elements = collect(input).await;
        let ids: Vec<i64> = elements
            .iter()
            .filter_map(|e| parse_record(e.as_bytes()).ok())
            .filter_map(|r| r["id"].as_i64())
            .collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn test_truncated_pretty_printed_record() {
        let input = r#"[
  {
    "id": 1
  },
  {
    "id": 2,
    "name": "Counter
  },
  {
    "id": 3
  }
]"#;
        let elements = collect(input).await;
        let ids: Vec<i64> = elements
            .iter()
            .filter_map(|e| parse_record(e.as_bytes()).ok())
            .filter_map(|r| r["id"].as_i64())
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_json_lines_without_array() {
        let input = "{\"id\":1}\n{\"id\":2}\n\n{\"id\":3}";
        let elements = collect(input).await;
        assert_eq!(elements.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_inputs() {
        assert!(collect("").await.is_empty());
        assert!(collect("[]").await.is_empty());
        assert!(collect("  [ \n ]  \n").await.is_empty());
    }

    #[tokio::test]
    async fn test_small_read_buffer_splits_elements() {
        let input = r#"[{"id":1,"name":"a \"b\" c"},{"id":2}]"#;
        let reader = BufReader::with_capacity(3, input.as_bytes());
        let mut scanner = ElementScanner::new(reader);
        let mut count = 0;
        while let Some(element) = scanner.next_element().await.unwrap() {
            assert!(is_record(&element));
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_parse_record_rejects_non_objects() {
        assert!(matches!(parse_record(b"42"), Err(RecordParseError::NotAnObject)));
        assert!(matches!(parse_record(b"{\"a\":"), Err(RecordParseError::Json(_))));
        assert!(!is_record(b"[1,2]"));
        assert!(!is_record(b"{\"a\":}"));
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(500);
        let shown = preview(long.as_bytes());
        assert!(shown.ends_with("..."));
        assert_eq!(shown.len(), PREVIEW_LEN + 3);
    }
}
