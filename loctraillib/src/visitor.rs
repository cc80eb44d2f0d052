//! Rust source visitor that separates inline test code from production code.
//!
//! Rust keeps unit tests next to the code they test, so a path-based test
//! classification misses most of them. This visitor scans a file once,
//! tracking brace depth, and attributes every non-blank line to either the
//! production or the test count:
//!
//! - A test attribute (`#[cfg(test)]`, `#[test]`, `#[tokio::test]`, ...) arms
//!   the visitor. The next `{` opens a test block at the current depth and the
//!   matching `}` closes it. A `;` before any `{` disarms it
//!   (`#[cfg(test)] use foo;`).
//! - `#![cfg(test)]` marks the whole file as test code.
//! - Braces inside comments, strings, raw strings and char literals never
//!   change depth.
//!
//! ## Acknowledgment
//!
//! The line categorisation model (a per-line context finished at each line
//! break) follows the visitor of
//! [cargo-warloc](https://github.com/Maximkaaa/cargo-warloc) by Maxim Gritsenko.
//! cargo-warloc is licensed under MIT.

/// Production and test line counts for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineSplit {
    /// Non-blank lines outside test blocks
    pub prod: u64,
    /// Non-blank lines inside test blocks (including the attribute line)
    pub test: u64,
}

impl LineSplit {
    pub fn total(&self) -> u64 {
        self.prod + self.test
    }
}

/// The context in which a line is being counted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VisitorContext {
    /// Production code
    Code,
    /// Test code
    Tests,
}

/// Lexical state carried across bytes (and across lines for multi-line constructs).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Mode {
    Code,
    LineComment,
    /// Nesting depth of `/* */`
    BlockComment(usize),
    Str,
    /// Number of `#` delimiting the raw string
    RawStr(usize),
}

/// Tracks what has been seen on the current line.
#[derive(Default, Debug, Copy, Clone)]
struct LineContext {
    has_content: bool,
    is_test: bool,
}

struct Visitor<'a> {
    src: &'a [u8],
    pos: usize,
    mode: Mode,
    depth: usize,
    /// Depth at which the enclosing test block was opened
    test_depth: Option<usize>,
    /// A test attribute was seen and its item has not started yet
    armed: bool,
    file_is_test: bool,
    line: LineContext,
    split: LineSplit,
}

impl<'a> Visitor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            mode: Mode::Code,
            depth: 0,
            test_depth: None,
            armed: false,
            file_is_test: false,
            line: LineContext::default(),
            split: LineSplit::default(),
        }
    }

    fn context(&self) -> VisitorContext {
        if self.file_is_test || self.armed || self.test_depth.is_some() {
            VisitorContext::Tests
        } else {
            VisitorContext::Code
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    /// Record that the current line carries something other than whitespace.
    fn mark(&mut self) {
        self.line.has_content = true;
        if self.context() == VisitorContext::Tests {
            self.line.is_test = true;
        }
    }

    fn finish_line(&mut self) {
        if self.line.has_content {
            if self.line.is_test || self.file_is_test {
                self.split.test += 1;
            } else {
                self.split.prod += 1;
            }
        }
        self.line = LineContext::default();
        // A test block opened on this line keeps following lines in test context
        if self.context() == VisitorContext::Tests {
            self.line.is_test = true;
        }
    }

    fn visit(mut self) -> LineSplit {
        while let Some(byte) = self.peek(0) {
            if byte == b'\n' {
                if self.mode == Mode::LineComment {
                    self.mode = Mode::Code;
                }
                self.finish_line();
                self.pos += 1;
                continue;
            }
            if !byte.is_ascii_whitespace() {
                self.mark();
            }
            match self.mode {
                Mode::Code => self.visit_code(byte),
                Mode::LineComment => self.pos += 1,
                Mode::BlockComment(nesting) => self.visit_block_comment(byte, nesting),
                Mode::Str => self.visit_string(byte),
                Mode::RawStr(hashes) => self.visit_raw_string(byte, hashes),
            }
        }
        self.finish_line();
        self.split
    }

    fn visit_code(&mut self, byte: u8) {
        match byte {
            b'/' if self.peek(1) == Some(b'/') => {
                self.mode = Mode::LineComment;
                self.pos += 2;
            }
            b'/' if self.peek(1) == Some(b'*') => {
                self.mode = Mode::BlockComment(1);
                self.pos += 2;
            }
            b'"' => {
                self.mode = Mode::Str;
                self.pos += 1;
            }
            b'r' if self.starts_identifier() => {
                if let Some(hashes) = self.raw_string_open(1) {
                    self.mode = Mode::RawStr(hashes);
                    self.pos += 2 + hashes;
                } else {
                    self.skip_identifier();
                }
            }
            b'b' if self.starts_identifier() && self.peek(1) == Some(b'r') => {
                if let Some(hashes) = self.raw_string_open(2) {
                    self.mode = Mode::RawStr(hashes);
                    self.pos += 3 + hashes;
                } else {
                    self.skip_identifier();
                }
            }
            b'\'' => self.skip_char_literal(),
            b'#' if matches!(self.peek(1), Some(b'[') | Some(b'!')) => self.visit_attribute(),
            b'{' => {
                if self.armed && self.test_depth.is_none() {
                    self.test_depth = Some(self.depth);
                }
                self.armed = false;
                self.depth += 1;
                self.pos += 1;
            }
            b'}' => {
                self.depth = self.depth.saturating_sub(1);
                if self.test_depth == Some(self.depth) {
                    self.test_depth = None;
                }
                self.pos += 1;
            }
            b';' => {
                self.armed = false;
                self.pos += 1;
            }
            b if b.is_ascii_alphanumeric() || b == b'_' => self.skip_identifier(),
            _ => self.pos += 1,
        }
    }

    fn visit_block_comment(&mut self, byte: u8, nesting: usize) {
        if byte == b'*' && self.peek(1) == Some(b'/') {
            self.mode = if nesting == 1 {
                Mode::Code
            } else {
                Mode::BlockComment(nesting - 1)
            };
            self.pos += 2;
        } else if byte == b'/' && self.peek(1) == Some(b'*') {
            self.mode = Mode::BlockComment(nesting + 1);
            self.pos += 2;
        } else {
            self.pos += 1;
        }
    }

    fn visit_string(&mut self, byte: u8) {
        match byte {
            // Skip the escaped byte unless it is a line break, which must still finish the line
            b'\\' if self.peek(1).is_some_and(|b| b != b'\n') => self.pos += 2,
            b'"' => {
                self.mode = Mode::Code;
                self.pos += 1;
            }
            _ => self.pos += 1,
        }
    }

    fn visit_raw_string(&mut self, byte: u8, hashes: usize) {
        if byte == b'"' && (1..=hashes).all(|i| self.peek(i) == Some(b'#')) {
            self.mode = Mode::Code;
            self.pos += 1 + hashes;
        } else {
            self.pos += 1;
        }
    }

    /// Read `#[...]` or `#![...]` and arm the visitor for test attributes.
    fn visit_attribute(&mut self) {
        let inner = self.peek(1) == Some(b'!');
        let start = self.pos;
        let mut brackets = 0usize;
        let mut end = None;
        for (offset, &b) in self.src[start..].iter().enumerate() {
            match b {
                b'[' => brackets += 1,
                b']' => {
                    brackets = brackets.saturating_sub(1);
                    if brackets == 0 {
                        end = Some(start + offset + 1);
                        break;
                    }
                }
                b'\n' => break,
                _ => {}
            }
        }
        let Some(end) = end else {
            // Multi-line attribute; treat as ordinary code
            self.pos += 1;
            return;
        };

        let text: String = String::from_utf8_lossy(&self.src[start..end])
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if inner {
            if text == "#![cfg(test)]" {
                self.file_is_test = true;
                self.line.is_test = true;
            }
        } else if is_test_attribute(&text) && self.test_depth.is_none() {
            self.armed = true;
            self.line.is_test = true;
        }
        self.pos = end;
    }

    /// `'a'`, `'\n'`, `'\u{1F600}'` are char literals; `'a` is a lifetime.
    fn skip_char_literal(&mut self) {
        match (self.peek(1), self.peek(2)) {
            (Some(b'\\'), _) => {
                let mut offset = 2;
                while let Some(b) = self.peek(offset) {
                    if b == b'\'' || b == b'\n' {
                        break;
                    }
                    offset += 1;
                }
                self.pos += offset + usize::from(self.peek(offset) == Some(b'\''));
            }
            (Some(c), _) if c >= 0x80 => {
                // Multi-byte char literal: find the closing quote within the char width
                let width = utf8_width(c);
                if self.peek(1 + width) == Some(b'\'') {
                    self.pos += 2 + width;
                } else {
                    self.pos += 1;
                }
            }
            (Some(c), Some(b'\'')) if c != b'\n' => self.pos += 3,
            _ => self.pos += 1,
        }
    }

    fn starts_identifier(&self) -> bool {
        self.pos == 0 || !is_ident_byte(self.src[self.pos - 1])
    }

    fn skip_identifier(&mut self) {
        while self.peek(0).is_some_and(is_ident_byte) {
            self.pos += 1;
        }
    }

    /// If a raw string opens `offset` bytes ahead (`#*"`), return its hash count.
    fn raw_string_open(&self, offset: usize) -> Option<usize> {
        let mut hashes = 0;
        while self.peek(offset + hashes) == Some(b'#') {
            hashes += 1;
        }
        (self.peek(offset + hashes) == Some(b'"')).then_some(hashes)
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn utf8_width(first: u8) -> usize {
    match first {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

fn is_test_attribute(text: &str) -> bool {
    matches!(
        text,
        "#[test]" | "#[cfg(test)]" | "#[tokio::test]" | "#[async_std::test]"
    ) || text.starts_with("#[tokio::test(")
        || text.starts_with("#[test_case(")
        || text.starts_with("#[rstest")
}

/// Split a Rust source into production and test line counts.
///
/// # Example
///
/// ```rust
/// use loctraillib::visitor::split_rust_source;
///
/// let source = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\n#[test]\nfn adds() {\n    assert_eq!(add(1, 2), 3);\n}\n";
/// let split = split_rust_source(source);
/// assert_eq!(split.prod, 3);
/// assert_eq!(split.test, 4);
/// ```
pub fn split_rust_source(source: &str) -> LineSplit {
    Visitor::new(source).visit()
}
