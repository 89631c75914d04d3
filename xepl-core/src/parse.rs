use smallvec::SmallVec;
use std::fmt;

/// First error a parser hit; parsing stops there.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub reason: String,
    pub excerpt: Option<String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line: {} column: {}: {}", self.line, self.column, self.reason)?;
        if let Some(excerpt) = &self.excerpt {
            write!(f, " {}", excerpt)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Position-tracked cursor over a source string. Single-error, first wins.
pub struct ParserBag<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    line_start: usize,
    error: Option<ParseError>,
}

impl<'a> ParserBag<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0, line: 1, line_start: 0, error: None }
    }

    pub fn peek(&self) -> u8 {
        self.byte_at(self.pos)
    }

    pub fn peek_at(&self, ahead: usize) -> u8 {
        self.byte_at(self.pos + ahead)
    }

    fn byte_at(&self, at: usize) -> u8 {
        *self.src.as_bytes().get(at).unwrap_or(&0)
    }

    pub fn remaining(&self) -> usize {
        self.src.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn column(&self) -> usize {
        self.pos - self.line_start + 1
    }

    /// The unconsumed tail.
    pub fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    pub fn advance(&mut self) {
        if let Some(&byte) = self.src.as_bytes().get(self.pos) {
            self.pos += 1;
            if byte == b'\n' {
                self.line += 1;
                self.line_start = self.pos;
            }
        }
    }

    /// Advance over `count` bytes, keeping line accounting.
    pub fn bump(&mut self, count: usize) {
        for _ in 0..count {
            self.advance();
        }
    }

    pub fn skip_whitespace(&mut self) {
        while self.peek().is_ascii_whitespace() {
            self.advance();
        }
    }

    pub fn consume(&mut self, byte: u8) -> bool {
        if self.peek() == byte {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn consume_str(&mut self, token: &str) -> bool {
        if self.rest().as_bytes().starts_with(token.as_bytes()) {
            self.bump(token.len());
            true
        } else {
            false
        }
    }

    /// Consume `byte` or record an error.
    pub fn expect(&mut self, byte: u8) -> bool {
        if self.consume(byte) {
            return true;
        }
        let reason = format!("expected '{}'", byte as char);
        self.record_error(&reason, self.excerpt_here());
        false
    }

    /// Consume the longest prefix whose bytes satisfy `pred`. Predicates
    /// only accept ASCII, so the cut always lands on a char boundary.
    pub fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while !self.at_end() && pred(self.peek()) {
            self.advance();
        }
        &self.src[start..self.pos]
    }

    fn excerpt_here(&self) -> String {
        let bytes = &self.src.as_bytes()[self.pos..];
        let cut = bytes.len().min(32);
        String::from_utf8_lossy(&bytes[..cut]).into_owned()
    }

    /// Record the first error with the current position. Later errors are
    /// dropped.
    pub fn record_error(&mut self, reason: &str, explain: impl Into<String>) {
        if self.error.is_some() {
            return;
        }
        let explain = explain.into();
        self.error = Some(ParseError {
            line: self.line,
            column: self.column(),
            reason: reason.to_string(),
            excerpt: if explain.is_empty() { None } else { Some(explain) },
        });
    }

    pub fn record_error_here(&mut self, reason: &str) {
        let excerpt = self.excerpt_here();
        self.record_error(reason, excerpt);
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&ParseError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<ParseError> {
        self.error.take()
    }
}

/// Option completed the production; the selector returns.
pub const COMPLETES: u8 = 1 << 0;
/// Option may claim input again on later rounds.
pub const CAN_REPEAT: u8 = 1 << 1;

/// A parser that a [`ParserSelect`] can drive.
pub trait Parsing {
    fn at_end(&self) -> bool;
    fn failed(&self) -> bool;
    fn fail(&mut self, reason: &str);
}

/// Ordered-choice selector: each round offers the input to the options in
/// order until one claims it. One-shot options disarm after claiming;
/// a `COMPLETES` option ends the selection.
pub struct ParserSelect<P> {
    choices: SmallVec<[Option<(u8, fn(&mut P) -> bool)>; 8]>,
}

impl<P: Parsing> ParserSelect<P> {
    pub fn new() -> Self {
        Self { choices: SmallVec::new() }
    }

    pub fn option(mut self, flags: u8, choice: fn(&mut P) -> bool) -> Self {
        self.choices.push(Some((flags, choice)));
        self
    }

    pub fn run(mut self, parser: &mut P) {
        while !parser.failed() {
            if parser.at_end() {
                parser.fail("unexpected end of input");
                return;
            }
            let mut claimed = false;
            for slot in self.choices.iter_mut() {
                let Some((flags, choice)) = *slot else { continue };
                if choice(parser) {
                    if flags & COMPLETES != 0 {
                        return;
                    }
                    if flags & CAN_REPEAT == 0 {
                        *slot = None;
                    }
                    claimed = true;
                    break;
                }
                if parser.failed() {
                    return;
                }
            }
            if !claimed {
                parser.fail("no parser option claimed the input");
                return;
            }
        }
    }
}

impl<P: Parsing> Default for ParserSelect<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tracks_lines_and_columns() {
        let mut bag = ParserBag::new("ab\ncd");
        bag.bump(3);
        assert_eq!(bag.line(), 2);
        assert_eq!(bag.column(), 1);
        bag.advance();
        assert_eq!(bag.column(), 2);
    }

    #[test]
    fn first_error_wins() {
        let mut bag = ParserBag::new("x");
        bag.record_error("first", "");
        bag.record_error("second", "");
        assert_eq!(bag.error().unwrap().reason, "first");
    }

    #[test]
    fn consume_str_moves_only_on_match() {
        let mut bag = ParserBag::new("<!--x");
        assert!(!bag.consume_str("<!D"));
        assert_eq!(bag.offset(), 0);
        assert!(bag.consume_str("<!--"));
        assert_eq!(bag.offset(), 4);
    }
}
