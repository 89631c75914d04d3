//! The XEPL XML dialect: a strict XML 1.0 subset with a leading `#!` shell
//! line, `.`/`+`/`-` in tag names, and `_`-prefixed comment elements that
//! parse but do not survive.
pub mod print;

use crate::gene::Gene;
use crate::parse::{ParserBag, ParserSelect, Parsing, CAN_REPEAT, COMPLETES};
use crate::Cord;
use anyhow::Result;

/// Parse a document into `root`. Top-level elements become children of
/// `root`; on error the partially built tree is left in place and the first
/// error is returned with its position.
pub fn parse_into(root: &Gene, text: &str) -> Result<()> {
    XmlParser::new(root.clone(), text).parse()
}

fn at_tag_start(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b':'
}

fn in_tag(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b':' | b'_' | b'.' | b'+' | b'-')
}

struct OpenElement {
    gene: Gene,
    keep: bool,
}

pub struct XmlParser<'a> {
    bag: ParserBag<'a>,
    root: Gene,
    stack: Vec<OpenElement>,
}

impl Parsing for XmlParser<'_> {
    fn at_end(&self) -> bool {
        self.bag.at_end()
    }

    fn failed(&self) -> bool {
        self.bag.failed()
    }

    fn fail(&mut self, reason: &str) {
        self.bag.record_error_here(reason);
    }
}

impl<'a> XmlParser<'a> {
    pub fn new(root: Gene, text: &'a str) -> Self {
        Self { bag: ParserBag::new(text), root, stack: Vec::new() }
    }

    pub fn parse(mut self) -> Result<()> {
        self.bag.skip_whitespace();
        self.discard_shell_directive();
        self.bag.skip_whitespace();
        self.skip_misc();
        self.do_doctype();
        self.skip_misc();
        while !self.bag.failed() && self.do_begin_node() {
            self.skip_misc();
        }
        match self.bag.take_error() {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    fn skip_misc(&mut self) {
        while !self.bag.failed() && (self.do_comment() || self.do_instruction()) {}
    }

    fn discard_shell_directive(&mut self) {
        if self.bag.peek() == b'#' {
            self.bag.take_while(|b| b != b'\n' && b != b'\r');
        }
    }

    fn parent(&self) -> Gene {
        self.stack
            .last()
            .map(|open| open.gene.clone())
            .unwrap_or_else(|| self.root.clone())
    }

    fn pop_element(&mut self) {
        if let Some(open) = self.stack.pop() {
            if !open.keep {
                self.parent().remove_gene(&open.gene);
            }
        }
    }

    fn do_begin_node(&mut self) -> bool {
        if self.bag.peek() != b'<' || matches!(self.bag.peek_at(1), b'!' | b'?' | b'/') {
            return false;
        }
        self.bag.advance();
        self.bag.skip_whitespace();
        let Some((name, space)) = self.extract_space_tag() else {
            return false;
        };
        let gene = Gene::new_in(&self.parent(), name.clone(), space);
        let keep = !name.starts_with('_');
        self.stack.push(OpenElement { gene, keep });
        self.bag.skip_whitespace();

        while !self.bag.failed() && at_tag_start(self.bag.peek()) {
            let attr = self.extract_attribute_name();
            self.bag.skip_whitespace();
            if self.bag.expect(b'=') {
                self.bag.skip_whitespace();
                if let Some((value, _quote)) = self.extract_quoted_value() {
                    self.bag.skip_whitespace();
                    if let Some(open) = self.stack.last() {
                        open.gene.trait_set(&attr, &value);
                    }
                }
            }
        }

        if !self.bag.failed() && self.do_close_node() {
            self.pop_element();
            return true;
        }
        if !self.bag.failed() && self.do_node_split() {
            self.pop_element();
            return true;
        }
        let tag = self
            .stack
            .last()
            .map(|open| open.gene.name().to_string())
            .unwrap_or_default();
        self.bag.record_error("open tag error", tag);
        self.stack.pop();
        false
    }

    fn do_close_node(&mut self) -> bool {
        if self.bag.consume_str("/>") {
            self.bag.skip_whitespace();
            return true;
        }
        false
    }

    fn do_node_split(&mut self) -> bool {
        if !self.bag.consume(b'>') {
            return false;
        }
        self.bag.skip_whitespace();
        ParserSelect::new()
            .option(COMPLETES, Self::do_close_split)
            .option(CAN_REPEAT, Self::do_comment)
            .option(CAN_REPEAT, Self::do_instruction)
            .option(0, Self::do_cdata)
            .option(CAN_REPEAT, Self::do_begin_node)
            .option(CAN_REPEAT, Self::do_content)
            .run(self);
        true
    }

    fn do_close_split(&mut self) -> bool {
        if !self.bag.consume_str("</") {
            return false;
        }
        self.bag.skip_whitespace();
        let Some((name, space)) = self.extract_space_tag() else {
            return true;
        };
        self.bag.skip_whitespace();
        self.bag.expect(b'>');
        self.bag.skip_whitespace();
        if let Some(open) = self.stack.last() {
            let name_mismatch = open.gene.name() != &name;
            let space_mismatch = open
                .gene
                .space()
                .map(|own| Some(own) != space.as_ref())
                .unwrap_or(false);
            if name_mismatch || space_mismatch {
                self.bag.record_error("bad closing tag", name.to_string());
            }
        }
        true
    }

    fn do_content(&mut self) -> bool {
        if self.bag.peek() == 0 || self.bag.peek() == b'<' {
            return false;
        }
        let text = self.bag.take_while(|b| b != b'<');
        let trimmed = text.trim_end();
        if !trimmed.is_empty() {
            if let Some(open) = self.stack.last() {
                open.gene.assign_content(trimmed);
            }
        }
        true
    }

    fn do_cdata(&mut self) -> bool {
        if !self.bag.consume_str("<![") {
            return false;
        }
        if !self.bag.consume_str("CDATA[") {
            self.bag.record_error_here("invalid CDATA start");
            return true;
        }
        match self.bag.rest().find("]]>") {
            Some(at) => {
                let data = &self.bag.rest()[..at];
                if let Some(open) = self.stack.last() {
                    open.gene.append_content(data);
                }
                self.bag.bump(at + 3);
            }
            None => {
                self.bag.record_error_here("unterminated CDATA");
                let len = self.bag.remaining();
                self.bag.bump(len);
            }
        }
        self.bag.skip_whitespace();
        true
    }

    fn do_comment(&mut self) -> bool {
        if !self.bag.consume_str("<!--") {
            return false;
        }
        match self.bag.rest().find("-->") {
            Some(at) => self.bag.bump(at + 3),
            None => {
                self.bag.record_error_here("unterminated comment");
                let len = self.bag.remaining();
                self.bag.bump(len);
            }
        }
        self.bag.skip_whitespace();
        true
    }

    fn do_instruction(&mut self) -> bool {
        if !self.bag.consume_str("<?") {
            return false;
        }
        match self.bag.rest().find("?>") {
            Some(at) => self.bag.bump(at + 2),
            None => {
                self.bag.record_error_here("unterminated processing instruction");
                let len = self.bag.remaining();
                self.bag.bump(len);
            }
        }
        self.bag.skip_whitespace();
        true
    }

    fn do_doctype(&mut self) -> bool {
        if !self.bag.consume_str("<!D") {
            return false;
        }
        if !self.bag.consume_str("OCTYPE") {
            self.bag.record_error_here("invalid DOCTYPE start");
            return true;
        }
        let mut nest = 1usize;
        while !self.bag.at_end() {
            match self.bag.peek() {
                b'<' => nest += 1,
                b'>' => {
                    nest -= 1;
                    if nest == 0 {
                        break;
                    }
                }
                _ => {}
            }
            self.bag.advance();
        }
        if nest != 0 {
            self.bag.record_error_here("unterminated DOCTYPE");
        } else {
            self.bag.advance();
        }
        self.bag.skip_whitespace();
        true
    }

    fn extract_space_tag(&mut self) -> Option<(Cord, Option<Cord>)> {
        if !at_tag_start(self.bag.peek()) {
            self.bag.record_error_here("not at tag");
            return None;
        }
        let text = self.bag.take_while(in_tag);
        match text.rfind(':') {
            Some(at) => Some((Cord::from(&text[at + 1..]), Some(Cord::from(&text[..at])))),
            None => Some((Cord::from(text), None)),
        }
    }

    fn extract_attribute_name(&mut self) -> String {
        self.bag.take_while(in_tag).to_string()
    }

    fn extract_quoted_value(&mut self) -> Option<(String, char)> {
        let quote = self.bag.peek();
        if quote != b'"' && quote != b'\'' {
            self.bag.record_error_here("missing attribute quote");
            return None;
        }
        self.bag.advance();
        match self.bag.rest().find(quote as char) {
            Some(at) => {
                let raw = &self.bag.rest()[..at];
                let value = decode_entities(raw);
                self.bag.bump(at + 1);
                Some((value, quote as char))
            }
            None => {
                let len = self.bag.remaining();
                self.bag.bump(len);
                self.bag.record_error("missing closing quote", "");
                None
            }
        }
    }
}

/// Decode the five basic entities; anything else passes through verbatim.
fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        let tail = &rest[at..];
        let (replacement, used) = if tail.starts_with("&amp;") {
            ("&", 5)
        } else if tail.starts_with("&lt;") {
            ("<", 4)
        } else if tail.starts_with("&gt;") {
            (">", 4)
        } else if tail.starts_with("&quot;") {
            ("\"", 6)
        } else if tail.starts_with("&apos;") {
            ("'", 6)
        } else {
            ("&", 1)
        };
        out.push_str(replacement);
        rest = &tail[used..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod test;
