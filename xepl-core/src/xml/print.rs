//! Building XML text: deferred `>` vs `/>`, quote selection and entity
//! escaping for attribute values.

/// Incremental element writer. Attributes go out until the first call to
/// [`close_attributes`](XmlBuilder::close_attributes); `close` emits either
/// the matching end tag or the empty-element form.
pub struct XmlBuilder {
    tag: String,
    attrs_closed: bool,
}

impl XmlBuilder {
    pub fn open(name: &str, space: Option<&str>, out: &mut String) -> XmlBuilder {
        let mut tag = String::new();
        if let Some(space) = space {
            tag.push_str(space);
            tag.push(':');
        }
        tag.push_str(name);
        out.push('<');
        out.push_str(&tag);
        XmlBuilder { tag, attrs_closed: false }
    }

    pub fn attribute(&mut self, out: &mut String, name: &str, value: &str) {
        out.push(' ');
        out.push_str(name);
        out.push('=');
        escape_quotes(value, out);
    }

    pub fn close_attributes(&mut self, out: &mut String) {
        if !self.attrs_closed {
            self.attrs_closed = true;
            out.push('>');
        }
    }

    pub fn close(self, out: &mut String) {
        if self.attrs_closed {
            out.push_str("</");
            out.push_str(&self.tag);
            out.push('>');
        } else {
            out.push_str("/>");
        }
    }
}

/// Quote and escape an attribute value. Values without markup characters go
/// out verbatim in double quotes; a value whose only offending character is
/// the double quote is wrapped in single quotes instead; everything else is
/// entity-escaped.
pub fn escape_quotes(value: &str, out: &mut String) {
    let has_markup = value.contains(['&', '<', '>']);
    let has_dquote = value.contains('"');
    if !has_markup && !has_dquote {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }
    if !has_markup && !value.contains('\'') {
        out.push('\'');
        out.push_str(value);
        out.push('\'');
        return;
    }
    out.push('"');
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod test {
    use super::*;

    fn escaped(value: &str) -> String {
        let mut out = String::new();
        escape_quotes(value, &mut out);
        out
    }

    #[test]
    fn plain_values_take_double_quotes() {
        assert_eq!(escaped("hello"), "\"hello\"");
    }

    #[test]
    fn a_double_quote_switches_to_single_quotes() {
        assert_eq!(escaped("say \"hi\""), "'say \"hi\"'");
    }

    #[test]
    fn markup_gets_entity_escaped() {
        assert_eq!(escaped("a<b&c\"d"), "\"a&lt;b&amp;c&quot;d\"");
    }

    #[test]
    fn empty_element_form() {
        let mut out = String::new();
        let builder = XmlBuilder::open("tag", Some("ns"), &mut out);
        builder.close(&mut out);
        assert_eq!(out, "<ns:tag/>");
    }
}
