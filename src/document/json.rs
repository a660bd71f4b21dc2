//! A small JSON reader producing the spanned [`Node`] tree.
//!
//! `serde_json` is used everywhere a format is machine-written (selections,
//! settings, cache databases). Recipes however need spans so that binding
//! errors point at a line and column, which `serde_json` cannot provide, so
//! user-facing documents go through this reader instead.

use miette::SourceSpan;

use super::{
    error::{BindError, BindResult},
    node::{Mapping, Node, Scalar, ScalarStyle, Sequence},
};

/// Parse a JSON document into a [`Node`].
pub fn parse_json(text: &str) -> BindResult<Node> {
    let mut p = Parser {
        text,
        bytes: text.as_bytes(),
        pos: 0,
    };
    p.skip_ws();
    let node = p.value()?;
    p.skip_ws();
    if p.pos != p.bytes.len() {
        return Err(BindError::syntax(
            "trailing characters after document",
            p.span_from(p.pos),
        ));
    }
    Ok(node)
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    /// Span from `start` to the current position
    fn span(&self, start: usize) -> SourceSpan {
        (start, self.pos.saturating_sub(start).max(1)).into()
    }

    /// One-character span at `start`
    fn span_from(&self, start: usize) -> SourceSpan {
        (start, 1).into()
    }

    fn expect(&mut self, b: u8) -> BindResult<()> {
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(BindError::syntax(
                format!("expected `{}`", b as char),
                self.span_from(self.pos),
            ))
        }
    }

    fn value(&mut self) -> BindResult<Node> {
        match self.peek() {
            Some(b'{') => self.object(),
            Some(b'[') => self.array(),
            Some(b'"') => {
                let start = self.pos;
                let s = self.string()?;
                Ok(Node::Scalar(Scalar::new(
                    s,
                    ScalarStyle::String,
                    self.span(start),
                )))
            }
            Some(b't') | Some(b'f') => {
                let start = self.pos;
                let word = self.word();
                match word {
                    "true" | "false" => Ok(Node::Scalar(Scalar::new(
                        word.to_string(),
                        ScalarStyle::Bool,
                        self.span(start),
                    ))),
                    other => Err(BindError::syntax(
                        format!("unexpected token `{other}`"),
                        self.span(start),
                    )),
                }
            }
            Some(b'n') => {
                let start = self.pos;
                let word = self.word();
                if word == "null" {
                    Ok(Node::Scalar(Scalar::new(
                        "null",
                        ScalarStyle::Null,
                        self.span(start),
                    )))
                } else {
                    Err(BindError::syntax(
                        format!("unexpected token `{word}`"),
                        self.span(start),
                    ))
                }
            }
            Some(b'-') | Some(b'0'..=b'9') => self.number(),
            Some(other) => Err(BindError::syntax(
                format!("unexpected character `{}`", other as char),
                self.span_from(self.pos),
            )),
            None => Err(BindError::syntax(
                "unexpected end of document",
                self.span_from(self.pos.saturating_sub(1)),
            )),
        }
    }

    fn word(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        &self.text[start..self.pos]
    }

    fn object(&mut self) -> BindResult<Node> {
        let start = self.pos;
        self.expect(b'{')?;
        let mut mapping = Mapping::new(self.span_from(start));
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            mapping.set_span(self.span(start));
            return Ok(Node::Mapping(mapping));
        }
        loop {
            self.skip_ws();
            let key_start = self.pos;
            if self.peek() != Some(b'"') {
                return Err(BindError::syntax(
                    "expected string key",
                    self.span_from(self.pos),
                ));
            }
            let key = self.string()?;
            let key_span = self.span(key_start);
            self.skip_ws();
            self.expect(b':')?;
            self.skip_ws();
            let value = self.value()?;
            if mapping.insert(key.clone(), key_span, value).is_some() {
                return Err(BindError::duplicate_key(key, key_span)
                    .with_help("the same key appears twice in this object"));
            }
            self.skip_ws();
            match self.bump() {
                Some(b',') => continue,
                Some(b'}') => break,
                _ => {
                    return Err(BindError::syntax(
                        "expected `,` or `}`",
                        self.span_from(self.pos.saturating_sub(1)),
                    ))
                }
            }
        }
        mapping.set_span(self.span(start));
        Ok(Node::Mapping(mapping))
    }

    fn array(&mut self) -> BindResult<Node> {
        let start = self.pos;
        self.expect(b'[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(Node::Sequence(Sequence::new(items, self.span(start))));
        }
        loop {
            self.skip_ws();
            items.push(self.value()?);
            self.skip_ws();
            match self.bump() {
                Some(b',') => continue,
                Some(b']') => break,
                _ => {
                    return Err(BindError::syntax(
                        "expected `,` or `]`",
                        self.span_from(self.pos.saturating_sub(1)),
                    ))
                }
            }
        }
        Ok(Node::Sequence(Sequence::new(items, self.span(start))))
    }

    fn string(&mut self) -> BindResult<String> {
        let start = self.pos;
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(b'"') => return Ok(out),
                Some(b'\\') => match self.bump() {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'/') => out.push('/'),
                    Some(b'b') => out.push('\u{8}'),
                    Some(b'f') => out.push('\u{c}'),
                    Some(b'n') => out.push('\n'),
                    Some(b'r') => out.push('\r'),
                    Some(b't') => out.push('\t'),
                    Some(b'u') => out.push(self.unicode_escape()?),
                    _ => {
                        return Err(BindError::syntax(
                            "invalid escape sequence",
                            self.span_from(self.pos.saturating_sub(1)),
                        ))
                    }
                },
                Some(_) => {
                    // multi-byte characters are copied verbatim; back up to
                    // the byte we consumed and take the whole char
                    let ch_start = self.pos - 1;
                    let ch = self.text[ch_start..].chars().next().ok_or_else(|| {
                        BindError::syntax("invalid utf-8", self.span_from(ch_start))
                    })?;
                    self.pos = ch_start + ch.len_utf8();
                    out.push(ch);
                }
                None => {
                    return Err(BindError::syntax(
                        "unterminated string",
                        self.span_from(start),
                    ))
                }
            }
        }
    }

    fn unicode_escape(&mut self) -> BindResult<char> {
        let start = self.pos;
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .bump()
                .and_then(|b| (b as char).to_digit(16))
                .ok_or_else(|| {
                    BindError::syntax("invalid \\u escape", self.span_from(start))
                })?;
            code = code * 16 + digit;
        }
        // surrogate pairs
        if (0xD800..0xDC00).contains(&code) {
            if self.bump() != Some(b'\\') || self.bump() != Some(b'u') {
                return Err(BindError::syntax(
                    "unpaired surrogate in \\u escape",
                    self.span_from(start),
                ));
            }
            let mut low = 0u32;
            for _ in 0..4 {
                let digit = self
                    .bump()
                    .and_then(|b| (b as char).to_digit(16))
                    .ok_or_else(|| {
                        BindError::syntax("invalid \\u escape", self.span_from(start))
                    })?;
                low = low * 16 + digit;
            }
            code = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
        }
        char::from_u32(code)
            .ok_or_else(|| BindError::syntax("invalid \\u escape", self.span_from(start)))
    }

    fn number(&mut self) -> BindResult<Node> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-')) {
            self.pos += 1;
        }
        let text = &self.text[start..self.pos];
        // validate through the std parser; the scalar keeps the source text
        if text.parse::<f64>().is_err() {
            return Err(BindError::syntax(
                format!("invalid number `{text}`"),
                self.span(start),
            ));
        }
        Ok(Node::Scalar(Scalar::new(
            text.to_string(),
            ScalarStyle::Number,
            self.span(start),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::error::line_column;

    #[test]
    fn parses_nested_document() {
        let node = parse_json(r#"{"name": "demo", "deps": {"a": "~>1.0"}, "n": [1, 2]}"#).unwrap();
        let m = node.as_mapping().unwrap();
        assert_eq!(m.get("name").unwrap().as_scalar().unwrap().as_str(), "demo");
        let deps = m.get("deps").unwrap().as_mapping().unwrap();
        assert_eq!(deps.get("a").unwrap().as_scalar().unwrap().as_str(), "~>1.0");
        assert_eq!(m.get("n").unwrap().as_sequence().unwrap().len(), 2);
    }

    #[test]
    fn scalar_styles_survive() {
        let node = parse_json(r#"{"s": "1", "n": 1, "b": true, "z": null}"#).unwrap();
        let m = node.as_mapping().unwrap();
        assert_eq!(m.get("s").unwrap().as_scalar().unwrap().style(), ScalarStyle::String);
        assert_eq!(m.get("n").unwrap().as_scalar().unwrap().style(), ScalarStyle::Number);
        assert_eq!(m.get("b").unwrap().as_scalar().unwrap().style(), ScalarStyle::Bool);
        assert!(m.get("z").unwrap().is_null());
    }

    #[test]
    fn key_spans_point_at_the_key() {
        let text = "{\n  \"first\": 1,\n  \"second\": 2\n}";
        let node = parse_json(text).unwrap();
        let m = node.as_mapping().unwrap();
        let entry = m.entry("second").unwrap();
        let (line, column) = line_column(text, entry.key_span.offset());
        assert_eq!((line, column), (3, 3));
    }

    #[test]
    fn rejects_duplicate_object_keys() {
        let err = parse_json(r#"{"a": 1, "a": 2}"#).unwrap_err();
        assert!(matches!(err, BindError::DuplicateKey { .. }));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_json("{} x").is_err());
        assert!(parse_json("").is_err());
    }

    #[test]
    fn string_escapes() {
        let node = parse_json(r#"{"s": "a\nbA😀"}"#).unwrap();
        let m = node.as_mapping().unwrap();
        assert_eq!(m.get("s").unwrap().as_scalar().unwrap().as_str(), "a\nbA😀");
    }
}
