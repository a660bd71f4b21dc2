//! The block-structured recipe format.
//!
//! Documents tokenize into `name "value" key=value { … }` tags. Each tag has
//! a name, positional values, named attributes and an optional children
//! block. The mapping onto the record schema shared with the JSON front-end
//! lives with the recipe model; this module only produces the tag tree.

use miette::SourceSpan;

use super::{
    error::{BindError, BindResult},
    node::{Scalar, ScalarStyle},
};

/// One tag of a block document.
#[derive(Debug, Clone, PartialEq)]
pub struct SdlTag {
    pub name: String,
    pub name_span: SourceSpan,
    pub values: Vec<Scalar>,
    pub attributes: Vec<SdlAttribute>,
    pub children: Vec<SdlTag>,
    pub span: SourceSpan,
}

/// A `key=value` attribute on a tag.
#[derive(Debug, Clone, PartialEq)]
pub struct SdlAttribute {
    pub name: String,
    pub name_span: SourceSpan,
    pub value: Scalar,
}

impl SdlTag {
    /// The single string value of a tag like `name "drover"`.
    pub fn single_value(&self) -> BindResult<&Scalar> {
        match self.values.as_slice() {
            [one] => Ok(one),
            _ => Err(BindError::construction(
                &self.name,
                format!("expected exactly one value, found {}", self.values.len()),
                self.span,
            )),
        }
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&SdlAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Parse a block document into its top-level tags.
pub fn parse_sdl(text: &str) -> BindResult<Vec<SdlTag>> {
    let tokens = tokenize(text)?;
    let mut parser = TagParser { tokens, pos: 0 };
    let tags = parser.tags(false)?;
    Ok(tags)
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Number(String),
    Bool(bool),
    Null,
    Equals,
    OpenBrace,
    CloseBrace,
    Newline,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    span: SourceSpan,
}

fn tokenize(text: &str) -> BindResult<Vec<Token>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let start = pos;
        match bytes[pos] {
            b' ' | b'\t' | b'\r' => pos += 1,
            b'\n' => {
                tokens.push(Token {
                    kind: TokenKind::Newline,
                    span: (start, 1).into(),
                });
                pos += 1;
            }
            // line continuation
            b'\\' => {
                pos += 1;
                while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t' | b'\r') {
                    pos += 1;
                }
                if pos < bytes.len() && bytes[pos] == b'\n' {
                    pos += 1;
                } else {
                    return Err(BindError::syntax(
                        "`\\` is only valid at the end of a line",
                        (start, 1).into(),
                    ));
                }
            }
            b';' => {
                // a semicolon separates tags like a newline does
                tokens.push(Token {
                    kind: TokenKind::Newline,
                    span: (start, 1).into(),
                });
                pos += 1;
            }
            b'#' => {
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
            }
            b'/' if bytes.get(pos + 1) == Some(&b'/') => {
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
            }
            b'-' if bytes.get(pos + 1) == Some(&b'-') => {
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
            }
            b'/' if bytes.get(pos + 1) == Some(&b'*') => {
                pos += 2;
                loop {
                    if pos + 1 >= bytes.len() {
                        return Err(BindError::syntax(
                            "unterminated block comment",
                            (start, 2).into(),
                        ));
                    }
                    if bytes[pos] == b'*' && bytes[pos + 1] == b'/' {
                        pos += 2;
                        break;
                    }
                    pos += 1;
                }
            }
            b'=' => {
                tokens.push(Token {
                    kind: TokenKind::Equals,
                    span: (start, 1).into(),
                });
                pos += 1;
            }
            b'{' => {
                tokens.push(Token {
                    kind: TokenKind::OpenBrace,
                    span: (start, 1).into(),
                });
                pos += 1;
            }
            b'}' => {
                tokens.push(Token {
                    kind: TokenKind::CloseBrace,
                    span: (start, 1).into(),
                });
                pos += 1;
            }
            b'"' => {
                pos += 1;
                let mut value = String::new();
                loop {
                    if pos >= bytes.len() {
                        return Err(BindError::syntax(
                            "unterminated string",
                            (start, 1).into(),
                        ));
                    }
                    match bytes[pos] {
                        b'"' => {
                            pos += 1;
                            break;
                        }
                        b'\\' => {
                            pos += 1;
                            let escaped = bytes.get(pos).copied().ok_or_else(|| {
                                BindError::syntax("unterminated escape", (start, 1).into())
                            })?;
                            value.push(match escaped {
                                b'n' => '\n',
                                b'r' => '\r',
                                b't' => '\t',
                                b'"' => '"',
                                b'\\' => '\\',
                                other => {
                                    return Err(BindError::syntax(
                                        format!("invalid escape `\\{}`", other as char),
                                        (pos - 1, 2).into(),
                                    ))
                                }
                            });
                            pos += 1;
                        }
                        b'\n' => {
                            return Err(BindError::syntax(
                                "unterminated string",
                                (start, pos - start).into(),
                            ))
                        }
                        _ => {
                            let ch = text[pos..].chars().next().expect("in-bounds char");
                            value.push(ch);
                            pos += ch.len_utf8();
                        }
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    span: (start, pos - start).into(),
                });
            }
            b'`' => {
                pos += 1;
                let raw_start = pos;
                while pos < bytes.len() && bytes[pos] != b'`' {
                    pos += 1;
                }
                if pos >= bytes.len() {
                    return Err(BindError::syntax(
                        "unterminated raw string",
                        (start, 1).into(),
                    ));
                }
                let value = text[raw_start..pos].to_string();
                pos += 1;
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    span: (start, pos - start).into(),
                });
            }
            b'0'..=b'9' | b'-' | b'+' => {
                pos += 1;
                while pos < bytes.len()
                    && matches!(bytes[pos], b'0'..=b'9' | b'.' | b'e' | b'E')
                {
                    pos += 1;
                }
                let word = &text[start..pos];
                if word.parse::<f64>().is_err() {
                    return Err(BindError::syntax(
                        format!("invalid number `{word}`"),
                        (start, pos - start).into(),
                    ));
                }
                tokens.push(Token {
                    kind: TokenKind::Number(word.to_string()),
                    span: (start, pos - start).into(),
                });
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                pos += 1;
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric()
                        || matches!(bytes[pos], b'_' | b'-' | b'.' | b'$'))
                {
                    pos += 1;
                }
                let word = &text[start..pos];
                let kind = match word {
                    "true" | "on" => TokenKind::Bool(true),
                    "false" | "off" => TokenKind::Bool(false),
                    "null" => TokenKind::Null,
                    _ => TokenKind::Ident(word.to_string()),
                };
                tokens.push(Token {
                    kind,
                    span: (start, pos - start).into(),
                });
            }
            other => {
                return Err(BindError::syntax(
                    format!("unexpected character `{}`", other as char),
                    (start, 1).into(),
                ));
            }
        }
    }
    Ok(tokens)
}

struct TagParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl TagParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn end_span(&self) -> SourceSpan {
        self.tokens
            .last()
            .map(|t| t.span)
            .unwrap_or_else(|| (0, 0).into())
    }

    /// Parse tags until end of input or, inside a block, the closing brace.
    fn tags(&mut self, in_block: bool) -> BindResult<Vec<SdlTag>> {
        let mut tags = Vec::new();
        loop {
            while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Newline)) {
                self.pos += 1;
            }
            match self.peek() {
                None => {
                    if in_block {
                        return Err(BindError::syntax("unclosed `{` block", self.end_span()));
                    }
                    return Ok(tags);
                }
                Some(token) if token.kind == TokenKind::CloseBrace => {
                    if !in_block {
                        return Err(BindError::syntax("unmatched `}`", token.span));
                    }
                    self.pos += 1;
                    return Ok(tags);
                }
                _ => tags.push(self.tag()?),
            }
        }
    }

    fn tag(&mut self) -> BindResult<SdlTag> {
        let (name, name_span) = match self.peek() {
            Some(Token {
                kind: TokenKind::Ident(name),
                span,
            }) => (name.clone(), *span),
            Some(token) => {
                return Err(BindError::syntax("expected a tag name", token.span));
            }
            None => return Err(BindError::syntax("expected a tag name", self.end_span())),
        };
        self.pos += 1;

        let mut tag = SdlTag {
            name,
            name_span,
            values: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
            span: name_span,
        };
        let mut last_span = name_span;

        loop {
            match self.peek().cloned() {
                None => break,
                Some(Token {
                    kind: TokenKind::Newline,
                    ..
                }) => {
                    self.pos += 1;
                    break;
                }
                Some(Token {
                    kind: TokenKind::CloseBrace,
                    ..
                }) => break,
                Some(Token {
                    kind: TokenKind::OpenBrace,
                    span,
                }) => {
                    self.pos += 1;
                    tag.children = self.tags(true)?;
                    last_span = span;
                    break;
                }
                Some(Token {
                    kind: TokenKind::Ident(attr_name),
                    span: attr_span,
                }) => {
                    // an identifier here must introduce `key=value`
                    self.pos += 1;
                    match self.peek() {
                        Some(Token {
                            kind: TokenKind::Equals,
                            ..
                        }) => {
                            self.pos += 1;
                            let value = self.literal()?;
                            last_span = value.span();
                            tag.attributes.push(SdlAttribute {
                                name: attr_name,
                                name_span: attr_span,
                                value,
                            });
                        }
                        _ => {
                            return Err(BindError::syntax(
                                format!("expected `=` after `{attr_name}`"),
                                attr_span,
                            ));
                        }
                    }
                }
                Some(_) => {
                    let value = self.literal()?;
                    last_span = value.span();
                    tag.values.push(value);
                }
            }
        }

        let start = tag.name_span.offset();
        let end = last_span.offset() + last_span.len();
        tag.span = (start, end.saturating_sub(start).max(1)).into();
        Ok(tag)
    }

    fn literal(&mut self) -> BindResult<Scalar> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| BindError::syntax("expected a value", self.end_span()))?;
        self.pos += 1;
        match token.kind {
            TokenKind::Str(s) => Ok(Scalar::new(s, ScalarStyle::String, token.span)),
            TokenKind::Number(n) => Ok(Scalar::new(n, ScalarStyle::Number, token.span)),
            TokenKind::Bool(b) => Ok(Scalar::new(
                if b { "true" } else { "false" },
                ScalarStyle::Bool,
                token.span,
            )),
            TokenKind::Null => Ok(Scalar::new("null", ScalarStyle::Null, token.span)),
            _ => Err(BindError::syntax("expected a value", token.span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_flat_tags() {
        let tags = parse_sdl("name \"demo\"\ndescription \"A thing\"\n").unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].name, "name");
        assert_eq!(tags[0].single_value().unwrap().as_str(), "demo");
    }

    #[test]
    fn parses_attributes_and_multiple_values() {
        let tags = parse_sdl("libs \"ssl\" \"crypto\" platform=\"posix\"\n").unwrap();
        let tag = &tags[0];
        assert_eq!(tag.values.len(), 2);
        assert_eq!(tag.attribute("platform").unwrap().value.as_str(), "posix");
    }

    #[test]
    fn parses_nested_blocks() {
        let text = r#"
configuration "server" {
    targetType "executable"
    versions "Server" "Http"
}
"#;
        let tags = parse_sdl(text).unwrap();
        let config = &tags[0];
        assert_eq!(config.single_value().unwrap().as_str(), "server");
        assert_eq!(config.children.len(), 2);
        assert_eq!(config.children[1].values.len(), 2);
    }

    #[test]
    fn semicolons_separate_tags() {
        let tags = parse_sdl("a \"1\"; b \"2\"\n").unwrap();
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn comments_are_skipped() {
        let text = "// line\n# hash\n-- dashes\nname \"x\" /* inline */\n";
        let tags = parse_sdl(text).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "name");
    }

    #[test]
    fn booleans_and_numbers() {
        let tags = parse_sdl("flag true\ncount 42\n").unwrap();
        assert_eq!(tags[0].values[0].to_bool().unwrap(), true);
        assert_eq!(tags[1].values[0].to_i64().unwrap(), 42);
    }

    #[test]
    fn line_continuation_joins_lines() {
        let tags = parse_sdl("libs \"a\" \\\n \"b\"\n").unwrap();
        assert_eq!(tags[0].values.len(), 2);
    }

    #[test]
    fn raw_strings_keep_backslashes() {
        let tags = parse_sdl("path `C:\\x`\n").unwrap();
        assert_eq!(tags[0].values[0].as_str(), "C:\\x");
    }

    #[test]
    fn unmatched_brace_is_an_error() {
        assert!(parse_sdl("tag {\n").is_err());
        assert!(parse_sdl("}\n").is_err());
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = parse_sdl("name \"demo\n").unwrap_err();
        assert!(matches!(err, BindError::Syntax { .. }));
    }
}
