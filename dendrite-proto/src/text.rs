//! Text-format tokenization.
//!
//! The text format supported here is the subset used by `.prototxt`
//! documents: `#` comments, `name: value` or `name value` pairs, quoted
//! strings and nested `name { ... }` blocks with optional trailing `;`.

use crate::protobuf::{ErrorKind, ParseError};

/// Remove comments: every character from `#` (inclusive) to the next
/// newline (inclusive) is dropped.
pub(crate) fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_comment = false;
    for ch in text.chars() {
        if ch == '#' {
            in_comment = true;
        } else if in_comment {
            in_comment = ch != '\n';
        } else {
            out.push(ch);
        }
    }
    out
}

/// Split source text into tokens.
///
/// Whitespace, `:`, `;` and `"` separate tokens and are dropped (this is
/// where quote stripping happens). Braces separate tokens and are themselves
/// tokens.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::with_capacity(1.max(text.len() / 7));
    let mut token = String::new();

    for ch in text.chars() {
        match ch {
            ' ' | '\t' | '\r' | '\n' | ':' | '"' | ';' => {
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
            }
            '{' | '}' => {
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
                tokens.push(ch.to_string());
            }
            _ => token.push(ch),
        }
    }
    if !token.is_empty() {
        tokens.push(token);
    }
    tokens
}

/// Forward-only cursor over a token list. Errors produced through the
/// cursor carry the current token index.
pub(crate) struct TokenCursor {
    tokens: Vec<String>,
    pos: usize,
}

impl TokenCursor {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Index of the next token to be consumed.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Consume and return the next token.
    pub fn next(&mut self) -> Result<&str, ParseError> {
        match self.tokens.get(self.pos) {
            Some(token) => {
                self.pos += 1;
                Ok(token)
            }
            None => Err(ParseError::new(ErrorKind::Eof).with_token_pos(self.pos)),
        }
    }

    /// Return the next token without consuming it.
    pub fn peek(&self) -> Result<&str, ParseError> {
        self.tokens
            .get(self.pos)
            .map(|s| s.as_str())
            .ok_or_else(|| ParseError::new(ErrorKind::Eof).with_token_pos(self.pos))
    }

    /// Consume the next token, which must equal `expected`.
    pub fn expect(&mut self, expected: &'static str) -> Result<(), ParseError> {
        let pos = self.pos;
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(ParseError::new(ErrorKind::UnexpectedToken {
                expected,
                found: token.to_string(),
            })
            .with_token_pos(pos))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{strip_comments, tokenize, TokenCursor};

    #[test]
    fn test_strip_comments() {
        let text = "a: 1 # trailing comment\n# full line\nb: 2";
        assert_eq!(strip_comments(text), "a: 1 \nb: 2");
    }

    #[test]
    fn test_tokenize() {
        let text = "name: \"conv1\"\nparam { pad: 2; }";
        assert_eq!(
            tokenize(text),
            ["name", "conv1", "param", "{", "pad", "2", "}"]
        );
    }

    #[test]
    fn test_braces_without_spaces() {
        assert_eq!(tokenize("a{b:1}"), ["a", "{", "b", "1", "}"]);
    }

    #[test]
    fn test_cursor() {
        let mut cursor = TokenCursor::new(tokenize("{ a 1 }"));
        cursor.expect("{").unwrap();
        assert_eq!(cursor.peek().unwrap(), "a");
        assert_eq!(cursor.next().unwrap(), "a");
        assert_eq!(cursor.next().unwrap(), "1");
        cursor.expect("}").unwrap();
        assert!(cursor.next().is_err());
    }
}
