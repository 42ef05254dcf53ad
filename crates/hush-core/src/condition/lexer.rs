//! Tokenizer for the condition language.

use crate::error::{CoreError, Result};
use crate::field::{is_name_char, is_sub_key_char};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Equal,
    NotEqual,
    Match,
    NotMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    LParen,
    RParen,
    Bang,
    Compare(CompareOp),
    /// A bare word or field reference; keywords are words without a sub-key.
    Ident {
        name: String,
        sub_key: Option<String>,
    },
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
            Self::Bang => "'!'".to_string(),
            Self::Compare(op) => format!("operator '{}'", op.symbol()),
            Self::Ident {
                name,
                sub_key: Some(key),
            } => format!("field '{name}[{key}]'"),
            Self::Ident { name, sub_key: None } => format!("'{name}'"),
            Self::Str(_) => "string literal".to_string(),
        }
    }

    pub(crate) fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Self::Ident { name, sub_key: None } if name == keyword)
    }
}

impl CompareOp {
    pub(crate) const fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Match => "=~",
            Self::NotMatch => "!~",
        }
    }
}

/// Splits `input` into tokens, recording the byte offset of each.
pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let kind = match c {
            '(' => {
                chars.next();
                TokenKind::LParen
            }
            ')' => {
                chars.next();
                TokenKind::RParen
            }
            '=' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '=')) => {
                        chars.next();
                        TokenKind::Compare(CompareOp::Equal)
                    }
                    Some(&(_, '~')) => {
                        chars.next();
                        TokenKind::Compare(CompareOp::Match)
                    }
                    _ => TokenKind::Compare(CompareOp::Equal),
                }
            }
            '!' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '=')) => {
                        chars.next();
                        TokenKind::Compare(CompareOp::NotEqual)
                    }
                    Some(&(_, '~')) => {
                        chars.next();
                        TokenKind::Compare(CompareOp::NotMatch)
                    }
                    _ => TokenKind::Bang,
                }
            }
            '\'' | '"' | '`' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    if ch == c {
                        closed = true;
                        break;
                    }
                    if ch == '\\' {
                        if let Some(&(_, next)) = chars.peek() {
                            if next == c {
                                chars.next();
                                value.push(c);
                                continue;
                            }
                        }
                    }
                    value.push(ch);
                }
                if !closed {
                    return Err(CoreError::parse(input, offset, "unterminated string literal"));
                }
                TokenKind::Str(value)
            }
            c if is_name_char(c) => {
                let mut name = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if !is_name_char(ch) {
                        break;
                    }
                    name.push(ch);
                    chars.next();
                }
                let mut sub_key = None;
                if let Some(&(bracket, '[')) = chars.peek() {
                    chars.next();
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some((_, ']')) => break,
                            Some((_, ch)) if is_sub_key_char(ch) => key.push(ch),
                            Some((pos, _)) => {
                                return Err(CoreError::parse(
                                    input,
                                    pos,
                                    "invalid character in sub-key",
                                ));
                            }
                            None => {
                                return Err(CoreError::parse(input, bracket, "unclosed '['"));
                            }
                        }
                    }
                    sub_key = Some(key);
                }
                TokenKind::Ident { name, sub_key }
            }
            other => {
                return Err(CoreError::parse(
                    input,
                    offset,
                    format!("unexpected character '{other}'"),
                ));
            }
        };
        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}
