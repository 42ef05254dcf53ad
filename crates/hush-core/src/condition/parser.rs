//! Recursive-descent parser for the condition language.
//!
//! ```text
//! or_expr   := and_expr ("or" and_expr)*
//! and_expr  := unary ("and" unary)*
//! unary     := ("!" | "not") unary | primary
//! primary   := "(" or_expr ")" | "has" field | field op string
//! op        := "=" | "==" | "!=" | "=~" | "!~"
//! ```

use super::Condition;
use super::lexer::{CompareOp, Token, TokenKind, tokenize};
use crate::error::{CoreError, Result};
use crate::field::FieldRef;

/// Maximum nesting of parentheses and negations.
const MAX_DEPTH: usize = 64;

pub(crate) fn parse(input: &str) -> Result<Condition> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
        depth: 0,
    };
    let condition = parser.or_expr()?;
    if let Some(token) = parser.peek() {
        return Err(CoreError::parse(
            input,
            token.offset,
            format!("unexpected {} after expression", token.kind.describe()),
        ));
    }
    Ok(condition)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn end_offset(&self) -> usize {
        self.input.len()
    }

    fn error(&self, offset: usize, reason: impl Into<String>) -> CoreError {
        CoreError::parse(self.input, offset, reason)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.kind.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Condition> {
        let mut children = vec![self.and_expr()?];
        while self.eat_keyword("or") {
            children.push(self.and_expr()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Condition::Or(children)
        })
    }

    fn and_expr(&mut self) -> Result<Condition> {
        let mut children = vec![self.unary()?];
        while self.eat_keyword("and") {
            children.push(self.unary()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Condition::And(children)
        })
    }

    fn unary(&mut self) -> Result<Condition> {
        let negated = match self.peek() {
            Some(t) if t.kind == TokenKind::Bang || t.kind.is_keyword("not") => Some(t.offset),
            _ => None,
        };
        if let Some(offset) = negated {
            self.pos += 1;
            self.enter(offset)?;
            let inner = self.unary();
            self.depth -= 1;
            return Ok(Condition::Not(Box::new(inner?)));
        }
        self.primary()
    }

    fn enter(&mut self, offset: usize) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(offset, "expression nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn primary(&mut self) -> Result<Condition> {
        let Some(token) = self.next() else {
            return Err(self.error(self.end_offset(), "expected an expression"));
        };

        match token.kind {
            TokenKind::LParen => {
                self.enter(token.offset)?;
                let inner = self.or_expr();
                self.depth -= 1;
                let inner = inner?;
                match self.next() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => Ok(inner),
                    Some(other) => Err(self.error(
                        other.offset,
                        format!("expected ')', found {}", other.kind.describe()),
                    )),
                    None => Err(self.error(self.end_offset(), "expected ')'")),
                }
            }
            TokenKind::Ident {
                ref name,
                sub_key: None,
            } if name == "has" => {
                let field = self.field()?;
                Ok(Condition::Has { field })
            }
            TokenKind::Ident { name, sub_key } => {
                let field = self.validated(FieldRef { name, sub_key }, token.offset)?;
                self.comparison(field)
            }
            other => Err(self.error(
                token.offset,
                format!("expected a field, 'has', '!' or '(', found {}", other.describe()),
            )),
        }
    }

    fn field(&mut self) -> Result<FieldRef> {
        match self.next() {
            Some(Token {
                kind: TokenKind::Ident { name, sub_key },
                offset,
            }) => self.validated(FieldRef { name, sub_key }, offset),
            Some(other) => Err(self.error(
                other.offset,
                format!("expected a field, found {}", other.kind.describe()),
            )),
            None => Err(self.error(self.end_offset(), "expected a field")),
        }
    }

    fn validated(&self, field: FieldRef, offset: usize) -> Result<FieldRef> {
        field.validate().map_err(|e| match e {
            CoreError::InvalidField { reason, .. } => {
                self.error(offset, format!("field '{field}': {reason}"))
            }
            other => other,
        })?;
        Ok(field)
    }

    fn comparison(&mut self, field: FieldRef) -> Result<Condition> {
        let op = match self.next() {
            Some(Token {
                kind: TokenKind::Compare(op),
                ..
            }) => op,
            Some(other) => {
                return Err(self.error(
                    other.offset,
                    format!(
                        "expected a comparison operator after '{field}', found {}",
                        other.kind.describe()
                    ),
                ));
            }
            None => {
                return Err(self.error(
                    self.end_offset(),
                    format!("expected a comparison operator after '{field}'"),
                ));
            }
        };

        let value = match self.next() {
            Some(Token {
                kind: TokenKind::Str(value),
                ..
            }) => value,
            Some(other) => {
                return Err(self.error(
                    other.offset,
                    format!("expected a quoted string, found {}", other.kind.describe()),
                ));
            }
            None => return Err(self.error(self.end_offset(), "expected a quoted string")),
        };

        match op {
            CompareOp::Equal => Ok(Condition::Equal { field, value }),
            CompareOp::NotEqual => Ok(Condition::NotEqual { field, value }),
            CompareOp::Match => Condition::matches(field, &value),
            CompareOp::NotMatch => Condition::not_matches(field, &value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn and_binds_tighter_than_or() {
        let cond = parse("has labels[a] or has labels[b] and has labels[c]").unwrap();
        let Condition::Or(children) = cond else {
            panic!("expected Or, got {cond:?}");
        };
        assert_eq!(children.len(), 2);
        assert!(matches!(children[0], Condition::Has { .. }));
        assert!(matches!(&children[1], Condition::And(inner) if inner.len() == 2));
    }

    #[test]
    fn chains_flatten() {
        let cond = parse("has body[a] and has body[b] and has body[c]").unwrap();
        assert!(matches!(&cond, Condition::And(inner) if inner.len() == 3));

        let cond = parse("has body[a] or has body[b] or has body[c] or has body[d]").unwrap();
        assert!(matches!(&cond, Condition::Or(inner) if inner.len() == 4));
    }

    #[test]
    fn negation_binds_tightest() {
        let cond = parse("!has labels[a] and not has labels[b]").unwrap();
        let Condition::And(children) = cond else {
            panic!("expected And");
        };
        assert!(children.iter().all(|c| matches!(c, Condition::Not(_))));
    }

    #[test]
    fn parentheses_override_precedence() {
        let cond = parse("(has labels[a] or has labels[b]) and has labels[c]").unwrap();
        let Condition::And(children) = cond else {
            panic!("expected And");
        };
        assert!(matches!(&children[0], Condition::Or(inner) if inner.len() == 2));
    }

    #[test_case("labels[x] = 'a'"; "single equals")]
    #[test_case("labels[x] == 'a'"; "double equals")]
    #[test_case("labels[x] != 'a'"; "not equal")]
    #[test_case("labels[x] =~ 'a.*'"; "match")]
    #[test_case("labels[x] !~ 'a.*'"; "not match")]
    #[test_case("has labels[x]"; "has")]
    #[test_case("!(has labels[x])"; "bang")]
    #[test_case("not has labels[x]"; "not keyword")]
    #[test_case("severity_number == \"17\""; "double quoted scalar")]
    fn accepts(input: &str) {
        assert!(parse(input).is_ok(), "{input}");
    }

    #[test]
    fn not_equal_maps_to_not_equal() {
        assert!(matches!(
            parse("labels[x] != 'a'").unwrap(),
            Condition::NotEqual { .. }
        ));
    }

    #[test_case("", 0, "expected an expression"; "empty")]
    #[test_case("labels[x] ==", 12, "expected a quoted string"; "missing value")]
    #[test_case("labels[x] 'a'", 10, "expected a comparison operator"; "missing operator")]
    #[test_case("labels[x] == 'a' extra", 17, "unexpected"; "trailing tokens")]
    #[test_case("(has labels[x]", 14, "expected ')'"; "unclosed paren")]
    #[test_case("has labels[x] and", 17, "expected an expression"; "dangling and")]
    #[test_case("bogus == 'a'", 0, "unknown field"; "unknown field")]
    #[test_case("labels == 'a'", 0, "sub-key is required"; "missing sub-key")]
    #[test_case("has severity_text[x]", 4, "sub-key is not allowed"; "forbidden sub-key")]
    #[test_case("has 'x'", 4, "expected a field"; "has without field")]
    fn rejects_with_offset(input: &str, offset: usize, reason: &str) {
        match parse(input) {
            Err(CoreError::Parse {
                offset: got,
                reason: message,
                ..
            }) => {
                assert_eq!(got, offset, "{message}");
                assert!(message.contains(reason), "{message}");
            }
            other => panic!("expected parse error for {input:?}, got {other:?}"),
        }
    }

    #[test]
    fn invalid_regex_fails() {
        assert!(matches!(
            parse("body[msg] =~ '(unclosed'"),
            Err(CoreError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let input = format!("{}has labels[a]{}", "(".repeat(100), ")".repeat(100));
        assert!(parse(&input).is_err());
        let input = format!("{}has labels[a]", "!".repeat(100));
        assert!(parse(&input).is_err());
    }
}
