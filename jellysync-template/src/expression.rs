//! Parser for `$eval` expressions.
//!
//! The accepted language is deliberately small:
//!
//! ```text
//! expr    := literal | path
//! path    := ident ( "." ident | "[" int "]" | "[" string "]" )*
//! literal := number | string | "true" | "false" | "null"
//! ```
//!
//! Strings use single or double quotes. Negative indexes count from the end.

use serde_json::Value;

use crate::error::TemplateError;

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Path { root: String, segments: Vec<Segment> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(i64),
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut parser = Parser::new(source);
        parser.skip_whitespace();
        let expression = parser.expression()?;
        parser.skip_whitespace();
        if !parser.at_end() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expression)
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::Syntax {
            expression: self.source.to_owned(),
            offset: self.pos,
            message: message.into(),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), TemplateError> {
        self.skip_whitespace();
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => {
                self.pos -= 1;
                Err(self.error(format!("expected `{expected}`, found `{c}`")))
            }
            None => Err(self.error(format!("expected `{expected}`, found end of input"))),
        }
    }

    fn expression(&mut self) -> Result<Expression, TemplateError> {
        match self.peek() {
            Some('"') | Some('\'') => Ok(Expression::Literal(Value::String(self.string()?))),
            Some(c) if c == '-' || c.is_ascii_digit() => Ok(Expression::Literal(self.number()?)),
            Some(c) if is_ident_start(c) => {
                let ident = self.ident()?;
                match ident.as_str() {
                    "true" => Ok(Expression::Literal(Value::Bool(true))),
                    "false" => Ok(Expression::Literal(Value::Bool(false))),
                    "null" => Ok(Expression::Literal(Value::Null)),
                    _ => Ok(Expression::Path {
                        root: ident,
                        segments: self.segments()?,
                    }),
                }
            }
            Some(c) => Err(self.error(format!("unexpected `{c}`"))),
            None => Err(self.error("empty expression")),
        }
    }

    fn segments(&mut self) -> Result<Vec<Segment>, TemplateError> {
        let mut segments = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    self.skip_whitespace();
                    segments.push(Segment::Field(self.ident()?));
                }
                Some('[') => {
                    self.pos += 1;
                    self.skip_whitespace();
                    let segment = match self.peek() {
                        Some('"') | Some('\'') => Segment::Field(self.string()?),
                        _ => Segment::Index(self.integer()?),
                    };
                    self.expect(']')?;
                    segments.push(segment);
                }
                _ => return Ok(segments),
            }
        }
    }

    fn ident(&mut self) -> Result<String, TemplateError> {
        match self.peek() {
            Some(c) if is_ident_start(c) => {}
            _ => return Err(self.error("expected identifier")),
        }
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c == '_' || c.is_ascii_alphanumeric())
        {
            self.pos += 1;
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn integer(&mut self) -> Result<i64, TemplateError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse().map_err(|_| {
            self.pos = start;
            self.error("expected integer index")
        })
    }

    fn number(&mut self) -> Result<Value, TemplateError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        serde_json::from_str::<serde_json::Number>(&text)
            .map(Value::Number)
            .map_err(|_| {
                self.pos = start;
                self.error(format!("invalid number `{text}`"))
            })
    }

    fn string(&mut self) -> Result<String, TemplateError> {
        let Some(quote) = self.bump() else {
            return Err(self.error("expected string"));
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn path(root: &str, segments: Vec<Segment>) -> Expression {
        Expression::Path {
            root: root.into(),
            segments,
        }
    }

    #[rstest]
    #[case("contracts[0].id", path("contracts", vec![Segment::Index(0), Segment::Field("id".into())]))]
    #[case("cards[2][1].slug", path("cards", vec![Segment::Index(2), Segment::Index(1), Segment::Field("slug".into())]))]
    #[case("contracts[-1]", path("contracts", vec![Segment::Index(-1)]))]
    #[case("contracts[0][\"data\"].mirrors", path("contracts", vec![
        Segment::Index(0),
        Segment::Field("data".into()),
        Segment::Field("mirrors".into()),
    ]))]
    #[case("  contracts [ 3 ] . id ", path("contracts", vec![Segment::Index(3), Segment::Field("id".into())]))]
    #[case("contracts", path("contracts", vec![]))]
    fn parses_paths(#[case] source: &str, #[case] expected: Expression) {
        assert_eq!(Expression::parse(source).expect("parse"), expected);
    }

    #[rstest]
    #[case("42", json!(42))]
    #[case("-1.5", json!(-1.5))]
    #[case("'hello'", json!("hello"))]
    #[case("\"it\\\"s\"", json!("it\"s"))]
    #[case("true", json!(true))]
    #[case("null", json!(null))]
    fn parses_literals(#[case] source: &str, #[case] expected: serde_json::Value) {
        assert_eq!(
            Expression::parse(source).expect("parse"),
            Expression::Literal(expected)
        );
    }

    #[rstest]
    #[case("")]
    #[case("contracts[")]
    #[case("contracts[0")]
    #[case("contracts[x]")]
    #[case("contracts.")]
    #[case("contracts[0] + 1")]
    #[case("'unterminated")]
    #[case("@foo")]
    fn rejects_malformed(#[case] source: &str) {
        let err = Expression::parse(source).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }), "got: {err}");
    }
}
