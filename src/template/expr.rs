use serde_json::Value;

use super::TemplateError;

/// A literal in an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Str(s) => Value::String(s.clone()),
            Literal::Int(i) => Value::from(*i),
            Literal::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
        }
    }
}

/// One step of attribute or index access on a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    Field(String),
    Index(usize),
}

/// A dotted/indexed reference rooted at an identifier, e.g.
/// `steps.load.items[0].title`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub root: String,
    pub accessors: Vec<Accessor>,
}

impl PathExpr {
    /// Dotted display form, for error messages.
    pub fn display(&self) -> String {
        let mut out = self.root.clone();
        for accessor in &self.accessors {
            match accessor {
                Accessor::Field(f) => {
                    out.push('.');
                    out.push_str(f);
                }
                Accessor::Index(i) => {
                    out.push_str(&format!("[{i}]"));
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Literal),
    Path(PathExpr),
}

/// Whitelisted pipe filters.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Length,
    Default(Literal),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub operand: Operand,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
}

/// A parsed template expression: a pipeline, optionally compared against a
/// second pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub left: Pipeline,
    pub cmp: Option<(CmpOp, Pipeline)>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Pipe,
    Op(CmpOp),
}

fn tokenize(input: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Eq));
                    i += 2;
                } else {
                    return Err(TemplateError::syntax(input, "single '=' is not an operator"));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                } else {
                    return Err(TemplateError::syntax(input, "unexpected '!'"));
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                    i += 1;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != quote {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(TemplateError::syntax(input, "unterminated string literal"));
                }
                tokens.push(Token::Str(chars[start..j].iter().collect()));
                i = j + 1;
            }
            '-' | '0'..='9' => {
                let start = i;
                if c == '-' {
                    i += 1;
                }
                let mut is_float = false;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    if chars[i] == '.' {
                        // A dot not followed by a digit is an accessor, not a
                        // decimal point.
                        if !chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                            break;
                        }
                        is_float = true;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text == "-" {
                    return Err(TemplateError::syntax(input, "dangling '-'"));
                }
                if is_float {
                    let parsed = text
                        .parse::<f64>()
                        .map_err(|e| TemplateError::syntax(input, e.to_string()))?;
                    tokens.push(Token::Float(parsed));
                } else {
                    let parsed = text
                        .parse::<i64>()
                        .map_err(|e| TemplateError::syntax(input, e.to_string()))?;
                    tokens.push(Token::Int(parsed));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                if ident == "in" {
                    tokens.push(Token::Op(CmpOp::In));
                } else {
                    tokens.push(Token::Ident(ident));
                }
            }
            other => {
                return Err(TemplateError::syntax(input, format!("unexpected character '{other}'")));
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
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

    fn err(&self, reason: impl Into<String>) -> TemplateError {
        TemplateError::syntax(self.source, reason)
    }

    fn parse_expression(&mut self) -> Result<Expr, TemplateError> {
        let left = self.parse_pipeline()?;

        let cmp = if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_pipeline()?;
            Some((op, right))
        } else {
            None
        };

        if self.peek().is_some() {
            return Err(self.err("trailing tokens after expression"));
        }

        Ok(Expr { left, cmp })
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline, TemplateError> {
        let operand = self.parse_operand()?;
        let mut filters = Vec::new();

        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            filters.push(self.parse_filter()?);
        }

        Ok(Pipeline { operand, filters })
    }

    fn parse_filter(&mut self) -> Result<Filter, TemplateError> {
        match self.next() {
            Some(Token::Ident(name)) => match name.as_str() {
                "length" => Ok(Filter::Length),
                "default" => {
                    if self.next() != Some(Token::LParen) {
                        return Err(self.err("'default' filter requires an argument"));
                    }
                    let literal = self.parse_literal()?;
                    if self.next() != Some(Token::RParen) {
                        return Err(self.err("unclosed 'default' argument"));
                    }
                    Ok(Filter::Default(literal))
                }
                other => Err(self.err(format!("unknown filter '{other}'"))),
            },
            _ => Err(self.err("expected a filter name after '|'")),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, TemplateError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Literal::Str(s)),
            Some(Token::Int(i)) => Ok(Literal::Int(i)),
            Some(Token::Float(f)) => Ok(Literal::Float(f)),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" | "True" => Ok(Literal::Bool(true)),
                "false" | "False" => Ok(Literal::Bool(false)),
                "null" | "none" | "None" => Ok(Literal::Null),
                other => Err(self.err(format!("expected a literal, found '{other}'"))),
            },
            _ => Err(self.err("expected a literal")),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, TemplateError> {
        match self.peek() {
            Some(Token::Str(_)) | Some(Token::Int(_)) | Some(Token::Float(_)) => {
                Ok(Operand::Literal(self.parse_literal()?))
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "true" | "True" | "false" | "False" | "null" | "none" | "None" => {
                    Ok(Operand::Literal(self.parse_literal()?))
                }
                _ => Ok(Operand::Path(self.parse_path()?)),
            },
            _ => Err(self.err("expression must begin with an identifier or literal")),
        }
    }

    fn parse_path(&mut self) -> Result<PathExpr, TemplateError> {
        let root = match self.next() {
            Some(Token::Ident(root)) => root,
            _ => return Err(self.err("expected an identifier")),
        };

        let mut accessors = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(field)) => accessors.push(Accessor::Field(field)),
                        _ => return Err(self.err("expected a field name after '.'")),
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = match self.next() {
                        Some(Token::Int(i)) if i >= 0 => i as usize,
                        _ => return Err(self.err("expected a non-negative index inside '[]'")),
                    };
                    if self.next() != Some(Token::RBracket) {
                        return Err(self.err("unclosed '['"));
                    }
                    accessors.push(Accessor::Index(index));
                }
                _ => break,
            }
        }

        Ok(PathExpr { root, accessors })
    }
}

/// Parse the inside of a `{{ ... }}` marker.
pub fn parse_expression(source: &str) -> Result<Expr, TemplateError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(TemplateError::syntax(source, "empty expression"));
    }
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
    };
    parser.parse_expression()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(root: &str, accessors: Vec<Accessor>) -> Pipeline {
        Pipeline {
            operand: Operand::Path(PathExpr {
                root: root.into(),
                accessors,
            }),
            filters: vec![],
        }
    }

    #[test]
    fn test_parse_bare_path() {
        let expr = parse_expression("steps.load.items").unwrap();
        assert_eq!(
            expr.left,
            path(
                "steps",
                vec![
                    Accessor::Field("load".into()),
                    Accessor::Field("items".into())
                ]
            )
        );
        assert!(expr.cmp.is_none());
    }

    #[test]
    fn test_parse_index_access() {
        let expr = parse_expression("steps.load[0].title").unwrap();
        assert_eq!(
            expr.left,
            path(
                "steps",
                vec![
                    Accessor::Field("load".into()),
                    Accessor::Index(0),
                    Accessor::Field("title".into())
                ]
            )
        );
    }

    #[test]
    fn test_parse_length_comparison() {
        let expr = parse_expression("steps.load | length > 0").unwrap();
        assert_eq!(expr.left.filters, vec![Filter::Length]);
        let (op, right) = expr.cmp.unwrap();
        assert_eq!(op, CmpOp::Gt);
        assert_eq!(right.operand, Operand::Literal(Literal::Int(0)));
    }

    #[test]
    fn test_parse_default_filter() {
        let expr = parse_expression("params.mode | default('strict')").unwrap();
        assert_eq!(
            expr.left.filters,
            vec![Filter::Default(Literal::Str("strict".into()))]
        );
    }

    #[test]
    fn test_parse_equality_with_string() {
        let expr = parse_expression("params.kind == \"report\"").unwrap();
        let (op, right) = expr.cmp.unwrap();
        assert_eq!(op, CmpOp::Eq);
        assert_eq!(right.operand, Operand::Literal(Literal::Str("report".into())));
    }

    #[test]
    fn test_parse_membership() {
        let expr = parse_expression("'draft' in steps.load.tags").unwrap();
        let (op, _) = expr.cmp.unwrap();
        assert_eq!(op, CmpOp::In);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_expression("").is_err());
        assert!(parse_expression("1 +").is_err());
        assert!(parse_expression("steps.").is_err());
        assert!(parse_expression("a | unknown_filter").is_err());
        assert!(parse_expression("a = b").is_err());
        assert!(parse_expression("a == b == c").is_err());
        assert!(parse_expression("'unterminated").is_err());
    }

    #[test]
    fn test_parse_numeric_literals() {
        let expr = parse_expression("params.score >= -1.5").unwrap();
        let (op, right) = expr.cmp.unwrap();
        assert_eq!(op, CmpOp::Ge);
        assert_eq!(right.operand, Operand::Literal(Literal::Float(-1.5)));
    }

    #[test]
    fn test_path_display() {
        let expr = parse_expression("steps.load.items[2].id").unwrap();
        match expr.left.operand {
            Operand::Path(p) => assert_eq!(p.display(), "steps.load.items[2].id"),
            _ => panic!("expected path"),
        }
    }
}
