//! Recursive-descent parser producing the expression AST.

use super::lexer::{tokenize, Spanned, Token};
use super::{AggregateFn, BinaryOp, Expr, ExpressionError, Pattern, ScalarFn, UnaryOp, Value};
use regex::Regex;

pub(crate) fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }
    let mut parser = Parser { tokens, index: 0 };
    let expr = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(ExpressionError::UnexpectedToken {
            found: extra.token.describe(),
            expected: "end of expression".to_string(),
            pos: extra.pos,
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.index)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let item = self.tokens.get(self.index).cloned();
        if item.is_some() {
            self.index += 1;
        }
        item
    }

    /// True (and consumes) when the next token is the unquoted keyword `word`.
    fn eat_keyword(&mut self, word: &str) -> bool {
        if let Some(Token::Ident {
            name,
            quoted: false,
        }) = self.peek_token()
        {
            if name.eq_ignore_ascii_case(word) {
                self.index += 1;
                return true;
            }
        }
        false
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek_token() == Some(token) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<(), ExpressionError> {
        match self.advance() {
            Some(s) if s.token == token => Ok(()),
            Some(s) => Err(ExpressionError::UnexpectedToken {
                found: s.token.describe(),
                expected: expected.to_string(),
                pos: s.pos,
            }),
            None => Err(ExpressionError::UnexpectedEnd(expected.to_string())),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) || self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::AndAnd) || self.eat_keyword("and") {
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat(&Token::Bang) || self.eat_keyword("not") {
            let expr = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.parse_additive()?;

        if self.eat_keyword("is") {
            let negated = self.eat_keyword("not");
            if !self.eat_keyword("null") {
                return Err(self.unexpected("'null'"));
            }
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let op = match self.peek_token() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.index += 1;
        let right = self.parse_additive()?;
        Ok(binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.index += 1;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.index += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat(&Token::Minus) {
            let expr = self.parse_unary()?;
            return Ok(match expr {
                Expr::Literal(Value::Integer(i)) => Expr::Literal(Value::Integer(-i)),
                Expr::Literal(Value::Decimal(d)) => Expr::Literal(Value::Decimal(-d)),
                other => Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(other),
                },
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let Some(item) = self.advance() else {
            return Err(ExpressionError::UnexpectedEnd("a value".to_string()));
        };

        match item.token {
            Token::Integer(i) => Ok(Expr::Literal(Value::Integer(i))),
            Token::Decimal(d) => Ok(Expr::Literal(Value::Decimal(d))),
            Token::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident { name, quoted } => {
                if !quoted {
                    match name.to_ascii_lowercase().as_str() {
                        "true" => return Ok(Expr::Literal(Value::Bool(true))),
                        "false" => return Ok(Expr::Literal(Value::Bool(false))),
                        "null" => return Ok(Expr::Literal(Value::Null)),
                        _ => {}
                    }
                    if self.peek_token() == Some(&Token::LParen) {
                        self.index += 1;
                        return self.parse_call(&name);
                    }
                }
                let path = self.parse_path(name)?;
                Ok(Expr::Variable(path))
            }
            other => Err(ExpressionError::UnexpectedToken {
                found: other.describe(),
                expected: "a value".to_string(),
                pos: item.pos,
            }),
        }
    }

    /// `a.b.c` joined with dots.
    fn parse_path(&mut self, first: String) -> Result<String, ExpressionError> {
        let mut path = first;
        while self.eat(&Token::Dot) {
            match self.advance() {
                Some(Spanned {
                    token: Token::Ident { name, .. },
                    ..
                }) => {
                    path.push('.');
                    path.push_str(&name);
                }
                Some(s) => {
                    return Err(ExpressionError::UnexpectedToken {
                        found: s.token.describe(),
                        expected: "a name after '.'".to_string(),
                        pos: s.pos,
                    })
                }
                None => return Err(ExpressionError::UnexpectedEnd("a name after '.'".into())),
            }
        }
        Ok(path)
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr, ExpressionError> {
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(Token::RParen, "',' or ')'")?;
                break;
            }
        }

        let lower = name.to_ascii_lowercase();

        if let Some(func) = AggregateFn::from_name(&lower) {
            return build_aggregate(func, args);
        }

        if lower == "matches" {
            if args.len() != 2 {
                return Err(ExpressionError::Arity {
                    name: lower,
                    expected: "2",
                    got: args.len(),
                });
            }
            let mut args = args.into_iter();
            let subject = args.next().map(Box::new).ok_or(ExpressionError::Empty)?;
            let pattern = match args.next() {
                Some(Expr::Literal(Value::Text(p))) => Pattern::Compiled(Regex::new(&p).map_err(
                    |e| ExpressionError::InvalidRegex {
                        pattern: p.clone(),
                        message: e.to_string(),
                    },
                )?),
                Some(other) => Pattern::Dynamic(Box::new(other)),
                None => return Err(ExpressionError::Empty),
            };
            return Ok(Expr::Matches { subject, pattern });
        }

        let func = ScalarFn::from_name(&lower)
            .ok_or_else(|| ExpressionError::UnknownFunction(name.to_string()))?;
        let (min, max, expected) = func.arity();
        if args.len() < min || args.len() > max {
            return Err(ExpressionError::Arity {
                name: func.as_str().to_string(),
                expected,
                got: args.len(),
            });
        }
        Ok(Expr::Call { func, args })
    }

    fn unexpected(&self, expected: &str) -> ExpressionError {
        match self.peek() {
            Some(s) => ExpressionError::UnexpectedToken {
                found: s.token.describe(),
                expected: expected.to_string(),
                pos: s.pos,
            },
            None => ExpressionError::UnexpectedEnd(expected.to_string()),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn build_aggregate(func: AggregateFn, args: Vec<Expr>) -> Result<Expr, ExpressionError> {
    let allowed = if func == AggregateFn::Count { 0..=1 } else { 1..=1 };
    if !allowed.contains(&args.len()) {
        return Err(ExpressionError::Arity {
            name: func.as_str().to_string(),
            expected: if func == AggregateFn::Count { "0 or 1" } else { "1" },
            got: args.len(),
        });
    }
    let target = match args.into_iter().next() {
        None => None,
        Some(Expr::Variable(path)) => Some(path),
        Some(_) => return Err(ExpressionError::AggregateTarget(func.as_str().to_string())),
    };
    Ok(Expr::Aggregate { func, target })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        let expr = parse("a or b and c").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Or,
                right,
                ..
            } => assert!(matches!(
                *right,
                Expr::Binary {
                    op: BinaryOp::And,
                    ..
                }
            )),
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn test_dotted_variables() {
        assert!(matches!(
            parse("ventas.monto").unwrap(),
            Expr::Variable(ref p) if p == "ventas.monto"
        ));
    }

    #[test]
    fn test_is_not_null() {
        assert!(matches!(
            parse("x is not null").unwrap(),
            Expr::IsNull { negated: true, .. }
        ));
        assert!(matches!(
            parse("x is 3").unwrap_err(),
            ExpressionError::UnexpectedToken { .. }
        ));
    }

    #[test]
    fn test_literal_regex_is_compiled_up_front() {
        assert!(matches!(
            parse("matches(code, '^[A-Z]{3}$')").unwrap(),
            Expr::Matches {
                pattern: Pattern::Compiled(_),
                ..
            }
        ));
        assert!(matches!(
            parse("matches(code, '([')").unwrap_err(),
            ExpressionError::InvalidRegex { .. }
        ));
    }

    #[test]
    fn test_function_validation() {
        assert_eq!(
            parse("explode(x)").unwrap_err(),
            ExpressionError::UnknownFunction("explode".into())
        );
        assert!(matches!(
            parse("len(a, b)").unwrap_err(),
            ExpressionError::Arity { got: 2, .. }
        ));
        assert!(matches!(
            parse("sum(a + 1)").unwrap_err(),
            ExpressionError::AggregateTarget(_)
        ));
        assert!(matches!(
            parse("count()").unwrap(),
            Expr::Aggregate {
                func: AggregateFn::Count,
                target: None
            }
        ));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(matches!(
            parse("a > 1 b").unwrap_err(),
            ExpressionError::UnexpectedToken { pos: 6, .. }
        ));
        assert_eq!(parse("   ").unwrap_err(), ExpressionError::Empty);
        assert!(matches!(
            parse("(a > 1").unwrap_err(),
            ExpressionError::UnexpectedEnd(_)
        ));
    }
}
