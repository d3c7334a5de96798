//! Tokenizer for rule expressions.

use super::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Integer(i64),
    Decimal(f64),
    Str(String),
    /// Bare or backtick-quoted identifier. Keywords are identified by the parser.
    Ident { name: String, quoted: bool },
    LParen,
    RParen,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Integer(i) => i.to_string(),
            Token::Decimal(d) => d.to_string(),
            Token::Str(s) => format!("'{}'", s),
            Token::Ident { name, .. } => name.clone(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Dot => "'.'".to_string(),
            Token::Plus => "'+'".to_string(),
            Token::Minus => "'-'".to_string(),
            Token::Star => "'*'".to_string(),
            Token::Slash => "'/'".to_string(),
            Token::Percent => "'%'".to_string(),
            Token::EqEq => "'=='".to_string(),
            Token::NotEq => "'!='".to_string(),
            Token::Lt => "'<'".to_string(),
            Token::Le => "'<='".to_string(),
            Token::Gt => "'>'".to_string(),
            Token::Ge => "'>='".to_string(),
            Token::AndAnd => "'&&'".to_string(),
            Token::OrOr => "'||'".to_string(),
            Token::Bang => "'!'".to_string(),
        }
    }
}

/// A token and the character offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let mut is_decimal = false;
            if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                is_decimal = true;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let token = if is_decimal {
                Token::Decimal(text.parse().map_err(|_| ExpressionError::InvalidNumber {
                    text: text.clone(),
                    pos: start,
                })?)
            } else {
                Token::Integer(text.parse().map_err(|_| ExpressionError::InvalidNumber {
                    text: text.clone(),
                    pos: start,
                })?)
            };
            tokens.push(Spanned { token, pos: start });
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            tokens.push(Spanned {
                token: Token::Ident {
                    name,
                    quoted: false,
                },
                pos: start,
            });
            continue;
        }

        if c == '`' {
            i += 1;
            let name_start = i;
            while i < chars.len() && chars[i] != '`' {
                i += 1;
            }
            if i >= chars.len() {
                return Err(ExpressionError::UnterminatedIdentifier(start));
            }
            let name: String = chars[name_start..i].iter().collect();
            i += 1;
            tokens.push(Spanned {
                token: Token::Ident { name, quoted: true },
                pos: start,
            });
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            i += 1;
            let mut text = String::new();
            let mut closed = false;
            while i < chars.len() {
                let ch = chars[i];
                if ch == '\\' && i + 1 < chars.len() {
                    let escaped = chars[i + 1];
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    i += 2;
                    continue;
                }
                if ch == quote {
                    closed = true;
                    i += 1;
                    break;
                }
                text.push(ch);
                i += 1;
            }
            if !closed {
                return Err(ExpressionError::UnterminatedString(start));
            }
            tokens.push(Spanned {
                token: Token::Str(text),
                pos: start,
            });
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            ('=', Some('=')) => (Token::EqEq, 2),
            ('=', _) => (Token::EqEq, 1),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('>')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            ('!', _) => (Token::Bang, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            ('.', _) => (Token::Dot, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            _ => return Err(ExpressionError::UnexpectedChar { ch: c, pos: start }),
        };
        tokens.push(Spanned { token, pos: start });
        i += width;
    }

    Ok(tokens)
}
