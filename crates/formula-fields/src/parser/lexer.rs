//! Formula tokenizer.

use crate::ast::Span;
use crate::{FormulaError, SecurityLimits};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    String(String),
    Boolean(bool),
    Ident(String),
    /// Identifier whose next non-whitespace character is `(`.
    Function(String),
    At,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Not,
    Eof,
}

impl TokenKind {
    /// Text of a keyword-like token that may also be used as a path segment name.
    pub(crate) fn segment_name(&self) -> Option<&str> {
        match self {
            TokenKind::Ident(name) | TokenKind::Function(name) => Some(name),
            TokenKind::Boolean(true) => Some("true"),
            TokenKind::Boolean(false) => Some("false"),
            TokenKind::And => Some("and"),
            TokenKind::Or => Some("or"),
            TokenKind::Not => Some("not"),
            _ => None,
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number `{n}`"),
            TokenKind::String(_) => "string literal".to_string(),
            TokenKind::Boolean(b) => format!("`{b}`"),
            TokenKind::Ident(name) => format!("`{name}`"),
            TokenKind::Function(name) => format!("function `{name}`"),
            TokenKind::At => "`@`".to_string(),
            TokenKind::Dot => "`.`".to_string(),
            TokenKind::Comma => "`,`".to_string(),
            TokenKind::LParen => "`(`".to_string(),
            TokenKind::RParen => "`)`".to_string(),
            TokenKind::LBracket => "`[`".to_string(),
            TokenKind::RBracket => "`]`".to_string(),
            TokenKind::Plus => "`+`".to_string(),
            TokenKind::Minus => "`-`".to_string(),
            TokenKind::Star => "`*`".to_string(),
            TokenKind::Slash => "`/`".to_string(),
            TokenKind::Percent => "`%`".to_string(),
            TokenKind::Caret => "`^`".to_string(),
            TokenKind::Eq => "`==`".to_string(),
            TokenKind::Ne => "`!=`".to_string(),
            TokenKind::Lt => "`<`".to_string(),
            TokenKind::Gt => "`>`".to_string(),
            TokenKind::Le => "`<=`".to_string(),
            TokenKind::Ge => "`>=`".to_string(),
            TokenKind::And => "`and`".to_string(),
            TokenKind::Or => "`or`".to_string(),
            TokenKind::Not => "`not`".to_string(),
            TokenKind::Eof => "end of formula".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Tokenize `formula`. The stream always ends with [`TokenKind::Eof`].
///
/// The length limit is checked before any character is scanned.
pub fn lex(formula: &str, limits: &SecurityLimits) -> Result<Vec<Token>, FormulaError> {
    check_length(formula, limits)?;
    let tokens = Lexer::new(formula).lex()?;
    log::trace!("lexed {} tokens from {} bytes", tokens.len(), formula.len());
    Ok(tokens)
}

pub(crate) fn check_length(formula: &str, limits: &SecurityLimits) -> Result<(), FormulaError> {
    // A char is at least one byte, so short byte lengths never need a full count.
    if formula.len() <= limits.max_formula_length {
        return Ok(());
    }
    let char_len = formula.chars().count();
    if char_len > limits.max_formula_length {
        return Err(FormulaError::CharacterLimitExceeded {
            limit: limits.max_formula_length,
            actual: char_len,
        });
    }
    Ok(())
}

struct Lexer<'a> {
    src: &'a str,
    chars: std::str::Chars<'a>,
    idx: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.chars(),
            idx: 0,
            tokens: Vec::new(),
        }
    }

    fn lex(mut self) -> Result<Vec<Token>, FormulaError> {
        while let Some(ch) = self.peek_char() {
            let start = self.idx;
            match ch {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '"' | '\'' => {
                    let value = self.lex_string(ch)?;
                    self.push(TokenKind::String(value), start);
                }
                c if c.is_ascii_digit() => {
                    let value = self.lex_number()?;
                    self.push(TokenKind::Number(value), start);
                }
                c if is_ident_start_char(c) => {
                    let ident = self.take_while(is_ident_cont_char);
                    let kind = match ident.as_str() {
                        "true" => TokenKind::Boolean(true),
                        "false" => TokenKind::Boolean(false),
                        "and" => TokenKind::And,
                        "or" => TokenKind::Or,
                        "not" => TokenKind::Not,
                        _ if self.next_non_whitespace() == Some('(') => TokenKind::Function(ident),
                        _ => TokenKind::Ident(ident),
                    };
                    self.push(kind, start);
                }
                _ => {
                    self.bump();
                    let kind = match ch {
                        '@' => TokenKind::At,
                        '.' => TokenKind::Dot,
                        ',' => TokenKind::Comma,
                        '(' => TokenKind::LParen,
                        ')' => TokenKind::RParen,
                        '[' => TokenKind::LBracket,
                        ']' => TokenKind::RBracket,
                        '+' => TokenKind::Plus,
                        '-' => TokenKind::Minus,
                        '*' => TokenKind::Star,
                        '/' => TokenKind::Slash,
                        '%' => TokenKind::Percent,
                        '^' => TokenKind::Caret,
                        '=' => {
                            if !self.eat('=') {
                                return Err(FormulaError::syntax(
                                    "unexpected `=`; use `==` to compare values",
                                    Span::new(start, self.idx),
                                ));
                            }
                            TokenKind::Eq
                        }
                        '!' => {
                            if self.eat('=') {
                                TokenKind::Ne
                            } else {
                                TokenKind::Not
                            }
                        }
                        '<' => {
                            if self.eat('=') {
                                TokenKind::Le
                            } else {
                                TokenKind::Lt
                            }
                        }
                        '>' => {
                            if self.eat('=') {
                                TokenKind::Ge
                            } else {
                                TokenKind::Gt
                            }
                        }
                        '&' if self.eat('&') => TokenKind::And,
                        '|' if self.eat('|') => TokenKind::Or,
                        other => {
                            return Err(FormulaError::syntax(
                                format!("unexpected character `{other}`"),
                                Span::new(start, self.idx),
                            ));
                        }
                    };
                    self.push(kind, start);
                }
            }
        }

        let end = self.src.len();
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::new(end, end),
        });
        Ok(self.tokens)
    }

    fn lex_string(&mut self, quote: char) -> Result<String, FormulaError> {
        let start = self.idx;
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(value),
                Some('\\') if self.peek_char() == Some(quote) => {
                    self.bump();
                    value.push(quote);
                }
                Some(c) => value.push(c),
                None => {
                    return Err(FormulaError::syntax(
                        "unterminated string literal",
                        Span::new(start, self.idx),
                    ));
                }
            }
        }
    }

    fn lex_number(&mut self) -> Result<f64, FormulaError> {
        let start = self.idx;
        let mut raw = self.take_while(|c| c.is_ascii_digit());
        if self.peek_char() == Some('.') && self.peek_next_is_digit() {
            self.bump();
            raw.push('.');
            self.take_while_into(|c| c.is_ascii_digit(), &mut raw);
        }
        match raw.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(n),
            _ => Err(FormulaError::syntax(
                format!("number `{raw}` is out of range"),
                Span::new(start, self.idx),
            )),
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            span: Span::new(start, self.idx),
        });
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        self.idx += ch.len_utf8();
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.clone().next()
    }

    fn peek_next_is_digit(&self) -> bool {
        let mut iter = self.chars.clone();
        iter.next();
        matches!(iter.next(), Some(c) if c.is_ascii_digit())
    }

    fn next_non_whitespace(&self) -> Option<char> {
        self.chars.clone().find(|c| !c.is_whitespace())
    }

    fn take_while<F>(&mut self, pred: F) -> String
    where
        F: FnMut(char) -> bool,
    {
        let mut out = String::new();
        self.take_while_into(pred, &mut out);
        out
    }

    fn take_while_into<F>(&mut self, mut pred: F, out: &mut String)
    where
        F: FnMut(char) -> bool,
    {
        while let Some(ch) = self.peek_char() {
            if !pred(ch) {
                break;
            }
            self.bump();
            out.push(ch);
        }
    }
}

fn is_ident_start_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_cont_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src, &SecurityLimits::standard())
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_paths_operators_and_calls() {
        assert_eq!(
            kinds("floor(@a.b[2] >= 1.5)"),
            vec![
                TokenKind::Function("floor".into()),
                TokenKind::LParen,
                TokenKind::At,
                TokenKind::Ident("a".into()),
                TokenKind::Dot,
                TokenKind::Ident("b".into()),
                TokenKind::LBracket,
                TokenKind::Number(2.0),
                TokenKind::RBracket,
                TokenKind::Ge,
                TokenKind::Number(1.5),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn function_token_allows_whitespace_before_paren() {
        assert_eq!(kinds("max (1)")[0], TokenKind::Function("max".into()));
        assert_eq!(kinds("max")[0], TokenKind::Ident("max".into()));
    }

    #[test]
    fn keywords_and_symbolic_aliases() {
        assert_eq!(
            kinds("not true and false or !x && y || z"),
            vec![
                TokenKind::Not,
                TokenKind::Boolean(true),
                TokenKind::And,
                TokenKind::Boolean(false),
                TokenKind::Or,
                TokenKind::Not,
                TokenKind::Ident("x".into()),
                TokenKind::And,
                TokenKind::Ident("y".into()),
                TokenKind::Or,
                TokenKind::Ident("z".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_support_only_quote_escapes() {
        assert_eq!(kinds(r#""a\"b""#)[0], TokenKind::String("a\"b".into()));
        assert_eq!(kinds(r"'it\'s'")[0], TokenKind::String("it's".into()));
        assert_eq!(kinds(r#""a\nb""#)[0], TokenKind::String("a\\nb".into()));
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        let err = lex("'abc", &SecurityLimits::standard()).unwrap_err();
        assert!(matches!(err, FormulaError::Syntax { span, .. } if span == Span::new(0, 4)));
    }

    #[test]
    fn single_equals_suggests_double() {
        let err = lex("1 = 1", &SecurityLimits::standard()).unwrap_err();
        assert!(err.to_string().contains("use `==`"));
    }

    #[test]
    fn huge_integer_literal_is_rejected() {
        let src = "9".repeat(400);
        assert!(matches!(
            lex(&src, &SecurityLimits::standard()),
            Err(FormulaError::Syntax { .. })
        ));
    }

    #[test]
    fn trailing_dot_is_not_part_of_a_number() {
        assert_eq!(
            kinds("1."),
            vec![TokenKind::Number(1.0), TokenKind::Dot, TokenKind::Eof]
        );
    }

    #[test]
    fn length_limit_counts_chars_not_bytes() {
        let limits = SecurityLimits {
            max_formula_length: 3,
            ..SecurityLimits::standard()
        };
        assert!(lex("'éé'", &limits).is_err());
        assert!(lex("'é'", &limits).is_ok());
        assert_eq!(
            lex("1234", &limits),
            Err(FormulaError::CharacterLimitExceeded { limit: 3, actual: 4 })
        );
    }
}
