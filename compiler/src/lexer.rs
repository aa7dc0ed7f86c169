// Lexer for .stg stage definition files.
//
// Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Stage language token types.
///
/// Identifiers carry no value; use the span to retrieve the text from the
/// source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("input")]
    Input,
    #[token("extern")]
    Extern,
    #[token("output")]
    Output,
    #[token("order")]
    Order,

    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    // ── Literals ──
    /// Non-negative integer literal. Negation is a unary operator.
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    // ── Identifier ──
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ── Structure ──
    /// One or more newlines (statement terminator).
    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Input => write!(f, "input"),
            Token::Extern => write!(f, "extern"),
            Token::Output => write!(f, "output"),
            Token::Order => write!(f, "order"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Int(v) => write!(f, "{v}"),
            Token::Ident => write!(f, "<ident>"),
            Token::Newline => write!(f, "<newline>"),
        }
    }
}

// ── Public API ──

/// Lex a stage source string into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: lex and assert no errors, return token list.
    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords() {
        let tokens = lex_ok("input extern output order");
        assert_eq!(
            tokens,
            vec![Token::Input, Token::Extern, Token::Output, Token::Order]
        );
    }

    #[test]
    fn keyword_vs_ident() {
        // `inputs` and `ordered` are identifiers
        let tokens = lex_ok("inputs ordered in");
        assert_eq!(tokens, vec![Token::Ident, Token::Ident, Token::Ident]);
    }

    #[test]
    fn definition_line() {
        let tokens = lex_ok("h(x, y) = g(x, y)[1] * 2");
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::LParen,
                Token::Ident,
                Token::Comma,
                Token::Ident,
                Token::RParen,
                Token::Equals,
                Token::Ident,
                Token::LParen,
                Token::Ident,
                Token::Comma,
                Token::Ident,
                Token::RParen,
                Token::LBracket,
                Token::Int(1),
                Token::RBracket,
                Token::Star,
                Token::Int(2),
            ]
        );
    }

    #[test]
    fn comments_and_newlines() {
        let tokens = lex_ok("f(x) = x # identity\n\n\ng(x) = -x\n");
        assert_eq!(tokens.iter().filter(|t| **t == Token::Newline).count(), 2);
        assert!(tokens.contains(&Token::Minus));
    }

    #[test]
    fn spans_are_byte_offsets() {
        let result = lex("tile(x)");
        assert_eq!(result.tokens[0].1, Span { start: 0, end: 4 });
        assert_eq!(result.tokens[2].1, Span { start: 5, end: 6 });
    }

    #[test]
    fn bad_character_is_reported_and_skipped() {
        let result = lex("f(x) = x @ 1");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 9, end: 10 });
        assert_eq!(result.tokens.last().map(|(t, _)| t.clone()), Some(Token::Int(1)));
    }

    #[test]
    fn overflowing_integer_is_an_error() {
        let result = lex("99999999999999999999");
        assert!(result.tokens.is_empty());
        assert_eq!(result.errors.len(), 1);
    }
}
