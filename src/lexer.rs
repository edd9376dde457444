//! Lexer for the source language.
//!
//! Produces a flat token stream with 1-based row/column positions.  Newlines
//! are explicit tokens (the language is line oriented); `;` and `:` both lex
//! as the statement separator.  Identifiers matching the keyword table become
//! keywords.  `*` and `/` are reserved and rejected here, with a position.

use thiserror::Error;

use crate::ast::BinOp;
use crate::bytecode::Word;

/// A source-language failure: lexing, parsing, or code generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {row}, column {col}: {message}")]
pub struct SourceError {
    pub row: usize,
    pub col: usize,
    pub message: String,
}

impl SourceError {
    pub fn new(pos: Pos, message: impl Into<String>) -> SourceError {
        SourceError {
            row: pos.row,
            col: pos.col,
            message: message.into(),
        }
    }
}

/// 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub row: usize,
    pub col: usize,
}

/// Keywords of the source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    While,
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Ident(String),
    Number(Word),
    Op(BinOp),
    /// `=`
    Assign,
    LParen,
    RParen,
    Comma,
    /// `;` or `:`
    Separator,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Pos,
}

/// Tokenize `source`.  The returned stream always ends with an `Eof` token.
pub fn lex(source: &str) -> Result<Vec<Token>, SourceError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut at = 0usize;
    let mut row = 1usize;
    let mut col = 1usize;

    while at < chars.len() {
        let pos = Pos { row, col };
        let c = chars[at];

        if c == '\n' {
            tokens.push(Token {
                kind: TokenKind::Newline,
                pos,
            });
            at += 1;
            row += 1;
            col = 1;
            continue;
        }
        if c.is_whitespace() {
            at += 1;
            col += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = at;
            while at < chars.len() && chars[at].is_ascii_digit() {
                at += 1;
            }
            let text: String = chars[start..at].iter().collect();
            let value: Word = text
                .parse()
                .map_err(|_| SourceError::new(pos, format!("number '{text}' out of range")))?;
            col += at - start;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                pos,
            });
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = at;
            while at < chars.len() && (chars[at].is_ascii_alphanumeric() || chars[at] == '_') {
                at += 1;
            }
            let text: String = chars[start..at].iter().collect();
            col += at - start;
            let kind = match text.as_str() {
                "if" => TokenKind::Keyword(Keyword::If),
                "while" => TokenKind::Keyword(Keyword::While),
                "end" => TokenKind::Keyword(Keyword::End),
                _ => TokenKind::Ident(text),
            };
            tokens.push(Token { kind, pos });
            continue;
        }

        // Operators and punctuation; longest spelling first.
        let rest = &chars[at..];
        let (kind, width) = match c {
            '*' | '/' => {
                return Err(SourceError::new(
                    pos,
                    format!("operator '{c}' is reserved"),
                ))
            }
            '<' if starts(rest, "<<") => (TokenKind::Op(BinOp::Shl), 2),
            '>' if starts(rest, ">>>") => (TokenKind::Op(BinOp::Shru), 3),
            '>' if starts(rest, ">>") => (TokenKind::Op(BinOp::Shr), 2),
            '<' if starts(rest, "<=") => (TokenKind::Op(BinOp::Le), 2),
            '>' if starts(rest, ">=") => (TokenKind::Op(BinOp::Ge), 2),
            '=' if starts(rest, "==") => (TokenKind::Op(BinOp::Eq), 2),
            '!' if starts(rest, "!=") => (TokenKind::Op(BinOp::Ne), 2),
            '<' => (TokenKind::Op(BinOp::Lt), 1),
            '>' => (TokenKind::Op(BinOp::Gt), 1),
            '+' => (TokenKind::Op(BinOp::Add), 1),
            '-' => (TokenKind::Op(BinOp::Sub), 1),
            '&' => (TokenKind::Op(BinOp::And), 1),
            '^' => (TokenKind::Op(BinOp::Xor), 1),
            '|' => (TokenKind::Op(BinOp::Or), 1),
            '=' => (TokenKind::Assign, 1),
            '(' => (TokenKind::LParen, 1),
            ')' => (TokenKind::RParen, 1),
            ',' => (TokenKind::Comma, 1),
            ';' | ':' => (TokenKind::Separator, 1),
            other => {
                return Err(SourceError::new(
                    pos,
                    format!("unexpected character '{other}'"),
                ))
            }
        };
        tokens.push(Token { kind, pos });
        at += width;
        col += width;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        pos: Pos { row, col },
    });
    Ok(tokens)
}

fn starts(rest: &[char], pattern: &str) -> bool {
    rest.len() >= pattern.len() && rest.iter().zip(pattern.chars()).all(|(a, b)| *a == b)
}
