// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Equation tokenizer.  Scans by `CharIndices` so tokens borrow from the
//! input; `{ ... }` comments are stripped here, quoted identifiers keep
//! their quotes (canonicalization strips them later).

use std::str::CharIndices;

use unicode_xid::UnicodeXID;

use self::Token::*;
use crate::common::ErrorCode::*;
use crate::common::{EquationError, ErrorCode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token<'input> {
    If,
    Then,
    Else,
    Eq,
    Neq,
    Not,
    Mod,
    Exp,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Plus,
    Minus,
    Mul,
    Div,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Nan,
    Ident(&'input str),
    Num(&'input str),
}

fn error<T>(code: ErrorCode, start: usize, end: usize) -> Result<T, EquationError> {
    Err(EquationError {
        start: start as u16,
        end: end as u16,
        code,
    })
}

pub type Spanned<T> = (usize, T, usize);

pub struct Lexer<'input> {
    text: &'input str,
    chars: CharIndices<'input>,
    lookahead: Option<(usize, char)>,
}

const KEYWORDS: &[(&str, Token<'static>)] = &[
    ("if", If),
    ("then", Then),
    ("else", Else),
    ("not", Not),
    ("mod", Mod),
    ("and", And),
    ("or", Or),
    ("nan", Nan),
];

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        let mut t = Lexer {
            text: input,
            chars: input.char_indices(),
            lookahead: None,
        };
        t.bump();
        t
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        self.lookahead = self.chars.next();
        self.lookahead
    }

    fn take_while<F>(&mut self, mut keep_going: F) -> Option<usize>
    where
        F: FnMut(char) -> bool,
    {
        self.take_until(|c| !keep_going(c))
    }

    fn take_until<F>(&mut self, mut terminate: F) -> Option<usize>
    where
        F: FnMut(char) -> bool,
    {
        loop {
            match self.lookahead {
                None => {
                    return None;
                }
                Some((idx1, c)) => {
                    if terminate(c) {
                        return Some(idx1);
                    } else {
                        self.bump();
                    }
                }
            }
        }
    }

    fn word(&mut self, idx0: usize) -> Spanned<&'input str> {
        match self.take_while(is_identifier_continue) {
            Some(end) => (idx0, &self.text[idx0..end], end),
            None => (idx0, &self.text[idx0..], self.text.len()),
        }
    }

    fn identifierish(&mut self, idx0: usize) -> Spanned<Token<'input>> {
        let (start, word, end) = self.word(idx0);
        let lower_word = word.to_lowercase();

        let tok = KEYWORDS
            .iter()
            .filter(|&&(w, _)| w == lower_word)
            .map(|(_, t)| *t)
            .next()
            .unwrap_or(Ident(word));

        (start, tok, end)
    }

    fn number(&mut self, idx0: usize) -> Spanned<Token<'input>> {
        // digits [ '.' digits ] [ ('e'|'E') ['+'|'-'] digits ]
        self.take_while(|c| c.is_ascii_digit());
        if let Some((_, '.')) = self.lookahead {
            self.bump();
            self.take_while(|c| c.is_ascii_digit());
        }
        if let Some((exp_idx, c)) = self.lookahead {
            if c == 'e' || c == 'E' {
                // only consume the exponent if it is well formed; "3e" is
                // the number 3 followed by the identifier e
                let rest = &self.text[exp_idx + 1..];
                let rest = rest.strip_prefix(['+', '-']).unwrap_or(rest);
                if rest.starts_with(|c: char| c.is_ascii_digit()) {
                    self.bump(); // e
                    if matches!(self.lookahead, Some((_, '+')) | Some((_, '-'))) {
                        self.bump();
                    }
                    self.take_while(|c| c.is_ascii_digit());
                }
            }
        }

        let end = match self.lookahead {
            Some((idx, _)) => idx,
            None => self.text.len(),
        };
        (idx0, Num(&self.text[idx0..end]), end)
    }

    fn quoted_identifier(&mut self, idx0: usize) -> Result<Spanned<Token<'input>>, EquationError> {
        // eat the opening '"'
        self.bump();

        match self.take_until(|c| c == '"') {
            Some(idx1) => {
                // eat the trailing '"'
                self.bump();
                Ok((idx0, Ident(&self.text[idx0..idx1 + 1]), idx1 + 1))
            }
            None => error(UnclosedQuotedIdent, idx0, self.text.len()),
        }
    }

    fn comment_end(&mut self) -> Result<(), EquationError> {
        let idx0 = match self.lookahead {
            Some((idx, _)) => idx,
            None => self.text.len(),
        };
        match self.take_until(|c| c == '}') {
            Some(_) => {
                self.bump(); // consume the '}'
                Ok(())
            }
            None => error(UnclosedComment, idx0, self.text.len()),
        }
    }

    #[allow(clippy::unnecessary_wraps)]
    fn consume(
        &mut self,
        i: usize,
        tok: Token<'input>,
        len: usize,
    ) -> Option<Result<Spanned<Token<'input>>, EquationError>> {
        self.bump();
        Some(Ok((i, tok, i + len)))
    }
}

impl<'input> Iterator for Lexer<'input> {
    type Item = Result<Spanned<Token<'input>>, EquationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            return match self.lookahead {
                Some((i, '/')) => self.consume(i, Div, 1),
                Some((i, '=')) => self.consume(i, Eq, 1),
                Some((i, '^')) => self.consume(i, Exp, 1),
                Some((i, '<')) => {
                    match self.bump() {
                        Some((_, '>')) => self.consume(i, Neq, 2),
                        Some((_, '=')) => self.consume(i, Lte, 2),
                        // we've already bumped, don't consume
                        _ => Some(Ok((i, Lt, i + 1))),
                    }
                }
                Some((i, '>')) => {
                    match self.bump() {
                        Some((_, '=')) => self.consume(i, Gte, 2),
                        // we've already bumped, don't consume
                        _ => Some(Ok((i, Gt, i + 1))),
                    }
                }
                Some((i, '!')) => {
                    match self.bump() {
                        Some((_, '=')) => self.consume(i, Neq, 2),
                        // unary logical not
                        _ => Some(Ok((i, Not, i + 1))),
                    }
                }
                Some((i, '&')) => match self.bump() {
                    Some((_, '&')) => self.consume(i, And, 2),
                    _ => Some(error(UnrecognizedToken, i, i + 2)),
                },
                Some((i, '|')) => match self.bump() {
                    Some((_, '|')) => self.consume(i, Or, 2),
                    _ => Some(error(UnrecognizedToken, i, i + 2)),
                },
                Some((i, '-')) => self.consume(i, Minus, 1),
                Some((i, '+')) => self.consume(i, Plus, 1),
                Some((i, '*')) => self.consume(i, Mul, 1),
                Some((i, '{')) => match self.comment_end() {
                    Ok(()) => self.next(),
                    Err(_) => Some(error(UnclosedComment, i, self.text.len())),
                },
                Some((i, '(')) => self.consume(i, LParen, 1),
                Some((i, ')')) => self.consume(i, RParen, 1),
                Some((i, '[')) => self.consume(i, LBracket, 1),
                Some((i, ']')) => self.consume(i, RBracket, 1),
                Some((i, ',')) => self.consume(i, Comma, 1),
                Some((i, '"')) => Some(self.quoted_identifier(i)),
                Some((i, c)) if is_identifier_start(c) => Some(Ok(self.identifierish(i))),
                Some((i, c)) if is_number_start(c) => Some(Ok(self.number(i))),
                Some((_, c)) if c.is_whitespace() => {
                    self.bump();
                    continue;
                }
                Some((i, _)) => {
                    self.bump(); // eat whatever is killing us
                    let end = match self.lookahead {
                        Some((end, _)) => end,
                        None => self.text.len(),
                    };
                    Some(error(UnrecognizedToken, i, end))
                }
                None => None,
            };
        }
    }
}

fn is_number_start(c: char) -> bool {
    c.is_ascii_digit() || c == '.'
}

fn is_identifier_start(c: char) -> bool {
    UnicodeXID::is_xid_start(c) || c == '_'
}

fn is_identifier_continue(c: char) -> bool {
    // '.' continues an identifier so dotted module paths lex as one token
    UnicodeXID::is_xid_continue(c) || c == '.'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .map(|t| t.unwrap())
            .map(|(_, tok, _)| tok)
            .collect()
    }

    #[test]
    fn test_lex_simple() {
        assert_eq!(
            vec![Ident("a"), Plus, Ident("b")],
            lex("a + b"),
        );
        assert_eq!(
            vec![Num("3.5"), Mul, Ident("rate")],
            lex("3.5*rate"),
        );
        assert_eq!(
            vec![If, Ident("a"), Then, Num("1"), Else, Num("0")],
            lex("IF a THEN 1 ELSE 0"),
        );
    }

    #[test]
    fn test_lex_operators() {
        assert_eq!(vec![Ident("a"), Neq, Ident("b")], lex("a <> b"));
        assert_eq!(vec![Ident("a"), Neq, Ident("b")], lex("a != b"));
        assert_eq!(vec![Ident("a"), Lte, Ident("b")], lex("a <= b"));
        assert_eq!(vec![Ident("a"), Gte, Ident("b")], lex("a >= b"));
        assert_eq!(vec![Ident("a"), And, Ident("b")], lex("a && b"));
        assert_eq!(vec![Ident("a"), Or, Ident("b")], lex("a || b"));
        assert_eq!(vec![Not, Ident("a")], lex("!a"));
        assert_eq!(vec![Ident("a"), Mod, Num("5")], lex("a mod 5"));
        assert_eq!(vec![Ident("a"), Exp, Num("2")], lex("a^2"));
    }

    #[test]
    fn test_lex_numbers() {
        assert_eq!(vec![Num("1e6"), Plus, Num("2.5e-3")], lex("1e6 + 2.5e-3"));
        assert_eq!(vec![Num(".5")], lex(".5"));
        // "3e" is a number followed by an identifier
        assert_eq!(vec![Num("3"), Ident("e")], lex("3e"));
    }

    #[test]
    fn test_lex_subscripts_and_calls() {
        assert_eq!(
            vec![Ident("x"), LBracket, Ident("a"), Comma, Mul, RBracket],
            lex("x[a, *]"),
        );
        assert_eq!(
            vec![Ident("max"), LParen, Ident("a"), Comma, Num("0"), RParen],
            lex("max(a, 0)"),
        );
    }

    #[test]
    fn test_lex_comments_and_quotes() {
        assert_eq!(vec![Ident("a"), Plus, Ident("b")], lex("a {ignore me} + b"));
        assert_eq!(vec![Ident("\"var with space\"")], lex("\"var with space\""));
        assert_eq!(vec![Ident("main.output")], lex("main.output"));
    }

    #[test]
    fn test_lex_errors() {
        let errs: Vec<_> = Lexer::new("{unclosed").collect();
        assert!(matches!(
            errs[0],
            Err(EquationError {
                code: ErrorCode::UnclosedComment,
                ..
            })
        ));

        let errs: Vec<_> = Lexer::new("\"unclosed").collect();
        assert!(matches!(
            errs[0],
            Err(EquationError {
                code: ErrorCode::UnclosedQuotedIdent,
                ..
            })
        ));
    }
}
