// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing for keyword expressions.
//!
//! The grammar, lowest precedence first:
//!
//! ```text
//! expr     = and_expr ("or" and_expr)*
//! and_expr = atom ("and" atom)*
//! atom     = "not" atom | "(" expr ")" | quoted | token
//! ```
//!
//! `and`, `or` and `not` are reserved words; anything else that is not
//! whitespace, a parenthesis or a quote character is a token. Quoted tokens
//! (single or double quotes) may contain any of those characters.

use winnow::{
    ModalResult, Parser,
    ascii::multispace0,
    combinator::{alt, delimited, preceded, separated_foldl1},
    token::take_while,
};

/// The parsed form of a keyword expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Expr {
    Not(Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Token(String),
}

impl Expr {
    fn boxed(self) -> Box<Self> {
        Box::new(self)
    }

    fn not(self) -> Self {
        Expr::Not(self.boxed())
    }

    fn or(lhs: Self, rhs: Self) -> Self {
        Expr::Or(lhs.boxed(), rhs.boxed())
    }

    fn and(lhs: Self, rhs: Self) -> Self {
        Expr::And(lhs.boxed(), rhs.boxed())
    }
}

fn word<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| {
        !c.is_whitespace() && !matches!(c, '(' | ')' | '\'' | '"')
    })
    .parse_next(input)
}

fn keyword<'i>(
    kw: &'static str,
) -> impl Parser<&'i str, &'i str, winnow::error::ErrMode<winnow::error::ContextError>> {
    preceded(multispace0, word).verify(move |w: &&str| *w == kw)
}

fn bare_token(input: &mut &str) -> ModalResult<Expr> {
    word.verify(|w: &&str| !matches!(*w, "and" | "or" | "not"))
        .map(|w: &str| Expr::Token(w.to_owned()))
        .parse_next(input)
}

fn quoted_token(input: &mut &str) -> ModalResult<Expr> {
    alt((
        delimited('\'', take_while(0.., |c: char| c != '\''), '\''),
        delimited('"', take_while(0.., |c: char| c != '"'), '"'),
    ))
    .map(|s: &str| Expr::Token(s.to_owned()))
    .parse_next(input)
}

fn atom(input: &mut &str) -> ModalResult<Expr> {
    preceded(
        multispace0,
        alt((
            preceded(keyword("not"), atom).map(Expr::not),
            delimited('(', expr, preceded(multispace0, ')')),
            quoted_token,
            bare_token,
        )),
    )
    .parse_next(input)
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    separated_foldl1(atom, keyword("and"), |lhs, _, rhs| Expr::and(lhs, rhs)).parse_next(input)
}

fn expr(input: &mut &str) -> ModalResult<Expr> {
    separated_foldl1(and_expr, keyword("or"), |lhs, _, rhs| Expr::or(lhs, rhs)).parse_next(input)
}

/// Parses a complete keyword expression, requiring all input to be consumed.
/// On failure, returns the byte offset at which parsing stopped.
pub(crate) fn parse(input: &str) -> Result<Expr, usize> {
    delimited(multispace0, expr, multispace0)
        .parse(input)
        .map_err(|err| err.offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn tok(s: &str) -> Expr {
        Expr::Token(s.to_owned())
    }

    #[test]
    fn parse_single_token() {
        assert_eq!(parse("lint"), Ok(tok("lint")));
        assert_eq!(parse("  lint  "), Ok(tok("lint")));
        assert_eq!(parse("tests-3.12"), Ok(tok("tests-3.12")));
    }

    #[test]
    fn parse_boolean_operators() {
        assert_eq!(
            parse("a and b"),
            Ok(Expr::and(tok("a"), tok("b"))),
        );
        assert_eq!(
            parse("a or b and c"),
            Ok(Expr::or(tok("a"), Expr::and(tok("b"), tok("c")))),
        );
        assert_eq!(
            parse("(a or b) and c"),
            Ok(Expr::and(Expr::or(tok("a"), tok("b")), tok("c"))),
        );
        assert_eq!(parse("not a"), Ok(tok("a").not()));
        assert_eq!(
            parse("not not a or b"),
            Ok(Expr::or(tok("a").not().not(), tok("b"))),
        );
    }

    #[test]
    fn parse_quoted_tokens() {
        assert_eq!(parse("'a and b'"), Ok(tok("a and b")));
        assert_eq!(parse("\"not\""), Ok(tok("not")));
        assert_eq!(
            parse("'x(1)' and y"),
            Ok(Expr::and(tok("x(1)"), tok("y"))),
        );
    }

    #[test_case(""; "empty input")]
    #[test_case("and"; "bare operator")]
    #[test_case("a and"; "trailing operator")]
    #[test_case("(a"; "unclosed paren")]
    #[test_case("a b"; "missing operator")]
    #[test_case("not"; "bare not")]
    fn parse_rejects(input: &str) {
        assert!(parse(input).is_err(), "{input:?} should not parse");
    }

    #[test]
    fn error_offset_points_at_failure() {
        let offset = parse("a and ").unwrap_err();
        assert!(offset >= 2, "offset {offset} should be past the first token");
    }
}
