// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Result};
use nom::{
    branch::alt,
    bytes::complete::take_till,
    character::complete::{char, multispace1},
    combinator::{map, opt, value},
    multi::{many0, separated_list0},
    sequence::{pair, preceded, tuple},
    IResult,
};
use nom_regex::str::re_find;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Expr, File, Rule};

static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*").unwrap());

/// Consumes whitespace and `#` comments.
fn sp(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), pair(char('#'), take_till(|c| c == '\n'))),
        ))),
    )(input)
}

fn ident(input: &str) -> IResult<&str, &str> {
    re_find(IDENT_RE.clone())(input)
}

/// Consumes a double-quoted string literal, handling the escapes the printer
/// produces.
fn string_literal(input: &str) -> IResult<&str, String> {
    let (mut rest, _) = char('"')(input)?;
    let mut out = String::new();
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            Some('"') => return Ok((&rest[1..], out)),
            Some('\\') => {
                let escaped = chars.next().ok_or_else(|| {
                    nom::Err::Error(nom::error::Error::new(rest, nom::error::ErrorKind::Escaped))
                })?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                rest = &rest[1 + escaped.len_utf8()..];
            }
            Some(c) => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
            None => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    rest,
                    nom::error::ErrorKind::Char,
                )))
            }
        }
    }
}

fn list(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('[')(input)?;
    let (input, _) = sp(input)?;
    let (input, items) = separated_list0(tuple((sp, char(','), sp)), expr)(input)?;
    let (input, _) = sp(input)?;
    let (input, _) = opt(pair(char(','), sp))(input)?;
    let (input, _) = char(']')(input)?;
    Ok((input, Expr::List(items)))
}

fn expr(input: &str) -> IResult<&str, Expr> {
    alt((
        map(string_literal, Expr::Str),
        list,
        map(ident, |name| Expr::Ident(name.to_string())),
    ))(input)
}

/// A single call argument: either `name = expr` or a positional expr.
enum Arg {
    Keyword(String, Expr),
    Positional(Expr),
}

fn keyword_arg(input: &str) -> IResult<&str, Arg> {
    let (input, name) = ident(input)?;
    let (input, _) = sp(input)?;
    let (input, _) = char('=')(input)?;
    let (input, _) = sp(input)?;
    let (input, value) = expr(input)?;
    Ok((input, Arg::Keyword(name.to_string(), value)))
}

fn arg(input: &str) -> IResult<&str, Arg> {
    alt((keyword_arg, map(expr, Arg::Positional)))(input)
}

fn rule(input: &str) -> IResult<&str, Rule> {
    let (input, kind) = ident(input)?;
    let (input, _) = sp(input)?;
    let (input, _) = char('(')(input)?;
    let (input, _) = sp(input)?;
    let (input, args) = separated_list0(tuple((sp, char(','), sp)), arg)(input)?;
    let (input, _) = sp(input)?;
    let (input, _) = opt(pair(char(','), sp))(input)?;
    let (input, _) = char(')')(input)?;

    let mut parsed = Rule::new(kind);
    for arg in args {
        match arg {
            Arg::Keyword(name, value) => parsed.attrs.push((name, value)),
            Arg::Positional(value) => parsed.args.push(value),
        }
    }
    Ok((input, parsed))
}

/// Parses BUILD-file text into a [`File`].
pub fn parse(text: &str) -> Result<File> {
    let (rest, rules) = match many0(preceded(sp, rule))(text) {
        Ok(parsed) => parsed,
        // `many0` cannot fail, but keep the match total.
        Err(err) => bail!("{}", err),
    };
    let (rest, _) = sp(rest).unwrap_or((rest, ()));
    if !rest.is_empty() {
        let offset = text.len() - rest.len();
        let line = text[..offset].lines().count().max(1);
        let snippet: String = rest.chars().take(40).collect();
        bail!("syntax error on line {}: {:?}", line, snippet);
    }
    Ok(File { rules })
}
