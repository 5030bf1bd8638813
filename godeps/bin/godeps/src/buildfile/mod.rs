// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A small BUILD-file library: parse, edit, print.
//!
//! Third-party BUILD files consist of rule calls with keyword arguments whose
//! values are strings, lists of strings, or identifiers. This module parses
//! that subset, offers buildtools-style accessors for editing rules in place,
//! and prints the canonical form. `parse(print(file))` reproduces `file`.

mod parser;

use std::fmt::Write;

pub use parser::parse;

/// An attribute value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Str(String),
    List(Vec<Expr>),
    Ident(String),
}

impl Expr {
    pub fn str(value: impl Into<String>) -> Self {
        Expr::Str(value.into())
    }

    /// A list expression of string elements.
    pub fn str_list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::List(values.into_iter().map(Expr::str).collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expr::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A rule call statement, e.g. `go_module(name = "x", ...)`.
///
/// Calls like `subinclude("...")` carry positional arguments instead of
/// keyword attributes; both are preserved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub kind: String,
    args: Vec<Expr>,
    attrs: Vec<(String, Expr)>,
}

impl Rule {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            args: Vec::new(),
            attrs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.attr_str("name").unwrap_or("")
    }

    pub fn attr(&self, name: &str) -> Option<&Expr> {
        self.attrs
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| value)
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(Expr::as_str)
    }

    /// The string elements of a list attribute. A missing or non-list
    /// attribute yields an empty vector.
    pub fn attr_list(&self, name: &str) -> Vec<String> {
        match self.attr(name) {
            Some(Expr::List(items)) => items
                .iter()
                .filter_map(Expr::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Sets an attribute, replacing any existing value in place.
    pub fn set_attr(&mut self, name: &str, value: Expr) {
        if let Some(slot) = self
            .attrs
            .iter_mut()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| value)
        {
            *slot = value;
        } else {
            self.attrs.push((name.to_string(), value));
        }
    }

    /// Removes an attribute, returning its previous value.
    pub fn del_attr(&mut self, name: &str) -> Option<Expr> {
        let position = self.attrs.iter().position(|(attr, _)| attr == name)?;
        Some(self.attrs.remove(position).1)
    }
}

/// A parsed BUILD file: rule calls in source order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct File {
    pub rules: Vec<Rule>,
}

impl File {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indices of the rules of a given kind, in source order.
    pub fn rules_of_kind(&self, kind: &str) -> Vec<usize> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.kind == kind)
            .map(|(index, _)| index)
            .collect()
    }

    /// Appends a rule with its `name` attribute set, returning its index.
    pub fn add_rule(&mut self, kind: &str, name: &str) -> usize {
        let mut rule = Rule::new(kind);
        rule.set_attr("name", Expr::str(name));
        self.rules.push(rule);
        self.rules.len() - 1
    }

    /// Deletes the rule of the given kind and name, if present.
    ///
    /// Indices held for later rules shift down by one, so callers re-index
    /// after deleting.
    pub fn del_rule(&mut self, kind: &str, name: &str) -> bool {
        let position = self
            .rules
            .iter()
            .position(|rule| rule.kind == kind && rule.name() == name);
        match position {
            Some(position) => {
                self.rules.remove(position);
                true
            }
            None => false,
        }
    }

    /// Prints the canonical text of the file.
    pub fn format(&self) -> String {
        let mut out = String::new();
        for (index, rule) in self.rules.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            format_rule(&mut out, rule);
        }
        out
    }
}

fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\"', "\\\"")
        .replace('\n', "\\n")
}

fn format_expr(out: &mut String, expr: &Expr, indent: usize) {
    match expr {
        Expr::Str(s) => {
            let _ = write!(out, "\"{}\"", escape_string(s));
        }
        Expr::Ident(name) => out.push_str(name),
        Expr::List(items) if items.len() <= 1 => {
            out.push('[');
            if let Some(item) = items.first() {
                format_expr(out, item, indent);
            }
            out.push(']');
        }
        Expr::List(items) => {
            out.push_str("[\n");
            for item in items {
                for _ in 0..indent + 4 {
                    out.push(' ');
                }
                format_expr(out, item, indent + 4);
                out.push_str(",\n");
            }
            for _ in 0..indent {
                out.push(' ');
            }
            out.push(']');
        }
    }
}

fn format_rule(out: &mut String, rule: &Rule) {
    // Calls with only positional arguments (subinclude and friends) stay on
    // one line.
    if rule.attrs.is_empty() {
        let _ = write!(out, "{}(", rule.kind);
        for (index, arg) in rule.args.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            format_expr(out, arg, 0);
        }
        out.push_str(")\n");
        return;
    }

    let _ = writeln!(out, "{}(", rule.kind);
    for arg in &rule.args {
        out.push_str("    ");
        format_expr(out, arg, 4);
        out.push_str(",\n");
    }
    for (name, value) in &rule.attrs {
        let _ = write!(out, "    {} = ", name);
        format_expr(out, value, 4);
        out.push_str(",\n");
    }
    out.push_str(")\n");
}
