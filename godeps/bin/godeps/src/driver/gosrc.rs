// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Lightweight Go source inspection.
//!
//! The driver needs two facts from a module's sources: the imports of each
//! package directory and the requirements in a `go.mod` file. Both are
//! extracted textually; full Go parsing is not required because import
//! declarations must appear before any other code.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static PACKAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^package\s+(\w+)").unwrap());
static IMPORT_SINGLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^import\s+(?:[\w.]+\s+)?"([^"]+)""#).unwrap());
static IMPORT_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(?:[\w.]+\s+)?"([^"]+)""#).unwrap());

/// A package directory's scan result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScannedPackage {
    /// The name from the package clause.
    pub name: String,
    pub go_files: Vec<PathBuf>,
    pub imports: BTreeSet<String>,
}

/// Scans the Go files directly in `dir`.
///
/// Returns [`None`] when the directory contains no buildable Go files.
/// Test files and files hidden from the build (`.`/`_` prefixes) are
/// skipped.
pub fn scan_package(dir: &Path) -> Result<Option<ScannedPackage>> {
    let mut go_files = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".go")
            || name.ends_with("_test.go")
            || name.starts_with('.')
            || name.starts_with('_')
        {
            continue;
        }
        if entry.file_type()?.is_file() {
            go_files.push(entry.path());
        }
    }
    if go_files.is_empty() {
        return Ok(None);
    }
    go_files.sort();

    let mut scanned = ScannedPackage {
        go_files: go_files.clone(),
        ..Default::default()
    };
    for path in &go_files {
        let source =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        scan_file(&source, &mut scanned);
    }
    Ok(Some(scanned))
}

/// Extracts the package clause and import paths from one file's text.
///
/// Comment stripping is textual; it is sound here because import
/// declarations precede all other code, so string literals cannot confuse it
/// before the imports end.
fn scan_file(source: &str, scanned: &mut ScannedPackage) {
    let source = strip_block_comments(source);
    let mut in_import_block = false;

    for raw_line in source.lines() {
        let mut line = raw_line.trim();

        if let Some(start) = line.find("//") {
            line = line[..start].trim();
        }
        if line.is_empty() {
            continue;
        }

        if in_import_block {
            if line.starts_with(')') {
                in_import_block = false;
            } else if let Some(captures) = IMPORT_LINE_RE.captures(line) {
                scanned.imports.insert(captures[1].to_string());
            }
            continue;
        }

        if scanned.name.is_empty() {
            if let Some(captures) = PACKAGE_RE.captures(line) {
                scanned.name = captures[1].to_string();
                continue;
            }
        }
        if line.starts_with("import (") {
            in_import_block = true;
            continue;
        }
        if let Some(captures) = IMPORT_SINGLE_RE.captures(line) {
            scanned.imports.insert(captures[1].to_string());
        }
    }
}

fn strip_block_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start..].find("*/") {
            Some(end) => rest = &rest[start + end + 2..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// The subset of a `go.mod` file the resolver consumes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GoMod {
    pub module: String,
    /// `(module, version)` requirement pairs.
    pub require: Vec<(String, String)>,
}

/// Parses `go.mod` text.
///
/// Only `module` and `require` directives matter here; `replace`, `exclude`
/// and `retract` apply to builds within the module itself, not to consumers.
pub fn parse_go_mod(content: &str) -> Result<GoMod> {
    let mut parsed = GoMod::default();
    let mut in_require_block = false;

    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if let Some(start) = line.find("//") {
            line = line[..start].trim();
        }
        if line.is_empty() {
            continue;
        }

        if in_require_block {
            if line == ")" {
                in_require_block = false;
            } else if let Some(pair) = parse_require_line(line) {
                parsed.require.push(pair);
            } else {
                bail!("invalid require line in go.mod: {:?}", raw_line);
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("module ") {
            parsed.module = rest.trim().trim_matches('"').to_string();
        } else if line == "require (" {
            in_require_block = true;
        } else if let Some(rest) = line.strip_prefix("require ") {
            match parse_require_line(rest.trim()) {
                Some(pair) => parsed.require.push(pair),
                None => bail!("invalid require line in go.mod: {:?}", raw_line),
            }
        }
    }

    Ok(parsed)
}

fn parse_require_line(line: &str) -> Option<(String, String)> {
    let mut fields = line.split_whitespace();
    let module = fields.next()?;
    let version = fields.next()?;
    if fields.next().is_some() {
        return None;
    }
    Some((module.trim_matches('"').to_string(), version.to_string()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testutils::write_files;

    #[test]
    fn scans_imports_from_all_forms() {
        let temp = tempfile::tempdir().unwrap();
        write_files(
            temp.path(),
            [
                (
                    "a.go",
                    r#"// Package demo does things.
package demo

import (
    "fmt"

    foo "github.com/example/foo"
    _ "github.com/example/blank"
)
"#,
                ),
                (
                    "b.go",
                    "package demo\n\nimport \"golang.org/x/mod/semver\"\n",
                ),
                ("b_test.go", "package demo\n\nimport \"testing\"\n"),
            ],
        )
        .unwrap();

        let scanned = scan_package(temp.path()).unwrap().unwrap();
        assert_eq!(scanned.name, "demo");
        assert_eq!(scanned.go_files.len(), 2);
        assert_eq!(
            scanned.imports.iter().cloned().collect::<Vec<_>>(),
            vec![
                "fmt".to_string(),
                "github.com/example/blank".to_string(),
                "github.com/example/foo".to_string(),
                "golang.org/x/mod/semver".to_string(),
            ]
        );
    }

    #[test]
    fn skips_comments() {
        let mut scanned = ScannedPackage::default();
        scan_file(
            "package demo\n/*\nimport \"commented/out\"\n*/\nimport \"real/one\" // import \"also/commented\"\n",
            &mut scanned,
        );
        assert_eq!(
            scanned.imports.iter().cloned().collect::<Vec<_>>(),
            vec!["real/one".to_string()]
        );
    }

    #[test]
    fn directory_without_go_files_is_none() {
        let temp = tempfile::tempdir().unwrap();
        write_files(temp.path(), [("README.md", "nothing here")]).unwrap();
        assert_eq!(scan_package(temp.path()).unwrap(), None);
    }

    #[test]
    fn parses_go_mod_directives() {
        let parsed = parse_go_mod(
            r#"module github.com/example/mod

go 1.16

require (
    github.com/stretchr/testify v1.7.0 // indirect
    golang.org/x/mod v0.4.2
)

require golang.org/x/tools v0.1.0
"#,
        )
        .unwrap();

        assert_eq!(parsed.module, "github.com/example/mod");
        assert_eq!(
            parsed.require,
            vec![
                (
                    "github.com/stretchr/testify".to_string(),
                    "v1.7.0".to_string()
                ),
                ("golang.org/x/mod".to_string(), "v0.4.2".to_string()),
                ("golang.org/x/tools".to_string(), "v0.1.0".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_malformed_require_lines() {
        assert!(parse_go_mod("require (\nnot-a-pair\n)\n").is_err());
    }
}
