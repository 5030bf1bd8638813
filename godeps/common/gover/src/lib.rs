// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Version handling for Go modules.
//!
//! Go module versions are semantic versions carrying a mandatory `v` prefix,
//! e.g. `v1.2.3`, `v2.0.0-alpha.1+incompatible` or the pseudo-version
//! `v0.0.0-20191109021931-daa7c04131f5`. This crate provides the ordering and
//! classification rules the resolver needs: an invalid version sorts below
//! every valid one, build metadata is ignored, and comparison is total so it
//! can drive minimum-valid-version selection.

use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;
use thiserror::Error;

/// Matches the `-yyyymmddhhmmss-abcdefabcdef` suffix that `go mod` synthesizes
/// for untagged commits.
static PSEUDO_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[.-])\d{14}-[0-9a-f]{12}(\+incompatible)?$").unwrap());

#[derive(Error, Debug)]
pub enum VersionError {
    #[error("invalid module version {0:?}")]
    Invalid(String),
}

/// Parses a Go module version into a [`semver::Version`].
///
/// Returns [`None`] when the string is not a valid Go version. Go permits
/// shorthand cores (`v1`, `v1.2`); missing components are treated as zero.
pub fn parse(v: &str) -> Option<Version> {
    let rest = v.strip_prefix('v')?;

    // Split off build metadata and pre-release before padding the core.
    let (rest, build) = match rest.split_once('+') {
        Some((head, build)) => (head, Some(build)),
        None => (rest, None),
    };
    let (core, pre) = match rest.split_once('-') {
        Some((head, pre)) => (head, Some(pre)),
        None => (rest, None),
    };

    let mut parts = core.split('.');
    let major = parts.next()?;
    let minor = parts.next().unwrap_or("0");
    let patch = parts.next().unwrap_or("0");
    if parts.next().is_some() {
        return None;
    }

    let mut canonical = format!("{major}.{minor}.{patch}");
    if let Some(pre) = pre {
        canonical.push('-');
        canonical.push_str(pre);
    }
    if let Some(build) = build {
        canonical.push('+');
        canonical.push_str(build);
    }

    Version::parse(&canonical).ok()
}

/// Reports whether `v` is a well-formed Go module version.
pub fn is_valid(v: &str) -> bool {
    parse(v).is_some()
}

/// Compares two Go module versions.
///
/// The ordering follows `golang.org/x/mod/semver`: build metadata is ignored,
/// an invalid version is less than any valid version, and two invalid
/// versions compare equal.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (Some(mut va), Some(mut vb)) => {
            va.build = semver::BuildMetadata::EMPTY;
            vb.build = semver::BuildMetadata::EMPTY;
            va.cmp(&vb)
        }
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Returns the major-version prefix of `v`, e.g. `"v2"` for `"v2.1.0"`.
///
/// Returns an error for invalid versions since there is no major line to
/// speak of.
pub fn major(v: &str) -> Result<String, VersionError> {
    let parsed = parse(v).ok_or_else(|| VersionError::Invalid(v.to_string()))?;
    Ok(format!("v{}", parsed.major))
}

/// Reports whether `v` looks like a `go mod` pseudo-version.
pub fn is_pseudo_version(v: &str) -> bool {
    is_valid(v) && PSEUDO_VERSION_RE.is_match(v)
}
