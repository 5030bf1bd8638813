// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The error kinds surfaced to the CLI.
//!
//! Most call sites propagate with [`anyhow`]; these typed variants exist for
//! the failures callers and tests need to tell apart.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// No module could be discovered for a package pattern after walking up
    /// its path.
    #[error("can't determine module for package {0}")]
    ModuleNotFound(String),

    /// Fetching or unpacking module sources failed. The partially created
    /// cache directory has already been removed.
    #[error("failed to download {module}@{version}: {reason}")]
    Download {
        module: String,
        version: String,
        reason: String,
    },

    /// The import driver reported per-package errors; all of them are
    /// concatenated into one failure.
    #[error("errors encountered while analysing packages:\n{0}")]
    PackageAnalysis(String),

    /// An imported package has no resolvable module. The module cache is
    /// likely missing a download.
    #[error("no module for imported package {0}; perhaps you need to go get something?")]
    NoModuleForPackage(String),

    /// The batched module version query failed.
    #[error("failed to get module versions: {0}")]
    VersionListFailure(String),

    /// An existing BUILD file could not be parsed.
    #[error("failed to parse {path}: {reason}")]
    BuildFileParse { path: PathBuf, reason: String },

    /// An output BUILD file could not be flushed.
    #[error("failed to write {path}")]
    BuildFileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Internally-inconsistent resolver state. Not recovered; the offending
    /// import path is included so the user can investigate.
    #[error("internal inconsistency: {0}")]
    Invariant(String),
}
