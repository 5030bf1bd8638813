// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The import driver: turns package patterns into concrete package listings.
//!
//! The resolver only speaks to the [`ImportDriver`] trait; the production
//! implementation is [`PleaseDriver`], which combines the module proxy, the
//! on-disk module cache and the Please build graph.

pub mod gosrc;
pub mod please;
pub mod proxy;

use std::path::PathBuf;

use anyhow::Result;

pub use please::PleaseDriver;
pub use proxy::{GoProxy, Proxy};

/// The module owning a package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleRef {
    pub path: String,
    pub version: String,
}

/// A package reported by the driver. Imports are ids into the same response.
#[derive(Clone, Debug)]
pub struct DriverPackage {
    pub id: String,
    /// The name from the package clause.
    pub name: String,
    pub pkg_path: String,
    pub module: ModuleRef,
    pub go_files: Vec<PathBuf>,
    pub imports: Vec<String>,
    /// Per-package analysis errors. Any non-empty entry fails the resolve.
    pub errors: Vec<String>,
}

/// The driver's answer for a set of patterns: the root package ids the
/// patterns expanded to, plus every transitively reachable package.
#[derive(Clone, Debug, Default)]
pub struct DriverResponse {
    pub roots: Vec<String>,
    pub packages: Vec<DriverPackage>,
}

/// Resolves package patterns to packages annotated with their owning module
/// and direct imports.
pub trait ImportDriver {
    /// Expands `patterns` (with optional `@version` suffixes and `...`
    /// wildcards) into a [`DriverResponse`].
    fn resolve(&mut self, patterns: &[String]) -> Result<DriverResponse>;

    /// The batched version query used to backfill modules with no version.
    fn list_module_versions(&mut self, modules: &[String]) -> Result<Vec<(String, String)>>;

    /// The source root of a downloaded module, for licence classification.
    fn module_src_root(&self, module: &str) -> Option<PathBuf>;
}
