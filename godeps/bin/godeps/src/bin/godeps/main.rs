// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Adds or updates third-party Go module rules in a Please monorepo.
//!
//! Accepts `go get` style patterns, resolves them to a complete transitive
//! set of packages, and rewrites the third-party BUILD files.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use walkdir::WalkDir;

use godeps::driver::{GoProxy, PleaseDriver};
use godeps::progress::Progress;
use godeps::resolve::update_modules;
use godeps::rules::BuildGraph;

/// Where downloaded module sources live, keyed by `{module}@{version}`.
/// Concurrent runs must not share this directory.
const MODCACHE_DIR: &str = "plz-out/godeps/modcache";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "godeps")]
#[command(about = "Updates Please build rules for third-party Go modules", long_about = None)]
struct Args {
    /// The location of the folder containing your third party build rules.
    #[arg(
        long = "third_party",
        value_name = "PATH",
        default_value = "third_party/go"
    )]
    third_party: String,

    /// Produce a structured directory tree with a BUILD file per module.
    /// By default, a single flat BUILD file holds all third party rules.
    #[arg(short = 's', long)]
    structured: bool,

    /// Write the rules back to the BUILD files. Prints to stdout by default.
    #[arg(short = 'w', long)]
    write: bool,

    /// The path to the Please binary.
    #[arg(long = "please_path", value_name = "PATH", default_value = "plz")]
    please_path: PathBuf,

    /// Packages to install following `go get` style patterns. These can
    /// optionally have versions, e.g. github.com/example/module/...@v1.0.0
    #[arg(value_name = "packages")]
    packages: Vec<String>,
}

fn main() -> ExitCode {
    cliutil::cli_main(godeps_main)
}

fn godeps_main() -> Result<()> {
    let args = Args::parse();
    let progress = Progress::stderr();

    let mut graph = BuildGraph::new(&args.third_party);
    let third_party = Path::new(&args.third_party);
    if args.structured {
        if third_party.is_dir() {
            for entry in WalkDir::new(third_party) {
                let entry = entry.context("failed to walk the third party folder")?;
                if entry.file_type().is_file() && entry.file_name() == "BUILD" {
                    graph.read_rules(entry.path())?;
                }
            }
        }
    } else {
        graph.read_rules(&third_party.join("BUILD"))?;
    }

    let proxy = GoProxy::from_env(REQUEST_TIMEOUT);
    let mut driver = PleaseDriver::new(
        proxy,
        &args.please_path,
        &args.third_party,
        Path::new(MODCACHE_DIR),
        REQUEST_TIMEOUT,
        progress,
    );
    update_modules(&mut graph.modules, &args.packages, &mut driver, "", progress)?;

    graph.save(args.structured, args.write)
}
