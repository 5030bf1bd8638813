// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{fs, path::Path};

use anyhow::{Context, Result};

/// Lays out a tree of small text files for tests.
///
/// `files` maps paths relative to `base_dir` to their contents; intermediate
/// directories are created as needed.
pub fn write_files<'a>(
    base_dir: impl AsRef<Path>,
    files: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<()> {
    let base_dir = base_dir.as_ref();

    for (rel_path, content) in files {
        let path = base_dir.join(rel_path);
        let parent = path.parent().context("file path has no parent")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to mkdir {}", parent.display()))?;
        fs::write(&path, content)
            .with_context(|| format!("failed to create {}", path.display()))?;
    }

    Ok(())
}
