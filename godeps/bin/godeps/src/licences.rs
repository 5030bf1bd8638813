// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Licence-file discovery and classification.
//!
//! Modules ship their licence as a text file at or above the package
//! directory. Classification matches the text against distinctive phrases of
//! the common licences and returns an SPDX identifier.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// File names checked for licence text, in preference order.
const LICENCE_FILE_NAMES: &[&str] = &[
    "LICENSE",
    "LICENSE.txt",
    "LICENSE.md",
    "LICENCE",
    "LICENCE.txt",
    "LICENCE.md",
    "COPYING",
    "COPYING.txt",
    "UNLICENSE",
    "MIT-LICENSE",
];

/// Finds the licence file governing `dir`, walking up to `root` inclusive.
///
/// Returns [`None`] when no candidate exists anywhere on the way up.
pub fn find_licence_file(dir: &Path, root: &Path) -> Option<PathBuf> {
    let mut current = dir;
    loop {
        for name in LICENCE_FILE_NAMES {
            let candidate = current.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        if current == root {
            return None;
        }
        current = current.parent()?;
    }
}

/// Classifies the licence text in `path` to an SPDX identifier.
///
/// Unrecognized licence text is an error so that a module never silently
/// ships with the wrong classification.
pub fn classify(path: &Path) -> Result<String> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    match identify(&text) {
        Some(id) => Ok(id.to_string()),
        None => bail!("failed to identify licence {}", path.display()),
    }
}

fn identify(text: &str) -> Option<&'static str> {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    // Order matters: several licences embed phrases of the permissive ones.
    if text.contains("Apache License") && text.contains("Version 2.0") {
        return Some("Apache-2.0");
    }
    if text.contains("Mozilla Public License") && text.contains("2.0") {
        return Some("MPL-2.0");
    }
    if text.contains("GNU AFFERO GENERAL PUBLIC LICENSE") {
        return Some("AGPL-3.0");
    }
    if text.contains("GNU LESSER GENERAL PUBLIC LICENSE") {
        if text.contains("Version 3") {
            return Some("LGPL-3.0");
        }
        return Some("LGPL-2.1");
    }
    if text.contains("GNU GENERAL PUBLIC LICENSE") {
        if text.contains("Version 3") {
            return Some("GPL-3.0");
        }
        return Some("GPL-2.0");
    }
    if text.contains("This is free and unencumbered software released into the public domain") {
        return Some("Unlicense");
    }
    if text.contains("Redistribution and use in source and binary forms") {
        if text.contains("endorse or promote") {
            return Some("BSD-3-Clause");
        }
        return Some("BSD-2-Clause");
    }
    if text.contains("Permission to use, copy, modify, and/or distribute this software") {
        return Some("ISC");
    }
    if text.contains("Permission is hereby granted, free of charge") {
        return Some("MIT");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::write_files;

    #[test]
    fn classifies_common_licences() {
        assert_eq!(
            identify(
                "Permission is hereby granted, free of charge, to any person obtaining a copy \
                 of this software and associated documentation files"
            ),
            Some("MIT")
        );
        assert_eq!(
            identify(
                "Apache License\nVersion 2.0, January 2004\nhttp://www.apache.org/licenses/"
            ),
            Some("Apache-2.0")
        );
        assert_eq!(
            identify(
                "Redistribution and use in source and binary forms, with or without \
                 modification, are permitted provided that the following conditions are met: \
                 ... Neither the name of Google Inc. nor the names of its contributors may be \
                 used to endorse or promote products derived from this software"
            ),
            Some("BSD-3-Clause")
        );
        assert_eq!(identify("All mine, hands off."), None);
    }

    #[test]
    fn finds_licence_walking_up() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        write_files(
            root,
            [
                ("LICENSE", "Apache License Version 2.0"),
                ("sub/pkg/doc.go", "package pkg\n"),
            ],
        )
        .unwrap();

        let found = find_licence_file(&root.join("sub/pkg"), root).unwrap();
        assert_eq!(found, root.join("LICENSE"));
        assert_eq!(classify(&found).unwrap(), "Apache-2.0");
        assert!(find_licence_file(&root.join("sub"), &root.join("sub")).is_none());
    }
}
