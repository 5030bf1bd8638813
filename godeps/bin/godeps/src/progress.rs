// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Single-line progress updates on stderr.
//!
//! Owned by the CLI entrypoint and threaded into the resolver and driver so
//! that library code never touches process-wide state.

use std::io::Write;

const CLEAR_LINE_SEQUENCE: &str = "\x1b[1G\x1b[2K";

#[derive(Clone, Copy, Debug, Default)]
pub struct Progress {
    enabled: bool,
}

impl Progress {
    /// A progress reporter that rewrites the current stderr line.
    pub fn stderr() -> Self {
        Self { enabled: true }
    }

    /// A progress reporter that prints nothing. Used by tests.
    pub fn silent() -> Self {
        Self { enabled: false }
    }

    /// Replaces the current progress line with `message`.
    pub fn update(&self, message: &str) {
        if !self.enabled {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "{}{}", CLEAR_LINE_SEQUENCE, message);
        let _ = stderr.flush();
    }

    /// Clears the progress line.
    pub fn clear(&self) {
        if !self.enabled {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "{}", CLEAR_LINE_SEQUENCE);
        let _ = stderr.flush();
    }
}
