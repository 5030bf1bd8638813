// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::Result;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

/// The environment variable controlling which logs reach the console.
/// Accepts the usual `tracing_subscriber` filter syntax.
pub const LOG_ENV: &str = "GODEPS_LOG";

/// The configuration for the logger.
pub struct LoggingConfig {
    /// A filter for which logs should be written to the console.
    /// If None, logs will not be written to the console.
    pub console_logger: Option<EnvFilter>,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            console_logger: Some(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::WARN.into())
                    .with_env_var(LOG_ENV)
                    .from_env_lossy(),
            ),
        }
    }

    /// Installs the global subscriber. Logs go to stderr so that stdout stays
    /// clean for the generated rules.
    pub fn setup(self) -> Result<()> {
        let console_layer = self.console_logger.map(|filter| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false)
                .with_filter(filter)
        });

        tracing_subscriber::registry().with(console_layer).init();
        Ok(())
    }
}
