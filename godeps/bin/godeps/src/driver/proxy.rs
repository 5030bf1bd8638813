// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Go module proxy client.
//!
//! Consumes the three proxy endpoints the resolver needs: `@latest`,
//! `@v/{version}.mod` and `@v/{version}.zip`. Module paths are lowercased in
//! URLs per the proxy convention.

use std::io::Read;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const DEFAULT_PROXY: &str = "https://proxy.golang.org";

/// Caps zip downloads to keep a corrupt proxy response from exhausting
/// memory.
const MAX_ZIP_SIZE: u64 = 1 << 30;

/// The proxy surface consumed by [`crate::driver::PleaseDriver`]. A seam so
/// tests can substitute canned responses.
pub trait Proxy {
    /// The `Version` field of `@latest`, or [`None`] when the proxy answers
    /// with a non-200 status.
    fn latest_version(&self, module: &str) -> Result<Option<String>>;

    /// The text of `@v/{version}.mod`. A non-200 status is an error.
    fn go_mod(&self, module: &str, version: &str) -> Result<String>;

    /// The bytes of `@v/{version}.zip`.
    fn zip(&self, module: &str, version: &str) -> Result<Vec<u8>>;
}

#[derive(Deserialize)]
struct LatestInfo {
    #[serde(rename = "Version")]
    version: String,
}

/// HTTP client for a `GOPROXY`-style module proxy.
pub struct GoProxy {
    agent: ureq::Agent,
    base: String,
}

impl GoProxy {
    pub fn new(base: &str, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Builds a client from the `GOPROXY` environment variable, defaulting to
    /// the public proxy.
    pub fn from_env(timeout: Duration) -> Self {
        // TODO: support comma-separated GOPROXY lists and the "direct" token.
        let base = match std::env::var("GOPROXY") {
            Ok(proxy) if !proxy.is_empty() => proxy,
            _ => DEFAULT_PROXY.to_string(),
        };
        Self::new(&base, timeout)
    }

    fn module_url(&self, module: &str, suffix: &str) -> String {
        format!("{}/{}/{}", self.base, module.to_lowercase(), suffix)
    }
}

impl Proxy for GoProxy {
    fn latest_version(&self, module: &str) -> Result<Option<String>> {
        let url = self.module_url(module, "@latest");
        match self.agent.get(&url).call() {
            Ok(response) => {
                let info: LatestInfo = response
                    .into_json()
                    .with_context(|| format!("invalid @latest response from {}", url))?;
                Ok(Some(info.version))
            }
            Err(ureq::Error::Status(_, _)) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to fetch {}", url)),
        }
    }

    fn go_mod(&self, module: &str, version: &str) -> Result<String> {
        let url = self.module_url(module, &format!("@v/{}.mod", version));
        match self.agent.get(&url).call() {
            Ok(response) => response
                .into_string()
                .with_context(|| format!("failed to read {}", url)),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                bail!("{} {}: \n{}", url, code, body);
            }
            Err(err) => Err(err).with_context(|| format!("failed to fetch {}", url)),
        }
    }

    fn zip(&self, module: &str, version: &str) -> Result<Vec<u8>> {
        let url = self.module_url(module, &format!("@v/{}.zip", version));
        match self.agent.get(&url).call() {
            Ok(response) => {
                let mut bytes = Vec::new();
                response
                    .into_reader()
                    .take(MAX_ZIP_SIZE)
                    .read_to_end(&mut bytes)
                    .with_context(|| format!("failed to read {}", url))?;
                Ok(bytes)
            }
            Err(ureq::Error::Status(code, _)) => bail!("{} {}", url, code),
            Err(err) => Err(err).with_context(|| format!("failed to fetch {}", url)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_module_paths_in_urls() {
        let proxy = GoProxy::new("https://proxy.example.com/", Duration::from_secs(1));
        assert_eq!(
            proxy.module_url("github.com/Masterminds/semver", "@latest"),
            "https://proxy.example.com/github.com/masterminds/semver/@latest"
        );
    }
}
