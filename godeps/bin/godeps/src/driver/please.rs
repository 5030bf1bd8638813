// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The production import driver.
//!
//! Combines the module proxy, the on-disk module cache and the Please build
//! graph: packages come from scanning downloaded sources, versions from the
//! minimum-valid-version fixed point over go.mod requirements and
//! pre-existing `go_module` rules.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::driver::gosrc;
use crate::driver::proxy::Proxy;
use crate::driver::{DriverPackage, DriverResponse, ImportDriver, ModuleRef};
use crate::error::Error;
use crate::knownimports;
use crate::progress::Progress;

/// Hosted-repo prefixes whose module paths follow the
/// `host/<owner>/<repo>[/vN]` convention, letting us skip the proxy walk.
const HOSTED_REPO_PREFIXES: &[&str] = &["github.com/", "gitlab.com/", "bitbucket.org/"];

static MAJOR_COMPONENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^v[0-9]+$").unwrap());
static META_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<meta\b[^>]*>").unwrap());
static META_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"name\s*=\s*["']go-import["']"#).unwrap());
static META_CONTENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"content\s*=\s*["']([^"']*)["']"#).unwrap());

/// A pre-existing `go_module` rule known to the Please build graph.
#[derive(Clone, Debug)]
struct PleaseRule {
    label: String,
    built: bool,
    src_root: PathBuf,
}

#[derive(Deserialize)]
struct PleaseTarget {
    #[serde(default, alias = "Outs")]
    outs: Vec<String>,
    #[serde(default, alias = "Labels")]
    labels: Vec<String>,
}

struct PkgInfo {
    id: String,
    src_root: PathBuf,
    pkg_dir: PathBuf,
    module: String,
}

pub struct PleaseDriver<P> {
    proxy: P,
    please_path: PathBuf,
    third_party_folder: String,
    cache_dir: PathBuf,
    progress: Progress,

    http: ureq::Agent,

    known_modules: Vec<String>,
    /// Minimum-valid-version state: one requirement per module path, only
    /// ever raised.
    module_requirements: HashMap<String, String>,
    please_modules: HashMap<String, PleaseRule>,
    /// `{module}@{version}` to source root.
    downloaded: HashMap<String, PathBuf>,
    packages: HashMap<String, DriverPackage>,
    loaded_please_modules: bool,
}

impl<P: Proxy> PleaseDriver<P> {
    pub fn new(
        proxy: P,
        please_path: &Path,
        third_party_folder: &str,
        cache_dir: &Path,
        timeout: Duration,
        progress: Progress,
    ) -> Self {
        Self {
            proxy,
            please_path: please_path.to_path_buf(),
            third_party_folder: third_party_folder.to_string(),
            cache_dir: cache_dir.to_path_buf(),
            progress,
            http: ureq::AgentBuilder::new().timeout(timeout).build(),
            known_modules: Vec::new(),
            module_requirements: HashMap::new(),
            please_modules: HashMap::new(),
            downloaded: HashMap::new(),
            packages: HashMap::new(),
            loaded_please_modules: false,
        }
    }

    /// Checks the discovered-module list for the module owning `pattern`.
    fn find_known_module(&self, pattern: &str) -> Option<String> {
        let mut longest_match: Option<&str> = None;
        for module in &self.known_modules {
            if pattern == module {
                return Some(module.clone());
            }
            if pattern.starts_with(&format!("{}/", module))
                && module.len() > longest_match.map_or(0, str::len)
            {
                longest_match = Some(module);
            }
        }
        longest_match.map(str::to_string)
    }

    /// Determines the module name for a package pattern.
    ///
    /// Hosted-repo paths are answered structurally; anything else walks up
    /// the path querying the proxy until `@latest` answers.
    pub fn resolve_module_for_package(&mut self, pattern: &str) -> Result<String> {
        let pattern = pattern.trim_end_matches("/...");
        if let Some(module) = self.find_known_module(pattern) {
            return Ok(module);
        }

        if HOSTED_REPO_PREFIXES
            .iter()
            .any(|prefix| pattern.starts_with(prefix))
        {
            let parts: Vec<&str> = pattern.split('/').collect();
            if parts.len() < 3 {
                return Err(Error::ModuleNotFound(pattern.to_string()).into());
            }
            let mut module_parts = 3;
            if parts.len() >= 4 && MAJOR_COMPONENT_RE.is_match(parts[3]) {
                module_parts += 1;
            }
            let module = parts[..module_parts].join("/");
            self.known_modules.push(module.clone());
            return Ok(module);
        }

        let mut module_path = pattern.to_lowercase();
        loop {
            if self.proxy.latest_version(&module_path)?.is_some() {
                self.known_modules.push(module_path.clone());
                return Ok(module_path);
            }
            module_path = match module_path.rsplit_once('/') {
                Some((parent, _)) => parent.to_string(),
                None => return Err(Error::ModuleNotFound(pattern.to_string()).into()),
            };
        }
    }

    /// Loads the version requirements from the go.mod files for each module
    /// and applies the minimum valid version algorithm.
    pub fn determine_version_requirements(&mut self, module: &str, version: &str) -> Result<()> {
        if let Some(old_version) = self.module_requirements.get(module) {
            // Already require at this version or higher.
            if gover::compare(version, old_version) != Ordering::Greater {
                return Ok(());
            }
        }

        self.progress
            .update(&format!("Resolving {}@{}", module, version));

        let mod_file = match self.proxy.go_mod(module, version) {
            Ok(text) => text,
            Err(_) => self
                .proxy
                .go_mod(module, &format!("{}+incompatible", version))?,
        };
        let mod_file = gosrc::parse_go_mod(&mod_file)
            .with_context(|| format!("invalid go.mod for {}@{}", module, version))?;

        self.module_requirements
            .insert(module.to_string(), version.to_string());
        for (required_module, required_version) in mod_file.require {
            self.determine_version_requirements(&required_module, &required_version)?;
        }
        Ok(())
    }

    /// Queries the Please build graph and loads in any modules defined there.
    /// Applies the minimum valid version algorithm.
    fn load_please_modules(&mut self) -> Result<()> {
        if self.loaded_please_modules {
            return Ok(());
        }
        self.loaded_please_modules = true;

        let output = Command::new(&self.please_path)
            .args([
                "query",
                "print",
                "-i",
                "go_module",
                "--json",
                &format!("//{}/...", self.third_party_folder),
            ])
            .output()
            .with_context(|| format!("failed to run {}", self.please_path.display()))?;
        if !output.status.success() {
            bail!(
                "failed to query known modules: {}\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let targets: HashMap<String, PleaseTarget> = serde_json::from_slice(&output.stdout)
            .context("failed to decode please query output")?;

        let mut labels: Vec<(&String, &PleaseTarget)> = targets.iter().collect();
        labels.sort_by_key(|(label, _)| label.as_str());
        for (label, target) in labels {
            for module_label in &target.labels {
                let Some(spec) = module_label.strip_prefix("go_module:") else {
                    continue;
                };
                let Some((module, version)) = spec.split_once('@') else {
                    bail!("invalid go_module label: {}", module_label);
                };
                let version = version.trim();

                // Only keep the Please version of this module if it's greater
                // than or equal to the version requirement.
                let outranked = self
                    .module_requirements
                    .get(module)
                    .is_some_and(|old| gover::compare(old, version) == Ordering::Greater);
                if outranked {
                    continue;
                }
                let out = target
                    .outs
                    .first()
                    .with_context(|| format!("target {} has no outputs", label))?;
                self.module_requirements
                    .insert(module.to_string(), version.to_string());
                self.please_modules.insert(
                    module.to_string(),
                    PleaseRule {
                        label: label.clone(),
                        built: false,
                        src_root: Path::new("plz-out/gen").join(out),
                    },
                );
                self.known_modules.push(module.to_string());
            }
        }
        debug!(
            "loaded {} modules from the build graph",
            self.please_modules.len()
        );
        Ok(())
    }

    /// Ensures a module has been downloaded and returns its source root.
    fn ensure_downloaded(&mut self, module: &str) -> Result<PathBuf> {
        let version = match self.module_requirements.get(module) {
            Some(version) => version.clone(),
            None => {
                let latest = self
                    .proxy
                    .latest_version(module)?
                    .ok_or_else(|| Error::ModuleNotFound(module.to_string()))?;
                self.determine_version_requirements(module, &latest)?;
                latest
            }
        };
        let key = format!("{}@{}", module, version);
        if let Some(path) = self.downloaded.get(&key) {
            return Ok(path.clone());
        }

        if let Some(rule) = self.please_modules.get(module).cloned() {
            if !rule.built {
                self.progress.update(&format!("Building {}...", rule.label));
                let output = Command::new(&self.please_path)
                    .args(["build", &rule.label])
                    .output()
                    .with_context(|| format!("failed to run {}", self.please_path.display()))?;
                if !output.status.success() {
                    bail!(
                        "failed to build {}: {}",
                        rule.label,
                        String::from_utf8_lossy(&output.stderr)
                    );
                }
                if let Some(rule) = self.please_modules.get_mut(module) {
                    rule.built = true;
                }
            }
            self.downloaded.insert(key, rule.src_root.clone());
            return Ok(rule.src_root);
        }

        let dest = self.cache_dir.join(&key);
        if !dest.exists() {
            if let Err(err) = self.fetch_module(module, &version, &dest) {
                // Never leave a half-extracted module in the cache.
                let _ = fs::remove_dir_all(&dest);
                return Err(err);
            }
        }
        self.downloaded.insert(key, dest.clone());
        Ok(dest)
    }

    fn fetch_module(&mut self, module: &str, version: &str, dest: &Path) -> Result<()> {
        debug!("fetching {}@{}", module, version);
        self.progress
            .update(&format!("Downloading {}@{}...", module, version));
        let download_error = |reason: String| Error::Download {
            module: module.to_string(),
            version: version.to_string(),
            reason,
        };

        // Commit-ish and pseudo-versions never appear on the proxy's release
        // list, so those go straight to the hosting repository.
        let bytes = if !version.starts_with('v') || gover::is_pseudo_version(version) {
            let repo_url = self.discover_repo_url(module)?;
            let url = format!("{}/archive/{}.zip", repo_url.trim_end_matches('/'), version);
            self.fetch_url(&url)
                .map_err(|err| download_error(err.to_string()))?
        } else {
            self.proxy
                .zip(module, version)
                .map_err(|err| download_error(err.to_string()))?
        };

        extract_zip(&bytes, dest).map_err(|err| download_error(err.to_string()).into())
    }

    /// Finds the repository URL hosting `module`, from the `go-import` meta
    /// tag on the module's HTTP root, falling back to the final redirect URL.
    fn discover_repo_url(&self, module: &str) -> Result<String> {
        let url = format!("https://{}?go-get=1", module);
        let response = self
            .http
            .get(&url)
            .call()
            .map_err(|err| anyhow!("failed to fetch {}: {}", url, err))?;
        let final_url = response.get_url().to_string();
        let body = response.into_string().unwrap_or_default();

        for tag in META_TAG_RE.find_iter(&body) {
            if !META_NAME_RE.is_match(tag.as_str()) {
                continue;
            }
            let Some(content) = META_CONTENT_RE.captures(tag.as_str()) else {
                continue;
            };
            let fields: Vec<&str> = content[1].split_whitespace().collect();
            if fields.len() == 3 && fields[1] == "git" {
                let repo_url = fields[2].to_string();
                Url::parse(&repo_url)
                    .with_context(|| format!("invalid repository URL {}", repo_url))?;
                return Ok(repo_url);
            }
        }
        Ok(final_url)
    }

    fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        use std::io::Read;

        let response = self
            .http
            .get(url)
            .call()
            .map_err(|err| anyhow!("failed to fetch {}: {}", url, err))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(1 << 30)
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {}", url))?;
        Ok(bytes)
    }

    fn pkg_info(&mut self, id: &str) -> Result<PkgInfo> {
        let module = self.resolve_module_for_package(id)?;
        let src_root = self.ensure_downloaded(&module)?;
        let rel = id
            .strip_prefix(&module)
            .unwrap_or("")
            .trim_start_matches('/');
        let pkg_dir = if rel.is_empty() {
            src_root.clone()
        } else {
            src_root.join(rel)
        };
        Ok(PkgInfo {
            id: id.to_string(),
            src_root,
            pkg_dir,
            module,
        })
    }

    /// Imports the package in `info` and everything it transitively imports.
    ///
    /// Returns false when the directory holds no buildable Go files.
    fn import_package(&mut self, info: &PkgInfo) -> Result<bool> {
        if self.packages.contains_key(&info.id) {
            return Ok(true);
        }
        let Some(scanned) = gosrc::scan_package(&info.pkg_dir)? else {
            return Ok(false);
        };

        // A cgo package gets no further imports.
        let imports: Vec<String> = if scanned.imports.contains("C") {
            Vec::new()
        } else {
            scanned
                .imports
                .iter()
                .filter(|import| !knownimports::is_known(import))
                .cloned()
                .collect()
        };

        let version = self
            .module_requirements
            .get(&info.module)
            .cloned()
            .unwrap_or_default();
        self.packages.insert(
            info.id.clone(),
            DriverPackage {
                id: info.id.clone(),
                name: scanned.name,
                pkg_path: info.id.clone(),
                module: ModuleRef {
                    path: info.module.clone(),
                    version,
                },
                go_files: scanned.go_files,
                imports: imports.clone(),
                errors: Vec::new(),
            },
        );

        for import in &imports {
            let dep_info = self.pkg_info(import)?;
            if !self.import_package(&dep_info)? {
                let dep_dir = dep_info.pkg_dir.display().to_string();
                if let Some(package) = self.packages.get_mut(&info.id) {
                    package
                        .errors
                        .push(format!("import {}: no Go files in {}", import, dep_dir));
                }
            }
        }
        Ok(true)
    }

    /// Expands one package pattern into root package ids, importing every
    /// package it covers.
    fn import_pattern(&mut self, pattern: &str) -> Result<Vec<String>> {
        let walk = pattern.ends_with("...");
        let base = pattern.trim_end_matches("...").trim_end_matches('/');
        let info = self.pkg_info(base)?;

        if !walk {
            if !self.import_package(&info)? {
                bail!("no Go files in {}", info.pkg_dir.display());
            }
            return Ok(vec![info.id]);
        }

        let mut roots = Vec::new();
        let walker = walkdir::WalkDir::new(&info.pkg_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !name.starts_with('.') && !name.starts_with('_') && name != "testdata"
            });
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&info.src_root)
                .context("walked outside the module source root")?;
            let id = if rel.as_os_str().is_empty() {
                info.module.clone()
            } else {
                format!("{}/{}", info.module, rel.display())
            };
            let pkg_info = self.pkg_info(&id)?;
            if self.import_package(&pkg_info)? {
                roots.push(id);
            }
        }
        Ok(roots)
    }
}

impl<P: Proxy> ImportDriver for PleaseDriver<P> {
    fn resolve(&mut self, patterns: &[String]) -> Result<DriverResponse> {
        self.packages.clear();

        // Record a version requirement for every pattern before expansion,
        // splitting off any pin.
        let mut pkg_patterns = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let (pkg_pattern, version) = match pattern.split_once('@') {
                Some((pkg_pattern, version)) => (pkg_pattern, Some(version)),
                None => (pattern.as_str(), None),
            };
            pkg_patterns.push(pkg_pattern.to_string());

            let module = self.resolve_module_for_package(pkg_pattern)?;
            match version {
                Some(version) if version.starts_with('v') => {
                    self.determine_version_requirements(&module, version)?;
                }
                Some(version) => {
                    // A commit-ish pin bypasses minimum-valid-version.
                    self.module_requirements
                        .insert(module.clone(), version.to_string());
                }
                None => {
                    let latest = self
                        .proxy
                        .latest_version(&module)?
                        .ok_or_else(|| Error::ModuleNotFound(module.clone()))?;
                    self.determine_version_requirements(&module, &latest)?;
                }
            }
        }

        self.load_please_modules()?;

        let mut roots = Vec::new();
        for pattern in &pkg_patterns {
            roots.extend(self.import_pattern(pattern)?);
        }

        let mut packages: Vec<DriverPackage> = self.packages.values().cloned().collect();
        packages.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(DriverResponse { roots, packages })
    }

    fn list_module_versions(&mut self, modules: &[String]) -> Result<Vec<(String, String)>> {
        let mut versions = Vec::with_capacity(modules.len());
        for module in modules {
            if let Some(version) = self.module_requirements.get(module) {
                versions.push((module.clone(), version.clone()));
                continue;
            }
            match self.proxy.latest_version(module) {
                Ok(Some(version)) => versions.push((module.clone(), version)),
                Ok(None) => {
                    return Err(Error::VersionListFailure(format!(
                        "no versions found for {}",
                        module
                    ))
                    .into())
                }
                Err(err) => return Err(Error::VersionListFailure(err.to_string()).into()),
            }
        }
        Ok(versions)
    }

    fn module_src_root(&self, module: &str) -> Option<PathBuf> {
        let version = self.module_requirements.get(module)?;
        self.downloaded
            .get(&format!("{}@{}", module, version))
            .cloned()
    }
}

/// Unpacks a module archive into `dest`, stripping the top-level directory
/// prefix every module zip carries.
fn extract_zip(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("failed to open module archive")?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(name) = entry.enclosed_name() else {
            bail!("unsafe path in archive: {:?}", entry.name());
        };
        let mut components = name.components();
        components.next();
        let rel = components.as_path();
        if rel.as_os_str().is_empty() {
            continue;
        }
        let out = dest.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
        } else {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            std::io::copy(&mut entry, &mut file)?;
        }
    }
    Ok(())
}
