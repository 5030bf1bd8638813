// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The resolver: assigns every reachable package to exactly one module part
//! without introducing inter-part import cycles.
//!
//! A module usually maps to one `go_module` rule. When two modules import
//! each other's packages, compiling either module whole would deadlock the
//! build graph, so the module on the cycle is split into parts: the smallest
//! number of package subsets such that the inter-part dependency graph stays
//! acyclic.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result};

use crate::driver::{DriverPackage, DriverResponse, ImportDriver};
use crate::error::Error;
use crate::knownimports;
use crate::licences;
use crate::model::{ModuleId, Modules, PackageId, PartId};
use crate::progress::Progress;

/// Resolves `go get` style patterns and updates `modules` in place.
///
/// On return every reachable package is assigned to a part, and modified
/// modules have versions and licences populated. `root_module_name` is the
/// repository's own module, which never generates a rule; pass an empty
/// string when the repository is not itself a Go module.
pub fn update_modules(
    modules: &mut Modules,
    patterns: &[String],
    driver: &mut dyn ImportDriver,
    root_module_name: &str,
    progress: Progress,
) -> Result<()> {
    let mut resolver = Resolver {
        modules,
        driver,
        root_module_name: root_module_name.to_string(),
        progress,
    };
    let result = resolver.run(patterns);
    progress.clear();
    result
}

struct Resolver<'a> {
    modules: &'a mut Modules,
    driver: &'a mut dyn ImportDriver,
    root_module_name: String,
    progress: Progress,
}

impl<'a> Resolver<'a> {
    fn run(&mut self, patterns: &[String]) -> Result<()> {
        self.progress.update("Analysing packages...");
        let response = self.driver.resolve(patterns)?;

        // Packages that already sit in a part came from existing rules and
        // must keep their assignment.
        let mut done: HashSet<PackageId> = self
            .modules
            .package_ids()
            .filter(|&pkg| self.modules.part_of(pkg).is_some())
            .collect();

        // Keep every driver package around for licence classification.
        let mut driver_packages: BTreeMap<String, DriverPackage> = BTreeMap::new();
        for package in &response.packages {
            driver_packages.insert(package.id.clone(), package.clone());
        }

        self.resolve_packages(&response)?;
        self.add_packages_to_modules(&mut done)?;

        if let Some(second) = self.resolve_modified_packages()? {
            for package in &second.packages {
                driver_packages.insert(package.id.clone(), package.clone());
            }
            self.resolve_packages(&second)?;
            self.add_packages_to_modules(&mut done)?;
        }

        self.set_versions()?;
        self.set_licences(&driver_packages)?;

        Ok(())
    }

    /// Populates model packages from a driver response: module membership and
    /// cross-module imports only. Intra-module edges would pollute the
    /// module-level graph and stay implicit.
    fn resolve_packages(&mut self, response: &DriverResponse) -> Result<()> {
        let mut analysis_errors = Vec::new();
        for package in &response.packages {
            for error in &package.errors {
                analysis_errors.push(format!("{}: {}", package.id, error));
            }
        }
        if !analysis_errors.is_empty() {
            return Err(Error::PackageAnalysis(analysis_errors.join("\n")).into());
        }

        let by_id: BTreeMap<&str, &DriverPackage> = response
            .packages
            .iter()
            .map(|package| (package.id.as_str(), package))
            .collect();

        for package in &response.packages {
            // Meta-packages with no files do not take part in the graph.
            if package.go_files.is_empty() {
                continue;
            }
            let pkg_id = self.modules.get_package(&package.pkg_path);
            if self.modules.package(pkg_id).resolved {
                continue;
            }
            if package.module.path.is_empty() {
                return Err(Error::NoModuleForPackage(package.pkg_path.clone()).into());
            }
            self.modules.package_mut(pkg_id).module = package.module.path.clone();

            let module_id = self.modules.get_module(&package.module.path);
            if !package.module.version.is_empty() {
                // The driver's version reflects minimum-valid-version
                // selection over everything seen so far; a stored version
                // never decreases.
                let module = self.modules.module(module_id);
                if module.version.is_empty()
                    || gover::compare(&package.module.version, &module.version)
                        == std::cmp::Ordering::Greater
                {
                    self.modules.module_mut(module_id).version = package.module.version.clone();
                }
            }

            for import in &package.imports {
                if knownimports::is_known(import) {
                    continue;
                }
                let import_module = match by_id.get(import.as_str()) {
                    Some(dep) => dep.module.path.clone(),
                    None => {
                        let known = self
                            .modules
                            .lookup_package(import)
                            .map(|id| self.modules.package(id).module.clone());
                        match known {
                            Some(module) if !module.is_empty() => module,
                            _ => return Err(Error::NoModuleForPackage(import.clone()).into()),
                        }
                    }
                };
                let import_id = self.modules.get_package(import);
                if self.modules.package(import_id).module.is_empty() {
                    self.modules.package_mut(import_id).module = import_module.clone();
                }
                if import_module != package.module.path {
                    let pkg = self.modules.package_mut(pkg_id);
                    if !pkg.imports.contains(&import_id) {
                        pkg.imports.push(import_id);
                    }
                }
            }
            self.modules.package_mut(pkg_id).resolved = true;
        }
        Ok(())
    }

    fn add_packages_to_modules(&mut self, done: &mut HashSet<PackageId>) -> Result<()> {
        // Insertion order: the order packages were discovered. Output
        // determinism is imposed at emission time instead.
        let ids: Vec<PackageId> = self.modules.package_ids().collect();

        let total = ids.len();
        for (processed, pkg) in ids.into_iter().enumerate() {
            self.add_package_to_module_graph(done, pkg)?;
            self.progress.update(&format!(
                "Building module graph... {} of {} packages.",
                processed + 1,
                total
            ));
        }
        Ok(())
    }

    /// Assigns `pkg` and (post-order) everything it imports to module parts.
    fn add_package_to_module_graph(
        &mut self,
        done: &mut HashSet<PackageId>,
        pkg: PackageId,
    ) -> Result<()> {
        if !done.insert(pkg) {
            return Ok(());
        }

        for import in self.modules.package(pkg).imports.clone() {
            self.add_package_to_module_graph(done, import)?;
        }

        // The current module doesn't need a rule.
        let module_name = self.modules.package(pkg).module.clone();
        if module_name == self.root_module_name {
            return Ok(());
        }
        if module_name.is_empty() {
            let path = self.modules.package(pkg).import_path.clone();
            return Err(Error::NoModuleForPackage(path).into());
        }

        let module_id = self.modules.get_module(&module_name);
        let part = self.get_or_create_module_part(module_id, pkg)?;
        self.modules.assign(pkg, part);

        // A wildcard-matched package is already covered by the rule text, so
        // it does not force a rewrite on its own.
        if self.modules.wildcard_import_of(part, pkg).is_none() {
            self.modules.part_mut(part).modified = true;
        }
        Ok(())
    }

    /// Finds the first existing part that can take `pkg` without causing a
    /// cycle, or appends a fresh one. Older parts absorb more packages.
    fn get_or_create_module_part(&mut self, module: ModuleId, pkg: PackageId) -> Result<PartId> {
        for part in self.modules.module(module).parts.clone() {
            let mut valid = true;
            let mut done = HashSet::new();
            for import in self.modules.package(pkg).imports.clone() {
                // Check all the imports that leave the candidate part.
                if self.modules.part_of(import) != Some(part)
                    && self.depends_on(&mut done, import, part)?
                {
                    valid = false;
                    break;
                }
            }
            if valid {
                return Ok(part);
            }
        }
        Ok(self.modules.new_part(module))
    }

    /// Whether the part holding `pkg` transitively depends on `target`.
    fn depends_on(
        &self,
        done: &mut HashSet<PackageId>,
        pkg: PackageId,
        target: PartId,
    ) -> Result<bool> {
        if !done.insert(pkg) {
            return Ok(false);
        }
        let pkg_part = self.modules.part_of(pkg).ok_or_else(|| {
            Error::Invariant(format!(
                "package {} has no module part",
                self.modules.package(pkg).import_path
            ))
        })?;
        if pkg_part == target {
            return Ok(true);
        }
        for member in self.modules.part(pkg_part).packages.clone() {
            for import in self.modules.package(member).imports.clone() {
                if self.depends_on(done, import, target)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Re-resolves packages that a modified part claims but whose imports we
    /// never saw, e.g. ones a pre-existing wildcard install covered. Returns
    /// the driver's second response, if one was needed.
    fn resolve_modified_packages(&mut self) -> Result<Option<DriverResponse>> {
        let mut modified_packages = Vec::new();
        for module in self.modules.module_ids() {
            for &part in &self.modules.module(module).parts {
                if !self.modules.part(part).modified {
                    continue;
                }
                for &pkg in &self.modules.part(part).packages {
                    let package = self.modules.package(pkg);
                    if !package.resolved {
                        modified_packages.push(package.import_path.clone());
                    }
                }
            }
        }
        if modified_packages.is_empty() {
            return Ok(None);
        }
        modified_packages.sort();
        modified_packages.dedup();

        Ok(Some(self.driver.resolve(&modified_packages)?))
    }

    /// Fills in versions for modules that didn't get one from resolution,
    /// through a single batched driver query.
    fn set_versions(&mut self) -> Result<()> {
        let mut module_names = Vec::new();
        for module in self.modules.module_ids() {
            let module = self.modules.module(module);
            if !module.version.is_empty() || module.name == self.root_module_name {
                continue;
            }
            module_names.push(module.name.clone());
        }
        if module_names.is_empty() {
            return Ok(());
        }
        module_names.sort();

        let versions = self.driver.list_module_versions(&module_names)?;
        let total = versions.len();
        for (index, (name, version)) in versions.into_iter().enumerate() {
            self.progress.update(&format!(
                "Setting versions... {} of {} modules.",
                index + 1,
                total
            ));
            let module_id = self
                .modules
                .lookup_module(&name)
                .ok_or_else(|| Error::Invariant(format!("unknown module in version list: {}", name)))?;
            self.modules.module_mut(module_id).version = version;
        }
        Ok(())
    }

    /// Classifies licences for modified modules that don't have one yet.
    /// A module without a licence file is skipped.
    fn set_licences(&mut self, driver_packages: &BTreeMap<String, DriverPackage>) -> Result<()> {
        let total = self.modules.module_ids().count();
        let mut done = 0;
        for package in driver_packages.values() {
            let Some(module_id) = self.modules.lookup_module(&package.module.path) else {
                continue;
            };
            {
                let module = self.modules.module(module_id);
                if !module.licence.is_empty() || module.name == self.root_module_name {
                    continue;
                }
            }
            if !self.modules.module_modified(module_id) {
                continue;
            }
            let Some(pkg_dir) = package.go_files.first().and_then(|file| file.parent()) else {
                // This package is empty - nothing to do.
                continue;
            };

            done += 1;
            self.progress
                .update(&format!("Adding licences... {} of {} modules.", done, total));

            let src_root = self
                .driver
                .module_src_root(&package.module.path)
                .unwrap_or_else(|| pkg_dir.to_path_buf());
            let Some(licence_path) = licences::find_licence_file(pkg_dir, &src_root) else {
                continue;
            };
            let licence = licences::classify(&licence_path).with_context(|| {
                format!("failed to identify licence for {}", package.module.path)
            })?;
            self.modules.module_mut(module_id).licence = licence;
        }
        Ok(())
    }
}
