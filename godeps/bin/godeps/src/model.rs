// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The package/module/part model.
//!
//! Packages refer to each other across modules and parts refer back to their
//! module, so the graph is realized as an arena: [`Modules`] exclusively owns
//! every [`Package`], [`Module`] and [`ModulePart`], and everything else holds
//! copyable ids into it.

use std::collections::{BTreeSet, HashMap};

/// Identifies a [`Package`] within a [`Modules`] container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(usize);

/// Identifies a [`Module`] within a [`Modules`] container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(usize);

/// Identifies a [`ModulePart`] within a [`Modules`] container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartId(usize);

/// A single package in some module.
#[derive(Debug)]
pub struct Package {
    /// The full import path of this package.
    pub import_path: String,

    /// The module name this package belongs to. Empty until resolved.
    pub module: String,

    /// Any packages in other modules this package imports. Intra-module
    /// imports are implicit and never recorded here.
    pub imports: Vec<PackageId>,

    /// True once the imports have been populated from the driver.
    pub resolved: bool,
}

/// A module. It includes all parts so actually represents a full module graph.
#[derive(Debug)]
pub struct Module {
    /// The module name.
    pub name: String,

    pub version: String,
    pub licence: String,

    /// Parts in index order: `parts[i]` has index `i + 1`.
    pub parts: Vec<PartId>,
}

/// Corresponds to a `go_module()` rule that compiles some (or all) packages
/// from a module. In most cases there's one part per module except where we
/// need to split it out to resolve a cycle.
#[derive(Debug)]
pub struct ModulePart {
    pub module: ModuleId,

    /// The packages in this part.
    pub packages: BTreeSet<PackageId>,

    /// Install entries matched with `...`, stored without the `/...` suffix.
    pub install_wildcards: Vec<String>,

    /// The 1-based index of this part within `module.parts`.
    pub index: usize,

    /// True when this part has been edited during the current run and must be
    /// re-emitted.
    pub modified: bool,
}

/// The arena container indexing every known package, module and part.
#[derive(Debug, Default)]
pub struct Modules {
    packages: Vec<Package>,
    modules: Vec<Module>,
    parts: Vec<ModulePart>,

    pkgs: HashMap<String, PackageId>,
    mods: HashMap<String, ModuleId>,
    import_paths: HashMap<PackageId, PartId>,
}

impl Modules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets an existing package by import path or creates a new one.
    pub fn get_package(&mut self, path: &str) -> PackageId {
        if let Some(&id) = self.pkgs.get(path) {
            return id;
        }
        let id = PackageId(self.packages.len());
        self.packages.push(Package {
            import_path: path.to_string(),
            module: String::new(),
            imports: Vec::new(),
            resolved: false,
        });
        self.pkgs.insert(path.to_string(), id);
        id
    }

    /// Gets an existing module by path or creates a new one.
    pub fn get_module(&mut self, path: &str) -> ModuleId {
        if let Some(&id) = self.mods.get(path) {
            return id;
        }
        let id = ModuleId(self.modules.len());
        self.modules.push(Module {
            name: path.to_string(),
            version: String::new(),
            licence: String::new(),
            parts: Vec::new(),
        });
        self.mods.insert(path.to_string(), id);
        id
    }

    /// Appends a fresh part with the next index to `module`.
    pub fn new_part(&mut self, module: ModuleId) -> PartId {
        let id = PartId(self.parts.len());
        let index = self.modules[module.0].parts.len() + 1;
        self.parts.push(ModulePart {
            module,
            packages: BTreeSet::new(),
            install_wildcards: Vec::new(),
            index,
            modified: false,
        });
        self.modules[module.0].parts.push(id);
        id
    }

    pub fn lookup_package(&self, path: &str) -> Option<PackageId> {
        self.pkgs.get(path).copied()
    }

    pub fn lookup_module(&self, path: &str) -> Option<ModuleId> {
        self.mods.get(path).copied()
    }

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id.0]
    }

    pub fn package_mut(&mut self, id: PackageId) -> &mut Package {
        &mut self.packages[id.0]
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0]
    }

    pub fn part(&self, id: PartId) -> &ModulePart {
        &self.parts[id.0]
    }

    pub fn part_mut(&mut self, id: PartId) -> &mut ModulePart {
        &mut self.parts[id.0]
    }

    pub fn package_ids(&self) -> impl Iterator<Item = PackageId> {
        (0..self.packages.len()).map(PackageId)
    }

    pub fn module_ids(&self) -> impl Iterator<Item = ModuleId> {
        (0..self.modules.len()).map(ModuleId)
    }

    /// The part a package has been assigned to, if any.
    pub fn part_of(&self, pkg: PackageId) -> Option<PartId> {
        self.import_paths.get(&pkg).copied()
    }

    /// Places `pkg` into `part` and records the assignment.
    pub fn assign(&mut self, pkg: PackageId, part: PartId) {
        self.parts[part.0].packages.insert(pkg);
        self.import_paths.insert(pkg, part);
    }

    /// True when any part of `module` was edited this run.
    pub fn module_modified(&self, module: ModuleId) -> bool {
        self.modules[module.0]
            .parts
            .iter()
            .any(|&part| self.parts[part.0].modified)
    }

    /// Returns the `sub/...` install entry of `part` covering `pkg`, if any.
    pub fn wildcard_import_of(&self, part: PartId, pkg: PackageId) -> Option<String> {
        let pkg = &self.packages[pkg.0];
        for wildcard in &self.parts[part.0].install_wildcards {
            let wildcard_path = if wildcard.is_empty() || wildcard == "." {
                pkg.module.clone()
            } else {
                format!("{}/{}", pkg.module, wildcard)
            };
            if pkg.import_path.starts_with(&wildcard_path) {
                if wildcard.is_empty() || wildcard == "." {
                    return Some("...".to_string());
                }
                return Some(format!("{}/...", wildcard));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_package_is_idempotent() {
        let mut modules = Modules::new();
        let a = modules.get_package("github.com/example/mod/foo");
        let b = modules.get_package("github.com/example/mod/foo");
        assert_eq!(a, b);
        assert!(!modules.package(a).resolved);
    }

    #[test]
    fn parts_are_indexed_from_one() {
        let mut modules = Modules::new();
        let m = modules.get_module("github.com/example/mod");
        let p1 = modules.new_part(m);
        let p2 = modules.new_part(m);
        assert_eq!(modules.part(p1).index, 1);
        assert_eq!(modules.part(p2).index, 2);
        assert_eq!(modules.module(m).parts, vec![p1, p2]);
    }

    #[test]
    fn wildcard_covers_sub_packages() {
        let mut modules = Modules::new();
        let m = modules.get_module("github.com/example/mod");
        let part = modules.new_part(m);
        modules.part_mut(part).install_wildcards.push("foo".to_string());

        let covered = modules.get_package("github.com/example/mod/foo/bar");
        modules.package_mut(covered).module = "github.com/example/mod".to_string();
        let uncovered = modules.get_package("github.com/example/mod/baz");
        modules.package_mut(uncovered).module = "github.com/example/mod".to_string();

        assert_eq!(
            modules.wildcard_import_of(part, covered),
            Some("foo/...".to_string())
        );
        assert_eq!(modules.wildcard_import_of(part, uncovered), None);
    }
}
