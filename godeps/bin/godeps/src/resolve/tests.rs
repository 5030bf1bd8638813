// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use anyhow::Result;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;
use crate::driver::{DriverPackage, DriverResponse, ImportDriver, ModuleRef};
use crate::model::Modules;
use crate::progress::Progress;

/// An [`ImportDriver`] answering from a canned package universe.
#[derive(Default)]
struct FakeDriver {
    universe: BTreeMap<String, DriverPackage>,
    versions: HashMap<String, String>,
    calls: Vec<Vec<String>>,
}

impl FakeDriver {
    fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, id: &str, module: &str, version: &str, imports: &[&str]) -> &mut Self {
        self.universe.insert(
            id.to_string(),
            DriverPackage {
                id: id.to_string(),
                name: id.rsplit('/').next().unwrap_or(id).to_string(),
                pkg_path: id.to_string(),
                module: ModuleRef {
                    path: module.to_string(),
                    version: version.to_string(),
                },
                go_files: vec![PathBuf::from(format!("{}/pkg.go", id))],
                imports: imports.iter().map(|import| import.to_string()).collect(),
                errors: Vec::new(),
            },
        );
        self
    }

    fn with_version(&mut self, module: &str, version: &str) -> &mut Self {
        self.versions.insert(module.to_string(), version.to_string());
        self
    }
}

impl ImportDriver for FakeDriver {
    fn resolve(&mut self, patterns: &[String]) -> Result<DriverResponse> {
        self.calls.push(patterns.to_vec());

        let mut roots = Vec::new();
        for pattern in patterns {
            let base = pattern.split('@').next().unwrap_or(pattern);
            match base.strip_suffix("/...") {
                Some(prefix) => {
                    for id in self.universe.keys() {
                        if id == prefix || id.starts_with(&format!("{}/", prefix)) {
                            roots.push(id.clone());
                        }
                    }
                }
                None => {
                    if self.universe.contains_key(base) {
                        roots.push(base.to_string());
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        let mut stack = roots.clone();
        let mut packages = Vec::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(package) = self.universe.get(&id) else {
                continue;
            };
            stack.extend(
                package
                    .imports
                    .iter()
                    .filter(|import| self.universe.contains_key(*import))
                    .cloned(),
            );
            packages.push(package.clone());
        }
        packages.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(DriverResponse { roots, packages })
    }

    fn list_module_versions(&mut self, modules: &[String]) -> Result<Vec<(String, String)>> {
        modules
            .iter()
            .map(|module| match self.versions.get(module) {
                Some(version) => Ok((module.clone(), version.clone())),
                None => Err(crate::error::Error::VersionListFailure(format!(
                    "no version for {}",
                    module
                ))
                .into()),
            })
            .collect()
    }

    fn module_src_root(&self, _module: &str) -> Option<PathBuf> {
        None
    }
}

fn resolver<'a>(modules: &'a mut Modules, driver: &'a mut FakeDriver) -> Resolver<'a> {
    Resolver {
        modules,
        driver,
        root_module_name: ".".to_string(),
        progress: Progress::silent(),
    }
}

/// All parts a part transitively depends on. Puts `from` into `parts` when a
/// cycle back to it exists.
fn find_part_deps(
    modules: &Modules,
    from: crate::model::PartId,
    current: crate::model::PartId,
    parts: &mut HashSet<crate::model::PartId>,
) {
    for &pkg in &modules.part(current).packages {
        for &import in &modules.package(pkg).imports {
            let part = modules.part_of(import).unwrap();
            if part == current {
                continue;
            }
            if part == from {
                parts.insert(part);
                return;
            }
            if parts.insert(part) {
                find_part_deps(modules, from, part, parts);
            }
        }
    }
}

fn assert_no_part_cycles(modules: &Modules) {
    for module_id in modules.module_ids() {
        for &part in &modules.module(module_id).parts {
            let mut deps = HashSet::new();
            find_part_deps(modules, part, part, &mut deps);
            assert!(
                !deps.contains(&part),
                "found dependency cycle through a part of {}",
                modules.module(module_id).name
            );
        }
    }
}

#[test]
fn depends_on_detects_module_cycles() {
    let mut modules = Modules::new();

    // Package structure:
    // m1/p1 --> m2/p2 --> m3/p3 --> m4/p4
    // m1/p1    <--------------     m4/p5

    let m1p1 = modules.get_package("m1/p1");
    let m2p2 = modules.get_package("m2/p2");
    let m3p3 = modules.get_package("m3/p3");
    let m4p4 = modules.get_package("m4/p4");
    let m4p5 = modules.get_package("m4/p5");

    modules.package_mut(m1p1).module = "m1".to_string();
    modules.package_mut(m2p2).module = "m2".to_string();
    modules.package_mut(m3p3).module = "m3".to_string();
    modules.package_mut(m4p4).module = "m4".to_string();
    modules.package_mut(m4p5).module = "m4".to_string();

    modules.package_mut(m1p1).imports = vec![m2p2];
    modules.package_mut(m2p2).imports = vec![m3p3];
    modules.package_mut(m3p3).imports = vec![m4p4];
    // Causes a module cycle.
    modules.package_mut(m4p5).imports = vec![m1p1];

    let mut driver = FakeDriver::new();
    let mut resolver = resolver(&mut modules, &mut driver);

    resolver
        .add_package_to_module_graph(&mut HashSet::new(), m1p1)
        .unwrap();
    resolver
        .add_package_to_module_graph(&mut HashSet::new(), m4p5)
        .unwrap();

    // m4/p5 has an import that depends on m4/p4's part, creating a module
    // cycle.
    let target = resolver.modules.part_of(m4p4).unwrap();
    assert!(resolver
        .depends_on(&mut HashSet::new(), m1p1, target)
        .unwrap());

    // That was resolved by creating a new part holding only p5.
    let m4 = resolver.modules.lookup_module("m4").unwrap();
    let parts = resolver.modules.module(m4).parts.clone();
    assert_eq!(parts.len(), 2);
    let new_part = resolver.modules.part(parts[1]);
    assert!(new_part.packages.contains(&m4p5));
    assert_eq!(new_part.packages.len(), 1);

    assert_no_part_cycles(resolver.modules);
}

#[test]
fn resolves_cycles() {
    // This package structure is a simplified form of the
    // cloud.google.com/go module graph.
    let packages: Vec<(&str, Vec<&str>)> = vec![
        ("google.golang.org/grpc/codes", vec![]),
        ("google.golang.org/grpc", vec![]),
        ("google.golang.org/grpc/status", vec![]),
        ("google.golang.org/grpc/metadata", vec![]),
        ("golang.org/x/oauth2", vec![]),
        ("cloud.google.com/go/compute/metadata", vec![]),
        (
            "golang.org/x/oauth2/google",
            vec!["cloud.google.com/go/compute/metadata"],
        ),
        ("golang.org/x/oauth2/jwt", vec![]),
        (
            "google.golang.org/grpc/credentials/oauth",
            vec![
                "golang.org/x/oauth2",
                "golang.org/x/oauth2/google",
                "golang.org/x/oauth2/jwt",
            ],
        ),
        (
            "github.com/googleapis/gax-go/v2",
            vec![
                "google.golang.org/grpc/codes",
                "google.golang.org/grpc/status",
                "google.golang.org/grpc",
            ],
        ),
        (
            "cloud.google.com/go/talent/apiv4beta1",
            vec![
                "google.golang.org/grpc/codes",
                "github.com/googleapis/gax-go/v2",
                "google.golang.org/grpc",
                "google.golang.org/grpc/metadata",
            ],
        ),
    ];

    let module_for = |path: &str| {
        for module in [
            "google.golang.org/grpc",
            "cloud.google.com/go",
            "golang.org/x/oauth2",
            "github.com/googleapis/gax-go/v2",
        ] {
            if path.starts_with(module) {
                return module.to_string();
            }
        }
        panic!("can't determine module for {}", path);
    };

    let mut modules = Modules::new();
    for (import_path, imports) in &packages {
        let pkg = modules.get_package(import_path);
        modules.package_mut(pkg).module = module_for(import_path);
        for import in imports {
            let imported = modules.get_package(import);
            modules.package_mut(pkg).imports.push(imported);
        }
    }

    let mut driver = FakeDriver::new();
    let mut resolver = resolver(&mut modules, &mut driver);
    resolver.add_packages_to_modules(&mut HashSet::new()).unwrap();

    let cgo = resolver.modules.lookup_module("cloud.google.com/go").unwrap();
    assert_eq!(resolver.modules.module(cgo).parts.len(), 2);
    let grpc = resolver
        .modules
        .lookup_module("google.golang.org/grpc")
        .unwrap();
    assert_eq!(resolver.modules.module(grpc).parts.len(), 1);

    assert_no_part_cycles(resolver.modules);
}

#[test]
fn update_modules_covers_every_package() {
    let mut driver = FakeDriver::new();
    driver
        .add(
            "golang.org/x/mod/semver",
            "golang.org/x/mod",
            "v0.4.2",
            &[],
        )
        .add(
            "golang.org/x/mod/modfile",
            "golang.org/x/mod",
            "v0.4.2",
            &["fmt", "golang.org/x/mod/semver", "golang.org/x/tools/txtar"],
        )
        .add(
            "golang.org/x/tools/txtar",
            "golang.org/x/tools",
            "v0.1.0",
            &["strings"],
        );

    let mut modules = Modules::new();
    update_modules(
        &mut modules,
        &["golang.org/x/mod/...".to_string()],
        &mut driver,
        "",
        Progress::silent(),
    )
    .unwrap();

    // Coverage: every discovered package sits in exactly one part.
    for pkg in modules.package_ids().collect::<Vec<_>>() {
        let package = modules.package(pkg);
        assert!(
            modules.part_of(pkg).is_some(),
            "{} was not assigned",
            package.import_path
        );
        // The standard library never makes it into the model.
        assert!(
            !crate::knownimports::is_known(&package.import_path),
            "{} is a standard library package",
            package.import_path
        );
    }

    let x_mod = modules.lookup_module("golang.org/x/mod").unwrap();
    assert_eq!(modules.module(x_mod).version, "v0.4.2");
    assert_eq!(modules.module(x_mod).parts.len(), 1);

    // The cross-module edge survived; the intra-module one did not.
    let modfile = modules.lookup_package("golang.org/x/mod/modfile").unwrap();
    let txtar = modules.lookup_package("golang.org/x/tools/txtar").unwrap();
    assert_eq!(modules.package(modfile).imports, vec![txtar]);

    assert_no_part_cycles(&modules);
}

#[test]
fn wildcard_matched_packages_do_not_modify_the_part() {
    // An existing rule with install = ["foo/..."] and a resolution that
    // discovers {module}/foo/bar.
    let mut modules = Modules::new();
    let module_id = modules.get_module("github.com/example/mod");
    let part = modules.new_part(module_id);
    modules
        .part_mut(part)
        .install_wildcards
        .push("foo".to_string());

    let mut driver = FakeDriver::new();
    driver.add(
        "github.com/example/mod/foo/bar",
        "github.com/example/mod",
        "v1.0.0",
        &[],
    );

    update_modules(
        &mut modules,
        &["github.com/example/mod/foo/bar".to_string()],
        &mut driver,
        "",
        Progress::silent(),
    )
    .unwrap();

    let bar = modules
        .lookup_package("github.com/example/mod/foo/bar")
        .unwrap();
    assert_eq!(modules.part_of(bar), Some(part));
    assert!(!modules.part(part).modified);
}

#[test]
fn modified_parts_are_reresolved() {
    // The existing rule declared install = ["foo/..."]; its packages were
    // never analysed. A new non-wildcard package modifies the part, which
    // must trigger re-resolution of the wildcard-covered package.
    let mut modules = Modules::new();
    let module_id = modules.get_module("github.com/example/mod");
    let part = modules.new_part(module_id);
    modules
        .part_mut(part)
        .install_wildcards
        .push("foo".to_string());
    let foo = modules.get_package("github.com/example/mod/foo");
    modules.package_mut(foo).module = "github.com/example/mod".to_string();
    modules.assign(foo, part);

    let mut driver = FakeDriver::new();
    driver
        .add(
            "github.com/example/mod/foo",
            "github.com/example/mod",
            "v1.0.0",
            &["golang.org/x/mod/semver"],
        )
        .add(
            "github.com/example/mod/baz",
            "github.com/example/mod",
            "v1.0.0",
            &[],
        )
        .add(
            "golang.org/x/mod/semver",
            "golang.org/x/mod",
            "v0.4.2",
            &[],
        );

    update_modules(
        &mut modules,
        &["github.com/example/mod/baz".to_string()],
        &mut driver,
        "",
        Progress::silent(),
    )
    .unwrap();

    // The driver was invoked a second time for the wildcard-covered package.
    assert_eq!(driver.calls.len(), 2);
    assert_eq!(
        driver.calls[1],
        vec!["github.com/example/mod/foo".to_string()]
    );

    // Its imports are now known and assigned.
    assert!(modules.package(foo).resolved);
    let semver = modules.lookup_package("golang.org/x/mod/semver").unwrap();
    assert_eq!(modules.package(foo).imports, vec![semver]);
    assert!(modules.part_of(semver).is_some());

    assert_no_part_cycles(&modules);
}

#[test]
fn versions_are_backfilled_through_the_driver() {
    let mut modules = Modules::new();
    let module_id = modules.get_module("github.com/example/unversioned");
    let part = modules.new_part(module_id);
    let pkg = modules.get_package("github.com/example/unversioned");
    modules.package_mut(pkg).module = "github.com/example/unversioned".to_string();
    modules.package_mut(pkg).resolved = true;
    modules.assign(pkg, part);
    modules.part_mut(part).modified = true;

    let mut driver = FakeDriver::new();
    driver.with_version("github.com/example/unversioned", "v2.1.0");

    update_modules(&mut modules, &[], &mut driver, "", Progress::silent()).unwrap();

    assert_eq!(modules.module(module_id).version, "v2.1.0");
}

#[test]
fn stored_versions_never_decrease() {
    // A rule already pins a version above what the driver proposes.
    let mut modules = Modules::new();
    let module_id = modules.get_module("golang.org/x/mod");
    modules.module_mut(module_id).version = "v0.5.0".to_string();

    let mut driver = FakeDriver::new();
    driver.add(
        "golang.org/x/mod/semver",
        "golang.org/x/mod",
        "v0.4.2",
        &[],
    );

    update_modules(
        &mut modules,
        &["golang.org/x/mod/semver".to_string()],
        &mut driver,
        "",
        Progress::silent(),
    )
    .unwrap();
    assert_eq!(modules.module(module_id).version, "v0.5.0");

    // A higher driver version still wins.
    let mut modules = Modules::new();
    let module_id = modules.get_module("golang.org/x/mod");
    modules.module_mut(module_id).version = "v0.4.0".to_string();
    update_modules(
        &mut modules,
        &["golang.org/x/mod/semver".to_string()],
        &mut driver,
        "",
        Progress::silent(),
    )
    .unwrap();
    assert_eq!(modules.module(module_id).version, "v0.4.2");
}

#[test]
fn driver_errors_fail_the_resolve() {
    let mut driver = FakeDriver::new();
    driver.add("github.com/example/mod", "github.com/example/mod", "v1.0.0", &[]);
    driver
        .universe
        .get_mut("github.com/example/mod")
        .unwrap()
        .errors
        .push("expected 'package', found 'EOF'".to_string());

    let mut modules = Modules::new();
    let err = update_modules(
        &mut modules,
        &["github.com/example/mod".to_string()],
        &mut driver,
        "",
        Progress::silent(),
    )
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<crate::error::Error>(),
        Some(crate::error::Error::PackageAnalysis(_))
    ));
}

#[test]
fn root_module_packages_are_not_assigned() {
    let mut driver = FakeDriver::new();
    driver
        .add(
            "github.com/example/repo/cmd",
            "github.com/example/repo",
            "",
            &["golang.org/x/mod/semver"],
        )
        .add(
            "golang.org/x/mod/semver",
            "golang.org/x/mod",
            "v0.4.2",
            &[],
        );

    let mut modules = Modules::new();
    update_modules(
        &mut modules,
        &["github.com/example/repo/cmd".to_string()],
        &mut driver,
        "github.com/example/repo",
        Progress::silent(),
    )
    .unwrap();

    let cmd = modules.lookup_package("github.com/example/repo/cmd").unwrap();
    assert_eq!(modules.part_of(cmd), None);
    let semver = modules.lookup_package("golang.org/x/mod/semver").unwrap();
    assert!(modules.part_of(semver).is_some());
}

proptest! {
    /// For any random package-level DAG, the inter-part graph stays acyclic
    /// and every package lands in exactly one part.
    #[test]
    fn assignment_never_creates_part_cycles(
        edges in proptest::collection::vec((0usize..40, 0usize..40), 0..120),
        module_of in proptest::collection::vec(0usize..8, 40),
    ) {
        let mut modules = Modules::new();
        let mut ids = Vec::new();
        for (index, module) in module_of.iter().enumerate() {
            let pkg = modules.get_package(&format!("example.org/m{}/p{}", module, index));
            modules.package_mut(pkg).module = format!("example.org/m{}", module);
            ids.push(pkg);
        }
        for (from, to) in edges {
            // Only forward edges: Go's compiler rejects package cycles, so
            // generated graphs are DAGs too.
            if from >= to || module_of[from] == module_of[to] {
                continue;
            }
            let (from, to) = (ids[from], ids[to]);
            if !modules.package(from).imports.contains(&to) {
                modules.package_mut(from).imports.push(to);
            }
        }

        let mut driver = FakeDriver::new();
        let mut resolver = resolver(&mut modules, &mut driver);
        resolver.add_packages_to_modules(&mut HashSet::new()).unwrap();

        for pkg in ids {
            prop_assert!(resolver.modules.part_of(pkg).is_some());
        }
        assert_no_part_cycles(resolver.modules);
    }
}
