// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The rule graph: maps modules and parts to named rules in BUILD files.
//!
//! Reading seeds the resolver's model from existing `go_module` /
//! `go_mod_download` rules; writing re-emits the rules for everything the
//! resolver touched, with stable names across runs.

mod read;
mod write;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::buildfile;
use crate::model::{ModuleId, Modules, PartId};

static MAJOR_SEGMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^v[0-9]+$").unwrap());

/// One BUILD file's worth of state: the parsed text plus indices into it.
#[derive(Debug, Default)]
pub struct BuildFile {
    ast: buildfile::File,
    /// Rule names, keyed by the part the rule compiles.
    mod_rules: HashMap<PartId, String>,
    /// `go_mod_download` rule names by module.
    download_rules: HashMap<ModuleId, String>,
    /// Which module path owns each rule name, for collision-free naming.
    used_names: HashMap<String, String>,
}

impl BuildFile {
    fn rule_mut(&mut self, kind: &str, name: &str) -> Option<&mut buildfile::Rule> {
        self.ast
            .rules
            .iter_mut()
            .find(|rule| rule.kind == kind && rule.name() == name)
    }
}

/// Holds the model plus every BUILD file read or created during the run.
#[derive(Debug, Default)]
pub struct BuildGraph {
    pub modules: Modules,
    third_party_folder: String,
    files: BTreeMap<PathBuf, BuildFile>,
}

impl BuildGraph {
    pub fn new(third_party_folder: &str) -> Self {
        Self {
            third_party_folder: third_party_folder.to_string(),
            ..Default::default()
        }
    }

    /// The file a module's rules are emitted to for the given layout.
    fn target_path(&self, structured: bool, module_name: &str) -> PathBuf {
        let third_party = Path::new(&self.third_party_folder);
        if structured {
            third_party.join(module_name).join("BUILD")
        } else {
            third_party.join("BUILD")
        }
    }
}

/// The name suffix of a part: `""` for the namesake (last) part,
/// `_<displayIndex>` for the earlier ones.
fn part_suffix(total_parts: usize, index: usize) -> String {
    let display_index = total_parts - index;
    if display_index > 0 {
        format!("_{}", display_index)
    } else {
        String::new()
    }
}

/// Assigns a stable rule name for `module_path` + `suffix` within `file`.
///
/// Starts from the module's base path segment and extends the prefix one
/// directory up (joined by `.`) until the name no longer collides with a
/// different module. A name already assigned to the same module is reused,
/// which keeps reruns stable.
fn rule_name(
    file: &mut BuildFile,
    module_path: &str,
    suffix: &str,
    structured: bool,
) -> Result<String> {
    let segments: Vec<&str> = module_path.split('/').collect();
    // A bare `v2` segment says nothing in a flat file full of modules, so
    // start from the parent segment there.
    let mut depth = 1;
    if !structured && segments.len() >= 2 && MAJOR_SEGMENT_RE.is_match(segments[segments.len() - 1])
    {
        depth = 2;
    }

    loop {
        let start = segments.len().saturating_sub(depth);
        let name = format!("{}{}", segments[start..].join("."), suffix);
        match file.used_names.get(&name) {
            Some(owner) if owner != module_path => {
                if start == 0 {
                    bail!(
                        "rule name {} is claimed by both {} and {}",
                        name,
                        owner,
                        module_path
                    );
                }
                depth += 1;
            }
            _ => {
                file.used_names.insert(name.clone(), module_path.to_string());
                return Ok(name);
            }
        }
    }
}

/// The rule name for `part`: the existing rule's name when one was read,
/// otherwise a freshly assigned (and reserved) one.
fn name_for_part(
    file: &mut BuildFile,
    modules: &Modules,
    part: PartId,
    structured: bool,
) -> Result<String> {
    if let Some(name) = file.mod_rules.get(&part) {
        return Ok(name.clone());
    }
    let part_ref = modules.part(part);
    let module = modules.module(part_ref.module);
    let suffix = part_suffix(module.parts.len(), part_ref.index);
    rule_name(file, &module.name, &suffix, structured)
}

/// The install entry for a package: its path below the module, `"."` for the
/// module root.
fn to_install(modules: &Modules, pkg: crate::model::PackageId) -> String {
    let package = modules.package(pkg);
    let install = package
        .import_path
        .strip_prefix(&package.module)
        .unwrap_or("")
        .trim_matches('/');
    if install.is_empty() {
        ".".to_string()
    } else {
        install.to_string()
    }
}
