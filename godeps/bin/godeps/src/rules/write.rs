// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use itertools::Itertools;

use crate::buildfile::Expr;
use crate::error::Error;
use crate::model::{ModuleId, Modules};
use crate::rules::{name_for_part, rule_name, to_install, BuildFile, BuildGraph};

impl BuildGraph {
    /// Rewrites the rules for every module in the model.
    ///
    /// Emission is deterministic: modules sorted by name, parts in index
    /// order, list attributes sorted with `"."` hoisted to the front of
    /// `install`. With `write` unset the files are printed to stdout under
    /// `# {path}` banners instead of being written.
    pub fn save(&mut self, structured: bool, write: bool) -> Result<()> {
        let mut module_ids: Vec<ModuleId> = self
            .modules
            .module_ids()
            .filter(|&id| !self.modules.module(id).parts.is_empty())
            .collect();
        module_ids.sort_by(|&a, &b| {
            self.modules
                .module(a)
                .name
                .cmp(&self.modules.module(b).name)
        });

        let mut emitted: BTreeSet<PathBuf> = BTreeSet::new();
        for module_id in module_ids {
            let path = self.target_path(structured, &self.modules.module(module_id).name);
            emitted.insert(path.clone());
            let file = self.files.entry(path).or_default();
            emit_module(
                file,
                &self.modules,
                module_id,
                structured,
                &self.third_party_folder,
            )?;
        }

        for path in emitted {
            let text = self.files[&path].ast.format();
            if write {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|source| Error::BuildFileWrite {
                        path: path.clone(),
                        source,
                    })?;
                }
                fs::write(&path, &text).map_err(|source| Error::BuildFileWrite {
                    path: path.clone(),
                    source,
                })?;
            } else {
                println!("# {}", path.display());
                println!("{}", text);
            }
        }
        Ok(())
    }
}

fn emit_module(
    file: &mut BuildFile,
    modules: &Modules,
    module_id: ModuleId,
    structured: bool,
    third_party_folder: &str,
) -> Result<()> {
    let module = modules.module(module_id);
    let parts = module.parts.clone();
    let split = parts.len() > 1;

    // A split module downloads once and compiles per part; everything else
    // carries its version on the rule itself.
    let dl_name = if split {
        let name = match file.download_rules.get(&module_id) {
            Some(name) => name.clone(),
            None => {
                let name = rule_name(file, &module.name, "_dl", structured)?;
                file.ast.add_rule("go_mod_download", &name);
                file.download_rules.insert(module_id, name.clone());
                name
            }
        };
        let rule = file
            .rule_mut("go_mod_download", &name)
            .with_context(|| format!("missing download rule {}", name))?;
        for attr in ["module", "version", "licences"] {
            rule.del_attr(attr);
        }
        rule.set_attr("module", Expr::str(module.name.as_str()));
        rule.set_attr("version", Expr::str(module.version.as_str()));
        if !module.licence.is_empty() {
            rule.set_attr("licences", Expr::str_list([module.licence.as_str()]));
        }
        Some(name)
    } else {
        // The module collapsed back to a single part; its download rule is
        // stale now.
        if let Some(name) = file.download_rules.remove(&module_id) {
            file.ast.del_rule("go_mod_download", &name);
            file.used_names.remove(&name);
        }
        None
    };

    for &part_id in &parts {
        let name = name_for_part(file, modules, part_id, structured)?;
        let exists = file.mod_rules.contains_key(&part_id);
        let part = modules.part(part_id);
        if exists && !part.modified {
            continue;
        }
        if !exists {
            file.ast.add_rule("go_module", &name);
            file.mod_rules.insert(part_id, name.clone());
        }

        let mut installs: Vec<String> = Vec::new();
        for &pkg in &part.packages {
            match modules.wildcard_import_of(part_id, pkg) {
                Some(wildcard) => installs.push(wildcard),
                None => installs.push(to_install(modules, pkg)),
            }
        }
        for wildcard in &part.install_wildcards {
            installs.push(if wildcard.is_empty() {
                "...".to_string()
            } else {
                format!("{}/...", wildcard)
            });
        }
        let mut installs: Vec<String> = installs.into_iter().sorted().dedup().collect();
        if let Some(position) = installs.iter().position(|entry| entry == ".") {
            let dot = installs.remove(position);
            installs.insert(0, dot);
        }

        let mut deps: Vec<String> = Vec::new();
        for &pkg in &part.packages {
            for &import in &modules.package(pkg).imports {
                let dep_part = modules.part_of(import).ok_or_else(|| {
                    Error::Invariant(format!(
                        "imported package {} has no module part",
                        modules.package(import).import_path
                    ))
                })?;
                if modules.part(dep_part).module == module_id {
                    continue;
                }
                if structured {
                    let dep_module = modules.module(modules.part(dep_part).module);
                    deps.push(format!("//{}/{}", third_party_folder, dep_module.name));
                } else {
                    let dep_name = name_for_part(file, modules, dep_part, structured)?;
                    deps.push(format!(":{}", dep_name));
                }
            }
        }
        let deps: Vec<String> = deps.into_iter().sorted().dedup().collect();

        // The last part is the namesake: it exports the rest of the parts
        // and is the module's public face.
        let namesake = part.index == parts.len();
        let mut exported_deps = Vec::new();
        if namesake && split {
            for &earlier in &parts[..parts.len() - 1] {
                exported_deps.push(format!(
                    ":{}",
                    name_for_part(file, modules, earlier, structured)?
                ));
            }
        }

        let rule = file
            .rule_mut("go_module", &name)
            .with_context(|| format!("missing module rule {}", name))?;
        // Reset everything we manage so reruns stay idempotent.
        for attr in [
            "module",
            "version",
            "download",
            "install",
            "deps",
            "exported_deps",
            "licences",
            "visibility",
        ] {
            rule.del_attr(attr);
        }

        rule.set_attr("module", Expr::str(module.name.as_str()));
        match &dl_name {
            Some(dl_name) => rule.set_attr("download", Expr::str(format!(":{}", dl_name))),
            None => rule.set_attr("version", Expr::str(module.version.as_str())),
        }
        if !(installs.len() == 1 && installs[0] == ".") && !installs.is_empty() {
            rule.set_attr("install", Expr::str_list(installs));
        }
        if !deps.is_empty() {
            rule.set_attr("deps", Expr::str_list(deps));
        }
        if !exported_deps.is_empty() {
            rule.set_attr("exported_deps", Expr::str_list(exported_deps));
        }
        if dl_name.is_none() && !module.licence.is_empty() {
            rule.set_attr("licences", Expr::str_list([module.licence.as_str()]));
        }
        if namesake {
            rule.set_attr("visibility", Expr::str_list(["PUBLIC"]));
        }
    }
    Ok(())
}
