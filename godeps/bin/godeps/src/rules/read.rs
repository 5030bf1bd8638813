// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs;
use std::path::Path;

use anyhow::Result;

use crate::error::Error;
use crate::rules::{BuildFile, BuildGraph};

impl BuildGraph {
    /// Reads an existing BUILD file and seeds the model from its rules.
    ///
    /// A missing file is fine; it reads as empty. Each `go_module` rule
    /// becomes a fresh part: non-wildcard install entries become packages,
    /// `sub/...` entries are recorded as wildcards, and a missing install
    /// means the module root.
    pub fn read_rules(&mut self, path: &Path) -> Result<()> {
        // The file doesn't have to exist yet.
        let text = fs::read_to_string(path).unwrap_or_default();
        let ast = buildfile_parse(path, &text)?;
        let mut file = BuildFile {
            ast,
            ..Default::default()
        };

        for index in file.ast.rules_of_kind("go_module") {
            let rule = &file.ast.rules[index];
            let Some(module_name) = rule.attr_str("module").map(str::to_string) else {
                continue;
            };
            let name = rule.name().to_string();
            let version = rule.attr_str("version").unwrap_or("").to_string();
            let licences = rule.attr_list("licences");
            let mut install = rule.attr_list("install");
            if install.is_empty() {
                install.push(".".to_string());
            }

            let module_id = self.modules.get_module(&module_name);
            let part = self.modules.new_part(module_id);
            for entry in &install {
                if entry == "..." {
                    self.modules
                        .part_mut(part)
                        .install_wildcards
                        .push(String::new());
                } else if let Some(prefix) = entry.strip_suffix("/...") {
                    self.modules
                        .part_mut(part)
                        .install_wildcards
                        .push(prefix.to_string());
                } else {
                    let import_path = if entry == "." {
                        module_name.clone()
                    } else {
                        format!("{}/{}", module_name, entry)
                    };
                    let pkg = self.modules.get_package(&import_path);
                    self.modules.package_mut(pkg).module = module_name.clone();
                    self.modules.assign(pkg, part);
                }
            }

            // The resolver's min-version logic considers the pinned version.
            if !version.is_empty() {
                self.modules.module_mut(module_id).version = version;
            }
            if let Some(licence) = licences.first() {
                if self.modules.module(module_id).licence.is_empty() {
                    self.modules.module_mut(module_id).licence = licence.clone();
                }
            }

            file.mod_rules.insert(part, name.clone());
            file.used_names.insert(name, module_name);
        }

        for index in file.ast.rules_of_kind("go_mod_download") {
            let rule = &file.ast.rules[index];
            let Some(module_name) = rule.attr_str("module").map(str::to_string) else {
                continue;
            };
            let module_id = self.modules.get_module(&module_name);
            let version = rule.attr_str("version").unwrap_or("");
            if !version.is_empty() && self.modules.module(module_id).version.is_empty() {
                self.modules.module_mut(module_id).version = version.to_string();
            }
            file.download_rules.insert(module_id, rule.name().to_string());
            file.used_names
                .insert(rule.name().to_string(), module_name);
        }

        self.files.insert(path.to_path_buf(), file);
        Ok(())
    }
}

fn buildfile_parse(path: &Path, text: &str) -> Result<crate::buildfile::File> {
    crate::buildfile::parse(text).map_err(|err| {
        Error::BuildFileParse {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
        .into()
    })
}
