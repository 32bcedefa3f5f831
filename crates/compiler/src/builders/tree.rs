// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Registration: feeds a parsed module into the code tree as deferred
//! nodes. No resolution happens here; names that collide with scope
//! keywords are rejected immediately since no amount of retrying fixes
//! them.

use crate::ast::{Declaration, Module};
use crate::code_tree::CodeTree;
use crate::diagnostics::{Diagnostics, WarningCode};

/// Names that the scope rules claim for themselves. A var or proc with one
/// of these names could never be referenced.
const SCOPE_KEYWORDS: &[&str] = &["src", "usr", "args", "world", "global", "null"];

pub fn register_module(code_tree: &mut CodeTree, diagnostics: &mut Diagnostics, module: &Module) {
    for declaration in &module.declarations {
        match declaration {
            Declaration::Type(decl) => code_tree.add_type(decl.clone()),
            Declaration::Var(decl) => {
                if SCOPE_KEYWORDS.contains(&decl.name.as_str()) {
                    diagnostics.forced_error(
                        WarningCode::HardReservedKeyword,
                        decl.location,
                        format!("\"{}\" cannot be used as a var name", decl.name),
                    );
                    continue;
                }
                code_tree.add_var(decl.clone());
            }
            Declaration::VarOverride(decl) => {
                // `parent_type = /some/path` is not a var at all; it rewires
                // the type hierarchy.
                if decl.name == "parent_type" {
                    code_tree.add_parent_override(
                        decl.owner.clone(),
                        decl.value.clone(),
                        decl.location,
                    );
                    continue;
                }
                code_tree.add_var_override(decl.clone());
            }
            Declaration::Proc(decl) => {
                if SCOPE_KEYWORDS.contains(&decl.name.as_str()) {
                    diagnostics.forced_error(
                        WarningCode::HardReservedKeyword,
                        decl.location,
                        format!("\"{}\" cannot be used as a proc name", decl.name),
                    );
                    continue;
                }
                code_tree.add_proc(decl.clone());
            }
        }
    }
}
