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

//! Deferred type declarations (including `parent_type` rewiring) and proc
//! definitions.

use dreamc_common::program::ProcFlags;
use dreamc_common::{Location, TypePath};

use crate::ast::{Expression, ExpressionNode, ProcDecl};
use crate::code_tree::{PendingProc, Resolution, ResolveCtx};
use crate::diagnostics::{Diagnostics, WarningCode};

pub struct TypeNode {
    path: TypePath,
    /// A `parent_type = /path` assignment; `None` for a plain declaration.
    parent: Option<Expression>,
    location: Location,
    failure: Option<String>,
}

impl TypeNode {
    pub fn new(path: TypePath, parent: Option<Expression>, location: Location) -> Self {
        TypeNode {
            path,
            parent,
            location,
            failure: None,
        }
    }

    /// Runs once before the first pass: a type whose `parent_type` is still
    /// pending must not look resolved to any node that runs earlier in
    /// registration order.
    pub fn prepare(&self, tree: &mut crate::objtree::ObjectTree) {
        if self.parent.is_some() {
            let id = tree.get_or_create(&self.path);
            tree.mark_unresolved(id);
        }
    }

    pub fn resolve(&mut self, ctx: &mut ResolveCtx) -> Resolution {
        let id = ctx.tree.get_or_create(&self.path);
        let Some(parent) = &self.parent else {
            return Resolution::Resolved;
        };

        let ExpressionNode::ConstPath(parent_path) = &parent.node else {
            ctx.tree.mark_resolved(id);
            ctx.diagnostics.forced_error(
                WarningCode::InvalidOverride,
                self.location,
                "parent_type must be a constant type path",
            );
            return Resolution::Resolved;
        };
        if !parent_path.is_absolute() || parent_path.is_root() {
            ctx.tree.mark_resolved(id);
            ctx.diagnostics.forced_error(
                WarningCode::InvalidOverride,
                self.location,
                format!("parent_type cannot be {parent_path}"),
            );
            return Resolution::Resolved;
        }

        let Some(parent_id) = ctx.tree.type_by_path(parent_path) else {
            self.failure = Some(format!("unknown parent type {parent_path}"));
            return Resolution::Pending;
        };
        if !ctx.tree.get(parent_id).resolved {
            // Still pending itself; a cycle stalls here forever and gets
            // reported as stuck.
            self.failure = Some(format!("parent type {parent_path} is not resolved"));
            return Resolution::Pending;
        }
        if ctx.tree.is_subtype(parent_id, id) {
            ctx.tree.mark_resolved(id);
            ctx.diagnostics.forced_error(
                WarningCode::InvalidOverride,
                self.location,
                format!("parent_type {parent_path} would make {} its own ancestor", self.path),
            );
            return Resolution::Resolved;
        }
        ctx.tree.set_parent(id, parent_id);
        Resolution::Resolved
    }

    pub fn report(&self, diagnostics: &mut Diagnostics) {
        let message = match &self.failure {
            Some(failure) => failure.clone(),
            None => format!("type {} could not be resolved", self.path),
        };
        diagnostics.emit(WarningCode::ItemDoesntExist, self.location, message);
    }
}

pub struct ProcNode {
    decl: ProcDecl,
    failure: Option<String>,
}

impl ProcNode {
    pub fn new(decl: ProcDecl) -> Self {
        ProcNode {
            decl,
            failure: None,
        }
    }

    /// Constructors resolve ahead of everything else in each pass, so `New`
    /// is always the first definition of its name on a type.
    pub fn is_constructor(&self) -> bool {
        self.decl.name == "New" && !self.decl.is_override
    }

    pub fn resolve(&mut self, ctx: &mut ResolveCtx) -> Resolution {
        let decl = &self.decl;
        let owner = ctx.tree.get_or_create(&decl.owner);
        if !ctx.tree.get(owner).resolved {
            self.failure = Some(format!("type {} is not resolved", decl.owner));
            return Resolution::Pending;
        }

        if decl.owner.is_root() {
            if decl.is_override {
                if ctx.tree.global_proc(&decl.name).is_none() {
                    self.failure = Some(format!(
                        "no global proc \"{}\" to redefine",
                        decl.name
                    ));
                    return Resolution::Pending;
                }
            } else if ctx.tree.global_proc(&decl.name).is_some() {
                ctx.diagnostics.forced_error(
                    WarningCode::DuplicateProcDefinition,
                    decl.location,
                    format!("global proc \"{}\" is defined twice", decl.name),
                );
                return Resolution::Resolved;
            }
        } else if decl.is_override {
            if ctx.tree.lookup_proc(owner, &decl.name).is_none() {
                self.failure = Some(format!(
                    "{} has no proc \"{}\" to override",
                    decl.owner, decl.name
                ));
                return Resolution::Pending;
            }
        } else if ctx.tree.proc_inherited(owner, &decl.name) {
            ctx.diagnostics.emit(
                WarningCode::DuplicateProcDefinition,
                decl.location,
                format!(
                    "proc \"{}\" shadows an inherited proc; omit the proc keyword to override",
                    decl.name
                ),
            );
        } else if ctx.tree.get(owner).procs.contains_key(&decl.name) {
            ctx.diagnostics.emit(
                WarningCode::DuplicateProcDefinition,
                decl.location,
                format!("{} defines \"{}\" twice", decl.owner, decl.name),
            );
        }

        let id = ctx.tree.create_proc(owner, &decl.name, decl.location);
        {
            let proc = ctx.tree.proc_mut(id);
            proc.is_verb = decl.is_verb;
            if decl.is_override {
                proc.flags |= ProcFlags::IS_OVERRIDE;
            }
            for parameter in &decl.parameters {
                if let Err(error) = proc.alloc_argument(&parameter.name, parameter.val_type) {
                    ctx.diagnostics.writer_error(parameter.location, error);
                    break;
                }
            }
        }
        if decl.is_verb {
            ctx.tree.get_mut(owner).verbs.push(id);
        }
        ctx.pending_procs.push(PendingProc {
            id,
            owner,
            parameters: decl.parameters.clone(),
            body: decl.body.clone(),
        });
        Resolution::Resolved
    }

    pub fn report(&self, diagnostics: &mut Diagnostics) {
        if self.decl.is_override {
            diagnostics.emit(
                WarningCode::DanglingOverride,
                self.decl.location,
                format!(
                    "{} has no proc \"{}\" to override",
                    self.decl.owner, self.decl.name
                ),
            );
        } else {
            let message = match &self.failure {
                Some(failure) => failure.clone(),
                None => format!("proc \"{}\" could not be resolved", self.decl.name),
            };
            diagnostics.emit(WarningCode::ItemDoesntExist, self.decl.location, message);
        }
    }
}
