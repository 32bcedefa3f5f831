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

//! Deferred var declarations and overrides.

use dreamc_common::{ComplexValType, GlobalId, TypePath};

use crate::builders::{ExprBuilder, ScopeMode};
use crate::code_tree::{GlobalInit, Resolution, ResolveCtx};
use crate::ast::{VarDecl, VarOverride};
use crate::diagnostics::{Diagnostics, WarningCode};
use crate::expr::{Constant, Expr};
use crate::objtree::{InitAssignment, VariableDecl};

/// Var names the runtime defines on every datum; redeclaring them would
/// shadow machinery user code depends on.
const BUILTIN_VAR_NAMES: &[&str] = &["type", "tag"];

pub struct VarNode {
    decl: VarDecl,
    /// Allocated on the first attempt so the slot index is stable no matter
    /// how many passes the initializer takes.
    slot: Option<GlobalId>,
    failure: Option<String>,
}

impl VarNode {
    pub fn new(decl: VarDecl) -> Self {
        VarNode {
            decl,
            slot: None,
            failure: None,
        }
    }

    fn declared_type(&self) -> ComplexValType {
        // A relative declared type is taken as rooted: `var/obj/o` means
        // `var * of type /obj`.
        let path = self.decl.decl_type.as_ref().map(|path| {
            if path.is_absolute() {
                path.clone()
            } else {
                TypePath::root().combine(path)
            }
        });
        ComplexValType::new(self.decl.val_type, path)
    }

    fn is_global(&self) -> bool {
        self.decl.modifiers.is_static || self.decl.owner.is_root()
    }

    pub fn resolve(&mut self, ctx: &mut ResolveCtx, std: bool) -> Resolution {
        let decl = &self.decl;
        let owner = ctx.tree.get_or_create(&decl.owner);
        if !ctx.tree.get(owner).resolved {
            self.failure = Some(format!("type {} is not resolved", decl.owner));
            return Resolution::Pending;
        }

        if !std && BUILTIN_VAR_NAMES.contains(&decl.name.as_str()) {
            ctx.diagnostics.forced_error(
                WarningCode::HardReservedKeyword,
                decl.location,
                format!("\"{}\" is a built-in var", decl.name),
            );
            return Resolution::Resolved;
        }

        if self.is_global() {
            self.resolve_global(ctx, owner)
        } else {
            self.resolve_instance(ctx, owner)
        }
    }

    fn resolve_global(&mut self, ctx: &mut ResolveCtx, owner: dreamc_common::TypeId) -> Resolution {
        let decl = &self.decl;
        // Duplicate check only on the first attempt, before the slot exists.
        if self.slot.is_none() {
            if ctx.tree.get(owner).global_slots.contains_key(&decl.name) {
                if decl.owner.is_root() {
                    ctx.diagnostics.forced_error(
                        WarningCode::DuplicateVariable,
                        decl.location,
                        format!("global \"{}\" is declared twice", decl.name),
                    );
                } else {
                    ctx.diagnostics.emit(
                        WarningCode::DuplicateVariable,
                        decl.location,
                        format!("static \"{}\" is declared twice", decl.name),
                    );
                }
                return Resolution::Resolved;
            }
            let slot = ctx.tree.allocate_global(
                &decl.name,
                owner,
                self.declared_type(),
                decl.modifiers.is_const,
                decl.location,
            );
            ctx.tree
                .get_mut(owner)
                .global_slots
                .insert(decl.name.clone(), slot);
            self.slot = Some(slot);
        }
        let slot = self.slot.unwrap();

        let Some(value) = &self.decl.value else {
            return Resolution::Resolved;
        };
        let value = value.clone();
        let built = match self.build_initializer(ctx, owner, &value, false) {
            Ok(built) => built,
            Err(message) => {
                self.failure = Some(message);
                return Resolution::Pending;
            }
        };
        match built.try_as_constant() {
            Some(constant) => {
                self.check_assignable(ctx, &constant);
                ctx.tree.set_global_value(slot, constant);
            }
            None if self.decl.modifiers.is_const => {
                ctx.diagnostics.emit(
                    WarningCode::HardConstContext,
                    self.decl.location,
                    format!("const \"{}\" needs a constant initializer", self.decl.name),
                );
            }
            None => ctx.global_init.push(GlobalInit {
                slot,
                value: built,
                location: self.decl.location,
            }),
        }
        Resolution::Resolved
    }

    fn resolve_instance(&mut self, ctx: &mut ResolveCtx, owner: dreamc_common::TypeId) -> Resolution {
        let decl = &self.decl;
        if ctx.tree.get(owner).vars.contains_key(&decl.name) {
            ctx.diagnostics.emit(
                WarningCode::DuplicateVariable,
                decl.location,
                format!("{} declares \"{}\" twice", decl.owner, decl.name),
            );
            return Resolution::Resolved;
        }

        let mut folded = None;
        let mut deferred = None;
        if let Some(value) = &self.decl.value {
            let value = value.clone();
            let built = match self.build_initializer(ctx, owner, &value, true) {
                Ok(built) => built,
                Err(message) => {
                    self.failure = Some(message);
                    return Resolution::Pending;
                }
            };
            match built.try_as_constant() {
                Some(constant) => {
                    self.check_assignable(ctx, &constant);
                    folded = Some(constant);
                }
                None if self.decl.modifiers.is_const => {
                    ctx.diagnostics.emit(
                        WarningCode::HardConstContext,
                        self.decl.location,
                        format!("const \"{}\" needs a constant initializer", self.decl.name),
                    );
                }
                None => deferred = Some(built),
            }
        }

        let decl = &self.decl;
        ctx.tree.get_mut(owner).vars.insert(
            decl.name.clone(),
            VariableDecl {
                name: decl.name.clone(),
                val_type: self.declared_type(),
                is_const: decl.modifiers.is_const,
                is_final: decl.modifiers.is_final,
                is_tmp: decl.modifiers.is_tmp,
                location: decl.location,
                value: folded,
            },
        );
        if let Some(value) = deferred {
            ctx.tree.get_mut(owner).init_assignments.push(InitAssignment {
                field: decl.name.clone(),
                value,
                location: decl.location,
            });
        }
        Resolution::Resolved
    }

    fn build_initializer(
        &self,
        ctx: &mut ResolveCtx,
        owner: dreamc_common::TypeId,
        value: &crate::ast::Expression,
        allow_src: bool,
    ) -> Result<Expr, String> {
        let mode = if ctx.scope_operator {
            ScopeMode::Static
        } else {
            ScopeMode::FirstPassStatic
        };
        let mut builder = ExprBuilder {
            tree: &mut *ctx.tree,
            diagnostics: &mut *ctx.diagnostics,
            owner,
            proc: None,
            mode,
            inferred: self.declared_type().as_path(),
            allow_src,
        };
        builder.build(value).map_err(|unresolved| unresolved.message)
    }

    fn check_assignable(&self, ctx: &mut ResolveCtx, constant: &Constant) {
        if matches!(constant, Constant::Null) {
            return;
        }
        if !self.declared_type().matches_flags(constant.val_type()) {
            ctx.diagnostics.emit(
                WarningCode::InvalidVarType,
                self.decl.location,
                format!(
                    "initial value of \"{}\" does not fit its declared type",
                    self.decl.name
                ),
            );
        }
    }

    pub fn report(&self, diagnostics: &mut Diagnostics) {
        let message = match &self.failure {
            Some(failure) => failure.clone(),
            None => format!("var \"{}\" could not be resolved", self.decl.name),
        };
        diagnostics.emit(WarningCode::ItemDoesntExist, self.decl.location, message);
    }
}

pub struct VarOverrideNode {
    decl: VarOverride,
    failure: Option<String>,
}

impl VarOverrideNode {
    pub fn new(decl: VarOverride) -> Self {
        VarOverrideNode {
            decl,
            failure: None,
        }
    }

    pub fn resolve(&mut self, ctx: &mut ResolveCtx) -> Resolution {
        let decl = &self.decl;
        let owner = ctx.tree.get_or_create(&decl.owner);
        if !ctx.tree.get(owner).resolved {
            self.failure = Some(format!("type {} is not resolved", decl.owner));
            return Resolution::Pending;
        }

        let Some((_, found)) = ctx.tree.var_decl(owner, &decl.name) else {
            // Statics are not per-instance; overriding one makes no sense.
            if ctx.tree.global_slot(owner, &decl.name).is_some() {
                ctx.diagnostics.emit(
                    WarningCode::StaticOverride,
                    decl.location,
                    format!("\"{}\" is a static var and cannot be overridden", decl.name),
                );
                return Resolution::Resolved;
            }
            self.failure = Some(format!(
                "{} has no var \"{}\" to override",
                decl.owner, decl.name
            ));
            return Resolution::Pending;
        };
        if found.is_const {
            ctx.diagnostics.emit(
                WarningCode::WriteToConstant,
                decl.location,
                format!("\"{}\" is declared const", decl.name),
            );
            return Resolution::Resolved;
        }
        if found.is_final {
            ctx.diagnostics.emit(
                WarningCode::FinalOverride,
                decl.location,
                format!("\"{}\" is declared final", decl.name),
            );
            return Resolution::Resolved;
        }
        let declared = found.val_type.clone();

        let mode = if ctx.scope_operator {
            ScopeMode::Static
        } else {
            ScopeMode::FirstPassStatic
        };
        let value = self.decl.value.clone();
        let mut builder = ExprBuilder {
            tree: &mut *ctx.tree,
            diagnostics: &mut *ctx.diagnostics,
            owner,
            proc: None,
            mode,
            inferred: declared.as_path(),
            allow_src: true,
        };
        let built = match builder.build(&value) {
            Ok(built) => built,
            Err(unresolved) => {
                self.failure = Some(unresolved.message);
                return Resolution::Pending;
            }
        };
        let decl = &self.decl;
        match built.try_as_constant() {
            Some(constant) => {
                if !matches!(constant, Constant::Null)
                    && !declared.matches_flags(constant.val_type())
                {
                    ctx.diagnostics.emit(
                        WarningCode::InvalidVarType,
                        decl.location,
                        format!("override of \"{}\" does not fit its declared type", decl.name),
                    );
                }
                ctx.tree
                    .get_mut(owner)
                    .var_overrides
                    .insert(decl.name.clone(), constant);
            }
            None => {
                ctx.tree.get_mut(owner).init_assignments.push(InitAssignment {
                    field: decl.name.clone(),
                    value: built,
                    location: decl.location,
                });
            }
        }
        Resolution::Resolved
    }

    pub fn report(&self, diagnostics: &mut Diagnostics) {
        let message = match &self.failure {
            Some(failure) => failure.clone(),
            None => format!(
                "override of \"{}\" could not be resolved",
                self.decl.name
            ),
        };
        diagnostics.emit(WarningCode::ItemDoesntExist, self.decl.location, message);
    }
}
