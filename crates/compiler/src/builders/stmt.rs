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

//! Lowers proc bodies to bytecode: statement dispatch, loop and scope
//! bookkeeping, `set` attribute handling, parameter defaults.

use ahash::AHashMap;

use dreamc_common::program::{CallArgsType, ProcFlags, Reference};
use dreamc_common::{ComplexValType, FileId, Location, StringId, TypeId, TypePath, ValType};

use crate::ast::{
    AssignOperator, BoundVar, Expression, Parameter, Statement, StatementNode, SwitchCaseValue,
};
use crate::builders::{ExprBuilder, ScopeMode};
use crate::code_tree::GlobalInit;
use crate::diagnostics::{CompileError, Diagnostics, WarningCode};
use crate::expr::{Constant, EmitCtx, Expr, ExprNode};
use crate::objtree::ObjectTree;
use crate::proc::Proc;

pub struct ProcBuilder<'a> {
    pub tree: &'a mut ObjectTree,
    pub diagnostics: &'a mut Diagnostics,
    /// Non-constant static initializers accumulate here for the world
    /// initializer proc.
    pub global_init: &'a mut Vec<GlobalInit>,
    /// Interned file names, for source annotations.
    pub files: &'a AHashMap<FileId, StringId>,
    pub owner: TypeId,
    proc: Proc,
}

impl<'a> ProcBuilder<'a> {
    pub fn new(
        tree: &'a mut ObjectTree,
        diagnostics: &'a mut Diagnostics,
        global_init: &'a mut Vec<GlobalInit>,
        files: &'a AHashMap<FileId, StringId>,
        owner: TypeId,
        proc: Proc,
    ) -> Self {
        ProcBuilder {
            tree,
            diagnostics,
            global_init,
            files,
            owner,
            proc,
        }
    }

    /// Lower the whole body. Arguments are already allocated on the proc;
    /// this adds the default-value preamble, the statements, and the
    /// implicit trailing return.
    pub fn build(
        mut self,
        parameters: &[Parameter],
        body: &[Statement],
    ) -> Result<Proc, CompileError> {
        for statement in body {
            if let StatementNode::Set {
                attribute,
                value,
                was_in,
            } = &statement.node
            {
                self.apply_set(attribute, value, *was_in, statement.location);
            }
        }

        self.emit_parameter_defaults(parameters)?;
        for statement in body {
            self.emit_statement(statement)?;
        }
        // Falling off the end returns the default return value.
        self.proc.push_reference_value(Reference::SelfProc);
        self.proc.return_();
        self.proc.resolve_gotos(self.diagnostics);
        Ok(self.proc)
    }

    // ------------------------------------------------------------------
    // Expression plumbing

    fn build_expr(&mut self, expression: &Expression) -> Expr {
        self.build_expr_inferred(expression, None)
    }

    fn build_expr_inferred(
        &mut self,
        expression: &Expression,
        inferred: Option<TypePath>,
    ) -> Expr {
        let mut builder = ExprBuilder {
            tree: &mut *self.tree,
            diagnostics: &mut *self.diagnostics,
            owner: self.owner,
            proc: Some(&self.proc),
            mode: ScopeMode::Normal,
            inferred,
            allow_src: true,
        };
        builder.build_or_null(expression)
    }

    fn emit_push(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let mut ctx = EmitCtx {
            proc: &mut self.proc,
            strings: &mut self.tree.strings,
            resources: &mut self.tree.resources,
        };
        expr.emit_push(&mut ctx)
    }

    fn emit_reference(&mut self, expr: &Expr) -> Result<Reference, CompileError> {
        let mut ctx = EmitCtx {
            proc: &mut self.proc,
            strings: &mut self.tree.strings,
            resources: &mut self.tree.resources,
        };
        expr.emit_reference(&mut ctx)
    }

    // ------------------------------------------------------------------
    // set statements

    fn apply_set(
        &mut self,
        attribute: &str,
        value: &Expression,
        _was_in: bool,
        location: Location,
    ) {
        if attribute == "src" {
            self.diagnostics.unimplemented_warning(
                WarningCode::UnimplementedAccess,
                location,
                "set src is not implemented",
            );
            return;
        }
        let built = self.build_expr(value);
        let Some(constant) = built.try_as_constant() else {
            self.diagnostics.emit(
                WarningCode::InvalidSetStatement,
                location,
                format!("set {attribute} needs a constant value"),
            );
            return;
        };
        match attribute {
            "name" => match constant {
                Constant::String(text) => self.proc.verb_name = Some(text),
                _ => self.invalid_set(attribute, location),
            },
            "category" => match constant {
                Constant::String(text) => self.proc.verb_category = Some(text),
                Constant::Null => self.proc.verb_category = None,
                _ => self.invalid_set(attribute, location),
            },
            "desc" => match constant {
                Constant::String(text) => self.proc.verb_desc = Some(text),
                _ => self.invalid_set(attribute, location),
            },
            "invisibility" => match constant {
                Constant::Number(n) => self.proc.invisibility = Some(n.clamp(0.0, 101.0)),
                _ => self.invalid_set(attribute, location),
            },
            "hidden" => {
                if constant.truthy() {
                    self.proc.flags |= ProcFlags::HIDDEN;
                }
            }
            "background" => {
                if constant.truthy() {
                    self.proc.flags |= ProcFlags::BACKGROUND;
                }
            }
            "waitfor" => {
                if !constant.truthy() {
                    self.proc.flags |= ProcFlags::DISABLE_WAITFOR;
                }
            }
            "instant" | "popup_menu" => {
                self.diagnostics.unimplemented_warning(
                    WarningCode::UnimplementedAccess,
                    location,
                    format!("set {attribute} is not implemented"),
                );
            }
            _ => {
                self.diagnostics.emit(
                    WarningCode::InvalidSetStatement,
                    location,
                    format!("unknown set attribute \"{attribute}\""),
                );
            }
        }
    }

    fn invalid_set(&mut self, attribute: &str, location: Location) {
        self.diagnostics.emit(
            WarningCode::InvalidSetStatement,
            location,
            format!("bad value for set {attribute}"),
        );
    }

    // ------------------------------------------------------------------
    // Parameter defaults

    /// Emit `if (isnull(arg)) arg = default` for each defaulted parameter.
    fn emit_parameter_defaults(&mut self, parameters: &[Parameter]) -> Result<(), CompileError> {
        for parameter in parameters {
            let Some(default) = &parameter.default else {
                continue;
            };
            let Some(Reference::Argument(slot)) = self.proc.lookup_name(&parameter.name) else {
                continue;
            };
            let skip = self.proc.new_label_name();
            self.proc.push_reference_value(Reference::Argument(slot));
            self.proc.is_null();
            self.proc.jump_if_false(skip.clone());
            let value = self.build_expr_inferred(default, parameter.param_type.clone());
            self.emit_push(&value)?;
            self.proc.pop_reference(Reference::Argument(slot));
            self.proc.place_label(skip)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements

    fn emit_statement(&mut self, statement: &Statement) -> Result<(), CompileError> {
        if let Some(&file) = self.files.get(&statement.location.file) {
            self.proc.debug_source(statement.location, file);
        }
        match &statement.node {
            StatementNode::Expr(expression) => {
                let expr = self.build_expr(expression);
                self.emit_expr_statement(&expr)
            }
            StatementNode::VarDeclare {
                name,
                var_type,
                val_type,
                value,
                is_static,
                is_const,
            } => self.emit_var_declare(
                name,
                var_type.as_ref(),
                *val_type,
                value.as_ref(),
                *is_static,
                *is_const,
                statement.location,
            ),
            StatementNode::Return(value) => {
                match value {
                    Some(value) => {
                        let expr = self.build_expr(value);
                        self.emit_push(&expr)?;
                    }
                    // Bare return yields the default return value.
                    None => self.proc.push_reference_value(Reference::SelfProc),
                }
                self.proc.return_();
                Ok(())
            }
            StatementNode::If {
                condition,
                body,
                else_body,
            } => {
                let condition = self.build_expr(condition);
                self.emit_push(&condition)?;
                let end = self.proc.new_label_name();
                match else_body {
                    None => {
                        self.proc.jump_if_false(end.clone());
                        self.emit_block(body)?;
                    }
                    Some(else_body) => {
                        let other = self.proc.new_label_name();
                        self.proc.jump_if_false(other.clone());
                        self.emit_block(body)?;
                        self.proc.jump(end.clone());
                        self.proc.place_label(other)?;
                        self.emit_block(else_body)?;
                    }
                }
                self.proc.place_label(end)
            }
            StatementNode::ForStandard {
                init,
                condition,
                step,
                body,
            } => self.emit_for_standard(
                init.as_deref(),
                condition.as_ref(),
                step.as_ref(),
                body,
            ),
            StatementNode::ForList {
                variable,
                list,
                body,
            } => self.emit_for_list(variable, list.as_ref(), body),
            StatementNode::ForRange {
                variable,
                start,
                end,
                step,
                body,
            } => self.emit_for_range(variable, start, end, step.as_ref(), body),
            StatementNode::While { condition, body } => {
                let base = self.proc.new_label_name();
                self.proc.push_loop(&base, None);
                self.proc.place_label(format!("{base}_continue"))?;
                self.proc.place_label(format!("{base}_start"))?;
                self.emit_background_yield();
                let condition = self.build_expr(condition);
                self.emit_push(&condition)?;
                self.proc.jump_if_false(format!("{base}_end"));
                self.emit_block(body)?;
                self.proc.jump(format!("{base}_continue"));
                self.proc.place_label(format!("{base}_end"))?;
                self.proc.pop_loop();
                Ok(())
            }
            StatementNode::DoWhile { body, condition } => {
                let base = self.proc.new_label_name();
                self.proc.push_loop(&base, None);
                self.proc.place_label(format!("{base}_start"))?;
                self.emit_background_yield();
                self.emit_block(body)?;
                self.proc.place_label(format!("{base}_continue"))?;
                let condition = self.build_expr(condition);
                self.emit_push(&condition)?;
                self.proc.jump_if_true(format!("{base}_start"));
                self.proc.place_label(format!("{base}_end"))?;
                self.proc.pop_loop();
                Ok(())
            }
            StatementNode::Switch {
                value,
                cases,
                default,
            } => self.emit_switch(value, cases, default.as_deref()),
            StatementNode::Break(label) => self.emit_loop_jump(label.as_deref(), false, statement.location),
            StatementNode::Continue(label) => {
                self.emit_loop_jump(label.as_deref(), true, statement.location)
            }
            StatementNode::Goto(label) => {
                self.proc.emit_goto(label, statement.location);
                Ok(())
            }
            StatementNode::Label { name, body } => {
                self.proc.place_code_label(name)?;
                self.emit_block(body)
            }
            StatementNode::Spawn { delay, body } => {
                match delay {
                    Some(delay) => {
                        let delay = self.build_expr(delay);
                        self.emit_push(&delay)?;
                    }
                    None => self.proc.push_float(0.0),
                }
                let over = self.proc.new_label_name();
                self.proc.spawn(over.clone());
                self.emit_block(body)?;
                // The spawned fiber ends here; the parent resumes past it.
                self.proc.push_null();
                self.proc.return_();
                self.proc.place_label(over)
            }
            StatementNode::TryCatch {
                try_body,
                catch_var,
                catch_body,
            } => self.emit_try_catch(try_body, catch_var.as_ref(), catch_body),
            StatementNode::Throw(value) => {
                let value = self.build_expr(value);
                self.emit_push(&value)?;
                self.proc.throw();
                Ok(())
            }
            StatementNode::Del(value) => {
                let value = self.build_expr(value);
                self.emit_push(&value)?;
                self.proc.delete_object();
                Ok(())
            }
            // Consumed by the prescan in build().
            StatementNode::Set { .. } => Ok(()),
        }
    }

    fn emit_block(&mut self, body: &[Statement]) -> Result<(), CompileError> {
        self.proc.enter_scope();
        for statement in body {
            self.emit_statement(statement)?;
        }
        self.proc.exit_scope();
        Ok(())
    }

    /// Statement position discards the value. Plain assignment goes through
    /// `PopReference` when the target needs no stack entries; everything
    /// else evaluates and pops.
    fn emit_expr_statement(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.node {
            ExprNode::Assign {
                op: AssignOperator::Assign,
                target,
                value,
            } => {
                if matches!(target.node, ExprNode::Field { .. } | ExprNode::Index { .. }) {
                    let reference = self.emit_reference(target)?;
                    self.emit_push(value)?;
                    self.proc.assign(reference);
                    self.proc.pop();
                } else {
                    self.emit_push(value)?;
                    let reference = self.emit_reference(target)?;
                    self.proc.pop_reference(reference);
                }
                Ok(())
            }
            ExprNode::Crement {
                target, increment, ..
            } => {
                let reference = self.emit_reference(target)?;
                if *increment {
                    self.proc.increment(reference);
                } else {
                    self.proc.decrement(reference);
                }
                self.proc.pop();
                Ok(())
            }
            _ => {
                self.emit_push(expr)?;
                self.proc.pop();
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_var_declare(
        &mut self,
        name: &str,
        var_type: Option<&TypePath>,
        val_type: ValType,
        value: Option<&Expression>,
        is_static: bool,
        is_const: bool,
        location: Location,
    ) -> Result<(), CompileError> {
        if self.proc.is_declared_in_current_scope(name) {
            self.diagnostics.emit(
                WarningCode::DuplicateVariable,
                location,
                format!("\"{name}\" is already declared in this scope"),
            );
            return Ok(());
        }
        let complex = ComplexValType::new(val_type, var_type.cloned());

        if is_static {
            // Shared storage in the global array, initialized once at world
            // start rather than per call. Qualified by owner and proc so
            // same-named statics in same-named procs stay distinct.
            let owner_path = &self.tree.get(self.owner).path;
            let qualified = if owner_path.is_root() {
                format!("/{}.{name}", self.proc.name)
            } else {
                format!("{owner_path}/{}.{name}", self.proc.name)
            };
            let slot = self.tree.allocate_global(
                &qualified,
                self.owner,
                complex,
                is_const,
                location,
            );
            self.proc.declare_static(name, slot);
            if let Some(value) = value {
                let mut builder = ExprBuilder {
                    tree: &mut *self.tree,
                    diagnostics: &mut *self.diagnostics,
                    owner: self.owner,
                    proc: None,
                    mode: ScopeMode::Static,
                    inferred: var_type.cloned(),
                    allow_src: false,
                };
                let built = builder.build_or_null(value);
                match built.try_as_constant() {
                    Some(constant) => self.tree.set_global_value(slot, constant),
                    None if is_const => {
                        self.diagnostics.emit(
                            WarningCode::HardConstContext,
                            location,
                            format!("const \"{name}\" needs a constant initializer"),
                        );
                    }
                    None => self.global_init.push(GlobalInit {
                        slot,
                        value: built,
                        location,
                    }),
                }
            }
            return Ok(());
        }

        let slot = self.proc.alloc_local(name)?;
        if is_const {
            self.proc.mark_const_local(slot);
        }
        match value {
            Some(value) => {
                let built = self.build_expr_inferred(value, var_type.cloned());
                if is_const && built.try_as_constant().is_none() {
                    self.diagnostics.emit(
                        WarningCode::HardConstContext,
                        location,
                        format!("const \"{name}\" needs a constant initializer"),
                    );
                }
                self.emit_push(&built)?;
            }
            None => self.proc.push_null(),
        }
        self.proc.pop_reference(Reference::Local(slot));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Loops

    /// Background procs yield at the top of every loop iteration so they
    /// cannot starve the scheduler. A loop in a background proc is a hard
    /// error when no global `sleep` proc exists to yield through.
    fn emit_background_yield(&mut self) {
        if !self.proc.flags.contains(ProcFlags::BACKGROUND) {
            return;
        }
        let Some(sleep) = self.tree.global_proc("sleep") else {
            self.diagnostics.forced_error(
                WarningCode::ItemDoesntExist,
                self.proc.location,
                "cannot background sleep without a global sleep proc",
            );
            return;
        };
        self.proc.push_float(-1.0);
        self.proc
            .call(Reference::GlobalProc(sleep), CallArgsType::FromStack, 1);
        self.proc.pop();
    }

    fn emit_for_standard(
        &mut self,
        init: Option<&Statement>,
        condition: Option<&Expression>,
        step: Option<&Expression>,
        body: &[Statement],
    ) -> Result<(), CompileError> {
        self.proc.enter_scope();
        if let Some(init) = init {
            self.emit_statement(init)?;
        }
        let base = self.proc.new_label_name();
        self.proc.push_loop(&base, None);
        self.proc.place_label(format!("{base}_start"))?;
        self.emit_background_yield();
        if let Some(condition) = condition {
            let condition = self.build_expr(condition);
            self.emit_push(&condition)?;
            self.proc.jump_if_false(format!("{base}_end"));
        }
        self.emit_block(body)?;
        self.proc.place_label(format!("{base}_continue"))?;
        if let Some(step) = step {
            let step = self.build_expr(step);
            self.emit_expr_statement(&step)?;
        }
        self.proc.jump(format!("{base}_start"));
        self.proc.place_label(format!("{base}_end"))?;
        self.proc.pop_loop();
        self.proc.exit_scope();
        Ok(())
    }

    /// Bind the loop or catch variable: fresh local for `var/x`, existing
    /// reference otherwise.
    fn bind_variable(&mut self, variable: &BoundVar) -> Result<Reference, CompileError> {
        if variable.declare {
            let slot = self.proc.alloc_local(&variable.name)?;
            return Ok(Reference::Local(slot));
        }
        match self.proc.lookup_name(&variable.name) {
            Some(reference) => Ok(reference),
            None => {
                self.diagnostics.emit(
                    WarningCode::ItemDoesntExist,
                    variable.location,
                    format!("unknown variable \"{}\"", variable.name),
                );
                let slot = self.proc.alloc_local(&variable.name)?;
                Ok(Reference::Local(slot))
            }
        }
    }

    fn emit_for_list(
        &mut self,
        variable: &BoundVar,
        list: Option<&Expression>,
        body: &[Statement],
    ) -> Result<(), CompileError> {
        self.proc.enter_scope();
        let target = self.bind_variable(variable)?;
        match list {
            Some(list) => {
                let list = self.build_expr(list);
                self.emit_push(&list)?;
            }
            // `for(var/mob/m)` walks the world.
            None => self.proc.push_reference_value(Reference::World),
        }
        let id = self.proc.new_enumerator_id();
        let filter = variable.var_type.as_ref().and_then(|path| {
            if path.is_absolute() {
                self.tree.type_by_path(path)
            } else {
                self.tree.upward_search(self.owner, path)
            }
        });
        match filter {
            Some(filter) => self.proc.create_filtered_list_enumerator(id, filter),
            None => self.proc.create_list_enumerator(id),
        }
        let base = self.proc.new_label_name();
        self.proc.push_loop(&base, Some(id));
        self.proc.place_label(format!("{base}_start"))?;
        self.emit_background_yield();
        self.proc.enumerate(id, target, format!("{base}_end"));
        self.emit_block(body)?;
        self.proc.place_label(format!("{base}_continue"))?;
        self.proc.jump(format!("{base}_start"));
        self.proc.place_label(format!("{base}_end"))?;
        self.proc.destroy_enumerator(id);
        self.proc.pop_loop();
        self.proc.exit_scope();
        Ok(())
    }

    fn emit_for_range(
        &mut self,
        variable: &BoundVar,
        start: &Expression,
        end: &Expression,
        step: Option<&Expression>,
        body: &[Statement],
    ) -> Result<(), CompileError> {
        self.proc.enter_scope();
        let target = self.bind_variable(variable)?;
        let start = self.build_expr(start);
        self.emit_push(&start)?;
        let end = self.build_expr(end);
        self.emit_push(&end)?;
        match step {
            Some(step) => {
                let step = self.build_expr(step);
                self.emit_push(&step)?;
            }
            None => self.proc.push_float(1.0),
        }
        let id = self.proc.new_enumerator_id();
        self.proc.create_range_enumerator(id);
        let base = self.proc.new_label_name();
        self.proc.push_loop(&base, Some(id));
        self.proc.place_label(format!("{base}_start"))?;
        self.emit_background_yield();
        self.proc.enumerate(id, target, format!("{base}_end"));
        self.emit_block(body)?;
        self.proc.place_label(format!("{base}_continue"))?;
        self.proc.jump(format!("{base}_start"));
        self.proc.place_label(format!("{base}_end"))?;
        self.proc.destroy_enumerator(id);
        self.proc.pop_loop();
        self.proc.exit_scope();
        Ok(())
    }

    fn emit_loop_jump(
        &mut self,
        label: Option<&str>,
        is_continue: bool,
        location: Location,
    ) -> Result<(), CompileError> {
        let position = match label {
            Some(label) => match self.proc.find_code_label(label) {
                Some(position) => Some(position),
                None => {
                    self.diagnostics.emit(
                        WarningCode::BadLabel,
                        location,
                        format!("no label \"{label}\" encloses this statement"),
                    );
                    None
                }
            },
            None => None,
        };
        let keyword = if is_continue { "continue" } else { "break" };
        let target = self
            .proc
            .resolve_loop(position)
            .ok_or(CompileError::EmptyLoopStack { keyword })?;
        for id in &target.crossed_enumerators {
            self.proc.destroy_enumerator(*id);
        }
        if is_continue {
            self.proc.jump(target.continue_label());
        } else {
            self.proc.jump(target.end_label());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Switch

    fn emit_switch(
        &mut self,
        value: &Expression,
        cases: &[crate::ast::SwitchCase],
        default: Option<&[Statement]>,
    ) -> Result<(), CompileError> {
        let value = self.build_expr(value);
        self.emit_push(&value)?;
        let end = self.proc.new_label_name();
        let labels: Vec<String> = cases.iter().map(|_| self.proc.new_label_name()).collect();

        for (case, label) in cases.iter().zip(&labels) {
            for case_value in &case.values {
                match case_value {
                    SwitchCaseValue::Exact(expression) => {
                        let expression = self.build_expr(expression);
                        self.emit_push(&expression)?;
                        self.proc.switch_case(label.clone());
                    }
                    SwitchCaseValue::Range(low, high) => {
                        let low = self.build_expr(low);
                        self.emit_push(&low)?;
                        let high = self.build_expr(high);
                        self.emit_push(&high)?;
                        self.proc.switch_case_range(label.clone());
                    }
                }
            }
        }
        // No case matched; the tested value is still on the stack.
        self.proc.pop();
        if let Some(default) = default {
            self.emit_block(default)?;
        }
        self.proc.jump(end.clone());

        for (case, label) in cases.iter().zip(&labels) {
            self.proc.place_label(label.clone())?;
            self.emit_block(&case.body)?;
            self.proc.jump(end.clone());
        }
        self.proc.place_label(end)
    }

    // ------------------------------------------------------------------
    // try/catch

    fn emit_try_catch(
        &mut self,
        try_body: &[Statement],
        catch_var: Option<&BoundVar>,
        catch_body: &[Statement],
    ) -> Result<(), CompileError> {
        self.proc.enter_scope();
        let catch_label = self.proc.new_label_name();
        let end = self.proc.new_label_name();
        match catch_var {
            Some(variable) => {
                let reference = self.bind_variable(variable)?;
                self.proc.try_(catch_label.clone(), reference);
            }
            None => self.proc.try_no_value(catch_label.clone()),
        }
        self.emit_block(try_body)?;
        self.proc.end_try();
        self.proc.jump(end.clone());
        self.proc.place_label(catch_label)?;
        self.emit_block(catch_body)?;
        self.proc.place_label(end)?;
        self.proc.exit_scope();
        Ok(())
    }
}
