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

//! Name binding: turns AST expressions into resolved IR. Identifiers become
//! references, type paths become type ids, constants fold. Failure to bind
//! is not fatal; it surfaces as [`UnresolvedRef`] so fixpoint resolution can
//! retry, or as a diagnostic when retry is pointless.

use dreamc_common::program::Reference;
use dreamc_common::{ComplexValType, Location, TypeId, TypePath, ValType};

use crate::ast::{
    Argument, AssignOperator, DerefOperation, Expression, ExpressionNode, ListItem,
    NewTarget as AstNewTarget, PickEntry,
};
use crate::builders::{ScopeMode, UnresolvedRef};
use crate::diagnostics::{Diagnostics, WarningCode};
use crate::expr::{ArgList, Builtin, CallTarget, Constant, Expr, ExprNode, NewTarget};
use crate::objtree::ObjectTree;
use crate::proc::Proc;

pub struct ExprBuilder<'a> {
    pub tree: &'a mut ObjectTree,
    pub diagnostics: &'a mut Diagnostics,
    /// The type whose scope unqualified names resolve in. `ObjectTree::ROOT`
    /// for toplevel declarations.
    pub owner: TypeId,
    /// The proc under construction, when building inside a body. Supplies
    /// arguments, locals, and proc statics.
    pub proc: Option<&'a Proc>,
    pub mode: ScopeMode,
    /// The declared type a bare `new()` instantiates.
    pub inferred: Option<TypePath>,
    /// False in static initializers, where there is no instance.
    pub allow_src: bool,
}

impl<'a> ExprBuilder<'a> {
    pub fn build(&mut self, expression: &Expression) -> Result<Expr, UnresolvedRef> {
        let location = expression.location;
        match &expression.node {
            ExpressionNode::Null => Ok(Expr::constant(Constant::Null, location)),
            ExpressionNode::Int(value) => {
                Ok(Expr::constant(Constant::Number(*value as f32), location))
            }
            ExpressionNode::Float(value) => {
                Ok(Expr::constant(Constant::Number(*value), location))
            }
            ExpressionNode::String(value) => {
                Ok(Expr::constant(Constant::String(value.clone()), location))
            }
            ExpressionNode::Resource(path) => {
                Ok(Expr::constant(Constant::Resource(path.clone()), location))
            }
            ExpressionNode::ConstPath(path) => self.build_const_path(path, location),
            ExpressionNode::StringFormat {
                format,
                interpolations,
            } => {
                let mut built = Vec::with_capacity(interpolations.len());
                for value in interpolations {
                    built.push(match value {
                        Some(value) => self.build(value)?,
                        None => Expr::null(location),
                    });
                }
                let format = self.tree.strings.intern(format);
                Ok(Expr::new(
                    ExprNode::FormatString {
                        format,
                        interpolations: built,
                    },
                    location,
                    ValType::TEXT.into(),
                ))
            }
            ExpressionNode::Identifier(name) => self.resolve_identifier(name, location),
            ExpressionNode::ScopeIdentifier { base, name } => {
                self.build_scope_access(base.as_deref(), name, location)
            }
            ExpressionNode::Call { name, arguments } => {
                self.build_call(name, arguments, location)
            }
            ExpressionNode::SuperCall { arguments } => {
                let args = if arguments.is_empty() {
                    None
                } else {
                    Some(self.build_args(arguments, location)?)
                };
                Ok(Expr::new(
                    ExprNode::SuperCall { args },
                    location,
                    ValType::ANYTHING.into(),
                ))
            }
            ExpressionNode::Dereference { base, operations } => {
                self.build_dereference(base, operations, location)
            }
            ExpressionNode::New { target, arguments } => {
                let target = match target {
                    AstNewTarget::Path(path) => {
                        NewTarget::Type(self.resolve_type(path, location)?)
                    }
                    AstNewTarget::Inferred => match self.inferred.clone() {
                        Some(path) => NewTarget::Type(self.resolve_type(&path, location)?),
                        None => {
                            self.diagnostics.emit(
                                WarningCode::BadExpression,
                                location,
                                "no type to infer for new()",
                            );
                            return Ok(Expr::null(location));
                        }
                    },
                    AstNewTarget::Expr(expr) => NewTarget::Expr(Box::new(self.build(expr)?)),
                };
                let args = match arguments {
                    Some(arguments) => self.build_args(arguments, location)?,
                    None => ArgList::default(),
                };
                let val_type = match &target {
                    NewTarget::Type(id) => ComplexValType::new(
                        ValType::INSTANCE,
                        Some(self.tree.get(*id).path.clone()),
                    ),
                    NewTarget::Expr(_) => ValType::INSTANCE.into(),
                };
                Ok(Expr::new(ExprNode::New { target, args }, location, val_type))
            }
            ExpressionNode::List { items } => {
                let mut built = Vec::with_capacity(items.len());
                for ListItem { key, value } in items {
                    let key = match key {
                        Some(key) => Some(self.build(key)?),
                        None => None,
                    };
                    built.push((key, self.build(value)?));
                }
                Ok(Expr::new(
                    ExprNode::List { items: built },
                    location,
                    ComplexValType::new(ValType::INSTANCE, Some(dreamc_common::path::LIST.clone())),
                ))
            }
            ExpressionNode::Pick { entries } => {
                let mut built = Vec::with_capacity(entries.len());
                for PickEntry { weight, value } in entries {
                    let weight = match weight {
                        Some(weight) => Some(self.build(weight)?),
                        None => None,
                    };
                    built.push((weight, self.build(value)?));
                }
                Ok(Expr::new(
                    ExprNode::Pick { entries: built },
                    location,
                    ValType::ANYTHING.into(),
                ))
            }
            ExpressionNode::BinaryOp { op, lhs, rhs } => {
                let lhs = self.build(lhs)?;
                let rhs = self.build(rhs)?;
                Ok(self.fold(Expr::new(
                    ExprNode::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    location,
                    ValType::ANYTHING.into(),
                )))
            }
            ExpressionNode::UnaryOp { op, operand } => {
                let operand = self.build(operand)?;
                Ok(self.fold(Expr::new(
                    ExprNode::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    location,
                    ValType::ANYTHING.into(),
                )))
            }
            ExpressionNode::Ternary {
                condition,
                if_true,
                if_false,
            } => {
                let condition = self.build(condition)?;
                let if_true = self.build(if_true)?;
                let if_false = self.build(if_false)?;
                Ok(self.fold(Expr::new(
                    ExprNode::Ternary {
                        condition: Box::new(condition),
                        if_true: Box::new(if_true),
                        if_false: Box::new(if_false),
                    },
                    location,
                    ValType::ANYTHING.into(),
                )))
            }
            ExpressionNode::Assign { op, lhs, rhs } => self.build_assign(*op, lhs, rhs, location),
            ExpressionNode::Increment { target, prefix } => {
                self.build_crement(target, true, *prefix, location)
            }
            ExpressionNode::Decrement { target, prefix } => {
                self.build_crement(target, false, *prefix, location)
            }
            ExpressionNode::InRange { value, start, end } => {
                let value = self.build(value)?;
                let start = self.build(start)?;
                let end = self.build(end)?;
                Ok(Expr::new(
                    ExprNode::InRange {
                        value: Box::new(value),
                        start: Box::new(start),
                        end: Box::new(end),
                    },
                    location,
                    ValType::NUM.into(),
                ))
            }
        }
    }

    /// Like [`build`](Self::build), but a binding failure becomes a
    /// diagnostic and a null placeholder. For contexts with no retry left.
    pub fn build_or_null(&mut self, expression: &Expression) -> Expr {
        match self.build(expression) {
            Ok(expr) => expr,
            Err(unresolved) => {
                self.diagnostics.emit(
                    WarningCode::ItemDoesntExist,
                    unresolved.location,
                    unresolved.message,
                );
                Expr::null(expression.location)
            }
        }
    }

    fn fold(&self, expr: Expr) -> Expr {
        match expr.try_as_constant() {
            Some(constant) => Expr::constant(constant, expr.location),
            None => expr,
        }
    }

    // ------------------------------------------------------------------
    // Names

    fn resolve_identifier(
        &mut self,
        name: &str,
        location: Location,
    ) -> Result<Expr, UnresolvedRef> {
        match name {
            "src" if self.allow_src => {
                let path = self.tree.get(self.owner).path.clone();
                return Ok(Expr::new(
                    ExprNode::Direct(Reference::Src),
                    location,
                    ComplexValType::new(ValType::INSTANCE, Some(path)),
                ));
            }
            "src" => {
                return Err(UnresolvedRef::new(
                    location,
                    "src is not available in a static initializer",
                ));
            }
            "usr" => {
                return Ok(Expr::new(
                    ExprNode::Direct(Reference::Usr),
                    location,
                    ComplexValType::new(
                        ValType::MOB | ValType::NULL,
                        Some(dreamc_common::path::MOB.clone()),
                    ),
                ));
            }
            "world" => {
                return Ok(Expr::new(
                    ExprNode::Direct(Reference::World),
                    location,
                    ComplexValType::new(
                        ValType::INSTANCE,
                        Some(dreamc_common::path::WORLD.clone()),
                    ),
                ));
            }
            "args" if !self.mode.is_static() => {
                return Ok(Expr::new(
                    ExprNode::Direct(Reference::Args),
                    location,
                    ComplexValType::new(
                        ValType::INSTANCE,
                        Some(dreamc_common::path::LIST.clone()),
                    ),
                ));
            }
            "global" => {
                // Only meaningful as the base of `global.name`; the deref
                // builder intercepts it before we get here.
                self.diagnostics.emit(
                    WarningCode::BadExpression,
                    location,
                    "global is not a value by itself",
                );
                return Ok(Expr::null(location));
            }
            _ => {}
        }

        if let Some(proc) = self.proc {
            if let Some(reference) = proc.lookup_name(name) {
                let val_type = match reference {
                    Reference::Argument(_) => proc
                        .parameter_type(name)
                        .map(ComplexValType::from)
                        .unwrap_or_default(),
                    Reference::Global(id) => self.tree.global(id).val_type.clone(),
                    _ => ComplexValType::default(),
                };
                return Ok(Expr::new(ExprNode::Direct(reference), location, val_type));
            }
        }

        if self.allow_src {
            if let Some((_, decl)) = self.tree.var_decl(self.owner, name) {
                let val_type = decl.val_type.clone();
                self.warn_access(&val_type, name, location);
                let id = self.tree.strings.intern(name);
                return Ok(Expr::new(
                    ExprNode::Direct(Reference::SrcField(id)),
                    location,
                    val_type,
                ));
            }
        }

        if let Some(slot) = self.tree.global_slot(self.owner, name) {
            let val_type = self.tree.global(slot).val_type.clone();
            return Ok(Expr::new(
                ExprNode::Direct(Reference::Global(slot)),
                location,
                val_type,
            ));
        }

        if let Some(id) = self.tree.global_proc(name) {
            return Ok(Expr::new(
                ExprNode::ProcRef(id),
                location,
                ValType::ANYTHING.into(),
            ));
        }

        Err(UnresolvedRef::new(
            location,
            format!("unknown identifier \"{name}\""),
        ))
    }

    fn warn_access(&mut self, val_type: &ComplexValType, name: &str, location: Location) {
        if val_type.is_unimplemented() {
            self.diagnostics.unimplemented_warning(
                WarningCode::UnimplementedAccess,
                location,
                format!("var \"{name}\" is not implemented"),
            );
        } else if val_type.is_unsupported() {
            self.diagnostics.emit(
                WarningCode::UnsupportedAccess,
                location,
                format!("var \"{name}\" is not supported"),
            );
        }
    }

    fn resolve_type(
        &mut self,
        path: &TypePath,
        location: Location,
    ) -> Result<TypeId, UnresolvedRef> {
        let found = if path.is_absolute() {
            self.tree.type_by_path(path)
        } else {
            self.tree.upward_search(self.owner, path)
        };
        found.ok_or_else(|| {
            UnresolvedRef::new(location, format!("unknown type {path}"))
        })
    }

    fn build_const_path(
        &mut self,
        path: &TypePath,
        location: Location,
    ) -> Result<Expr, UnresolvedRef> {
        if let Some((type_path, _marker, rest)) = path.split_proc_marker() {
            let [name] = rest else {
                return Err(UnresolvedRef::new(
                    location,
                    format!("malformed proc path {path}"),
                ));
            };
            let id = if type_path.is_root() {
                self.tree.global_proc(name)
            } else {
                let ty = self.resolve_type(&type_path, location)?;
                self.tree.lookup_proc(ty, name)
            };
            return match id {
                Some(id) => Ok(Expr::new(
                    ExprNode::ProcRef(id),
                    location,
                    ValType::ANYTHING.into(),
                )),
                None => Err(UnresolvedRef::new(
                    location,
                    format!("unknown proc {path}"),
                )),
            };
        }
        let id = self.resolve_type(path, location)?;
        let path = self.tree.get(id).path.clone();
        Ok(Expr::constant(Constant::Path { id, path }, location))
    }

    // ------------------------------------------------------------------
    // Scope operator

    fn build_scope_access(
        &mut self,
        base: Option<&Expression>,
        name: &str,
        location: Location,
    ) -> Result<Expr, UnresolvedRef> {
        if self.mode == ScopeMode::FirstPassStatic {
            // Types may not all exist yet; retried with the operator enabled.
            return Err(UnresolvedRef::new(
                location,
                format!("scope access \"::{name}\" deferred"),
            ));
        }
        let Some(base) = base else {
            // `::name` reaches straight for the global scope.
            if let Some(slot) = self.tree.global_slot(ObjectTree::ROOT, name) {
                let val_type = self.tree.global(slot).val_type.clone();
                return Ok(Expr::new(
                    ExprNode::Direct(Reference::Global(slot)),
                    location,
                    val_type,
                ));
            }
            if let Some(id) = self.tree.global_proc(name) {
                return Ok(Expr::new(
                    ExprNode::ProcRef(id),
                    location,
                    ValType::ANYTHING.into(),
                ));
            }
            return Err(UnresolvedRef::new(
                location,
                format!("no global named \"{name}\""),
            ));
        };

        let base = self.build(base)?;
        let ty = match &base.node {
            ExprNode::Constant(Constant::Path { id, .. }) => *id,
            _ => match base.val_type.as_path() {
                Some(path) => {
                    self.diagnostics.emit(
                        WarningCode::ScopeOperandNamedType,
                        location,
                        format!("scope access on a var; using its declared type {path}"),
                    );
                    self.resolve_type(&path, location)?
                }
                None => {
                    self.diagnostics.emit(
                        WarningCode::RuntimeSearchOperator,
                        location,
                        "scope access on an untyped value falls back to a runtime field lookup",
                    );
                    let id = self.tree.strings.intern(name);
                    return Ok(Expr::new(
                        ExprNode::Field {
                            base: Box::new(base),
                            name: id,
                            safe: false,
                        },
                        location,
                        ValType::ANYTHING.into(),
                    ));
                }
            },
        };

        // `/type::var` reads the compile-time initial value.
        if self.tree.var_decl(ty, name).is_some() {
            return match self.tree.initial_value(ty, name) {
                Some(value) => Ok(Expr::constant(value.clone(), location)),
                // Declared, but its initializer has not folded yet.
                None => Err(UnresolvedRef::new(
                    location,
                    format!("initial value of \"{name}\" is not a constant yet"),
                )),
            };
        }
        if let Some(slot) = self.tree.global_slot(ty, name) {
            let val_type = self.tree.global(slot).val_type.clone();
            return Ok(Expr::new(
                ExprNode::Direct(Reference::Global(slot)),
                location,
                val_type,
            ));
        }
        if let Some(id) = self.tree.lookup_proc(ty, name) {
            return Ok(Expr::new(
                ExprNode::ProcRef(id),
                location,
                ValType::ANYTHING.into(),
            ));
        }
        Err(UnresolvedRef::new(
            location,
            format!("{} has no member \"{name}\"", self.tree.get(ty).path),
        ))
    }

    // ------------------------------------------------------------------
    // Dereference chains

    fn build_dereference(
        &mut self,
        base: &Expression,
        operations: &[DerefOperation],
        location: Location,
    ) -> Result<Expr, UnresolvedRef> {
        let mut operations = operations.iter();
        let mut current = if matches!(&base.node, ExpressionNode::Identifier(name) if name == "global")
        {
            // `global.name`: the root global scope, not a runtime deref.
            let Some(DerefOperation::Field { name, .. }) = operations.next() else {
                return Err(UnresolvedRef::new(
                    location,
                    "global must be followed by a variable name",
                ));
            };
            match self.tree.global_slot(ObjectTree::ROOT, name) {
                Some(slot) => {
                    let val_type = self.tree.global(slot).val_type.clone();
                    Expr::new(ExprNode::Direct(Reference::Global(slot)), location, val_type)
                }
                None => {
                    return Err(UnresolvedRef::new(
                        location,
                        format!("no global named \"{name}\""),
                    ));
                }
            }
        } else {
            self.build(base)?
        };

        for operation in operations {
            current = self.apply_deref(current, operation, location)?;
        }
        Ok(current)
    }

    fn apply_deref(
        &mut self,
        base: Expr,
        operation: &DerefOperation,
        location: Location,
    ) -> Result<Expr, UnresolvedRef> {
        match operation {
            DerefOperation::Field { name, safe } => {
                let val_type = self.field_type(&base, name, location);
                let id = self.tree.strings.intern(name);
                Ok(Expr::new(
                    ExprNode::Field {
                        base: Box::new(base),
                        name: id,
                        safe: *safe,
                    },
                    location,
                    val_type,
                ))
            }
            DerefOperation::Index { index, safe } => {
                if !base.val_type.is_anything()
                    && !base.val_type.is_list()
                    && !base.val_type.matches_flags(ValType::TEXT)
                {
                    self.diagnostics.emit(
                        WarningCode::InvalidIndexOperation,
                        location,
                        format!("indexing a value typed {}", base.val_type),
                    );
                }
                let index = self.build(index)?;
                Ok(Expr::new(
                    ExprNode::Index {
                        base: Box::new(base),
                        index: Box::new(index),
                        safe: *safe,
                    },
                    location,
                    ValType::ANYTHING.into(),
                ))
            }
            DerefOperation::Call {
                name,
                arguments,
                safe,
            } => {
                if let Some(path) = base.val_type.as_path() {
                    if let Some(ty) = self.tree.type_by_path(&path) {
                        if self.tree.lookup_proc(ty, name).is_none() && self.mode == ScopeMode::Normal
                        {
                            self.diagnostics.emit(
                                WarningCode::ItemDoesntExist,
                                location,
                                format!("{path} has no proc \"{name}\""),
                            );
                        }
                    }
                }
                let args = self.build_args(arguments, location)?;
                let id = self.tree.strings.intern(name);
                Ok(Expr::new(
                    ExprNode::Call {
                        target: CallTarget::Deref {
                            base: Box::new(base),
                            name: id,
                            safe: *safe,
                        },
                        args,
                    },
                    location,
                    ValType::ANYTHING.into(),
                ))
            }
        }
    }

    fn field_type(&mut self, base: &Expr, name: &str, location: Location) -> ComplexValType {
        let Some(path) = base.val_type.as_path() else {
            return ComplexValType::default();
        };
        let Some(ty) = self.tree.type_by_path(&path) else {
            return ComplexValType::default();
        };
        match self.tree.var_decl(ty, name) {
            Some((_, decl)) => {
                let val_type = decl.val_type.clone();
                self.warn_access(&val_type, name, location);
                val_type
            }
            None => {
                if self.mode == ScopeMode::Normal {
                    self.diagnostics.emit(
                        WarningCode::ItemDoesntExist,
                        location,
                        format!("{path} has no var \"{name}\""),
                    );
                }
                ComplexValType::default()
            }
        }
    }

    // ------------------------------------------------------------------
    // Calls

    fn build_call(
        &mut self,
        name: &str,
        arguments: &[Argument],
        location: Location,
    ) -> Result<Expr, UnresolvedRef> {
        if let Some(expr) = self.try_build_builtin(name, arguments, location)? {
            return Ok(expr);
        }

        if self.allow_src && self.tree.lookup_proc(self.owner, name).is_some() {
            let args = self.build_args(arguments, location)?;
            let id = self.tree.strings.intern(name);
            return Ok(Expr::new(
                ExprNode::Call {
                    target: CallTarget::Proc(Reference::SrcProc(id)),
                    args,
                },
                location,
                ValType::ANYTHING.into(),
            ));
        }

        if let Some(id) = self.tree.global_proc(name) {
            let args = self.build_args(arguments, location)?;
            return Ok(Expr::new(
                ExprNode::Call {
                    target: CallTarget::Proc(Reference::GlobalProc(id)),
                    args,
                },
                location,
                ValType::ANYTHING.into(),
            ));
        }

        Err(UnresolvedRef::new(
            location,
            format!("unknown proc \"{name}\""),
        ))
    }

    /// Recognize the builtin call names that compile to dedicated opcodes.
    /// `Ok(None)` means the name is not a builtin and resolves as a proc.
    fn try_build_builtin(
        &mut self,
        name: &str,
        arguments: &[Argument],
        location: Location,
    ) -> Result<Option<Expr>, UnresolvedRef> {
        // rgb and gradient keep full argument-list conventions.
        match name {
            "rgb" => {
                let args = self.build_args(arguments, location)?;
                return Ok(Some(Expr::new(
                    ExprNode::Rgb { args },
                    location,
                    ValType::TEXT.into(),
                )));
            }
            "gradient" => {
                let args = self.build_args(arguments, location)?;
                return Ok(Some(Expr::new(
                    ExprNode::Gradient { args },
                    location,
                    ValType::ANYTHING.into(),
                )));
            }
            _ => {}
        }

        let fixed: &[(&str, Builtin, std::ops::RangeInclusive<usize>)] = &[
            ("isnull", Builtin::IsNull, 1..=1),
            ("length", Builtin::Length, 1..=1),
            ("prob", Builtin::Prob, 1..=1),
            ("abs", Builtin::Abs, 1..=1),
            ("sqrt", Builtin::Sqrt, 1..=1),
            ("sin", Builtin::Sin, 1..=1),
            ("cos", Builtin::Cos, 1..=1),
            ("tan", Builtin::Tan, 1..=1),
            ("arcsin", Builtin::ArcSin, 1..=1),
            ("arccos", Builtin::ArcCos, 1..=1),
            ("initial", Builtin::Initial, 1..=1),
            ("issaved", Builtin::IsSaved, 1..=1),
            ("get_step", Builtin::GetStep, 2..=2),
            ("get_dir", Builtin::GetDir, 2..=2),
        ];
        if let Some((_, builtin, arity)) = fixed.iter().find(|(n, _, _)| *n == name) {
            let args = self.build_builtin_args(name, arguments, arity.clone(), location)?;
            return Ok(Some(Expr::new(
                ExprNode::Builtin {
                    builtin: *builtin,
                    args,
                },
                location,
                ValType::ANYTHING.into(),
            )));
        }

        // The arity-overloaded ones.
        match name {
            "istype" | "astype" => {
                let builtin = if name == "istype" {
                    Builtin::IsType
                } else {
                    Builtin::AsType
                };
                let mut args = self.build_builtin_args(name, arguments, 1..=2, location)?;
                if args.len() == 1 {
                    // One-argument form tests against the var's declared type.
                    let Some(path) = args[0].val_type.as_path() else {
                        self.diagnostics.emit(
                            WarningCode::InvalidArgumentCount,
                            location,
                            format!("{name}() with one argument needs a typed var"),
                        );
                        return Ok(Some(Expr::null(location)));
                    };
                    let id = self.resolve_type(&path, location)?;
                    let path = self.tree.get(id).path.clone();
                    args.push(Expr::constant(Constant::Path { id, path }, location));
                }
                Ok(Some(Expr::new(
                    ExprNode::Builtin { builtin, args },
                    location,
                    ValType::NUM.into(),
                )))
            }
            "arctan" => {
                let args = self.build_builtin_args(name, arguments, 1..=2, location)?;
                let builtin = if args.len() == 2 {
                    Builtin::ArcTan2
                } else {
                    Builtin::ArcTan
                };
                Ok(Some(Expr::new(
                    ExprNode::Builtin { builtin, args },
                    location,
                    ValType::NUM.into(),
                )))
            }
            "log" => {
                let args = self.build_builtin_args(name, arguments, 1..=2, location)?;
                let builtin = if args.len() == 2 {
                    Builtin::Log
                } else {
                    Builtin::LogE
                };
                Ok(Some(Expr::new(
                    ExprNode::Builtin { builtin, args },
                    location,
                    ValType::NUM.into(),
                )))
            }
            "locate" => {
                let args = self.build_builtin_args(name, arguments, 1..=3, location)?;
                let builtin = match args.len() {
                    3 => Builtin::LocateCoord,
                    _ => Builtin::Locate,
                };
                Ok(Some(Expr::new(
                    ExprNode::Builtin { builtin, args },
                    location,
                    ValType::ANYTHING.into(),
                )))
            }
            _ => Ok(None),
        }
    }

    fn build_builtin_args(
        &mut self,
        name: &str,
        arguments: &[Argument],
        arity: std::ops::RangeInclusive<usize>,
        location: Location,
    ) -> Result<Vec<Expr>, UnresolvedRef> {
        if !arity.contains(&arguments.len()) {
            self.diagnostics.emit(
                WarningCode::InvalidArgumentCount,
                location,
                format!("{name}() takes {:?} arguments, got {}", arity, arguments.len()),
            );
        }
        let mut args = Vec::with_capacity(arguments.len());
        for argument in arguments.iter().take(*arity.end()) {
            if argument.key.is_some() {
                self.diagnostics.emit(
                    WarningCode::BadArgument,
                    argument.value.location,
                    format!("{name}() does not take named arguments"),
                );
            }
            args.push(self.build(&argument.value)?);
        }
        while args.len() < *arity.start() {
            args.push(Expr::null(location));
        }
        Ok(args)
    }

    // ------------------------------------------------------------------
    // Argument lists

    pub fn build_args(
        &mut self,
        arguments: &[Argument],
        location: Location,
    ) -> Result<ArgList, UnresolvedRef> {
        // arglist() replaces the whole list and so must be alone.
        let is_arglist = |argument: &Argument| {
            argument.key.is_none()
                && matches!(&argument.value.node,
                    ExpressionNode::Call { name, .. } if name == "arglist")
        };
        if let Some(splat) = arguments.iter().find(|a| is_arglist(a)) {
            let ExpressionNode::Call { arguments: inner, .. } = &splat.value.node else {
                unreachable!();
            };
            if arguments.len() != 1 || inner.len() != 1 {
                self.diagnostics.emit(
                    WarningCode::ArglistOnlyArgument,
                    splat.value.location,
                    "arglist() must be the only argument",
                );
            }
            let value = match inner.first() {
                Some(argument) => self.build(&argument.value)?,
                None => Expr::null(location),
            };
            return Ok(ArgList {
                args: vec![(None, value)],
                splat: true,
            });
        }

        let mut args: Vec<(Option<_>, Expr)> = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let value = self.build(&argument.value)?;
            let Some(key) = &argument.key else {
                args.push((None, value));
                continue;
            };
            let key_expr = self.build(key)?;
            match key_expr.try_as_constant() {
                Some(Constant::String(text)) => {
                    let id = self.tree.strings.intern(&text);
                    args.push((Some(id), value));
                }
                // `'res.dmi' = x` and `/some/path = x` name the argument
                // after the key's text form.
                Some(Constant::Resource(text)) => {
                    let id = self.tree.strings.intern(&text);
                    args.push((Some(id), value));
                }
                Some(Constant::Path { path, .. }) => {
                    let id = self.tree.strings.intern(&path.to_string());
                    args.push((Some(id), value));
                }
                // A numeric key re-slots the argument, counting from one.
                Some(Constant::Number(n)) if n >= 1.0 && n.fract() == 0.0 => {
                    let slot = n as usize - 1;
                    while args.len() < slot {
                        args.push((None, Expr::null(location)));
                    }
                    if slot < args.len() {
                        args[slot] = (None, value);
                    } else {
                        args.push((None, value));
                    }
                }
                _ => {
                    self.diagnostics.emit(
                        WarningCode::InvalidArgumentKey,
                        key.location,
                        "argument key must be a constant name or position",
                    );
                    args.push((None, value));
                }
            }
        }
        Ok(ArgList { args, splat: false })
    }

    // ------------------------------------------------------------------
    // Assignment

    fn build_assign(
        &mut self,
        op: AssignOperator,
        lhs: &Expression,
        rhs: &Expression,
        location: Location,
    ) -> Result<Expr, UnresolvedRef> {
        let target = self.build(lhs)?;
        // The assigned type feeds `new()` inference on the right side.
        let saved = self.inferred.take();
        self.inferred = target.val_type.as_path();
        let value = self.build(rhs);
        self.inferred = saved;
        let value = value?;

        if !target.is_lvalue() {
            self.diagnostics.emit(
                WarningCode::InvalidReference,
                location,
                "cannot assign to this expression",
            );
            return Ok(value);
        }
        self.check_writable(&target, lhs, location);

        Ok(Expr::new(
            ExprNode::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            location,
            ValType::ANYTHING.into(),
        ))
    }

    fn build_crement(
        &mut self,
        target: &Expression,
        increment: bool,
        prefix: bool,
        location: Location,
    ) -> Result<Expr, UnresolvedRef> {
        let built = self.build(target)?;
        if !built.is_lvalue() {
            self.diagnostics.emit(
                WarningCode::InvalidReference,
                location,
                format!(
                    "{} needs a variable",
                    if increment { "++" } else { "--" }
                ),
            );
            return Ok(built);
        }
        self.check_writable(&built, target, location);
        Ok(Expr::new(
            ExprNode::Crement {
                target: Box::new(built),
                increment,
                prefix,
            },
            location,
            ValType::NUM.into(),
        ))
    }

    fn check_writable(&mut self, target: &Expr, source: &Expression, location: Location) {
        let name = match &source.node {
            ExpressionNode::Identifier(name) => Some(name.as_str()),
            _ => None,
        };
        let constant = match &target.node {
            ExprNode::Direct(Reference::Global(id)) => self.tree.global(*id).is_const,
            ExprNode::Direct(Reference::Local(slot)) => self
                .proc
                .is_some_and(|proc| proc.is_const_local(*slot)),
            ExprNode::Direct(Reference::SrcField(_)) => name
                .and_then(|name| self.tree.var_decl(self.owner, name))
                .is_some_and(|(_, decl)| decl.is_const),
            _ => false,
        };
        if constant {
            self.diagnostics.emit(
                WarningCode::WriteToConstant,
                location,
                match name {
                    Some(name) => format!("\"{name}\" is declared const"),
                    None => "assignment to a const var".to_string(),
                },
            );
        }
    }
}
