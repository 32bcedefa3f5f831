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

//! The resolved expression IR: what the expression builder produces from the
//! AST and what the statement builder emits bytecode from. Names are already
//! bound to references, types already bound to ids; the only work left at
//! emission time is interning literal text.

use serde_json::Value;

use dreamc_common::program::{CallArgsType, Reference};
use dreamc_common::{ComplexValType, Location, ProcId, StringId, TypeId, TypePath, ValType};

use crate::ast::{AssignOperator, BinaryOperator, UnaryOperator};
use crate::diagnostics::CompileError;
use crate::objtree::StringTable;
use crate::proc::Proc;

/// A compile-time value, the result of constant folding. Directly
/// serializable into the artifact's variable tables.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Null,
    Number(f32),
    String(String),
    /// A `'file.ext'` resource literal.
    Resource(String),
    /// A type path literal, already materialized in the object tree.
    Path { id: TypeId, path: TypePath },
    /// A constant `list(...)`; keys present only for associative entries.
    List(Vec<(Option<Constant>, Constant)>),
}

impl Constant {
    pub fn truthy(&self) -> bool {
        match self {
            Constant::Null => false,
            Constant::Number(n) => *n != 0.0,
            Constant::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// The primitive type flags this value satisfies.
    pub fn val_type(&self) -> ValType {
        match self {
            Constant::Null => ValType::NULL,
            Constant::Number(_) => ValType::NUM,
            Constant::String(_) => ValType::TEXT,
            Constant::Resource(_) => ValType::FILE,
            Constant::Path { .. } => ValType::PATH,
            Constant::List(_) => ValType::INSTANCE,
        }
    }

    /// The artifact form. Numbers that are whole serialize as integers so the
    /// common case stays readable; non-primitive values use a one-key tag
    /// object.
    pub fn to_json(&self) -> Value {
        match self {
            Constant::Null => Value::Null,
            Constant::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Value::from(*n as i64)
                } else {
                    Value::from(*n as f64)
                }
            }
            Constant::String(s) => Value::from(s.clone()),
            Constant::Resource(path) => serde_json::json!({ "resource": path }),
            Constant::Path { path, .. } => serde_json::json!({ "type": path.to_string() }),
            Constant::List(items) => {
                let entries: Vec<Value> = items
                    .iter()
                    .map(|(key, value)| match key {
                        Some(key) => serde_json::json!([key.to_json(), value.to_json()]),
                        None => value.to_json(),
                    })
                    .collect();
                serde_json::json!({ "list": entries })
            }
        }
    }

    /// Apply a binary operator to two constants, when the operation is
    /// defined on them. Pure: never mutates, always yields the same result
    /// for the same inputs.
    pub fn fold_binary(op: BinaryOperator, lhs: &Constant, rhs: &Constant) -> Option<Constant> {
        use BinaryOperator::*;
        use Constant::*;

        // DM bit operations truncate the float operands.
        let bits = |n: &f32| *n as i64 as u32;
        let bool_num = |b: bool| Number(if b { 1.0 } else { 0.0 });

        match (op, lhs, rhs) {
            (Add, Number(a), Number(b)) => Some(Number(a + b)),
            (Add, String(a), String(b)) => Some(String(format!("{a}{b}"))),
            (Subtract, Number(a), Number(b)) => Some(Number(a - b)),
            (Multiply, Number(a), Number(b)) => Some(Number(a * b)),
            (Divide, Number(a), Number(b)) if *b != 0.0 => Some(Number(a / b)),
            (Modulus, Number(a), Number(b)) if *b != 0.0 => {
                Some(Number((bits(a) as i64 % bits(b) as i64) as f32))
            }
            (ModulusModulus, Number(a), Number(b)) if *b != 0.0 => {
                Some(Number(a.rem_euclid(*b)))
            }
            (Power, Number(a), Number(b)) => Some(Number(a.powf(*b))),
            (BitAnd, Number(a), Number(b)) => Some(Number((bits(a) & bits(b)) as f32)),
            (BitOr, Number(a), Number(b)) => Some(Number((bits(a) | bits(b)) as f32)),
            (BitXor, Number(a), Number(b)) => Some(Number((bits(a) ^ bits(b)) as f32)),
            (LeftShift, Number(a), Number(b)) => Some(Number((bits(a) << (bits(b) & 31)) as f32)),
            (RightShift, Number(a), Number(b)) => Some(Number((bits(a) >> (bits(b) & 31)) as f32)),
            (And, a, b) => Some(if a.truthy() { b.clone() } else { a.clone() }),
            (Or, a, b) => Some(if a.truthy() { a.clone() } else { b.clone() }),
            (Equal, a, b) => Some(bool_num(a == b)),
            (NotEqual, a, b) => Some(bool_num(a != b)),
            (Less, Number(a), Number(b)) => Some(bool_num(a < b)),
            (LessOrEqual, Number(a), Number(b)) => Some(bool_num(a <= b)),
            (Greater, Number(a), Number(b)) => Some(bool_num(a > b)),
            (GreaterOrEqual, Number(a), Number(b)) => Some(bool_num(a >= b)),
            _ => None,
        }
    }

    pub fn fold_unary(op: UnaryOperator, operand: &Constant) -> Option<Constant> {
        use Constant::*;
        match (op, operand) {
            (UnaryOperator::Negate, Number(n)) => Some(Number(-n)),
            (UnaryOperator::Not, value) => {
                Some(Number(if value.truthy() { 0.0 } else { 1.0 }))
            }
            (UnaryOperator::BitNot, Number(n)) => Some(Number(!(*n as i64 as u32) as f32)),
            _ => None,
        }
    }
}

/// Fixed-shape builtins that compile straight to an opcode rather than a
/// proc call. Argument counts are validated by the expression builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    IsNull,
    IsType,
    AsType,
    Length,
    Prob,
    Abs,
    Sqrt,
    Sin,
    Cos,
    Tan,
    ArcSin,
    ArcCos,
    ArcTan,
    ArcTan2,
    Log,
    LogE,
    Initial,
    IsSaved,
    Locate,
    LocateCoord,
    GetStep,
    GetDir,
}

/// What a call invokes.
#[derive(Clone, Debug, PartialEq)]
pub enum CallTarget {
    /// A proc located by reference: `SrcProc`, `GlobalProc`, or `SuperProc`.
    Proc(Reference),
    /// `base.name(...)`, looked up at runtime.
    Deref {
        base: Box<Expr>,
        name: StringId,
        safe: bool,
    },
}

/// A built argument list, named and positional arguments merged in final
/// order. `splat` marks the `arglist(x)` calling convention, where the sole
/// entry is the list supplying the real arguments.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ArgList {
    pub args: Vec<(Option<StringId>, Expr)>,
    pub splat: bool,
}

impl ArgList {
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// What `new` instantiates, after inference.
#[derive(Clone, Debug, PartialEq)]
pub enum NewTarget {
    Type(TypeId),
    Expr(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub node: ExprNode,
    pub location: Location,
    pub val_type: ComplexValType,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprNode {
    Constant(Constant),
    /// A storage location read directly: argument, local, global, `src`,
    /// `usr`, `world`, `args`, or a field on `src`.
    Direct(Reference),
    /// `base.name`, base evaluated onto the stack first.
    Field {
        base: Box<Expr>,
        name: StringId,
        safe: bool,
    },
    /// `base[index]`.
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
        safe: bool,
    },
    /// A global proc used as a value.
    ProcRef(ProcId),
    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOperator,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Assign {
        op: AssignOperator,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// `++`/`--`, prefix or postfix.
    Crement {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },
    Call {
        target: CallTarget,
        args: ArgList,
    },
    /// `..(...)`; an absent arg list forwards the caller's own arguments.
    SuperCall { args: Option<ArgList> },
    Builtin {
        builtin: Builtin,
        args: Vec<Expr>,
    },
    /// `rgb(...)` / `gradient(...)`, which take full argument-list calling
    /// conventions rather than fixed arity.
    Rgb { args: ArgList },
    Gradient { args: ArgList },
    New {
        target: NewTarget,
        args: ArgList,
    },
    List {
        items: Vec<(Option<Expr>, Expr)>,
    },
    Pick {
        entries: Vec<(Option<Expr>, Expr)>,
    },
    /// Interpolated text; `format` is the marker-bearing template and
    /// `interpolations` the values pushed for it, in marker order.
    FormatString {
        format: StringId,
        interpolations: Vec<Expr>,
    },
    InRange {
        value: Box<Expr>,
        start: Box<Expr>,
        end: Box<Expr>,
    },
}

impl Expr {
    pub fn new(node: ExprNode, location: Location, val_type: ComplexValType) -> Self {
        Expr {
            node,
            location,
            val_type,
        }
    }

    pub fn constant(value: Constant, location: Location) -> Self {
        let val_type = value.val_type().into();
        Expr {
            node: ExprNode::Constant(value),
            location,
            val_type,
        }
    }

    pub fn null(location: Location) -> Self {
        Expr::constant(Constant::Null, location)
    }

    /// Whether this expression can be the target of an assignment.
    pub fn is_lvalue(&self) -> bool {
        match &self.node {
            ExprNode::Direct(reference) => !matches!(
                reference,
                Reference::SuperProc | Reference::SelfProc | Reference::GlobalProc(_)
            ),
            ExprNode::Field { .. } | ExprNode::Index { .. } => true,
            _ => false,
        }
    }

    /// Reduce to a compile-time value when every input is itself constant.
    /// Pure; calling it twice always yields the same answer.
    pub fn try_as_constant(&self) -> Option<Constant> {
        match &self.node {
            ExprNode::Constant(value) => Some(value.clone()),
            ExprNode::Unary { op, operand } => {
                Constant::fold_unary(*op, &operand.try_as_constant()?)
            }
            ExprNode::Binary { op, lhs, rhs } => Constant::fold_binary(
                *op,
                &lhs.try_as_constant()?,
                &rhs.try_as_constant()?,
            ),
            ExprNode::Ternary {
                condition,
                if_true,
                if_false,
            } => {
                let condition = condition.try_as_constant()?;
                if condition.truthy() {
                    if_true.try_as_constant()
                } else {
                    if_false.try_as_constant()
                }
            }
            ExprNode::List { items } => {
                let mut folded = Vec::with_capacity(items.len());
                for (key, value) in items {
                    let key = match key {
                        Some(key) => Some(key.try_as_constant()?),
                        None => None,
                    };
                    folded.push((key, value.try_as_constant()?));
                }
                Some(Constant::List(folded))
            }
            _ => None,
        }
    }
}

/// Everything emission needs: the proc being written and the intern tables
/// for literal text.
pub struct EmitCtx<'a> {
    pub proc: &'a mut Proc,
    pub strings: &'a mut StringTable,
    pub resources: &'a mut StringTable,
}

impl Expr {
    /// Emit instructions leaving this expression's value on the stack.
    pub fn emit_push(&self, ctx: &mut EmitCtx) -> Result<(), CompileError> {
        match &self.node {
            ExprNode::Constant(value) => emit_constant(value, ctx),
            ExprNode::Direct(reference) => {
                ctx.proc.push_reference_value(*reference);
                Ok(())
            }
            ExprNode::Field { base, name, safe } => {
                base.emit_push(ctx)?;
                let over = safe.then(|| {
                    let label = ctx.proc.new_label_name();
                    ctx.proc.jump_if_null_no_pop(label.clone());
                    label
                });
                ctx.proc.dereference_field(*name);
                if let Some(label) = over {
                    ctx.proc.place_label(label)?;
                }
                Ok(())
            }
            ExprNode::Index { base, index, safe } => {
                base.emit_push(ctx)?;
                let over = safe.then(|| {
                    let label = ctx.proc.new_label_name();
                    ctx.proc.jump_if_null_no_pop(label.clone());
                    label
                });
                index.emit_push(ctx)?;
                ctx.proc.dereference_index();
                if let Some(label) = over {
                    ctx.proc.place_label(label)?;
                }
                Ok(())
            }
            ExprNode::ProcRef(id) => {
                ctx.proc.push_proc(*id);
                Ok(())
            }
            ExprNode::Unary { op, operand } => {
                operand.emit_push(ctx)?;
                match op {
                    UnaryOperator::Negate => ctx.proc.negate(),
                    UnaryOperator::Not => ctx.proc.boolean_not(),
                    UnaryOperator::BitNot => ctx.proc.bit_not(),
                }
                Ok(())
            }
            ExprNode::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs, ctx),
            ExprNode::Ternary {
                condition,
                if_true,
                if_false,
            } => {
                let other = ctx.proc.new_label_name();
                let end = ctx.proc.new_label_name();
                condition.emit_push(ctx)?;
                ctx.proc.jump_if_false(other.clone());
                if_true.emit_push(ctx)?;
                ctx.proc.jump(end.clone());
                ctx.proc.place_label(other)?;
                if_false.emit_push(ctx)?;
                ctx.proc.place_label(end)?;
                // Both arms push one value; the linear tracker saw two.
                ctx.proc.shrink_tracked(1);
                Ok(())
            }
            ExprNode::Assign { op, target, value } => self.emit_assign(*op, target, value, ctx),
            ExprNode::Crement {
                target,
                increment,
                prefix,
            } => {
                if !*prefix {
                    // Postfix: the old value is the result; mutate after.
                    target.emit_push(ctx)?;
                }
                let reference = target.emit_reference(ctx)?;
                if *increment {
                    ctx.proc.increment(reference);
                } else {
                    ctx.proc.decrement(reference);
                }
                if !*prefix {
                    ctx.proc.pop();
                }
                Ok(())
            }
            ExprNode::Call { target, args } => match target {
                CallTarget::Proc(reference) => {
                    let (args_type, stack) = emit_args(args, ctx)?;
                    ctx.proc.call(*reference, args_type, stack);
                    Ok(())
                }
                CallTarget::Deref { base, name, safe } => {
                    base.emit_push(ctx)?;
                    let over = safe.then(|| {
                        let label = ctx.proc.new_label_name();
                        ctx.proc.jump_if_null_no_pop(label.clone());
                        label
                    });
                    let (args_type, stack) = emit_args(args, ctx)?;
                    ctx.proc.dereference_call(*name, args_type, stack);
                    if let Some(label) = over {
                        ctx.proc.place_label(label)?;
                    }
                    Ok(())
                }
            },
            ExprNode::SuperCall { args } => {
                let (args_type, stack) = match args {
                    Some(args) => emit_args(args, ctx)?,
                    None => (CallArgsType::FromProcArguments, 0),
                };
                ctx.proc.call(Reference::SuperProc, args_type, stack);
                Ok(())
            }
            ExprNode::Builtin { builtin, args } => {
                for arg in args {
                    arg.emit_push(ctx)?;
                }
                emit_builtin(*builtin, ctx.proc);
                Ok(())
            }
            ExprNode::Rgb { args } => {
                let (args_type, stack) = emit_args(args, ctx)?;
                ctx.proc.rgb(args_type, stack);
                Ok(())
            }
            ExprNode::Gradient { args } => {
                let (args_type, stack) = emit_args(args, ctx)?;
                ctx.proc.gradient(args_type, stack);
                Ok(())
            }
            ExprNode::New { target, args } => {
                match target {
                    NewTarget::Type(id) => ctx.proc.push_type(*id),
                    NewTarget::Expr(expr) => expr.emit_push(ctx)?,
                }
                let (args_type, stack) = emit_args(args, ctx)?;
                ctx.proc.create_object(args_type, stack);
                Ok(())
            }
            ExprNode::List { items } => {
                let associative = items.iter().any(|(key, _)| key.is_some());
                if associative {
                    for (key, value) in items {
                        match key {
                            Some(key) => key.emit_push(ctx)?,
                            None => ctx.proc.push_null(),
                        }
                        value.emit_push(ctx)?;
                    }
                    ctx.proc.create_associative_list(items.len() as u32);
                } else {
                    for (_, value) in items {
                        value.emit_push(ctx)?;
                    }
                    ctx.proc.create_list(items.len() as u32);
                }
                Ok(())
            }
            ExprNode::Pick { entries } => {
                let weighted = entries.iter().any(|(weight, _)| weight.is_some());
                if weighted {
                    for (weight, value) in entries {
                        match weight {
                            Some(weight) => weight.emit_push(ctx)?,
                            None => ctx.proc.push_float(100.0),
                        }
                        value.emit_push(ctx)?;
                    }
                    ctx.proc.pick_weighted(entries.len() as u32);
                } else {
                    for (_, value) in entries {
                        value.emit_push(ctx)?;
                    }
                    ctx.proc.pick_unweighted(entries.len() as u32);
                }
                Ok(())
            }
            ExprNode::FormatString {
                format,
                interpolations,
            } => {
                for value in interpolations {
                    value.emit_push(ctx)?;
                }
                ctx.proc
                    .format_string(*format, interpolations.len() as u32);
                Ok(())
            }
            ExprNode::InRange { value, start, end } => {
                value.emit_push(ctx)?;
                start.emit_push(ctx)?;
                end.emit_push(ctx)?;
                ctx.proc.is_in_range();
                Ok(())
            }
        }
    }

    /// Emit any stack entries a reference to this l-value needs and return
    /// the reference itself. Calling this on an r-value is an internal error;
    /// the builder diagnoses those before emission.
    pub fn emit_reference(&self, ctx: &mut EmitCtx) -> Result<Reference, CompileError> {
        match &self.node {
            ExprNode::Direct(reference) => Ok(*reference),
            ExprNode::Field { base, name, .. } => {
                base.emit_push(ctx)?;
                Ok(Reference::Field(*name))
            }
            ExprNode::Index { base, index, .. } => {
                base.emit_push(ctx)?;
                index.emit_push(ctx)?;
                Ok(Reference::ListIndex)
            }
            _ => Err(CompileError::NotAReference),
        }
    }

    fn emit_binary(
        &self,
        op: BinaryOperator,
        lhs: &Expr,
        rhs: &Expr,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        use BinaryOperator::*;
        match op {
            And | Or => {
                let end = ctx.proc.new_label_name();
                lhs.emit_push(ctx)?;
                if op == And {
                    ctx.proc.boolean_and(end.clone());
                } else {
                    ctx.proc.boolean_or(end.clone());
                }
                rhs.emit_push(ctx)?;
                ctx.proc.place_label(end)?;
                // The short-circuit path replaces the left value rather than
                // stacking a second one.
                ctx.proc.shrink_tracked(1);
                return Ok(());
            }
            In => {
                lhs.emit_push(ctx)?;
                rhs.emit_push(ctx)?;
                ctx.proc.is_in_list();
                return Ok(());
            }
            _ => {}
        }
        lhs.emit_push(ctx)?;
        rhs.emit_push(ctx)?;
        match op {
            Add => ctx.proc.add(),
            Subtract => ctx.proc.subtract(),
            Multiply => ctx.proc.multiply(),
            Divide => ctx.proc.divide(),
            Modulus => ctx.proc.modulus(),
            ModulusModulus => ctx.proc.modulus_modulus(),
            Power => ctx.proc.power(),
            BitAnd => ctx.proc.bit_and(),
            BitOr => ctx.proc.bit_or(),
            BitXor => ctx.proc.bit_xor(),
            LeftShift => ctx.proc.bit_shift_left(),
            RightShift => ctx.proc.bit_shift_right(),
            Equal => ctx.proc.compare_equals(),
            NotEqual => ctx.proc.compare_not_equals(),
            Equivalent => ctx.proc.compare_equivalent(),
            NotEquivalent => ctx.proc.compare_not_equivalent(),
            Less => ctx.proc.compare_less_than(),
            LessOrEqual => ctx.proc.compare_less_than_or_equal(),
            Greater => ctx.proc.compare_greater_than(),
            GreaterOrEqual => ctx.proc.compare_greater_than_or_equal(),
            And | Or | In => unreachable!("handled above"),
        }
        Ok(())
    }

    /// Expression-position assignment: the assigned value remains on the
    /// stack as the expression's result.
    fn emit_assign(
        &self,
        op: AssignOperator,
        target: &Expr,
        value: &Expr,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        use AssignOperator::*;
        match op {
            LogicalAnd | LogicalOr => {
                // `a &&= b` assigns only when `a` is truthy; either path
                // leaves the final value of `a` on the stack.
                let other = ctx.proc.new_label_name();
                let end = ctx.proc.new_label_name();
                let reference = target.emit_reference(ctx)?;
                if op == LogicalAnd {
                    ctx.proc.jump_if_false_reference(reference, other.clone());
                } else {
                    ctx.proc.jump_if_true_reference(reference, other.clone());
                }
                value.emit_push(ctx)?;
                let reference = target.emit_reference(ctx)?;
                ctx.proc.assign(reference);
                ctx.proc.jump(end.clone());
                ctx.proc.place_label(other)?;
                let reference = target.emit_reference(ctx)?;
                ctx.proc.push_reference_value(reference);
                ctx.proc.place_label(end)?;
                ctx.proc.shrink_tracked(1);
                return Ok(());
            }
            _ => {}
        }
        let reference = target.emit_reference(ctx)?;
        value.emit_push(ctx)?;
        match op {
            Assign => ctx.proc.assign(reference),
            AssignInto => ctx.proc.assign_into(reference),
            Add => ctx.proc.append(reference),
            Subtract => ctx.proc.remove(reference),
            Multiply => ctx.proc.multiply_reference(reference),
            Divide => ctx.proc.divide_reference(reference),
            Modulus => ctx.proc.modulus_reference(reference),
            ModulusModulus => ctx.proc.modulus_modulus_reference(reference),
            BitAnd => ctx.proc.mask(reference),
            BitOr => ctx.proc.combine(reference),
            BitXor => ctx.proc.bit_xor_reference(reference),
            LeftShift => ctx.proc.bit_shift_left_reference(reference),
            RightShift => ctx.proc.bit_shift_right_reference(reference),
            LogicalAnd | LogicalOr => unreachable!("handled above"),
        }
        Ok(())
    }
}

fn emit_constant(value: &Constant, ctx: &mut EmitCtx) -> Result<(), CompileError> {
    match value {
        Constant::Null => ctx.proc.push_null(),
        Constant::Number(n) => ctx.proc.push_float(*n),
        Constant::String(s) => {
            let id = ctx.strings.intern(s);
            ctx.proc.push_string(id);
        }
        Constant::Resource(path) => {
            let id = ctx.resources.intern(path);
            ctx.proc.push_resource(id);
        }
        Constant::Path { id, .. } => ctx.proc.push_type(*id),
        Constant::List(items) => {
            let associative = items.iter().any(|(key, _)| key.is_some());
            if associative {
                for (key, value) in items {
                    match key {
                        Some(key) => emit_constant(key, ctx)?,
                        None => ctx.proc.push_null(),
                    }
                    emit_constant(value, ctx)?;
                }
                ctx.proc.create_associative_list(items.len() as u32);
            } else {
                for (_, value) in items {
                    emit_constant(value, ctx)?;
                }
                ctx.proc.create_list(items.len() as u32);
            }
        }
    }
    Ok(())
}

/// Push a call's arguments and report the calling convention and the number
/// of stack entries the call consumes for them.
fn emit_args(args: &ArgList, ctx: &mut EmitCtx) -> Result<(CallArgsType, u32), CompileError> {
    if args.splat {
        args.args[0].1.emit_push(ctx)?;
        return Ok((CallArgsType::FromArgumentList, 1));
    }
    if args.args.is_empty() {
        return Ok((CallArgsType::None, 0));
    }
    let keyed = args.args.iter().any(|(key, _)| key.is_some());
    if keyed {
        for (key, value) in &args.args {
            match key {
                Some(id) => ctx.proc.push_string(*id),
                None => ctx.proc.push_null(),
            }
            value.emit_push(ctx)?;
        }
        Ok((CallArgsType::FromStackKeyed, args.args.len() as u32 * 2))
    } else {
        for (_, value) in &args.args {
            value.emit_push(ctx)?;
        }
        Ok((CallArgsType::FromStack, args.args.len() as u32))
    }
}

fn emit_builtin(builtin: Builtin, proc: &mut Proc) {
    match builtin {
        Builtin::IsNull => proc.is_null(),
        Builtin::IsType => proc.is_type(),
        Builtin::AsType => proc.as_type(),
        Builtin::Length => proc.length(),
        Builtin::Prob => proc.prob(),
        Builtin::Abs => proc.abs(),
        Builtin::Sqrt => proc.sqrt(),
        Builtin::Sin => proc.sin(),
        Builtin::Cos => proc.cos(),
        Builtin::Tan => proc.tan(),
        Builtin::ArcSin => proc.arcsin(),
        Builtin::ArcCos => proc.arccos(),
        Builtin::ArcTan => proc.arctan(),
        Builtin::ArcTan2 => proc.arctan2(),
        Builtin::Log => proc.log(),
        Builtin::LogE => proc.log_e(),
        Builtin::Initial => proc.initial(),
        Builtin::IsSaved => proc.is_saved(),
        Builtin::Locate => proc.locate(),
        Builtin::LocateCoord => proc.locate_coord(),
        Builtin::GetStep => proc.get_step(),
        Builtin::GetDir => proc.get_dir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dreamc_common::FileId;

    fn num(n: f32) -> Expr {
        Expr::constant(Constant::Number(n), Location::new(FileId(0), 1, 1))
    }

    fn binary(op: BinaryOperator, lhs: Expr, rhs: Expr) -> Expr {
        let location = lhs.location;
        Expr::new(
            ExprNode::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            location,
            ValType::ANYTHING.into(),
        )
    }

    #[test]
    fn arithmetic_folds() {
        let expr = binary(
            BinaryOperator::Add,
            num(2.0),
            binary(BinaryOperator::Multiply, num(3.0), num(4.0)),
        );
        assert_eq!(expr.try_as_constant(), Some(Constant::Number(14.0)));
    }

    #[test]
    fn folding_is_idempotent() {
        let expr = binary(BinaryOperator::Subtract, num(10.0), num(4.0));
        let first = expr.try_as_constant();
        let second = expr.try_as_constant();
        assert_eq!(first, second);
        assert_eq!(first, Some(Constant::Number(6.0)));
    }

    #[test]
    fn division_by_zero_does_not_fold() {
        let expr = binary(BinaryOperator::Divide, num(1.0), num(0.0));
        assert_eq!(expr.try_as_constant(), None);
    }

    #[test]
    fn string_concat_folds() {
        let hello = Expr::constant(
            Constant::String("hello ".to_string()),
            Location::INTERNAL,
        );
        let world = Expr::constant(Constant::String("world".to_string()), Location::INTERNAL);
        let expr = binary(BinaryOperator::Add, hello, world);
        assert_eq!(
            expr.try_as_constant(),
            Some(Constant::String("hello world".to_string()))
        );
    }

    #[test]
    fn ternary_folds_by_branch() {
        let expr = Expr::new(
            ExprNode::Ternary {
                condition: Box::new(num(0.0)),
                if_true: Box::new(num(1.0)),
                if_false: Box::new(num(2.0)),
            },
            Location::INTERNAL,
            ValType::ANYTHING.into(),
        );
        assert_eq!(expr.try_as_constant(), Some(Constant::Number(2.0)));
    }

    #[test]
    fn whole_numbers_serialize_as_integers() {
        assert_eq!(Constant::Number(100.0).to_json(), serde_json::json!(100));
        assert_eq!(Constant::Number(0.5).to_json(), serde_json::json!(0.5));
        assert_eq!(Constant::Null.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn lvalue_shapes() {
        let direct = Expr::new(
            ExprNode::Direct(Reference::SrcField(StringId(0))),
            Location::INTERNAL,
            ValType::ANYTHING.into(),
        );
        assert!(direct.is_lvalue());
        assert!(!num(1.0).is_lvalue());
        let super_proc = Expr::new(
            ExprNode::Direct(Reference::SuperProc),
            Location::INTERNAL,
            ValType::ANYTHING.into(),
        );
        assert!(!super_proc.is_lvalue());
    }
}
