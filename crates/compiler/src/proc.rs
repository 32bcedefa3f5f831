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

//! The per-proc bytecode writer. One emit method per opcode; jumps target
//! named labels that are patched to byte offsets when the proc is assembled.
//! The writer also owns the proc's local slots, lexical scopes, loop stack,
//! code labels, and the running stack-depth measurement.

use indexmap::IndexMap;
use itertools::Itertools;

use dreamc_common::program::{
    CallArgsType, Opcode, OperandType, ProcArgumentJson, ProcDefinitionJson, ProcFlags, Reference,
    SourceInfoJson,
};
use dreamc_common::{GlobalId, Location, ProcId, StringId, TypeId, ValType};

use crate::diagnostics::{CompileError, Diagnostics, WarningCode};
use crate::objtree::ObjectTree;

/// A value operand attached to an [`Instr`], still in symbolic form.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Float(f32),
    String(StringId),
    Resource(StringId),
    Type(TypeId),
    Proc(ProcId),
    Label(String),
    Reference(Reference),
    ArgType(CallArgsType),
    StackDelta(u32),
    ListSize(u32),
    EnumeratorId(u32),
    Filter(TypeId),
    PickCount(u32),
    ConcatCount(u32),
    FormatCount(u32),
}

impl Operand {
    fn kind(&self) -> OperandType {
        match self {
            Operand::Float(_) => OperandType::Float,
            Operand::String(_) => OperandType::String,
            Operand::Resource(_) => OperandType::Resource,
            Operand::Type(_) => OperandType::TypeId,
            Operand::Proc(_) => OperandType::ProcId,
            Operand::Label(_) => OperandType::Label,
            Operand::Reference(_) => OperandType::Reference,
            Operand::ArgType(_) => OperandType::ArgType,
            Operand::StackDelta(_) => OperandType::StackDelta,
            Operand::ListSize(_) => OperandType::ListSize,
            Operand::EnumeratorId(_) => OperandType::EnumeratorId,
            Operand::Filter(_) => OperandType::FilterId,
            Operand::PickCount(_) => OperandType::PickCount,
            Operand::ConcatCount(_) => OperandType::ConcatCount,
            Operand::FormatCount(_) => OperandType::FormatCount,
        }
    }

    fn encoded_size(&self) -> u32 {
        match self {
            Operand::ArgType(_) => 1,
            Operand::Reference(reference) => match reference {
                Reference::Argument(_) | Reference::Local(_) => 2,
                Reference::Global(_)
                | Reference::GlobalProc(_)
                | Reference::Field(_)
                | Reference::SrcField(_)
                | Reference::SrcProc(_) => 5,
                _ => 1,
            },
            _ => 4,
        }
    }
}

/// One not-yet-serialized instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Instr {
    pub op: Opcode,
    pub operands: Vec<Operand>,
}

/// Where a `break`/`continue` resolves to: the loop's label base plus any
/// enumerators belonging to loops the jump bails out of.
#[derive(Clone, Debug, PartialEq)]
pub struct LoopTarget {
    pub base: String,
    pub crossed_enumerators: Vec<u32>,
}

impl LoopTarget {
    pub fn start_label(&self) -> String {
        format!("{}_start", self.base)
    }

    pub fn continue_label(&self) -> String {
        format!("{}_continue", self.base)
    }

    pub fn end_label(&self) -> String {
        format!("{}_end", self.base)
    }
}

#[derive(Clone, Debug)]
struct LoopFrame {
    base: String,
    start: usize,
    enumerator: Option<u32>,
}

#[derive(Clone, Debug, Default)]
struct Scope {
    parent: Option<usize>,
    locals: Vec<(String, u8)>,
    /// Proc-static vars declared in this scope, living in global slots.
    statics: Vec<(String, GlobalId)>,
    /// User label name and the instruction position it was placed at.
    code_labels: Vec<(String, usize)>,
}

#[derive(Clone, Debug)]
struct PendingGoto {
    label: String,
    placeholder: String,
    scope: usize,
    location: Location,
}

/// A declared parameter slot.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcParameter {
    pub name: String,
    pub val_type: ValType,
}

/// A proc being compiled, and everything that ends up in its artifact entry.
#[derive(Debug, Default)]
pub struct Proc {
    pub id: ProcId,
    pub owner: TypeId,
    pub name: String,
    pub location: Location,
    pub is_verb: bool,
    pub flags: ProcFlags,
    pub verb_name: Option<String>,
    pub verb_category: Option<String>,
    pub verb_desc: Option<String>,
    pub invisibility: Option<f32>,

    parameters: Vec<ProcParameter>,
    instructions: Vec<Instr>,
    labels: IndexMap<String, usize>,

    locals: Vec<String>,
    /// Next free local slot. Slots are handed out LIFO: leaving a scope
    /// releases exactly the slots its locals occupied.
    next_local: u8,
    const_locals: Vec<u8>,
    scopes: Vec<Scope>,
    current_scope: usize,
    pending_gotos: Vec<PendingGoto>,

    loop_stack: Vec<LoopFrame>,
    label_counter: u32,
    code_label_counter: u32,
    enumerator_counter: u32,

    /// (instruction index, file when it changed, line).
    source_notes: Vec<(usize, Option<StringId>, u32)>,
    last_source_file: Option<StringId>,
    last_source_line: Option<u32>,

    current_stack: i32,
    max_stack: i32,
    underflow_at: Option<usize>,
}

impl Proc {
    pub fn new(id: ProcId, owner: TypeId, name: impl Into<String>, location: Location) -> Self {
        Proc {
            id,
            owner,
            name: name.into(),
            location,
            scopes: vec![Scope::default()],
            ..Default::default()
        }
    }

    pub fn parameters(&self) -> &[ProcParameter] {
        &self.parameters
    }

    pub fn locals(&self) -> &[String] {
        &self.locals
    }

    pub fn instructions(&self) -> &[Instr] {
        &self.instructions
    }

    pub fn position(&self) -> usize {
        self.instructions.len()
    }

    // ------------------------------------------------------------------
    // Slots and scopes

    pub fn alloc_argument(&mut self, name: &str, val_type: ValType) -> Result<u8, CompileError> {
        if self.parameters.len() > u8::MAX as usize {
            return Err(CompileError::TooManyArguments);
        }
        let slot = self.parameters.len() as u8;
        self.parameters.push(ProcParameter {
            name: name.to_string(),
            val_type,
        });
        Ok(slot)
    }

    pub fn alloc_local(&mut self, name: &str) -> Result<u8, CompileError> {
        if self.next_local == u8::MAX {
            return Err(CompileError::TooManyLocals);
        }
        let slot = self.next_local;
        self.next_local += 1;
        self.locals.push(name.to_string());
        self.scopes[self.current_scope]
            .locals
            .push((name.to_string(), slot));
        Ok(slot)
    }

    /// The number of live local slots. Scope exit restores this to its
    /// pre-scope value.
    pub fn local_depth(&self) -> u8 {
        self.next_local
    }

    /// Mark a local slot as `const`; assignments to it are rejected by the
    /// statement builder after initialization.
    pub fn mark_const_local(&mut self, slot: u8) {
        self.const_locals.push(slot);
    }

    pub fn is_const_local(&self, slot: u8) -> bool {
        self.const_locals.contains(&slot)
    }

    /// Bind a proc-static var in the current scope. Its storage is a global
    /// slot, but its name follows local scoping rules.
    pub fn declare_static(&mut self, name: &str, slot: GlobalId) {
        self.scopes[self.current_scope]
            .statics
            .push((name.to_string(), slot));
    }

    /// True when the name is already bound in the innermost scope, which is
    /// what makes a redeclaration a duplicate rather than a shadow.
    pub fn is_declared_in_current_scope(&self, name: &str) -> bool {
        let scope = &self.scopes[self.current_scope];
        scope.locals.iter().any(|(local, _)| local == name)
            || scope.statics.iter().any(|(local, _)| local == name)
    }

    /// Look a name up through the scope chain, then the parameters.
    pub fn lookup_name(&self, name: &str) -> Option<Reference> {
        let mut scope = Some(self.current_scope);
        while let Some(index) = scope {
            let found = self.scopes[index]
                .locals
                .iter()
                .rev()
                .find(|(local, _)| local == name);
            if let Some((_, slot)) = found {
                return Some(Reference::Local(*slot));
            }
            let found = self.scopes[index]
                .statics
                .iter()
                .rev()
                .find(|(local, _)| local == name);
            if let Some((_, slot)) = found {
                return Some(Reference::Global(*slot));
            }
            scope = self.scopes[index].parent;
        }
        self.parameters
            .iter()
            .position(|parameter| parameter.name == name)
            .map(|slot| Reference::Argument(slot as u8))
    }

    pub fn parameter_type(&self, name: &str) -> Option<ValType> {
        self.parameters
            .iter()
            .find(|parameter| parameter.name == name)
            .map(|parameter| parameter.val_type)
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope {
            parent: Some(self.current_scope),
            ..Default::default()
        });
        self.current_scope = self.scopes.len() - 1;
    }

    pub fn exit_scope(&mut self) {
        let released = self.scopes[self.current_scope].locals.len() as u8;
        self.next_local -= released;
        // A freed slot may be reissued; its const marking must not leak
        // onto the next occupant.
        self.const_locals.retain(|slot| *slot < self.next_local);
        if let Some(parent) = self.scopes[self.current_scope].parent {
            self.current_scope = parent;
        }
    }

    // ------------------------------------------------------------------
    // Labels, loops, gotos

    /// Mint a fresh label base; callers derive `_start`/`_continue`/`_end`
    /// names from it.
    pub fn new_label_name(&mut self) -> String {
        let name = format!("label{}", self.label_counter);
        self.label_counter += 1;
        name
    }

    pub fn place_label(&mut self, name: impl Into<String>) -> Result<(), CompileError> {
        let name = name.into();
        if self.labels.contains_key(&name) {
            return Err(CompileError::DuplicateLabel { label: name });
        }
        self.labels.insert(name, self.instructions.len());
        Ok(())
    }

    /// Place a user code label (`name:`) at the current position. Fails when
    /// the same name was already labeled in this scope.
    pub fn place_code_label(&mut self, name: &str) -> Result<(), CompileError> {
        let scope = &self.scopes[self.current_scope];
        if scope.code_labels.iter().any(|(label, _)| label == name) {
            return Err(CompileError::DuplicateLabel {
                label: name.to_string(),
            });
        }
        let internal = format!("{name}_{}_codelabel", self.code_label_counter);
        self.code_label_counter += 1;
        let position = self.instructions.len();
        self.place_label(internal)?;
        self.scopes[self.current_scope]
            .code_labels
            .push((name.to_string(), position));
        Ok(())
    }

    /// The placed position of a code label visible from the current scope.
    pub fn find_code_label(&self, name: &str) -> Option<usize> {
        let mut scope = Some(self.current_scope);
        while let Some(index) = scope {
            let found = self.scopes[index]
                .code_labels
                .iter()
                .find(|(label, _)| label == name);
            if let Some((_, position)) = found {
                return Some(*position);
            }
            scope = self.scopes[index].parent;
        }
        None
    }

    /// Emit a jump to a label that may not exist yet; resolution happens in
    /// [`Proc::resolve_gotos`] once the whole body has been walked, so
    /// forward jumps work.
    pub fn emit_goto(&mut self, label: &str, location: Location) {
        let placeholder = format!("goto{}_placeholder", self.pending_gotos.len());
        self.jump(placeholder.clone());
        self.pending_gotos.push(PendingGoto {
            label: label.to_string(),
            placeholder,
            scope: self.current_scope,
            location,
        });
    }

    /// Resolve every pending `goto` against the scope chain it was emitted
    /// in. Unknown labels get a diagnostic and fall through to the end of the
    /// proc so later assembly still succeeds.
    pub fn resolve_gotos(&mut self, diagnostics: &mut Diagnostics) {
        let pending = std::mem::take(&mut self.pending_gotos);
        for goto in pending {
            let mut target = None;
            let mut scope = Some(goto.scope);
            while let Some(index) = scope {
                let found = self.scopes[index]
                    .code_labels
                    .iter()
                    .find(|(label, _)| *label == goto.label);
                if let Some((_, position)) = found {
                    target = Some(*position);
                    break;
                }
                scope = self.scopes[index].parent;
            }
            let position = match target {
                Some(position) => position,
                None => {
                    diagnostics.emit(
                        WarningCode::BadLabel,
                        goto.location,
                        format!("unknown label \"{}\"", goto.label),
                    );
                    self.instructions.len()
                }
            };
            self.labels.insert(goto.placeholder, position);
        }
    }

    pub fn new_enumerator_id(&mut self) -> u32 {
        let id = self.enumerator_counter;
        self.enumerator_counter += 1;
        id
    }

    pub fn push_loop(&mut self, base: &str, enumerator: Option<u32>) {
        self.loop_stack.push(LoopFrame {
            base: base.to_string(),
            start: self.instructions.len(),
            enumerator,
        });
    }

    pub fn pop_loop(&mut self) {
        self.loop_stack.pop();
    }

    /// Resolve which loop a `break`/`continue` leaves. With no label this is
    /// the innermost loop. With a label it is the outermost loop that started
    /// after the label was placed, and every loop nested deeper contributes
    /// its enumerator so the jump can destroy them on the way out.
    pub fn resolve_loop(&self, label_position: Option<usize>) -> Option<LoopTarget> {
        match label_position {
            None => self.loop_stack.last().map(|frame| LoopTarget {
                base: frame.base.clone(),
                crossed_enumerators: Vec::new(),
            }),
            Some(position) => {
                let index = self
                    .loop_stack
                    .iter()
                    .position(|frame| frame.start >= position)?;
                let crossed = self.loop_stack[index + 1..]
                    .iter()
                    .filter_map(|frame| frame.enumerator)
                    .collect();
                Some(LoopTarget {
                    base: self.loop_stack[index].base.clone(),
                    crossed_enumerators: crossed,
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Source tracking

    /// Note the source line for the next instruction. `file` is the interned
    /// path of the location's file; it is recorded only when it differs from
    /// the previous note's file.
    pub fn debug_source(&mut self, location: Location, file: StringId) {
        if location.is_internal() {
            return;
        }
        let file_changed = self.last_source_file != Some(file);
        if !file_changed && self.last_source_line == Some(location.line) {
            return;
        }
        self.last_source_file = Some(file);
        self.last_source_line = Some(location.line);
        self.source_notes.push((
            self.instructions.len(),
            file_changed.then_some(file),
            location.line,
        ));
    }

    // ------------------------------------------------------------------
    // Stack accounting

    fn grow(&mut self, delta: i32) {
        self.current_stack += delta;
        self.max_stack = self.max_stack.max(self.current_stack);
        if self.current_stack < 0 && self.underflow_at.is_none() {
            self.underflow_at = Some(self.instructions.len().saturating_sub(1));
        }
    }

    /// Correct the linear tracker after emitting diverging paths that each
    /// push a value but of which only one runs (ternary arms, short-circuit
    /// operators). The tracker counted both pushes; only one survives.
    pub fn shrink_tracked(&mut self, count: u32) {
        self.grow(-(count as i32));
    }

    fn emit(&mut self, op: Opcode, operands: Vec<Operand>) {
        debug_assert_eq!(
            operands.iter().map(Operand::kind).collect::<Vec<_>>(),
            op.operands(),
            "operand layout mismatch for {op}"
        );
        self.instructions.push(Instr { op, operands });
        self.grow(op.stack_delta());
    }

    fn emit_reference(&mut self, op: Opcode, reference: Reference, extra: Vec<Operand>) {
        let mut operands = vec![Operand::Reference(reference)];
        operands.extend(extra);
        self.emit(op, operands);
        self.grow(-(reference.pops_from_stack() as i32));
    }

    // ------------------------------------------------------------------
    // Pushes

    pub fn push_float(&mut self, value: f32) {
        self.emit(Opcode::PushFloat, vec![Operand::Float(value)]);
    }

    pub fn push_string(&mut self, id: StringId) {
        self.emit(Opcode::PushString, vec![Operand::String(id)]);
    }

    pub fn push_resource(&mut self, id: StringId) {
        self.emit(Opcode::PushResource, vec![Operand::Resource(id)]);
    }

    pub fn push_type(&mut self, id: TypeId) {
        self.emit(Opcode::PushType, vec![Operand::Type(id)]);
    }

    pub fn push_proc(&mut self, id: ProcId) {
        self.emit(Opcode::PushProc, vec![Operand::Proc(id)]);
    }

    pub fn push_null(&mut self) {
        self.emit(Opcode::PushNull, vec![]);
    }

    pub fn push_global_vars(&mut self) {
        self.emit(Opcode::PushGlobalVars, vec![]);
    }

    pub fn push_reference_value(&mut self, reference: Reference) {
        self.emit_reference(Opcode::PushReferenceValue, reference, vec![]);
    }

    pub fn format_string(&mut self, id: StringId, interpolation_count: u32) {
        self.emit(
            Opcode::FormatString,
            vec![Operand::String(id), Operand::FormatCount(interpolation_count)],
        );
        self.grow(-(interpolation_count as i32) + 1);
    }

    // ------------------------------------------------------------------
    // Assignment and reference mutation

    pub fn assign(&mut self, reference: Reference) {
        self.emit_reference(Opcode::Assign, reference, vec![]);
    }

    pub fn assign_into(&mut self, reference: Reference) {
        self.emit_reference(Opcode::AssignInto, reference, vec![]);
    }

    /// Assign and discard, for initializations whose value nothing reads.
    /// Only usable with references that do not consume stack entries.
    pub fn pop_reference(&mut self, reference: Reference) {
        debug_assert_eq!(reference.pops_from_stack(), 0);
        self.emit(Opcode::PopReference, vec![Operand::Reference(reference)]);
        self.grow(-1);
    }

    pub fn append(&mut self, reference: Reference) {
        self.emit_reference(Opcode::Append, reference, vec![]);
    }

    pub fn remove(&mut self, reference: Reference) {
        self.emit_reference(Opcode::Remove, reference, vec![]);
    }

    pub fn combine(&mut self, reference: Reference) {
        self.emit_reference(Opcode::Combine, reference, vec![]);
    }

    pub fn mask(&mut self, reference: Reference) {
        self.emit_reference(Opcode::Mask, reference, vec![]);
    }

    pub fn multiply_reference(&mut self, reference: Reference) {
        self.emit_reference(Opcode::MultiplyReference, reference, vec![]);
    }

    pub fn divide_reference(&mut self, reference: Reference) {
        self.emit_reference(Opcode::DivideReference, reference, vec![]);
    }

    pub fn modulus_reference(&mut self, reference: Reference) {
        self.emit_reference(Opcode::ModulusReference, reference, vec![]);
    }

    pub fn modulus_modulus_reference(&mut self, reference: Reference) {
        self.emit_reference(Opcode::ModulusModulusReference, reference, vec![]);
    }

    pub fn bit_xor_reference(&mut self, reference: Reference) {
        self.emit_reference(Opcode::BitXorReference, reference, vec![]);
    }

    pub fn bit_shift_left_reference(&mut self, reference: Reference) {
        self.emit_reference(Opcode::BitShiftLeftReference, reference, vec![]);
    }

    pub fn bit_shift_right_reference(&mut self, reference: Reference) {
        self.emit_reference(Opcode::BitShiftRightReference, reference, vec![]);
    }

    pub fn increment(&mut self, reference: Reference) {
        self.emit_reference(Opcode::Increment, reference, vec![]);
    }

    pub fn decrement(&mut self, reference: Reference) {
        self.emit_reference(Opcode::Decrement, reference, vec![]);
    }

    // ------------------------------------------------------------------
    // Operators

    pub fn add(&mut self) {
        self.emit(Opcode::Add, vec![]);
    }

    pub fn subtract(&mut self) {
        self.emit(Opcode::Subtract, vec![]);
    }

    pub fn multiply(&mut self) {
        self.emit(Opcode::Multiply, vec![]);
    }

    pub fn divide(&mut self) {
        self.emit(Opcode::Divide, vec![]);
    }

    pub fn modulus(&mut self) {
        self.emit(Opcode::Modulus, vec![]);
    }

    pub fn modulus_modulus(&mut self) {
        self.emit(Opcode::ModulusModulus, vec![]);
    }

    pub fn power(&mut self) {
        self.emit(Opcode::Power, vec![]);
    }

    pub fn negate(&mut self) {
        self.emit(Opcode::Negate, vec![]);
    }

    pub fn bit_and(&mut self) {
        self.emit(Opcode::BitAnd, vec![]);
    }

    pub fn bit_or(&mut self) {
        self.emit(Opcode::BitOr, vec![]);
    }

    pub fn bit_xor(&mut self) {
        self.emit(Opcode::BitXor, vec![]);
    }

    pub fn bit_not(&mut self) {
        self.emit(Opcode::BitNot, vec![]);
    }

    pub fn bit_shift_left(&mut self) {
        self.emit(Opcode::BitShiftLeft, vec![]);
    }

    pub fn bit_shift_right(&mut self) {
        self.emit(Opcode::BitShiftRight, vec![]);
    }

    pub fn compare_equals(&mut self) {
        self.emit(Opcode::CompareEquals, vec![]);
    }

    pub fn compare_not_equals(&mut self) {
        self.emit(Opcode::CompareNotEquals, vec![]);
    }

    pub fn compare_equivalent(&mut self) {
        self.emit(Opcode::CompareEquivalent, vec![]);
    }

    pub fn compare_not_equivalent(&mut self) {
        self.emit(Opcode::CompareNotEquivalent, vec![]);
    }

    pub fn compare_less_than(&mut self) {
        self.emit(Opcode::CompareLessThan, vec![]);
    }

    pub fn compare_less_than_or_equal(&mut self) {
        self.emit(Opcode::CompareLessThanOrEqual, vec![]);
    }

    pub fn compare_greater_than(&mut self) {
        self.emit(Opcode::CompareGreaterThan, vec![]);
    }

    pub fn compare_greater_than_or_equal(&mut self) {
        self.emit(Opcode::CompareGreaterThanOrEqual, vec![]);
    }

    pub fn boolean_not(&mut self) {
        self.emit(Opcode::BooleanNot, vec![]);
    }

    /// Short-circuit and: jumps past the right operand when the left is
    /// falsy, leaving the left value as the result.
    pub fn boolean_and(&mut self, label: impl Into<String>) {
        self.emit(Opcode::BooleanAnd, vec![Operand::Label(label.into())]);
    }

    pub fn boolean_or(&mut self, label: impl Into<String>) {
        self.emit(Opcode::BooleanOr, vec![Operand::Label(label.into())]);
    }

    pub fn is_in_list(&mut self) {
        self.emit(Opcode::IsInList, vec![]);
    }

    pub fn is_in_range(&mut self) {
        self.emit(Opcode::IsInRange, vec![]);
    }

    // ------------------------------------------------------------------
    // Jumps

    pub fn jump(&mut self, label: impl Into<String>) {
        self.emit(Opcode::Jump, vec![Operand::Label(label.into())]);
    }

    pub fn jump_if_false(&mut self, label: impl Into<String>) {
        self.emit(Opcode::JumpIfFalse, vec![Operand::Label(label.into())]);
    }

    pub fn jump_if_true(&mut self, label: impl Into<String>) {
        self.emit(Opcode::JumpIfTrue, vec![Operand::Label(label.into())]);
    }

    /// Jump when the top of the stack is null, leaving the null in place as
    /// the result of the guarded chain.
    pub fn jump_if_null_no_pop(&mut self, label: impl Into<String>) {
        self.emit(Opcode::JumpIfNullNoPop, vec![Operand::Label(label.into())]);
    }

    /// Guard a safe-navigation assignment: when the object under the
    /// reference is null, jump without consuming it.
    pub fn jump_if_null_dereference(&mut self, reference: Reference, label: impl Into<String>) {
        self.emit(
            Opcode::JumpIfNullDereference,
            vec![Operand::Reference(reference), Operand::Label(label.into())],
        );
    }

    pub fn jump_if_true_reference(&mut self, reference: Reference, label: impl Into<String>) {
        self.emit_reference(
            Opcode::JumpIfTrueReference,
            reference,
            vec![Operand::Label(label.into())],
        );
    }

    pub fn jump_if_false_reference(&mut self, reference: Reference, label: impl Into<String>) {
        self.emit_reference(
            Opcode::JumpIfFalseReference,
            reference,
            vec![Operand::Label(label.into())],
        );
    }

    pub fn switch_case(&mut self, label: impl Into<String>) {
        self.emit(Opcode::SwitchCase, vec![Operand::Label(label.into())]);
    }

    pub fn switch_case_range(&mut self, label: impl Into<String>) {
        self.emit(Opcode::SwitchCaseRange, vec![Operand::Label(label.into())]);
    }

    // ------------------------------------------------------------------
    // Calls

    pub fn call(&mut self, target: Reference, args_type: CallArgsType, stack_size: u32) {
        self.emit_reference(
            Opcode::Call,
            target,
            vec![
                Operand::ArgType(args_type),
                Operand::StackDelta(stack_size),
            ],
        );
        self.grow(-(stack_size as i32) + 1);
    }

    pub fn call_statement(&mut self, args_type: CallArgsType, stack_size: u32) {
        self.emit(
            Opcode::CallStatement,
            vec![
                Operand::ArgType(args_type),
                Operand::StackDelta(stack_size),
            ],
        );
        self.grow(-(stack_size as i32));
    }

    pub fn dereference_call(&mut self, field: StringId, args_type: CallArgsType, stack_size: u32) {
        self.emit(
            Opcode::DereferenceCall,
            vec![
                Operand::String(field),
                Operand::ArgType(args_type),
                Operand::StackDelta(stack_size),
            ],
        );
        self.grow(-(stack_size as i32));
    }

    pub fn create_object(&mut self, args_type: CallArgsType, stack_size: u32) {
        self.emit(
            Opcode::CreateObject,
            vec![
                Operand::ArgType(args_type),
                Operand::StackDelta(stack_size),
            ],
        );
        self.grow(-(stack_size as i32));
    }

    pub fn dereference_field(&mut self, field: StringId) {
        self.emit(Opcode::DereferenceField, vec![Operand::String(field)]);
    }

    pub fn dereference_index(&mut self) {
        self.emit(Opcode::DereferenceIndex, vec![]);
    }

    pub fn return_(&mut self) {
        self.emit(Opcode::Return, vec![]);
    }

    pub fn throw(&mut self) {
        self.emit(Opcode::Throw, vec![]);
    }

    pub fn pop(&mut self) {
        self.emit(Opcode::Pop, vec![]);
    }

    pub fn delete_object(&mut self) {
        self.emit(Opcode::DeleteObject, vec![]);
    }

    // ------------------------------------------------------------------
    // Lists and enumerators

    pub fn create_list(&mut self, size: u32) {
        self.emit(Opcode::CreateList, vec![Operand::ListSize(size)]);
        self.grow(-(size as i32) + 1);
    }

    pub fn create_associative_list(&mut self, size: u32) {
        self.emit(Opcode::CreateAssociativeList, vec![Operand::ListSize(size)]);
        self.grow(-(size as i32 * 2) + 1);
    }

    pub fn create_multidimensional_list(&mut self, dimensions: u32) {
        self.emit(
            Opcode::CreateMultidimensionalList,
            vec![Operand::ListSize(dimensions)],
        );
        self.grow(-(dimensions as i32) + 1);
    }

    pub fn create_list_enumerator(&mut self, id: u32) {
        self.emit(Opcode::CreateListEnumerator, vec![Operand::EnumeratorId(id)]);
    }

    pub fn create_filtered_list_enumerator(&mut self, id: u32, filter: TypeId) {
        self.emit(
            Opcode::CreateFilteredListEnumerator,
            vec![Operand::EnumeratorId(id), Operand::Filter(filter)],
        );
    }

    pub fn create_type_enumerator(&mut self, id: u32) {
        self.emit(Opcode::CreateTypeEnumerator, vec![Operand::EnumeratorId(id)]);
    }

    pub fn create_range_enumerator(&mut self, id: u32) {
        self.emit(Opcode::CreateRangeEnumerator, vec![Operand::EnumeratorId(id)]);
    }

    /// Advance the enumerator, storing into `target`, jumping to `done` when
    /// exhausted.
    pub fn enumerate(&mut self, id: u32, target: Reference, done: impl Into<String>) {
        self.emit_reference_last(
            Opcode::Enumerate,
            vec![Operand::EnumeratorId(id)],
            target,
            vec![Operand::Label(done.into())],
        );
    }

    pub fn enumerate_no_assign(&mut self, id: u32, done: impl Into<String>) {
        self.emit(
            Opcode::EnumerateNoAssign,
            vec![Operand::EnumeratorId(id), Operand::Label(done.into())],
        );
    }

    pub fn destroy_enumerator(&mut self, id: u32) {
        self.emit(Opcode::DestroyEnumerator, vec![Operand::EnumeratorId(id)]);
    }

    fn emit_reference_last(
        &mut self,
        op: Opcode,
        before: Vec<Operand>,
        reference: Reference,
        after: Vec<Operand>,
    ) {
        let mut operands = before;
        operands.push(Operand::Reference(reference));
        operands.extend(after);
        self.emit(op, operands);
        self.grow(-(reference.pops_from_stack() as i32));
    }

    // ------------------------------------------------------------------
    // Control structures

    pub fn spawn(&mut self, over: impl Into<String>) {
        self.emit(Opcode::Spawn, vec![Operand::Label(over.into())]);
    }

    /// Open a try region whose caught value is stored into `catch`.
    pub fn try_(&mut self, catch_label: impl Into<String>, catch: Reference) {
        self.emit(
            Opcode::Try,
            vec![
                Operand::Label(catch_label.into()),
                Operand::Reference(catch),
            ],
        );
    }

    pub fn try_no_value(&mut self, catch_label: impl Into<String>) {
        self.emit(Opcode::TryNoValue, vec![Operand::Label(catch_label.into())]);
    }

    pub fn end_try(&mut self) {
        self.emit(Opcode::EndTry, vec![]);
    }

    // ------------------------------------------------------------------
    // Recognized builtins

    pub fn is_null(&mut self) {
        self.emit(Opcode::IsNull, vec![]);
    }

    pub fn is_type(&mut self) {
        self.emit(Opcode::IsType, vec![]);
    }

    pub fn as_type(&mut self) {
        self.emit(Opcode::AsType, vec![]);
    }

    pub fn initial(&mut self) {
        self.emit(Opcode::Initial, vec![]);
    }

    pub fn is_saved(&mut self) {
        self.emit(Opcode::IsSaved, vec![]);
    }

    pub fn locate(&mut self) {
        self.emit(Opcode::Locate, vec![]);
    }

    pub fn locate_coord(&mut self) {
        self.emit(Opcode::LocateCoord, vec![]);
    }

    pub fn prob(&mut self) {
        self.emit(Opcode::Prob, vec![]);
    }

    pub fn length(&mut self) {
        self.emit(Opcode::Length, vec![]);
    }

    pub fn get_step(&mut self) {
        self.emit(Opcode::GetStep, vec![]);
    }

    pub fn get_dir(&mut self) {
        self.emit(Opcode::GetDir, vec![]);
    }

    pub fn rgb(&mut self, args_type: CallArgsType, stack_size: u32) {
        self.emit(
            Opcode::Rgb,
            vec![
                Operand::ArgType(args_type),
                Operand::StackDelta(stack_size),
            ],
        );
        self.grow(-(stack_size as i32) + 1);
    }

    pub fn gradient(&mut self, args_type: CallArgsType, stack_size: u32) {
        self.emit(
            Opcode::Gradient,
            vec![
                Operand::ArgType(args_type),
                Operand::StackDelta(stack_size),
            ],
        );
        self.grow(-(stack_size as i32) + 1);
    }

    pub fn pick_unweighted(&mut self, count: u32) {
        self.emit(Opcode::PickUnweighted, vec![Operand::PickCount(count)]);
        self.grow(-(count as i32) + 1);
    }

    pub fn pick_weighted(&mut self, count: u32) {
        self.emit(Opcode::PickWeighted, vec![Operand::PickCount(count)]);
        self.grow(-(count as i32 * 2) + 1);
    }

    pub fn mass_concatenation(&mut self, count: u32) {
        self.emit(Opcode::MassConcatenation, vec![Operand::ConcatCount(count)]);
        self.grow(-(count as i32) + 1);
    }

    pub fn sin(&mut self) {
        self.emit(Opcode::Sin, vec![]);
    }

    pub fn cos(&mut self) {
        self.emit(Opcode::Cos, vec![]);
    }

    pub fn tan(&mut self) {
        self.emit(Opcode::Tan, vec![]);
    }

    pub fn arcsin(&mut self) {
        self.emit(Opcode::ArcSin, vec![]);
    }

    pub fn arccos(&mut self) {
        self.emit(Opcode::ArcCos, vec![]);
    }

    pub fn arctan(&mut self) {
        self.emit(Opcode::ArcTan, vec![]);
    }

    pub fn arctan2(&mut self) {
        self.emit(Opcode::ArcTan2, vec![]);
    }

    pub fn sqrt(&mut self) {
        self.emit(Opcode::Sqrt, vec![]);
    }

    pub fn log(&mut self) {
        self.emit(Opcode::Log, vec![]);
    }

    pub fn log_e(&mut self) {
        self.emit(Opcode::LogE, vec![]);
    }

    pub fn abs(&mut self) {
        self.emit(Opcode::Abs, vec![]);
    }

    // ------------------------------------------------------------------
    // Assembly

    /// Serialize to bytes, patching label operands to absolute byte offsets,
    /// and return the finished artifact entry.
    pub fn to_json(&self) -> Result<ProcDefinitionJson, CompileError> {
        if let Some(offset) = self.underflow_at {
            return Err(CompileError::StackUnderflow { offset });
        }

        let mut offsets = Vec::with_capacity(self.instructions.len() + 1);
        let mut offset = 0u32;
        for instr in &self.instructions {
            offsets.push(offset);
            offset += 1 + instr
                .operands
                .iter()
                .map(Operand::encoded_size)
                .sum::<u32>();
        }
        offsets.push(offset);

        let mut bytecode = Vec::with_capacity(offset as usize);
        for instr in &self.instructions {
            bytecode.push(instr.op as u8);
            for operand in &instr.operands {
                match operand {
                    Operand::Float(value) => bytecode.extend_from_slice(&value.to_le_bytes()),
                    Operand::String(id) | Operand::Resource(id) => {
                        bytecode.extend_from_slice(&id.0.to_le_bytes())
                    }
                    Operand::Type(id) | Operand::Filter(id) => {
                        bytecode.extend_from_slice(&id.0.to_le_bytes())
                    }
                    Operand::Proc(id) => bytecode.extend_from_slice(&id.0.to_le_bytes()),
                    Operand::Label(name) => {
                        let target = self.labels.get(name).ok_or_else(|| {
                            CompileError::UnresolvedLabel {
                                label: name.clone(),
                            }
                        })?;
                        bytecode.extend_from_slice(&offsets[*target].to_le_bytes());
                    }
                    Operand::Reference(reference) => reference.encode(&mut bytecode),
                    Operand::ArgType(args_type) => bytecode.push(*args_type as u8),
                    Operand::StackDelta(value)
                    | Operand::ListSize(value)
                    | Operand::EnumeratorId(value)
                    | Operand::PickCount(value)
                    | Operand::ConcatCount(value)
                    | Operand::FormatCount(value) => {
                        bytecode.extend_from_slice(&value.to_le_bytes())
                    }
                }
            }
        }

        let source_info = self
            .source_notes
            .iter()
            .map(|(index, file, line)| SourceInfoJson {
                offset: offsets[*index],
                file: *file,
                line: *line,
            })
            .collect();

        let arguments = if self.parameters.is_empty() {
            None
        } else {
            Some(
                self.parameters
                    .iter()
                    .map(|parameter| ProcArgumentJson {
                        name: parameter.name.clone(),
                        val_type: parameter.val_type,
                    })
                    .collect(),
            )
        };

        Ok(ProcDefinitionJson {
            owning_type_id: self.owner,
            name: self.name.clone(),
            is_verb: self.is_verb,
            max_stack_size: self.max_stack.max(0) as u32,
            attributes: self.flags,
            bytecode,
            arguments,
            locals: (!self.locals.is_empty()).then(|| self.locals.clone()),
            source_info,
            verb_name: self.verb_name.clone(),
            verb_category: self.verb_category.clone(),
            verb_desc: self.verb_desc.clone(),
            invisibility: self.invisibility,
        })
    }

    /// Resolve a reference back to source names where the tables allow it.
    fn describe_reference(&self, reference: &Reference, tree: &ObjectTree) -> String {
        match reference {
            Reference::Argument(slot) => self
                .parameters
                .get(*slot as usize)
                .map(|parameter| parameter.name.clone())
                .unwrap_or_else(|| reference.to_string()),
            Reference::Local(slot) => self
                .scopes
                .iter()
                .flat_map(|scope| scope.locals.iter())
                .find(|(_, local)| local == slot)
                .map(|(name, _)| name.clone())
                .unwrap_or_else(|| reference.to_string()),
            Reference::Global(id) => tree.global(*id).name.clone(),
            Reference::GlobalProc(id) => tree
                .global_proc_name(*id)
                .map(|name| format!("/proc/{name}"))
                .unwrap_or_else(|| reference.to_string()),
            Reference::Field(id) => format!(".{}", tree.strings.resolve(*id)),
            Reference::SrcField(id) => format!("src.{}", tree.strings.resolve(*id)),
            Reference::SrcProc(id) => format!("src.{}()", tree.strings.resolve(*id)),
            _ => reference.to_string(),
        }
    }

    /// Human-readable instruction listing, for `Compiler::dump_procs`.
    pub fn dump(&self, tree: &ObjectTree) -> String {
        let strings = &tree.strings;
        let mut out = format!("proc {} (max stack {})\n", self.name, self.max_stack);
        for (index, instr) in self.instructions.iter().enumerate() {
            for (name, position) in &self.labels {
                if *position == index {
                    out.push_str(&format!("{name}:\n"));
                }
            }
            let operands = instr
                .operands
                .iter()
                .map(|operand| match operand {
                    Operand::Float(value) => value.to_string(),
                    Operand::String(id) | Operand::Resource(id) => {
                        format!("{:?}", strings.resolve(*id))
                    }
                    Operand::Type(id) | Operand::Filter(id) => format!("type#{}", id.0),
                    Operand::Proc(id) => format!("proc#{}", id.0),
                    Operand::Label(name) => name.clone(),
                    Operand::Reference(reference) => self.describe_reference(reference, tree),
                    Operand::ArgType(args_type) => args_type.to_string(),
                    Operand::StackDelta(value)
                    | Operand::ListSize(value)
                    | Operand::EnumeratorId(value)
                    | Operand::PickCount(value)
                    | Operand::ConcatCount(value)
                    | Operand::FormatCount(value) => value.to_string(),
                })
                .join(" ");
            out.push_str(&format!("  {index:4}: {} {operands}\n", instr.op));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_proc() -> Proc {
        Proc::new(ProcId(0), TypeId(0), "test", Location::INTERNAL)
    }

    #[test]
    fn labels_patch_to_byte_offsets() {
        let mut proc = test_proc();
        let end = proc.new_label_name();
        proc.push_float(1.0);
        proc.jump_if_false(end.clone());
        proc.push_float(2.0);
        proc.place_label(end).unwrap();
        proc.push_null();
        proc.return_();

        let json = proc.to_json().unwrap();
        // PushFloat is 5 bytes, JumpIfFalse 5, PushFloat 5; the jump lands on
        // the PushNull at offset 15.
        assert_eq!(json.bytecode[5], Opcode::JumpIfFalse as u8);
        assert_eq!(&json.bytecode[6..10], &15u32.to_le_bytes());
    }

    #[test]
    fn stack_tracking_reports_high_water_mark() {
        let mut proc = test_proc();
        proc.push_float(1.0);
        proc.push_float(2.0);
        proc.push_float(3.0);
        proc.add();
        proc.add();
        proc.return_();

        let json = proc.to_json().unwrap();
        assert_eq!(json.max_stack_size, 3);
    }

    #[test]
    fn variadic_ops_shrink_by_their_operand_count() {
        let mut proc = test_proc();
        proc.push_float(1.0);
        proc.push_float(2.0);
        proc.push_float(3.0);
        proc.create_list(3);
        proc.return_();

        let json = proc.to_json().unwrap();
        assert_eq!(json.max_stack_size, 3);

        let mut proc = test_proc();
        proc.push_null();
        proc.call(Reference::SrcProc(StringId(0)), CallArgsType::FromStack, 1);
        proc.return_();
        assert_eq!(proc.to_json().unwrap().max_stack_size, 1);
    }

    #[test]
    fn underflow_is_an_error() {
        let mut proc = test_proc();
        proc.pop();
        let result = proc.to_json();
        assert_eq!(result, Err(CompileError::StackUnderflow { offset: 0 }));
    }

    #[test]
    fn unplaced_label_is_an_error() {
        let mut proc = test_proc();
        proc.jump("nowhere");
        assert_eq!(
            proc.to_json(),
            Err(CompileError::UnresolvedLabel {
                label: "nowhere".to_string()
            })
        );
    }

    #[test]
    fn locals_shadow_outer_scopes_and_keep_their_slots() {
        let mut proc = test_proc();
        let outer = proc.alloc_local("x").unwrap();
        proc.enter_scope();
        let inner = proc.alloc_local("x").unwrap();
        assert_eq!(proc.lookup_name("x"), Some(Reference::Local(inner)));
        proc.exit_scope();
        assert_eq!(proc.lookup_name("x"), Some(Reference::Local(outer)));
        assert_eq!(proc.locals(), &["x".to_string(), "x".to_string()]);
    }

    #[test]
    fn scope_exit_releases_exactly_its_local_slots() {
        let mut proc = test_proc();
        proc.alloc_local("a").unwrap();
        assert_eq!(proc.local_depth(), 1);
        proc.enter_scope();
        proc.alloc_local("b").unwrap();
        proc.alloc_local("c").unwrap();
        assert_eq!(proc.local_depth(), 3);
        proc.exit_scope();
        assert_eq!(proc.local_depth(), 1);

        // The freed slots are reissued to the next scope.
        proc.enter_scope();
        assert_eq!(proc.alloc_local("d").unwrap(), 1);
        proc.exit_scope();
    }

    #[test]
    fn statics_scope_like_locals_but_live_in_globals() {
        let mut proc = test_proc();
        proc.enter_scope();
        proc.declare_static("counter", GlobalId(3));
        assert_eq!(
            proc.lookup_name("counter"),
            Some(Reference::Global(GlobalId(3)))
        );
        assert!(proc.is_declared_in_current_scope("counter"));
        proc.exit_scope();
        assert_eq!(proc.lookup_name("counter"), None);
    }

    #[test]
    fn parameters_resolve_after_locals() {
        let mut proc = test_proc();
        proc.alloc_argument("a", ValType::ANYTHING).unwrap();
        assert_eq!(proc.lookup_name("a"), Some(Reference::Argument(0)));
        proc.alloc_local("a").unwrap();
        assert_eq!(proc.lookup_name("a"), Some(Reference::Local(0)));
    }

    #[test]
    fn forward_goto_resolves_through_scopes() {
        let mut diagnostics = Diagnostics::default();
        let mut proc = test_proc();
        proc.emit_goto("later", Location::INTERNAL);
        proc.push_null();
        proc.place_code_label("later").unwrap();
        proc.push_null();
        proc.resolve_gotos(&mut diagnostics);

        assert_eq!(diagnostics.error_count(), 0);
        let json = proc.to_json().unwrap();
        // Jump is 5 bytes, PushNull 1; the goto lands at offset 6.
        assert_eq!(&json.bytecode[1..5], &6u32.to_le_bytes());
    }

    #[test]
    fn unknown_goto_diagnoses_and_falls_through() {
        let mut diagnostics = Diagnostics::default();
        let mut proc = test_proc();
        proc.emit_goto("missing", Location::INTERNAL);
        proc.push_null();
        proc.return_();
        proc.resolve_gotos(&mut diagnostics);

        assert_eq!(diagnostics.error_count(), 1);
        assert_eq!(diagnostics.emitted()[0].code, WarningCode::BadLabel);
        // Still assembles; the jump targets the end of the proc.
        let json = proc.to_json().unwrap();
        assert_eq!(&json.bytecode[1..5], &7u32.to_le_bytes());
    }

    #[test]
    fn labeled_break_crosses_inner_enumerators() {
        let mut proc = test_proc();
        proc.place_code_label("outer").unwrap();
        proc.push_loop("label0", None);
        let inner_enumerator = proc.new_enumerator_id();
        proc.push_loop("label1", Some(inner_enumerator));

        let position = proc.find_code_label("outer").unwrap();
        let target = proc.resolve_loop(Some(position)).unwrap();
        assert_eq!(target.base, "label0");
        assert_eq!(target.crossed_enumerators, vec![inner_enumerator]);
        assert_eq!(target.end_label(), "label0_end");

        let unlabeled = proc.resolve_loop(None).unwrap();
        assert_eq!(unlabeled.base, "label1");
        assert!(unlabeled.crossed_enumerators.is_empty());
    }

    #[test]
    fn source_notes_dedupe_consecutive_lines() {
        let file = StringId(7);
        let mut proc = test_proc();
        let line = |line| Location {
            file: dreamc_common::FileId(0),
            line,
            column: 1,
        };
        proc.debug_source(line(10), file);
        proc.push_null();
        proc.debug_source(line(10), file);
        proc.push_null();
        proc.debug_source(line(11), file);
        proc.return_();

        let json = proc.to_json().unwrap();
        assert_eq!(json.source_info.len(), 2);
        assert_eq!(json.source_info[0].file, Some(file));
        assert_eq!(json.source_info[0].line, 10);
        assert_eq!(json.source_info[1].file, None);
        assert_eq!(json.source_info[1].line, 11);
        assert_eq!(json.source_info[1].offset, 2);
    }
}
