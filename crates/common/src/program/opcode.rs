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

//! The stack-machine opcode set. Byte values are part of the artifact format
//! and must never be reused for a different operation.

use strum::{Display, EnumIter, FromRepr};

/// One bytecode operation. The discriminant is the byte written to the
/// artifact; gaps are retired values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[repr(u8)]
pub enum Opcode {
    BitShiftLeft = 0x01,
    PushType = 0x02,
    PushString = 0x03,
    FormatString = 0x04,
    SwitchCaseRange = 0x05,
    PushReferenceValue = 0x06,
    Rgb = 0x07,
    Add = 0x08,
    Assign = 0x09,
    Call = 0x0A,
    MultiplyReference = 0x0B,
    JumpIfFalse = 0x0C,
    Jump = 0x0E,
    CompareEquals = 0x0F,
    Return = 0x10,
    PushNull = 0x11,
    Subtract = 0x12,
    CompareLessThan = 0x13,
    CompareGreaterThan = 0x14,
    BooleanAnd = 0x15,
    BooleanNot = 0x16,
    DivideReference = 0x17,
    Negate = 0x18,
    Modulus = 0x19,
    Append = 0x1A,
    CreateRangeEnumerator = 0x1B,
    Input = 0x1C,
    CompareLessThanOrEqual = 0x1D,
    CreateAssociativeList = 0x1E,
    Remove = 0x1F,
    DeleteObject = 0x20,
    PushResource = 0x21,
    CreateList = 0x22,
    CallStatement = 0x23,
    BitAnd = 0x24,
    CompareNotEquals = 0x25,
    PushProc = 0x26,
    Divide = 0x27,
    Multiply = 0x28,
    BitXorReference = 0x29,
    BitXor = 0x2A,
    BitOr = 0x2B,
    BitNot = 0x2C,
    Combine = 0x2D,
    CreateObject = 0x2E,
    BooleanOr = 0x2F,
    CreateMultidimensionalList = 0x30,
    CompareGreaterThanOrEqual = 0x31,
    SwitchCase = 0x32,
    Mask = 0x33,
    JumpIfTrue = 0x34,
    Error = 0x35,
    IsInList = 0x36,
    JumpIfNullDereference = 0x37,
    PushFloat = 0x38,
    ModulusReference = 0x39,
    CreateListEnumerator = 0x3A,
    Enumerate = 0x3B,
    DestroyEnumerator = 0x3C,
    Browse = 0x3D,
    BrowseResource = 0x3E,
    OutputControl = 0x3F,
    BitShiftRight = 0x40,
    CreateFilteredListEnumerator = 0x41,
    Power = 0x42,
    EnumerateAssoc = 0x43,
    Link = 0x44,
    Prompt = 0x45,
    Ftp = 0x46,
    Initial = 0x47,
    AsType = 0x48,
    IsType = 0x49,
    LocateCoord = 0x4A,
    Locate = 0x4B,
    IsNull = 0x4C,
    Spawn = 0x4D,
    OutputReference = 0x4E,
    Output = 0x4F,
    Pop = 0x51,
    Prob = 0x52,
    IsSaved = 0x53,
    PickUnweighted = 0x54,
    PickWeighted = 0x55,
    Increment = 0x56,
    Decrement = 0x57,
    CompareEquivalent = 0x58,
    CompareNotEquivalent = 0x59,
    Throw = 0x5A,
    IsInRange = 0x5B,
    MassConcatenation = 0x5C,
    CreateTypeEnumerator = 0x5D,
    PushGlobalVars = 0x5F,
    ModulusModulus = 0x60,
    ModulusModulusReference = 0x61,
    JumpIfNull = 0x64,
    JumpIfNullNoPop = 0x65,
    JumpIfTrueReference = 0x66,
    JumpIfFalseReference = 0x67,
    DereferenceField = 0x68,
    DereferenceIndex = 0x69,
    DereferenceCall = 0x6A,
    PopReference = 0x6B,
    BitShiftLeftReference = 0x6D,
    BitShiftRightReference = 0x6E,
    Try = 0x6F,
    TryNoValue = 0x70,
    EndTry = 0x71,
    EnumerateNoAssign = 0x72,
    Gradient = 0x73,
    AssignInto = 0x74,
    GetStep = 0x75,
    Length = 0x76,
    GetDir = 0x77,
    DebuggerBreakpoint = 0x78,
    Sin = 0x79,
    Cos = 0x7A,
    Tan = 0x7B,
    ArcSin = 0x7C,
    ArcCos = 0x7D,
    ArcTan = 0x7E,
    ArcTan2 = 0x7F,
    Sqrt = 0x80,
    Log = 0x81,
    LogE = 0x82,
    Abs = 0x83,
}

/// The shape of one encoded operand following an opcode byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum OperandType {
    /// u32 index into the type list.
    TypeId,
    /// u32 index into the proc list.
    ProcId,
    /// u32 index into the string table.
    String,
    /// u32 index into the string table, naming a resource path.
    Resource,
    /// u32 absolute byte offset, patched in at assembly.
    Label,
    /// Tag byte plus the tag's payload.
    Reference,
    /// One byte of [`CallArgsType`].
    ArgType,
    /// u32 count of stack entries consumed by the preceding ArgType.
    StackDelta,
    /// u32 element count.
    ListSize,
    /// f32, little-endian.
    Float,
    /// u32 per-proc enumerator slot.
    EnumeratorId,
    /// u32 index into the type list, used as an istype filter.
    FilterId,
    /// u32 operand count.
    PickCount,
    /// u32 operand count.
    ConcatCount,
    /// u32 count of interpolations in the preceding format string.
    FormatCount,
    /// u32 of value-type flag bits.
    ValueType,
}

impl Opcode {
    /// The statically-known stack growth of this operation. Operations whose
    /// effect depends on an operand (argument counts, list sizes) report the
    /// fixed part here; the writer applies the dynamic part itself.
    pub fn stack_delta(self) -> i32 {
        use Opcode::*;
        match self {
            PushType | PushString | PushResource | PushProc | PushFloat | PushNull
            | PushGlobalVars | PushReferenceValue | Increment | Decrement => 1,

            FormatString | Rgb | Assign | Call | MultiplyReference | CallStatement
            | CreateObject | BooleanNot | DivideReference | Negate | Append | Remove | Mask
            | Combine | BitXorReference | BitNot | CreateAssociativeList | CreateList
            | CreateMultidimensionalList | Error | ModulusReference | Enumerate
            | DestroyEnumerator | EnumerateAssoc | EnumerateNoAssign | IsNull | Prob | Throw
            | MassConcatenation
            | ModulusModulusReference | JumpIfNull | JumpIfNullNoPop | JumpIfTrueReference
            | JumpIfFalseReference | JumpIfNullDereference | DereferenceField | DereferenceCall
            | PopReference | BitShiftLeftReference | BitShiftRightReference | Try | TryNoValue
            | EndTry | Gradient | AssignInto | Length | DebuggerBreakpoint | Sin | Cos | Tan
            | ArcSin | ArcCos | ArcTan | Sqrt | LogE | Abs | PickUnweighted | PickWeighted
            | Jump => 0,

            BitShiftLeft | Add | JumpIfFalse | JumpIfTrue | CompareEquals | Return | Subtract
            | CompareLessThan | CompareGreaterThan | BooleanAnd | Modulus
            | CompareLessThanOrEqual | DeleteObject | BitAnd | CompareNotEquals | Divide
            | Multiply | BitXor | BitOr | BooleanOr | CompareGreaterThanOrEqual | SwitchCase
            | IsInList
            | CreateListEnumerator | BitShiftRight | CreateFilteredListEnumerator | Power
            | Initial | AsType | IsType | Locate | Spawn | OutputReference | Pop | IsSaved
            | CompareEquivalent | CompareNotEquivalent | CreateTypeEnumerator | ModulusModulus
            | DereferenceIndex | GetStep | GetDir | ArcTan2 | Log => -1,

            LocateCoord | Output | IsInRange | Link | SwitchCaseRange => -2,

            CreateRangeEnumerator | Browse | BrowseResource | OutputControl | Prompt | Ftp => -3,

            Input => 0,
        }
    }

    /// The encoded operand layout following the opcode byte.
    pub fn operands(self) -> &'static [OperandType] {
        use Opcode::*;
        use OperandType as O;
        match self {
            PushType => &[O::TypeId],
            PushProc => &[O::ProcId],
            PushString => &[O::String],
            PushResource => &[O::Resource],
            PushFloat => &[O::Float],
            FormatString => &[O::String, O::FormatCount],
            DereferenceField => &[O::String],
            DereferenceCall => &[O::String, O::ArgType, O::StackDelta],

            PushReferenceValue | Assign | AssignInto | PopReference | MultiplyReference
            | DivideReference | ModulusReference | ModulusModulusReference | Append | Remove
            | Combine | Mask | BitXorReference | BitShiftLeftReference | BitShiftRightReference
            | Increment | Decrement | OutputReference => &[O::Reference],

            Jump | JumpIfFalse | JumpIfTrue | JumpIfNull | JumpIfNullNoPop | BooleanAnd
            | BooleanOr | SwitchCase | SwitchCaseRange | Spawn | TryNoValue => &[O::Label],

            JumpIfTrueReference | JumpIfFalseReference | JumpIfNullDereference => {
                &[O::Reference, O::Label]
            }
            Try => &[O::Label, O::Reference],

            Call => &[O::Reference, O::ArgType, O::StackDelta],
            CallStatement | CreateObject | Rgb | Gradient => &[O::ArgType, O::StackDelta],

            CreateList | CreateAssociativeList | CreateMultidimensionalList => &[O::ListSize],
            MassConcatenation => &[O::ConcatCount],
            PickWeighted | PickUnweighted => &[O::PickCount],

            CreateListEnumerator | CreateTypeEnumerator | CreateRangeEnumerator
            | DestroyEnumerator => &[O::EnumeratorId],
            CreateFilteredListEnumerator => &[O::EnumeratorId, O::FilterId],
            Enumerate => &[O::EnumeratorId, O::Reference, O::Label],
            EnumerateAssoc => &[O::EnumeratorId, O::Reference, O::Reference, O::Label],
            EnumerateNoAssign => &[O::EnumeratorId, O::Label],

            Input => &[O::Reference, O::Reference],
            Prompt => &[O::ValueType],

            _ => &[],
        }
    }
}

/// Where a proc call's arguments come from, encoded as one byte after the
/// calling opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum CallArgsType {
    /// No arguments at all.
    None = 0,
    /// Pushed on the stack in order.
    FromStack = 1,
    /// Pushed on the stack as name/value pairs.
    FromStackKeyed = 2,
    /// A single list on the stack supplies them (`arglist()`).
    FromArgumentList = 3,
    /// The caller's own arguments are forwarded unchanged.
    FromProcArguments = 4,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    /// The opcode tag must stay a single byte.
    #[test]
    fn size_opcode() {
        use std::mem::size_of;
        assert_eq!(size_of::<Opcode>(), 1);
    }

    #[test]
    fn round_trip_discriminants() {
        for op in Opcode::iter() {
            assert_eq!(Opcode::from_repr(op as u8), Some(op));
        }
    }

    #[test]
    fn retired_values_decode_to_none() {
        assert_eq!(Opcode::from_repr(0x0D), None);
        assert_eq!(Opcode::from_repr(0x50), None);
        assert_eq!(Opcode::from_repr(0x5E), None);
    }

    #[test]
    fn call_encodes_reference_then_args() {
        assert_eq!(
            Opcode::Call.operands(),
            &[
                OperandType::Reference,
                OperandType::ArgType,
                OperandType::StackDelta
            ]
        );
        assert_eq!(Opcode::Call.stack_delta(), 0);
    }
}
