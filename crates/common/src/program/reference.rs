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

//! Storage locations an opcode can read or write. A reference is encoded
//! inline in bytecode as a tag byte plus an optional payload.

use std::fmt::{Display, Formatter};

use crate::{GlobalId, ProcId, StringId};

/// A named storage location, resolved against the executing proc's frame.
///
/// `Field` and `ListIndex` are the two stack-dependent forms: the object (and
/// for `ListIndex` also the index) they apply to is popped from the stack at
/// the point the reference is consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reference {
    /// The object the proc was called on.
    Src,
    /// The user that triggered the current command chain.
    Usr,
    /// The currently executing proc, as a callable.
    SelfProc,
    /// The argument list of the current call.
    Args,
    /// The world singleton.
    World,
    /// The overridden proc on the parent type.
    SuperProc,
    /// `list[index]`, object and index taken from the stack.
    ListIndex,
    /// A proc argument by slot.
    Argument(u8),
    /// A local variable by slot.
    Local(u8),
    /// A global variable by table index.
    Global(GlobalId),
    /// A global proc by table index.
    GlobalProc(ProcId),
    /// `object.name`, object taken from the stack.
    Field(StringId),
    /// `src.name`, resolved without touching the stack.
    SrcField(StringId),
    /// A proc looked up on `src` by name.
    SrcProc(StringId),
    /// Produced when an lvalue failed to build. Never survives a
    /// successful compile.
    Invalid,
}

impl Reference {
    /// The wire tag identifying this variant.
    pub fn tag(self) -> u8 {
        match self {
            Reference::Src => 0,
            Reference::Usr => 1,
            Reference::SelfProc => 2,
            Reference::Args => 3,
            Reference::World => 4,
            Reference::SuperProc => 5,
            Reference::ListIndex => 6,
            Reference::Argument(_) => 7,
            Reference::Local(_) => 8,
            Reference::Global(_) => 9,
            Reference::GlobalProc(_) => 10,
            Reference::Field(_) => 11,
            Reference::SrcField(_) => 12,
            Reference::SrcProc(_) => 13,
            Reference::Invalid => 14,
        }
    }

    /// How many stack entries consuming this reference removes.
    pub fn pops_from_stack(self) -> u32 {
        match self {
            Reference::Field(_) => 1,
            Reference::ListIndex => 2,
            _ => 0,
        }
    }

    /// Append the wire form: tag byte, then slot byte or u32 table index
    /// where the variant carries one.
    pub fn encode(self, out: &mut Vec<u8>) {
        out.push(self.tag());
        match self {
            Reference::Argument(slot) | Reference::Local(slot) => out.push(slot),
            Reference::Global(GlobalId(id)) => out.extend_from_slice(&id.to_le_bytes()),
            Reference::GlobalProc(ProcId(id)) => out.extend_from_slice(&id.to_le_bytes()),
            Reference::Field(StringId(id))
            | Reference::SrcField(StringId(id))
            | Reference::SrcProc(StringId(id)) => out.extend_from_slice(&id.to_le_bytes()),
            _ => {}
        }
    }
}

impl Display for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Reference::Src => write!(f, "src"),
            Reference::Usr => write!(f, "usr"),
            Reference::SelfProc => write!(f, "."),
            Reference::Args => write!(f, "args"),
            Reference::World => write!(f, "world"),
            Reference::SuperProc => write!(f, ".."),
            Reference::ListIndex => write!(f, "[]"),
            Reference::Argument(slot) => write!(f, "arg{slot}"),
            Reference::Local(slot) => write!(f, "local{slot}"),
            Reference::Global(id) => write!(f, "global{}", id.0),
            Reference::GlobalProc(id) => write!(f, "globalproc{}", id.0),
            Reference::Field(id) => write!(f, "field@{}", id.0),
            Reference::SrcField(id) => write!(f, "src.field@{}", id.0),
            Reference::SrcProc(id) => write!(f, "src.proc@{}", id.0),
            Reference::Invalid => write!(f, "<invalid>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_pops_its_object() {
        assert_eq!(Reference::Field(StringId(3)).pops_from_stack(), 1);
        assert_eq!(Reference::ListIndex.pops_from_stack(), 2);
        assert_eq!(Reference::Src.pops_from_stack(), 0);
    }

    #[test]
    fn encoding_is_tag_then_payload() {
        let mut out = Vec::new();
        Reference::Local(4).encode(&mut out);
        assert_eq!(out, vec![8, 4]);

        out.clear();
        Reference::Global(GlobalId(0x0102)).encode(&mut out);
        assert_eq!(out, vec![9, 0x02, 0x01, 0x00, 0x00]);

        out.clear();
        Reference::World.encode(&mut out);
        assert_eq!(out, vec![4]);
    }
}
