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

//! The compiled-program model: opcodes, l-value references, and the artifact.

use serde::{Deserialize, Serialize};

pub mod json;
pub mod opcode;
pub mod reference;

pub use json::{
    CompiledJson, GlobalListJson, MetadataJson, ProcArgumentJson, ProcDefinitionJson, ProcFlags,
    SourceInfoJson, TypeJson,
};
pub use opcode::{CallArgsType, Opcode, OperandType};
pub use reference::Reference;

/// Index into the artifact's deduplicated string table.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct StringId(pub u32);

/// Index of a type in the artifact's type list.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TypeId(pub u32);

/// Index of a proc in the artifact's proc list.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ProcId(pub u32);

/// Slot in the flat global-variable array.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct GlobalId(pub u32);
