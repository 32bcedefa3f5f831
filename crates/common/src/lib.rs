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

//! The compile-time model shared between the DM compiler and whatever loads its
//! output: source locations, slash-separated type paths, the value-type
//! lattice, the opcode set with its operand layouts, the l-value reference
//! union, and the serializable compiled-program artifact.

pub mod location;
pub mod path;
pub mod program;
pub mod val_type;

pub use location::{FileId, Location};
pub use path::{PathKind, TypePath};
pub use program::{GlobalId, ProcId, StringId, TypeId};
pub use val_type::{ComplexValType, ValType};
