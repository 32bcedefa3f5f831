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

//! Serialized form of a compiled program. Field names are PascalCase on the
//! wire; optional sections are omitted entirely when empty so small programs
//! stay small.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::IntoEnumIterator;

use crate::program::opcode::Opcode;
use crate::{GlobalId, ProcId, StringId, TypeId, ValType};

/// Compatibility stamp checked by loaders. Includes the opcode count so a
/// loader built against a different opcode set refuses the artifact outright
/// instead of misdecoding bytecode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetadataJson {
    pub version: String,
}

impl MetadataJson {
    pub fn current() -> Self {
        MetadataJson {
            version: format!("{}+{}", env!("CARGO_PKG_VERSION"), Opcode::iter().count()),
        }
    }
}

/// Bit flags attached to a compiled proc.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcFlags(pub u32);

impl ProcFlags {
    pub const NONE: ProcFlags = ProcFlags(0);
    /// Declared but known not to do anything useful yet.
    pub const UNIMPLEMENTED: ProcFlags = ProcFlags(0x1);
    /// `set hidden = TRUE`; kept out of verb panels.
    pub const HIDDEN: ProcFlags = ProcFlags(0x2);
    /// `set waitfor = FALSE`; callers resume at the first sleep.
    pub const DISABLE_WAITFOR: ProcFlags = ProcFlags(0x4);
    /// `set background = TRUE`; yields between loop iterations.
    pub const BACKGROUND: ProcFlags = ProcFlags(0x8);
    /// Redeclares a proc inherited from a parent type.
    pub const IS_OVERRIDE: ProcFlags = ProcFlags(0x10);

    pub fn contains(self, other: ProcFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for ProcFlags {
    type Output = ProcFlags;

    fn bitor(self, rhs: ProcFlags) -> ProcFlags {
        ProcFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ProcFlags {
    fn bitor_assign(&mut self, rhs: ProcFlags) {
        self.0 |= rhs.0;
    }
}

/// One declared argument of a compiled proc.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcArgumentJson {
    pub name: String,
    #[serde(rename = "Type")]
    pub val_type: ValType,
}

/// Maps a bytecode offset range back to a source line. Entries are sorted by
/// offset; `file` is only present on the entry where the file changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceInfoJson {
    pub offset: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file: Option<StringId>,
    pub line: u32,
}

fn is_false(b: &bool) -> bool {
    !b
}

/// One compiled proc body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ProcDefinitionJson {
    pub owning_type_id: TypeId,
    pub name: String,
    #[serde(skip_serializing_if = "is_false", default)]
    pub is_verb: bool,
    pub max_stack_size: u32,
    #[serde(skip_serializing_if = "ProcFlags::is_empty", default)]
    pub attributes: ProcFlags,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "base64_bytes", default)]
    pub bytecode: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub arguments: Option<Vec<ProcArgumentJson>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub locals: Option<Vec<String>>,
    pub source_info: Vec<SourceInfoJson>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub verb_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub verb_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub verb_desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub invisibility: Option<f32>,
}

/// One type in the object tree, in creation order. Index 0 is the root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TypeJson {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent: Option<TypeId>,
    /// Compile-time constant values, overrides already folded in.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub variables: Option<IndexMap<String, Value>>,
    /// Names of statics declared on this type, with their global slots.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub global_variables: Option<IndexMap<String, GlobalId>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub const_variables: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tmp_variables: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub init_proc: Option<ProcId>,
    /// Per declared proc name, every definition id in override order.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub procs: Option<Vec<Vec<ProcId>>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub verbs: Option<Vec<ProcId>>,
}

/// The global variable table. `globals` is sparse: slots whose initial value
/// is null or comes from the global init proc are simply absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GlobalListJson {
    pub global_count: u32,
    pub names: Vec<String>,
    pub globals: IndexMap<u32, Value>,
}

/// The whole compiled program.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompiledJson {
    pub metadata: MetadataJson,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub strings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resources: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub types: Option<Vec<TypeJson>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub procs: Option<Vec<ProcDefinitionJson>>,
    /// Definition ids of procs declared at global scope, indexed densely.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub global_procs: Option<Vec<ProcId>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub globals: Option<GlobalListJson>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub global_init_proc: Option<ProcDefinitionJson>,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(de)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_sections_are_omitted() {
        let proc = ProcDefinitionJson {
            owning_type_id: TypeId(0),
            name: "main".to_string(),
            max_stack_size: 1,
            source_info: vec![],
            ..Default::default()
        };
        let text = serde_json::to_string(&proc).unwrap();
        assert_eq!(
            text,
            r#"{"OwningTypeId":0,"Name":"main","MaxStackSize":1,"SourceInfo":[]}"#
        );
    }

    #[test]
    fn bytecode_round_trips_through_base64() {
        let proc = ProcDefinitionJson {
            owning_type_id: TypeId(2),
            name: "f".to_string(),
            max_stack_size: 2,
            bytecode: vec![0x38, 0, 0, 0x80, 0x3F, 0x10],
            source_info: vec![],
            ..Default::default()
        };
        let text = serde_json::to_string(&proc).unwrap();
        assert!(text.contains(r#""Bytecode":"OAAAgD8Q""#), "{text}");

        let back: ProcDefinitionJson = serde_json::from_str(&text).unwrap();
        assert_eq!(back, proc);
    }

    #[test]
    fn flags_serialize_as_raw_bits() {
        let flags = ProcFlags::HIDDEN | ProcFlags::BACKGROUND;
        assert_eq!(serde_json::to_string(&flags).unwrap(), "10");
        assert!(flags.contains(ProcFlags::HIDDEN));
        assert!(!flags.contains(ProcFlags::DISABLE_WAITFOR));
    }
}
