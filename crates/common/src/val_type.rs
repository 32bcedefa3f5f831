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

//! The value-type lattice used by `as` annotations and static type hints.

use crate::TypePath;
use crate::path;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// A set of primitive value-type flags. Zero means "anything".
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ValType(pub u32);

impl ValType {
    pub const ANYTHING: ValType = ValType(0x0);
    pub const NULL: ValType = ValType(0x1);
    pub const TEXT: ValType = ValType(0x2);
    pub const OBJ: ValType = ValType(0x4);
    pub const MOB: ValType = ValType(0x8);
    pub const TURF: ValType = ValType(0x10);
    pub const NUM: ValType = ValType(0x20);
    pub const MESSAGE: ValType = ValType(0x40);
    pub const AREA: ValType = ValType(0x80);
    pub const COLOR: ValType = ValType(0x100);
    pub const FILE: ValType = ValType(0x200);
    pub const COMMAND_TEXT: ValType = ValType(0x400);
    pub const SOUND: ValType = ValType(0x800);
    pub const ICON: ValType = ValType(0x1000);
    pub const INSTANCE: ValType = ValType(0x2000);
    pub const PATH: ValType = ValType(0x4000);

    // Marker flags for standard-library hints rather than value shapes.
    pub const UNIMPLEMENTED: ValType = ValType(0x8000);
    pub const COMPILETIME_READONLY: ValType = ValType(0x10000);
    pub const NO_CONST_FOLD: ValType = ValType(0x20000);
    pub const UNSUPPORTED: ValType = ValType(0x40000);

    const NAMES: &'static [(ValType, &'static str)] = &[
        (ValType::NULL, "null"),
        (ValType::TEXT, "text"),
        (ValType::OBJ, "obj"),
        (ValType::MOB, "mob"),
        (ValType::TURF, "turf"),
        (ValType::NUM, "num"),
        (ValType::MESSAGE, "message"),
        (ValType::AREA, "area"),
        (ValType::COLOR, "color"),
        (ValType::FILE, "file"),
        (ValType::COMMAND_TEXT, "command_text"),
        (ValType::SOUND, "sound"),
        (ValType::ICON, "icon"),
        (ValType::INSTANCE, "instance"),
        (ValType::PATH, "path"),
        (ValType::UNIMPLEMENTED, "unimplemented"),
        (ValType::COMPILETIME_READONLY, "compiletime_readonly"),
        (ValType::NO_CONST_FOLD, "no_const_fold"),
        (ValType::UNSUPPORTED, "unsupported"),
    ];

    pub fn is_anything(self) -> bool {
        self.0 == 0
    }

    /// Whether any flag of `other` is present in `self`.
    pub fn intersects(self, other: ValType) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains(self, other: ValType) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ValType {
    type Output = ValType;

    fn bitor(self, rhs: ValType) -> ValType {
        ValType(self.0 | rhs.0)
    }
}

impl BitOrAssign for ValType {
    fn bitor_assign(&mut self, rhs: ValType) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ValType {
    type Output = ValType;

    fn bitand(self, rhs: ValType) -> ValType {
        ValType(self.0 & rhs.0)
    }
}

impl Not for ValType {
    type Output = ValType;

    fn not(self) -> ValType {
        ValType(!self.0)
    }
}

impl Display for ValType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_anything() {
            return write!(f, "anything");
        }
        let names = ValType::NAMES
            .iter()
            .filter(|(flag, _)| self.intersects(*flag))
            .map(|(_, name)| *name)
            .join("|");
        write!(f, "{names}")
    }
}

/// A value type that may carry a nominal type path on top of the primitive
/// flags, such as `var/obj/item/foo` or a proc returning `/datum`.
#[derive(Clone, Debug, PartialEq)]
pub struct ComplexValType {
    ty: ValType,
    pub path: Option<TypePath>,
    unimplemented: bool,
    unsupported: bool,
    compiletime_readonly: bool,
}

impl ComplexValType {
    pub fn new(ty: ValType, path: Option<TypePath>) -> Self {
        ComplexValType {
            ty: ty & !(ValType::UNIMPLEMENTED | ValType::COMPILETIME_READONLY),
            path,
            unimplemented: ty.intersects(ValType::UNIMPLEMENTED),
            unsupported: ty.intersects(ValType::UNSUPPORTED),
            compiletime_readonly: ty.intersects(ValType::COMPILETIME_READONLY),
        }
    }

    pub fn flags(&self) -> ValType {
        self.ty
    }

    pub fn is_anything(&self) -> bool {
        self.ty.is_anything() && self.path.is_none()
    }

    pub fn is_instance(&self) -> bool {
        self.ty.intersects(ValType::INSTANCE)
    }

    pub fn has_path(&self) -> bool {
        self.ty.intersects(ValType::INSTANCE | ValType::PATH)
    }

    pub fn is_list(&self) -> bool {
        self.is_instance() && self.path.as_ref() == Some(&*path::LIST)
    }

    pub fn is_unimplemented(&self) -> bool {
        self.unimplemented
    }

    pub fn is_unsupported(&self) -> bool {
        self.unsupported
    }

    pub fn is_compiletime_readonly(&self) -> bool {
        self.compiletime_readonly
    }

    pub fn with_flags(&self, extra: ValType) -> ComplexValType {
        ComplexValType {
            ty: self.ty | extra,
            ..self.clone()
        }
    }

    /// Flag-level type matching, without consulting the object tree. The path
    /// of `var/icon/x` and `var/sound/x` counts as the corresponding flag, and
    /// text/message and text/color are mutually acceptable.
    pub fn matches_flags(&self, other: ValType) -> bool {
        if self.is_anything() || self.ty.is_anything() || self.ty.intersects(other) {
            return true;
        }
        if other.intersects(ValType::ICON) && self.path.as_ref() == Some(&*path::ICON) {
            return true;
        }
        if other.intersects(ValType::SOUND) && self.path.as_ref() == Some(&*path::SOUND) {
            return true;
        }
        let text_message = ValType::TEXT | ValType::MESSAGE;
        if other.intersects(text_message) && self.ty.intersects(text_message) {
            return true;
        }
        let text_color = ValType::TEXT | ValType::COLOR;
        if other.intersects(text_color) && self.ty.intersects(text_color) {
            return true;
        }
        false
    }

    /// The nominal path this type implies, from the explicit path or from the
    /// atom-shaped primitive flags.
    pub fn as_path(&self) -> Option<TypePath> {
        if self.has_path() {
            return self.path.clone();
        }
        let ty = self.ty & !ValType::NULL;
        let known = [
            (ValType::MOB, &*path::MOB),
            (ValType::ICON, &*path::ICON),
            (ValType::OBJ, &*path::OBJ),
            (ValType::TURF, &*path::TURF),
            (ValType::AREA, &*path::AREA),
            (ValType::OBJ | ValType::MOB, &*path::MOVABLE),
            (
                ValType::AREA | ValType::TURF | ValType::OBJ | ValType::MOB,
                &*path::ATOM,
            ),
            (ValType::SOUND, &*path::SOUND),
        ];
        known
            .iter()
            .find(|(flags, _)| ty == *flags)
            .map(|(_, p)| (*p).clone())
    }
}

impl From<ValType> for ComplexValType {
    fn from(ty: ValType) -> Self {
        ComplexValType::new(ty, None)
    }
}

impl From<TypePath> for ComplexValType {
    fn from(path: TypePath) -> Self {
        ComplexValType::new(ValType::INSTANCE, Some(path))
    }
}

impl Default for ComplexValType {
    fn default() -> Self {
        ValType::ANYTHING.into()
    }
}

impl Display for ComplexValType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) if self.has_path() => write!(f, "{} of type {path}", self.ty),
            _ => write!(f, "{}", self.ty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn anything_matches_everything() {
        let anything = ComplexValType::from(ValType::ANYTHING);
        assert!(anything.matches_flags(ValType::NUM));
        assert!(anything.matches_flags(ValType::NULL));
    }

    #[test_case(ValType::NUM, ValType::NUM, true; "num accepts num")]
    #[test_case(ValType::NUM, ValType::TEXT, false; "num rejects text")]
    #[test_case(ValType::TEXT, ValType::MESSAGE, true; "text accepts message")]
    #[test_case(ValType::TEXT, ValType::COLOR, true; "text accepts color")]
    #[test_case(ValType::OBJ, ValType::MOB, false; "obj rejects mob")]
    fn flag_matching(declared: ValType, value: ValType, expected: bool) {
        assert_eq!(ComplexValType::from(declared).matches_flags(value), expected);
    }

    #[test]
    fn icon_path_counts_as_icon() {
        let icon_var = ComplexValType::new(ValType::INSTANCE, Some(TypePath::from("/icon")));
        assert!(icon_var.matches_flags(ValType::ICON));
    }

    #[test]
    fn marker_flags_are_stripped() {
        let ty = ComplexValType::new(ValType::NUM | ValType::UNIMPLEMENTED, None);
        assert!(ty.is_unimplemented());
        assert!(!ty.flags().intersects(ValType::UNIMPLEMENTED));
    }

    #[test]
    fn atom_flags_imply_paths() {
        assert_eq!(
            ComplexValType::from(ValType::MOB).as_path(),
            Some(TypePath::from("/mob"))
        );
        assert_eq!(
            ComplexValType::from(ValType::OBJ | ValType::MOB).as_path(),
            Some(TypePath::from("/atom/movable"))
        );
        assert_eq!(ComplexValType::from(ValType::NUM).as_path(), None);
    }
}
