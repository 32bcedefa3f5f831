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

//! Slash-separated object type paths (`/mob/enemy`, `/obj/item/proc/use`).

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// How a path is anchored. Absolute paths start at the root of the type tree;
/// relative paths are resolved against some context type, walking upward
/// through its ancestors when no direct child matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PathKind {
    Absolute,
    Relative,
    UpwardSearch,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypePath {
    pub kind: PathKind,
    pub elements: Vec<String>,
}

lazy_static! {
    pub static ref ROOT: TypePath = TypePath::root();
    pub static ref DATUM: TypePath = TypePath::absolute(["datum"]);
    pub static ref ATOM: TypePath = TypePath::absolute(["atom"]);
    pub static ref MOVABLE: TypePath = TypePath::absolute(["atom", "movable"]);
    pub static ref AREA: TypePath = TypePath::absolute(["area"]);
    pub static ref TURF: TypePath = TypePath::absolute(["turf"]);
    pub static ref OBJ: TypePath = TypePath::absolute(["obj"]);
    pub static ref MOB: TypePath = TypePath::absolute(["mob"]);
    pub static ref WORLD: TypePath = TypePath::absolute(["world"]);
    pub static ref CLIENT: TypePath = TypePath::absolute(["client"]);
    pub static ref LIST: TypePath = TypePath::absolute(["list"]);
    pub static ref EXCEPTION: TypePath = TypePath::absolute(["exception"]);
    pub static ref MATRIX: TypePath = TypePath::absolute(["matrix"]);
    pub static ref ICON: TypePath = TypePath::absolute(["icon"]);
    pub static ref SOUND: TypePath = TypePath::absolute(["sound"]);
    pub static ref IMAGE: TypePath = TypePath::absolute(["image"]);
    pub static ref FILTER: TypePath = TypePath::absolute(["dm_filter"]);
}

impl TypePath {
    pub fn root() -> Self {
        TypePath {
            kind: PathKind::Absolute,
            elements: vec![],
        }
    }

    pub fn absolute<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypePath {
            kind: PathKind::Absolute,
            elements: elements.into_iter().map(Into::into).collect(),
        }
    }

    pub fn relative<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypePath {
            kind: PathKind::Relative,
            elements: elements.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.kind == PathKind::Absolute
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.elements.last().map(String::as_str)
    }

    /// The path with its last element removed. `None` for the root.
    pub fn parent(&self) -> Option<TypePath> {
        if self.elements.is_empty() {
            return None;
        }
        Some(TypePath {
            kind: self.kind,
            elements: self.elements[..self.elements.len() - 1].to_vec(),
        })
    }

    pub fn child(&self, element: &str) -> TypePath {
        let mut elements = self.elements.clone();
        elements.push(element.to_string());
        TypePath {
            kind: self.kind,
            elements,
        }
    }

    /// Appends `other` to this path. An absolute `other` replaces this path
    /// entirely.
    pub fn combine(&self, other: &TypePath) -> TypePath {
        if other.is_absolute() {
            return other.clone();
        }
        let mut elements = self.elements.clone();
        elements.extend(other.elements.iter().cloned());
        TypePath {
            kind: self.kind,
            elements,
        }
    }

    /// Whether `ancestor` is a (non-strict) element-wise prefix of this path.
    pub fn is_descendant_of(&self, ancestor: &TypePath) -> bool {
        if ancestor.elements.len() > self.elements.len() {
            return false;
        }
        self.elements
            .iter()
            .zip(ancestor.elements.iter())
            .all(|(a, b)| a == b)
    }

    pub fn find_element(&self, name: &str) -> Option<usize> {
        self.elements.iter().position(|e| e == name)
    }

    /// The first `len` elements as an absolute path.
    pub fn prefix(&self, len: usize) -> TypePath {
        TypePath {
            kind: PathKind::Absolute,
            elements: self.elements[..len].to_vec(),
        }
    }

    /// The elements from `start` onward as a relative path.
    pub fn suffix(&self, start: usize) -> TypePath {
        TypePath {
            kind: PathKind::Relative,
            elements: self.elements[start..].to_vec(),
        }
    }

    /// Splits a declaration path at its `proc`/`verb` marker element, if any:
    /// `/mob/proc/attack` becomes (`/mob`, `"proc"`, `["attack"]`).
    pub fn split_proc_marker(&self) -> Option<(TypePath, &str, &[String])> {
        let index = self
            .find_element("proc")
            .or_else(|| self.find_element("verb"))?;
        Some((
            self.prefix(index),
            self.elements[index].as_str(),
            &self.elements[index + 1..],
        ))
    }
}

impl From<&str> for TypePath {
    fn from(value: &str) -> Self {
        let (kind, rest) = if let Some(stripped) = value.strip_prefix('/') {
            (PathKind::Absolute, stripped)
        } else {
            (PathKind::Relative, value)
        };
        let elements = rest
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        TypePath { kind, elements }
    }
}

impl Display for TypePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.kind {
            PathKind::Absolute => {
                if self.elements.is_empty() {
                    return write!(f, "/");
                }
                for element in &self.elements {
                    write!(f, "/{element}")?;
                }
                Ok(())
            }
            PathKind::Relative | PathKind::UpwardSearch => {
                write!(f, "{}", self.elements.join("/"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let path = TypePath::from("/mob/enemy");
        assert_eq!(path.kind, PathKind::Absolute);
        assert_eq!(path.to_string(), "/mob/enemy");
        assert_eq!(TypePath::from("obj/item").to_string(), "obj/item");
        assert_eq!(TypePath::root().to_string(), "/");
    }

    #[test]
    fn parent_and_child() {
        let path = TypePath::from("/obj/item/sword");
        assert_eq!(path.parent(), Some(TypePath::from("/obj/item")));
        assert_eq!(TypePath::root().parent(), None);
        assert_eq!(
            TypePath::from("/obj").child("item"),
            TypePath::from("/obj/item")
        );
    }

    #[test]
    fn combine_prefers_absolute() {
        let base = TypePath::from("/mob");
        assert_eq!(
            base.combine(&TypePath::from("enemy/boss")),
            TypePath::from("/mob/enemy/boss")
        );
        assert_eq!(base.combine(&TypePath::from("/obj")), TypePath::from("/obj"));
    }

    #[test]
    fn descendant_includes_self() {
        let list = TypePath::from("/list");
        assert!(TypePath::from("/list").is_descendant_of(&list));
        assert!(TypePath::from("/list/assoc").is_descendant_of(&list));
        assert!(!TypePath::from("/obj").is_descendant_of(&list));
    }

    #[test]
    fn split_proc_marker() {
        let path = TypePath::from("/mob/proc/attack");
        let (owner, marker, names) = path.split_proc_marker().unwrap();
        assert_eq!(owner, TypePath::from("/mob"));
        assert_eq!(marker, "proc");
        assert_eq!(names, ["attack".to_string()]);
        assert!(TypePath::from("/mob/enemy").split_proc_marker().is_none());
    }
}
