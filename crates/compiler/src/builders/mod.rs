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

//! Builders turn AST into the resolved IR: [`tree`] registers declarations
//! as deferred nodes, [`expr`] binds names against the object tree, and
//! [`stmt`] lowers proc bodies to bytecode.

use dreamc_common::Location;

pub mod expr;
pub mod stmt;
pub mod tree;

pub use expr::ExprBuilder;
pub use stmt::ProcBuilder;

/// How name resolution treats the ambient scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeMode {
    /// Inside a proc body: locals, arguments, `src`, the works.
    Normal,
    /// A static initializer: only globals and global procs are visible.
    Static,
    /// A static initializer during the first resolution pass, before any
    /// type is guaranteed to exist; the scope operator is refused so its
    /// uses settle in a later pass.
    FirstPassStatic,
}

impl ScopeMode {
    pub fn is_static(self) -> bool {
        !matches!(self, ScopeMode::Normal)
    }
}

/// A name or path that could not be bound yet. During fixpoint resolution
/// this is recorded and the node retried; in a proc body it becomes an
/// immediate diagnostic.
#[derive(Clone, Debug)]
pub struct UnresolvedRef {
    pub location: Location,
    pub message: String,
}

impl UnresolvedRef {
    pub fn new(location: Location, message: impl Into<String>) -> Self {
        UnresolvedRef {
            location,
            message: message.into(),
        }
    }
}
