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

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Identifies one source file within a compilation. The compilation session
/// owns the id-to-name table; everything else passes the id around.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct FileId(pub u16);

impl FileId {
    /// The synthesized "file" that internal and generated code points at.
    pub const INTERNAL: FileId = FileId(u16::MAX);
}

/// A position in DM source. Columns are one-based like the lines; column 0
/// means "unknown within the line".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: FileId,
    pub line: u32,
    pub column: u16,
}

impl Location {
    /// Placeholder for diagnostics raised outside any source file.
    pub const INTERNAL: Location = Location {
        file: FileId::INTERNAL,
        line: 0,
        column: 0,
    };

    pub fn new(file: FileId, line: u32, column: u16) -> Self {
        Self { file, line, column }
    }

    pub fn is_internal(&self) -> bool {
        self.file == FileId::INTERNAL
    }
}

impl Default for Location {
    fn default() -> Self {
        Location::INTERNAL
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_internal() {
            write!(f, "<internal>")
        } else {
            write!(f, "file#{}:{}:{}", self.file.0, self.line, self.column)
        }
    }
}
