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

//! Numbered warning codes, per-code severity configuration, and the sink
//! that collects everything a compile produces.

use std::fmt::{self, Display, Formatter};

use ahash::AHashMap;
use dreamc_common::Location;
use strum::{EnumIter, FromRepr};
use thiserror::Error;

/// Every diagnostic the compiler can produce, by stable number. Numbers below
/// 1000 are pinned to [`ErrorLevel::Error`] and cannot be reconfigured;
/// everything else starts at the level given by [`WarningCode::default_level`].
///
/// Gaps between numbers are reserved. Never renumber an existing code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, FromRepr)]
#[repr(u16)]
pub enum WarningCode {
    Unknown = 0,
    BadExpression = 11,
    MissingExpression = 12,
    InvalidArgumentCount = 13,
    InvalidVarDefinition = 14,
    MissingBody = 15,
    BadLabel = 19,
    InvalidReference = 50,
    BadArgument = 100,
    InvalidArgumentKey = 101,
    ArglistOnlyArgument = 102,
    HardReservedKeyword = 200,
    ItemDoesntExist = 404,
    DanglingOverride = 405,
    StaticOverride = 406,
    FinalOverride = 407,
    HardConstContext = 500,
    WriteToConstant = 501,

    SoftReservedKeyword = 2000,
    ScopeOperandNamedType = 2001,
    DuplicateVariable = 2100,
    DuplicateProcDefinition = 2101,
    PointlessParentCall = 2205,
    PointlessBuiltinCall = 2206,
    SuspiciousMatrixCall = 2207,
    FallbackBuiltinArgument = 2208,
    PointlessScopeOperator = 2209,
    PointlessPositionalArgument = 2210,
    AmbiguousVarStatic = 2212,
    MalformedRange = 2300,
    InvalidRange = 2301,
    InvalidSetStatement = 2302,
    InvalidOverride = 2303,
    InvalidIndexOperation = 2304,
    DanglingVarType = 2401,
    AmbiguousResourcePath = 2600,
    InvalidReturnType = 2701,
    InvalidVarType = 2702,
    ImplicitNullType = 2703,
    UnimplementedAccess = 2800,
    UnsupportedAccess = 2801,
    EmptyBlock = 3100,
    EmptyProc = 3101,
    SuspiciousSwitchCase = 3201,
    AssignmentInConditional = 3202,
    AmbiguousInOrder = 3204,
    RuntimeSearchOperator = 3300,
}

impl WarningCode {
    /// True for the error range that configuration may not soften.
    pub fn is_pinned_error(self) -> bool {
        (self as u16) < 1000
    }

    /// The severity a fresh configuration assigns this code.
    pub fn default_level(self) -> ErrorLevel {
        use WarningCode::*;
        match self {
            Unknown | BadExpression | MissingExpression | InvalidArgumentCount
            | InvalidVarDefinition | MissingBody | BadLabel | InvalidReference | BadArgument
            | InvalidArgumentKey | ArglistOnlyArgument | HardReservedKeyword | ItemDoesntExist
            | DanglingOverride | StaticOverride | FinalOverride | HardConstContext
            | WriteToConstant => ErrorLevel::Error,

            SoftReservedKeyword | DuplicateProcDefinition | InvalidRange | InvalidSetStatement => {
                ErrorLevel::Error
            }

            ScopeOperandNamedType | DuplicateVariable | PointlessParentCall
            | PointlessBuiltinCall | SuspiciousMatrixCall | FallbackBuiltinArgument
            | PointlessScopeOperator | PointlessPositionalArgument | AmbiguousVarStatic
            | MalformedRange | InvalidOverride | InvalidIndexOperation | DanglingVarType
            | AmbiguousResourcePath | UnimplementedAccess | UnsupportedAccess
            | SuspiciousSwitchCase | AssignmentInConditional | AmbiguousInOrder => {
                ErrorLevel::Warning
            }

            InvalidReturnType | InvalidVarType | ImplicitNullType | EmptyBlock => {
                ErrorLevel::Notice
            }

            EmptyProc | RuntimeSearchOperator => ErrorLevel::Disabled,
        }
    }
}

impl Display for WarningCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "DC{:04}", *self as u16)
    }
}

/// How seriously one [`WarningCode`] is taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorLevel {
    /// Never shown.
    Disabled,
    /// Shown only when notices are requested; never affects success.
    Notice,
    /// Shown, counted, does not fail the compile.
    Warning,
    /// Fails the compile.
    Error,
}

impl Display for ErrorLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let word = match self {
            ErrorLevel::Disabled => "disabled",
            ErrorLevel::Notice => "notice",
            ErrorLevel::Warning => "warning",
            ErrorLevel::Error => "error",
        };
        write!(f, "{word}")
    }
}

/// One emitted diagnostic, after severity resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: WarningCode,
    pub level: ErrorLevel,
    pub location: Location,
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}: {}",
            self.level, self.code, self.location, self.message
        )
    }
}

/// Failures inside the bytecode writer itself. These are surfaced to the
/// user as diagnostics on the proc being compiled.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum CompileError {
    #[error("too many local variables, the limit is 255 slots")]
    TooManyLocals,
    #[error("too many arguments, the limit is 255 slots")]
    TooManyArguments,
    #[error("`{keyword}` is not inside a loop")]
    EmptyLoopStack { keyword: &'static str },
    #[error("jump target \"{label}\" was never placed")]
    UnresolvedLabel { label: String },
    #[error("jump target \"{label}\" placed twice")]
    DuplicateLabel { label: String },
    #[error("expression is not a storage reference")]
    NotAReference,
    #[error("stack underflow at instruction {offset}")]
    StackUnderflow { offset: usize },
}

/// Collects diagnostics for one compile, resolving each code's severity
/// against the configured levels as it arrives.
#[derive(Debug)]
pub struct Diagnostics {
    levels: AHashMap<WarningCode, ErrorLevel>,
    notices_enabled: bool,
    unimplemented_enabled: bool,
    emitted: Vec<Diagnostic>,
    error_count: usize,
    warning_count: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            levels: AHashMap::new(),
            notices_enabled: false,
            unimplemented_enabled: true,
            emitted: Vec::new(),
            error_count: 0,
            warning_count: 0,
        }
    }
}

impl Diagnostics {
    pub fn new(notices_enabled: bool, unimplemented_enabled: bool) -> Self {
        Diagnostics {
            notices_enabled,
            unimplemented_enabled,
            ..Default::default()
        }
    }

    /// Reconfigure one code's severity. Pinned error codes refuse the change.
    pub fn set_level(&mut self, code: WarningCode, level: ErrorLevel) {
        if code.is_pinned_error() {
            tracing::warn!("ignoring attempt to set {code} below error level");
            return;
        }
        self.levels.insert(code, level);
    }

    pub fn level_for(&self, code: WarningCode) -> ErrorLevel {
        if code.is_pinned_error() {
            return ErrorLevel::Error;
        }
        self.levels
            .get(&code)
            .copied()
            .unwrap_or_else(|| code.default_level())
    }

    /// Emit under the configured severity. Returns false when the diagnostic
    /// came out at error level, so call sites can bail out of whatever they
    /// were building.
    pub fn emit(&mut self, code: WarningCode, location: Location, message: impl Into<String>) -> bool {
        let level = self.level_for(code);
        match level {
            ErrorLevel::Disabled => return true,
            ErrorLevel::Notice if !self.notices_enabled => return true,
            _ => {}
        }
        self.push(Diagnostic {
            code,
            level,
            location,
            message: message.into(),
        });
        level != ErrorLevel::Error
    }

    /// Emit at error level regardless of configuration.
    pub fn forced_error(&mut self, code: WarningCode, location: Location, message: impl Into<String>) {
        self.push(Diagnostic {
            code,
            level: ErrorLevel::Error,
            location,
            message: message.into(),
        });
    }

    /// Emit at warning level regardless of configuration.
    pub fn forced_warning(
        &mut self,
        code: WarningCode,
        location: Location,
        message: impl Into<String>,
    ) {
        self.push(Diagnostic {
            code,
            level: ErrorLevel::Warning,
            location,
            message: message.into(),
        });
    }

    /// Warn about a declared-but-unimplemented feature being touched.
    /// Dropped entirely when the compile suppressed these.
    pub fn unimplemented_warning(
        &mut self,
        code: WarningCode,
        location: Location,
        message: impl Into<String>,
    ) {
        if !self.unimplemented_enabled {
            return;
        }
        self.forced_warning(code, location, message);
    }

    /// Report a writer failure against the proc's declaration site.
    pub fn writer_error(&mut self, location: Location, error: CompileError) {
        self.forced_error(WarningCode::Unknown, location, error.to_string());
    }

    fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.level {
            ErrorLevel::Error => {
                self.error_count += 1;
                tracing::error!("{diagnostic}");
            }
            ErrorLevel::Warning => {
                self.warning_count += 1;
                tracing::warn!("{diagnostic}");
            }
            _ => tracing::info!("{diagnostic}"),
        }
        self.emitted.push(diagnostic);
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn emitted(&self) -> &[Diagnostic] {
        &self.emitted
    }

    pub fn into_emitted(self) -> Vec<Diagnostic> {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn codes_format_with_fixed_width() {
        assert_eq!(WarningCode::Unknown.to_string(), "DC0000");
        assert_eq!(WarningCode::ItemDoesntExist.to_string(), "DC0404");
        assert_eq!(WarningCode::DuplicateVariable.to_string(), "DC2100");
    }

    #[test]
    fn pinned_codes_ignore_reconfiguration() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.set_level(WarningCode::BadExpression, ErrorLevel::Disabled);
        assert_eq!(
            diagnostics.level_for(WarningCode::BadExpression),
            ErrorLevel::Error
        );

        diagnostics.set_level(WarningCode::DuplicateVariable, ErrorLevel::Error);
        assert_eq!(
            diagnostics.level_for(WarningCode::DuplicateVariable),
            ErrorLevel::Error
        );
    }

    #[test]
    fn pinned_codes_default_to_error() {
        for code in WarningCode::iter().filter(|code| code.is_pinned_error()) {
            assert_eq!(code.default_level(), ErrorLevel::Error, "{code}");
        }
    }

    #[test]
    fn emit_respects_levels() {
        let mut diagnostics = Diagnostics::default();

        assert!(diagnostics.emit(WarningCode::EmptyProc, Location::INTERNAL, "dropped"));
        assert_eq!(diagnostics.emitted().len(), 0);

        assert!(diagnostics.emit(WarningCode::ImplicitNullType, Location::INTERNAL, "notice"));
        assert_eq!(diagnostics.emitted().len(), 0);

        assert!(diagnostics.emit(WarningCode::DuplicateVariable, Location::INTERNAL, "warned"));
        assert!(!diagnostics.emit(WarningCode::BadExpression, Location::INTERNAL, "failed"));
        assert_eq!(diagnostics.warning_count(), 1);
        assert_eq!(diagnostics.error_count(), 1);
    }

    #[test]
    fn notices_shown_when_enabled() {
        let mut diagnostics = Diagnostics::new(true, false);
        diagnostics.emit(WarningCode::ImplicitNullType, Location::INTERNAL, "notice");
        assert_eq!(diagnostics.emitted().len(), 1);
        assert_eq!(diagnostics.error_count(), 0);
        assert_eq!(diagnostics.warning_count(), 0);
    }

    #[test]
    fn unimplemented_warnings_emit_unless_suppressed() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.unimplemented_warning(
            WarningCode::UnimplementedAccess,
            Location::INTERNAL,
            "shown",
        );
        assert_eq!(diagnostics.warning_count(), 1);

        let mut diagnostics = Diagnostics::new(false, false);
        diagnostics.unimplemented_warning(
            WarningCode::UnimplementedAccess,
            Location::INTERNAL,
            "dropped",
        );
        assert_eq!(diagnostics.warning_count(), 0);
        assert_eq!(diagnostics.emitted().len(), 0);
    }
}
