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

//! The abstract syntax tree handed to the compiler by an external parser.
//! Declarations arrive flattened: every type, var, and proc carries its full
//! object path, with nesting already resolved away.

use std::fmt::Display;

use dreamc_common::{Location, TypePath, ValType};

/// One parsed source unit, declarations in source order.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Module {
    /// Source file paths, indexed by the `FileId` in each [`Location`].
    pub files: Vec<String>,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Declaration {
    Type(TypeDecl),
    Var(VarDecl),
    VarOverride(VarOverride),
    Proc(ProcDecl),
}

impl Declaration {
    pub fn location(&self) -> Location {
        match self {
            Declaration::Type(decl) => decl.location,
            Declaration::Var(decl) => decl.location,
            Declaration::VarOverride(decl) => decl.location,
            Declaration::Proc(decl) => decl.location,
        }
    }
}

/// A bare type mention, `/obj/machine`. Declaring a type with no members
/// still creates it.
#[derive(Debug, PartialEq, Clone)]
pub struct TypeDecl {
    pub path: TypePath,
    pub location: Location,
}

/// Storage-class markers parsed off a var path, `var/static/const/...`.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default)]
pub struct VarModifiers {
    pub is_static: bool,
    pub is_const: bool,
    pub is_final: bool,
    pub is_tmp: bool,
}

/// `path/var[/modifiers][/declared/type]/name [as flags] [= value]`.
#[derive(Debug, PartialEq, Clone)]
pub struct VarDecl {
    /// The object the var belongs to; the root path for toplevel globals.
    pub owner: TypePath,
    pub name: String,
    pub modifiers: VarModifiers,
    /// The declared type component between `var` and the name, if any.
    pub decl_type: Option<TypePath>,
    /// Flags from an `as` annotation.
    pub val_type: ValType,
    pub value: Option<Expression>,
    pub location: Location,
}

/// `path/name = value` without a `var` marker: replaces the initial value of
/// an inherited var.
#[derive(Debug, PartialEq, Clone)]
pub struct VarOverride {
    pub owner: TypePath,
    pub name: String,
    pub value: Expression,
    pub location: Location,
}

/// A proc or verb definition. `is_override` is set when the declaration has
/// no `proc`/`verb` marker and therefore redefines an inherited proc.
#[derive(Debug, PartialEq, Clone)]
pub struct ProcDecl {
    /// The owning object; the root path for global procs.
    pub owner: TypePath,
    pub name: String,
    pub is_verb: bool,
    pub is_override: bool,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Statement>,
    pub location: Location,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Parameter {
    pub name: String,
    pub param_type: Option<TypePath>,
    pub val_type: ValType,
    pub default: Option<Expression>,
    pub location: Location,
}

/// A name bound by a `for` head or a `catch` clause. `declare` introduces a
/// fresh local; otherwise the name must already be in scope.
#[derive(Debug, PartialEq, Clone)]
pub struct BoundVar {
    pub name: String,
    pub declare: bool,
    pub var_type: Option<TypePath>,
    pub location: Location,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Statement {
    pub node: StatementNode,
    pub location: Location,
}

impl Statement {
    pub fn new(node: StatementNode, location: Location) -> Self {
        Statement { node, location }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum StatementNode {
    Expr(Expression),
    VarDeclare {
        name: String,
        var_type: Option<TypePath>,
        val_type: ValType,
        value: Option<Expression>,
        /// `var/static` inside a body: shared storage, initialized once.
        is_static: bool,
        is_const: bool,
    },
    Return(Option<Expression>),
    If {
        condition: Expression,
        body: Vec<Statement>,
        else_body: Option<Vec<Statement>>,
    },
    ForStandard {
        init: Option<Box<Statement>>,
        condition: Option<Expression>,
        step: Option<Expression>,
        body: Vec<Statement>,
    },
    /// `for(var/x in list)`. A missing list iterates `world`.
    ForList {
        variable: BoundVar,
        list: Option<Expression>,
        body: Vec<Statement>,
    },
    /// `for(var/x in start to end [step s])`.
    ForRange {
        variable: BoundVar,
        start: Expression,
        end: Expression,
        step: Option<Expression>,
        body: Vec<Statement>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    DoWhile {
        body: Vec<Statement>,
        condition: Expression,
    },
    Switch {
        value: Expression,
        cases: Vec<SwitchCase>,
        default: Option<Vec<Statement>>,
    },
    Break(Option<String>),
    Continue(Option<String>),
    Goto(String),
    /// `name:` followed by its indented block.
    Label {
        name: String,
        body: Vec<Statement>,
    },
    Spawn {
        delay: Option<Expression>,
        body: Vec<Statement>,
    },
    TryCatch {
        try_body: Vec<Statement>,
        catch_var: Option<BoundVar>,
        catch_body: Vec<Statement>,
    },
    Throw(Expression),
    Del(Expression),
    Set {
        attribute: String,
        value: Expression,
        /// `set src in ...` rather than `set src = ...`.
        was_in: bool,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub struct SwitchCase {
    pub values: Vec<SwitchCaseValue>,
    pub body: Vec<Statement>,
    pub location: Location,
}

#[derive(Debug, PartialEq, Clone)]
pub enum SwitchCaseValue {
    Exact(Expression),
    Range(Expression, Expression),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Expression {
    pub node: ExpressionNode,
    pub location: Location,
}

impl Expression {
    pub fn new(node: ExpressionNode, location: Location) -> Self {
        Expression { node, location }
    }
}

/// One argument at a call site. A constant-string key makes the argument
/// named, a constant-numeric key re-slots it positionally.
#[derive(Debug, PartialEq, Clone)]
pub struct Argument {
    pub key: Option<Expression>,
    pub value: Expression,
}

impl Argument {
    pub fn positional(value: Expression) -> Self {
        Argument { key: None, value }
    }
}

/// What `new` instantiates.
#[derive(Debug, PartialEq, Clone)]
pub enum NewTarget {
    /// `new /obj/machine(...)`.
    Path(TypePath),
    /// Bare `new(...)`: the declared type of the destination var.
    Inferred,
    /// `new expr(...)`: a type value computed at runtime.
    Expr(Box<Expression>),
}

/// One step of a postfix chain hanging off a base expression.
#[derive(Debug, PartialEq, Clone)]
pub enum DerefOperation {
    /// `.name`, or `?.name` when `safe`.
    Field { name: String, safe: bool },
    /// `[index]`, or `?[index]` when `safe`.
    Index { index: Box<Expression>, safe: bool },
    /// `.name(args)`, or `?.name(args)` when `safe`.
    Call {
        name: String,
        arguments: Vec<Argument>,
        safe: bool,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub struct ListItem {
    pub key: Option<Expression>,
    pub value: Expression,
}

#[derive(Debug, PartialEq, Clone)]
pub struct PickEntry {
    pub weight: Option<Expression>,
    pub value: Expression,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ExpressionNode {
    Null,
    Int(i32),
    Float(f32),
    String(String),
    /// `'sound.ogg'`.
    Resource(String),
    /// A constant path, possibly with a `proc` marker: `/datum/proc/f`.
    ConstPath(TypePath),
    /// Text with embedded interpolation markers; values in marker order.
    /// An entry may be absent for markers that interpolate nothing.
    StringFormat {
        format: String,
        interpolations: Vec<Option<Expression>>,
    },
    Identifier(String),
    /// `::name` (base absent) or `base::name`.
    ScopeIdentifier {
        base: Option<Box<Expression>>,
        name: String,
    },
    /// An unscoped call: `name(args)`. Resolved against `src`'s procs, then
    /// globals; several names are recognized as builtins.
    Call {
        name: String,
        arguments: Vec<Argument>,
    },
    /// `..(args)`. With no arguments the caller's own argument list is
    /// forwarded.
    SuperCall { arguments: Vec<Argument> },
    Dereference {
        base: Box<Expression>,
        operations: Vec<DerefOperation>,
    },
    New {
        target: NewTarget,
        arguments: Option<Vec<Argument>>,
    },
    List { items: Vec<ListItem> },
    /// `pick(30;x, 70;y)` or unweighted `pick(a, b, c)`.
    Pick { entries: Vec<PickEntry> },
    BinaryOp {
        op: BinaryOperator,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Ternary {
        condition: Box<Expression>,
        if_true: Box<Expression>,
        if_false: Box<Expression>,
    },
    Assign {
        op: AssignOperator,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Increment { target: Box<Expression>, prefix: bool },
    Decrement { target: Box<Expression>, prefix: bool },
    /// `value in start to end`.
    InRange {
        value: Box<Expression>,
        start: Box<Expression>,
        end: Box<Expression>,
    },
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    ModulusModulus,
    Power,
    BitAnd,
    BitOr,
    BitXor,
    LeftShift,
    RightShift,
    And,
    Or,
    Equal,
    NotEqual,
    Equivalent,
    NotEquivalent,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    In,
}

impl Display for BinaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulus => "%",
            Self::ModulusModulus => "%%",
            Self::Power => "**",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::LeftShift => "<<",
            Self::RightShift => ">>",
            Self::And => "&&",
            Self::Or => "||",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Equivalent => "~=",
            Self::NotEquivalent => "~!",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::In => "in",
        };
        write!(f, "{symbol}")
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum UnaryOperator {
    Negate,
    Not,
    BitNot,
}

impl Display for UnaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::Negate => "-",
            Self::Not => "!",
            Self::BitNot => "~",
        };
        write!(f, "{symbol}")
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum AssignOperator {
    Assign,
    /// `:=`, assignment that evaluates to the assigned-into location.
    AssignInto,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    ModulusModulus,
    BitAnd,
    BitOr,
    BitXor,
    LeftShift,
    RightShift,
    LogicalAnd,
    LogicalOr,
}

impl Display for AssignOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::Assign => "=",
            Self::AssignInto => ":=",
            Self::Add => "+=",
            Self::Subtract => "-=",
            Self::Multiply => "*=",
            Self::Divide => "/=",
            Self::Modulus => "%=",
            Self::ModulusModulus => "%%=",
            Self::BitAnd => "&=",
            Self::BitOr => "|=",
            Self::BitXor => "^=",
            Self::LeftShift => "<<=",
            Self::RightShift => ">>=",
            Self::LogicalAnd => "&&=",
            Self::LogicalOr => "||=",
        };
        write!(f, "{symbol}")
    }
}
