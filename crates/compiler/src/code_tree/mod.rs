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

//! Fixpoint resolution. Declarations register as deferred nodes in any
//! order; [`CodeTree::resolve_all`] sweeps them repeatedly, letting each
//! node either settle into the object tree or report why it cannot yet.
//! A pass that resolves nothing new means the remainder never will, and
//! each stuck node becomes a diagnostic.

use dreamc_common::{GlobalId, Location, TypeId, TypePath};

use crate::ast::{Expression, Parameter, ProcDecl, Statement, TypeDecl, VarDecl, VarOverride};
use crate::diagnostics::Diagnostics;
use crate::expr::Expr;
use crate::objtree::ObjectTree;

mod procs;
mod vars;

pub use procs::{ProcNode, TypeNode};
pub use vars::{VarNode, VarOverrideNode};

/// The outcome of one resolution attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Done, or failed in a way retrying cannot fix; the node is spent
    /// either way.
    Resolved,
    /// Missing a prerequisite another node may still provide.
    Pending,
}

/// A proc whose signature has settled but whose body still needs lowering.
/// Bodies compile only after every name in the program exists.
pub struct PendingProc {
    pub id: dreamc_common::ProcId,
    pub owner: TypeId,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Statement>,
}

/// A global slot whose initializer did not fold; evaluated by the world
/// initializer proc in declaration order.
pub struct GlobalInit {
    pub slot: GlobalId,
    pub value: Expr,
    pub location: Location,
}

/// Everything a node may touch while resolving.
pub struct ResolveCtx<'a> {
    pub tree: &'a mut ObjectTree,
    pub diagnostics: &'a mut Diagnostics,
    pub pending_procs: &'a mut Vec<PendingProc>,
    pub global_init: &'a mut Vec<GlobalInit>,
    /// The scope operator stays off for the opening passes, so `::` cannot
    /// observe a half-built tree.
    pub scope_operator: bool,
}

pub enum Node {
    Type(TypeNode),
    Var(VarNode),
    VarOverride(VarOverrideNode),
    Proc(ProcNode),
}

struct NodeEntry {
    resolved: bool,
    /// Declared by the standard module rather than user code; relaxes the
    /// reserved-name rules.
    std: bool,
    node: Node,
}

pub struct CodeTree {
    nodes: Vec<NodeEntry>,
    in_std: bool,
}

impl Default for CodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeTree {
    pub fn new() -> Self {
        CodeTree {
            nodes: Vec::new(),
            in_std: true,
        }
    }

    /// Everything registered after this call counts as user code.
    pub fn finish_std(&mut self) {
        self.in_std = false;
    }

    fn push(&mut self, node: Node) {
        self.nodes.push(NodeEntry {
            resolved: false,
            std: self.in_std,
            node,
        });
    }

    pub fn add_type(&mut self, decl: TypeDecl) {
        self.push(Node::Type(TypeNode::new(decl.path, None, decl.location)));
    }

    pub fn add_parent_override(&mut self, owner: TypePath, value: Expression, location: Location) {
        self.push(Node::Type(TypeNode::new(owner, Some(value), location)));
    }

    pub fn add_var(&mut self, decl: VarDecl) {
        self.push(Node::Var(VarNode::new(decl)));
    }

    pub fn add_var_override(&mut self, decl: VarOverride) {
        self.push(Node::VarOverride(VarOverrideNode::new(decl)));
    }

    pub fn add_proc(&mut self, decl: ProcDecl) {
        self.push(Node::Proc(ProcNode::new(decl)));
    }

    pub fn unresolved_count(&self) -> usize {
        self.nodes.iter().filter(|entry| !entry.resolved).count()
    }

    /// Run passes until a fixpoint. The scope operator is held off until
    /// the tree stops changing without it, then passes continue with it
    /// enabled; this keeps `::` from binding against types and initial
    /// values that later declarations would have changed.
    pub fn resolve_all(
        &mut self,
        tree: &mut ObjectTree,
        diagnostics: &mut Diagnostics,
        pending_procs: &mut Vec<PendingProc>,
        global_init: &mut Vec<GlobalInit>,
    ) {
        for entry in &self.nodes {
            if let Node::Type(node) = &entry.node {
                node.prepare(tree);
            }
        }
        let mut scope_operator = false;
        let mut pass = 0u32;
        loop {
            pass += 1;
            let progressed = self.pass(tree, diagnostics, pending_procs, global_init, scope_operator);
            tracing::debug!(
                pass,
                scope_operator,
                waiting = self.unresolved_count(),
                "resolution pass"
            );
            if progressed {
                continue;
            }
            if !scope_operator {
                scope_operator = true;
                continue;
            }
            break;
        }
        self.report_stuck(diagnostics);
    }

    /// One sweep over the unresolved nodes. Constructors go first so that
    /// `New` is always the earliest definition of its name on a type.
    fn pass(
        &mut self,
        tree: &mut ObjectTree,
        diagnostics: &mut Diagnostics,
        pending_procs: &mut Vec<PendingProc>,
        global_init: &mut Vec<GlobalInit>,
        scope_operator: bool,
    ) -> bool {
        let mut ctx = ResolveCtx {
            tree,
            diagnostics,
            pending_procs,
            global_init,
            scope_operator,
        };
        let mut progressed = false;
        for constructors_only in [true, false] {
            for entry in &mut self.nodes {
                if entry.resolved {
                    continue;
                }
                let is_constructor = matches!(
                    &entry.node,
                    Node::Proc(node) if node.is_constructor()
                );
                if is_constructor != constructors_only {
                    continue;
                }
                let resolution = match &mut entry.node {
                    Node::Type(node) => node.resolve(&mut ctx),
                    Node::Var(node) => node.resolve(&mut ctx, entry.std),
                    Node::VarOverride(node) => node.resolve(&mut ctx),
                    Node::Proc(node) => node.resolve(&mut ctx),
                };
                if resolution == Resolution::Resolved {
                    entry.resolved = true;
                    progressed = true;
                }
            }
        }
        progressed
    }

    fn report_stuck(&self, diagnostics: &mut Diagnostics) {
        for entry in &self.nodes {
            if entry.resolved {
                continue;
            }
            match &entry.node {
                Node::Type(node) => node.report(diagnostics),
                Node::Var(node) => node.report(diagnostics),
                Node::VarOverride(node) => node.report(diagnostics),
                Node::Proc(node) => node.report(diagnostics),
            }
        }
    }
}
