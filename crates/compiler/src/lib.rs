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

//! Compiles parsed modules into a bytecode artifact. Declarations may
//! arrive in any order and reference each other freely; the compiler
//! resolves them to a fixpoint, lowers proc bodies to stack bytecode, and
//! serializes the result as JSON.
//!
//! The usual entry points are [`compile`] and [`compile_with_std`]. The
//! [`Compiler`] session type underneath them is public for callers that
//! want to register modules incrementally or inspect the object tree.

pub mod ast;
pub mod builders;
pub mod code_tree;
pub mod diagnostics;
pub mod expr;
pub mod objtree;
pub mod proc;

#[cfg(test)]
mod codegen_tests;

use ahash::AHashMap;
use indexmap::IndexMap;
use serde_json::Value;

use dreamc_common::program::{
    CallArgsType, CompiledJson, GlobalListJson, MetadataJson, ProcDefinitionJson, Reference,
    TypeJson,
};
use dreamc_common::{FileId, Location, ProcId, StringId};

use crate::ast::Module;
use crate::builders::ProcBuilder;
use crate::builders::tree::register_module;
use crate::code_tree::{CodeTree, GlobalInit, PendingProc};
use crate::diagnostics::{CompileError, Diagnostic, Diagnostics, ErrorLevel, WarningCode};
use crate::expr::EmitCtx;
use crate::objtree::ObjectTree;
use crate::proc::Proc;

#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Emit notice-level diagnostics instead of suppressing them.
    pub emit_notices: bool,
    /// Drop the warnings about vars and procs the runtime does not
    /// implement yet. They are emitted unless suppressed.
    pub suppress_unimplemented: bool,
    /// Per-code severity overrides. Pinned error codes ignore these.
    pub warning_overrides: Vec<(WarningCode, ErrorLevel)>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            emit_notices: false,
            suppress_unimplemented: false,
            warning_overrides: Vec::new(),
        }
    }
}

/// The outcome of a compile: the artifact and everything reported along
/// the way. An artifact accompanied by error diagnostics is not runnable;
/// it is returned anyway so tooling can inspect how far things got.
pub struct Compilation {
    pub artifact: CompiledJson,
    pub diagnostics: Vec<Diagnostic>,
}

impl Compilation {
    pub fn success(&self) -> bool {
        !self
            .diagnostics
            .iter()
            .any(|diagnostic| diagnostic.level == ErrorLevel::Error)
    }
}

/// Compile one module with no standard declarations underneath it.
pub fn compile(module: &Module, options: CompileOptions) -> Result<Compilation, CompileError> {
    let mut compiler = Compiler::new(options);
    compiler.finish_std();
    compiler.register(module);
    compiler.resolve();
    compiler.compile_procs()?;
    Ok(compiler.finish())
}

/// Compile a user module on top of a standard module. The standard module
/// is exempt from the reserved-name rules, so it can declare the built-in
/// vars user code may only reference.
pub fn compile_with_std(
    std: &Module,
    module: &Module,
    options: CompileOptions,
) -> Result<Compilation, CompileError> {
    let mut compiler = Compiler::new(options);
    compiler.register(std);
    compiler.finish_std();
    compiler.register(module);
    compiler.resolve();
    compiler.compile_procs()?;
    Ok(compiler.finish())
}

/// One compile session. Modules registered into the same session share a
/// file-id space: `Module::files[i]` names `FileId(i)`.
pub struct Compiler {
    pub tree: ObjectTree,
    code_tree: CodeTree,
    diagnostics: Diagnostics,
    files: AHashMap<FileId, StringId>,
    pending_procs: Vec<PendingProc>,
    global_init: Vec<GlobalInit>,
    /// Synthesized last; serialized as its own artifact section rather than
    /// as an entry in the proc table.
    global_init_proc: Option<Proc>,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        let mut diagnostics =
            Diagnostics::new(options.emit_notices, !options.suppress_unimplemented);
        for (code, level) in &options.warning_overrides {
            diagnostics.set_level(*code, *level);
        }
        Compiler {
            tree: ObjectTree::new(),
            code_tree: CodeTree::new(),
            diagnostics,
            files: AHashMap::new(),
            pending_procs: Vec::new(),
            global_init: Vec::new(),
            global_init_proc: None,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Modules registered before this call count as standard declarations.
    pub fn finish_std(&mut self) {
        self.code_tree.finish_std();
    }

    pub fn register(&mut self, module: &Module) {
        for (index, file) in module.files.iter().enumerate() {
            let id = self.tree.strings.intern(file);
            self.files.insert(FileId(index as u16), id);
        }
        register_module(&mut self.code_tree, &mut self.diagnostics, module);
    }

    /// Resolve every registered declaration to a fixpoint. Nodes that can
    /// never settle become diagnostics here.
    pub fn resolve(&mut self) {
        self.code_tree.resolve_all(
            &mut self.tree,
            &mut self.diagnostics,
            &mut self.pending_procs,
            &mut self.global_init,
        );
    }

    /// Lower every resolved proc body, then synthesize the per-type init
    /// procs and the world initializer. Only runs usefully after
    /// [`resolve`](Self::resolve).
    pub fn compile_procs(&mut self) -> Result<(), CompileError> {
        let pending = std::mem::take(&mut self.pending_procs);
        tracing::debug!(procs = pending.len(), "compiling proc bodies");
        for PendingProc {
            id,
            owner,
            parameters,
            body,
        } in pending
        {
            let proc = self.tree.take_proc(id);
            let builder = ProcBuilder::new(
                &mut self.tree,
                &mut self.diagnostics,
                &mut self.global_init,
                &self.files,
                owner,
                proc,
            );
            let proc = builder.build(&parameters, &body)?;
            self.tree.put_proc(id, proc);
        }
        self.build_init_procs()?;
        self.build_global_init_proc()?;
        Ok(())
    }

    /// Human-readable listing of every compiled proc, for debugging.
    pub fn dump_procs(&self) -> String {
        let mut out = String::new();
        for proc in self.tree.procs() {
            out.push_str(&proc.dump(&self.tree));
            out.push('\n');
        }
        if let Some(proc) = &self.global_init_proc {
            out.push_str(&proc.dump(&self.tree));
            out.push('\n');
        }
        out
    }

    /// Types with non-constant field initializers get a synthesized init
    /// proc that runs at instantiation, assigning each deferred value to
    /// `src` in declaration order.
    fn build_init_procs(&mut self) -> Result<(), CompileError> {
        for index in 0..self.tree.type_count() {
            let ty = dreamc_common::TypeId(index as u32);
            let assignments = std::mem::take(&mut self.tree.get_mut(ty).init_assignments);
            if assignments.is_empty() {
                continue;
            }
            let id = self
                .tree
                .create_detached_proc(ty, "<init>", Location::INTERNAL);
            let mut proc = self.tree.take_proc(id);
            // Ancestor initializers run first; the runtime treats a missing
            // super init as a no-op.
            proc.call(Reference::SuperProc, CallArgsType::None, 0);
            proc.pop();
            for assignment in &assignments {
                if let Some(&file) = self.files.get(&assignment.location.file) {
                    proc.debug_source(assignment.location, file);
                }
                let field = self.tree.strings.intern(&assignment.field);
                let mut ctx = EmitCtx {
                    proc: &mut proc,
                    strings: &mut self.tree.strings,
                    resources: &mut self.tree.resources,
                };
                assignment.value.emit_push(&mut ctx)?;
                proc.pop_reference(Reference::SrcField(field));
            }
            proc.push_null();
            proc.return_();
            self.tree.put_proc(id, proc);
            self.tree.get_mut(ty).init_proc = Some(id);
        }
        Ok(())
    }

    fn build_global_init_proc(&mut self) -> Result<(), CompileError> {
        if self.global_init.is_empty() {
            return Ok(());
        }
        let mut proc = Proc::new(
            ProcId(0),
            ObjectTree::ROOT,
            "<global init>",
            Location::INTERNAL,
        );
        for init in std::mem::take(&mut self.global_init) {
            if let Some(&file) = self.files.get(&init.location.file) {
                proc.debug_source(init.location, file);
            }
            let mut ctx = EmitCtx {
                proc: &mut proc,
                strings: &mut self.tree.strings,
                resources: &mut self.tree.resources,
            };
            init.value.emit_push(&mut ctx)?;
            proc.pop_reference(Reference::Global(init.slot));
        }
        proc.push_null();
        proc.return_();
        self.global_init_proc = Some(proc);
        Ok(())
    }

    /// Serialize everything into the artifact and hand back the session's
    /// diagnostics.
    pub fn finish(mut self) -> Compilation {
        let types: Vec<TypeJson> = self.tree.types().map(type_json).collect();

        let mut procs = Vec::with_capacity(self.tree.proc_count());
        let mut writer_errors = Vec::new();
        for proc in self.tree.procs() {
            match proc.to_json() {
                Ok(json) => procs.push(json),
                Err(error) => {
                    writer_errors.push((proc.location, error));
                    // Keep the slot so later proc ids stay aligned.
                    procs.push(ProcDefinitionJson {
                        owning_type_id: proc.owner,
                        name: proc.name.clone(),
                        ..Default::default()
                    });
                }
            }
        }
        for (location, error) in writer_errors {
            self.diagnostics.writer_error(location, error);
        }

        let global_init_proc = self.global_init_proc.take().and_then(|proc| {
            match proc.to_json() {
                Ok(json) => Some(json),
                Err(error) => {
                    self.diagnostics.writer_error(proc.location, error);
                    None
                }
            }
        });

        let global_procs: Vec<ProcId> = self.tree.global_procs().map(|(_, id)| id).collect();

        let globals = if self.tree.global_count() > 0 {
            let names = self
                .tree
                .globals()
                .map(|global| global.name.clone())
                .collect();
            let mut values = IndexMap::new();
            for (index, global) in self.tree.globals().enumerate() {
                if let Some(value) = &global.value {
                    values.insert(index as u32, value.to_json());
                }
            }
            Some(GlobalListJson {
                global_count: self.tree.global_count() as u32,
                names,
                globals: values,
            })
        } else {
            None
        };

        let strings = self.tree.strings.to_vec();
        let resources = self.tree.resources.to_vec();
        let artifact = CompiledJson {
            metadata: MetadataJson::current(),
            strings: (!strings.is_empty()).then_some(strings),
            resources: (!resources.is_empty()).then_some(resources),
            types: (!types.is_empty()).then_some(types),
            procs: (!procs.is_empty()).then_some(procs),
            global_procs: (!global_procs.is_empty()).then_some(global_procs),
            globals,
            global_init_proc,
        };
        Compilation {
            artifact,
            diagnostics: self.diagnostics.into_emitted(),
        }
    }
}

fn type_json(ty: &crate::objtree::ObjectType) -> TypeJson {
    let mut variables: IndexMap<String, Value> = IndexMap::new();
    for (name, decl) in &ty.vars {
        let value = decl
            .value
            .as_ref()
            .map(crate::expr::Constant::to_json)
            .unwrap_or(Value::Null);
        variables.insert(name.clone(), value);
    }
    // Overrides of inherited vars live on the overriding type.
    for (name, value) in &ty.var_overrides {
        variables.insert(name.clone(), value.to_json());
    }
    let const_variables: Vec<String> = ty
        .vars
        .iter()
        .filter(|(_, decl)| decl.is_const)
        .map(|(name, _)| name.clone())
        .collect();
    let tmp_variables: Vec<String> = ty
        .vars
        .iter()
        .filter(|(_, decl)| decl.is_tmp)
        .map(|(name, _)| name.clone())
        .collect();
    let procs: Vec<Vec<ProcId>> = ty.procs.values().cloned().collect();

    TypeJson {
        path: ty.path.to_string(),
        parent: ty.parent,
        variables: (!variables.is_empty()).then_some(variables),
        global_variables: (!ty.global_slots.is_empty()).then_some(ty.global_slots.clone()),
        const_variables: (!const_variables.is_empty()).then_some(const_variables),
        tmp_variables: (!tmp_variables.is_empty()).then_some(tmp_variables),
        init_proc: ty.init_proc,
        procs: (!procs.is_empty()).then_some(procs),
        verbs: (!ty.verbs.is_empty()).then_some(ty.verbs.clone()),
    }
}
