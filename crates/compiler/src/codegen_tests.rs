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

//! End-to-end compiles of small hand-built modules, checking the object
//! tree, the lowered bytecode, and the serialized artifact.

use pretty_assertions::assert_eq;
use test_case::test_case;

use dreamc_common::program::{Opcode, Reference};
use dreamc_common::{FileId, Location, TypePath, ValType};

use crate::ast::{
    AssignOperator, BinaryOperator, Declaration, Expression, ExpressionNode, Module, Parameter,
    ProcDecl, Statement, StatementNode, TypeDecl, VarDecl, VarModifiers, VarOverride,
};
use crate::diagnostics::{Diagnostic, WarningCode};
use crate::expr::Constant;
use crate::proc::{Instr, Operand};
use crate::{CompileOptions, Compiler, compile};

fn loc(line: u32) -> Location {
    Location::new(FileId(0), line, 1)
}

fn node(node: ExpressionNode, line: u32) -> Expression {
    Expression::new(node, loc(line))
}

fn int(value: i32, line: u32) -> Expression {
    node(ExpressionNode::Int(value), line)
}

fn ident(name: &str, line: u32) -> Expression {
    node(ExpressionNode::Identifier(name.to_string()), line)
}

fn binary(op: BinaryOperator, lhs: Expression, rhs: Expression, line: u32) -> Expression {
    node(
        ExpressionNode::BinaryOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        line,
    )
}

fn assign(op: AssignOperator, lhs: Expression, rhs: Expression, line: u32) -> Statement {
    Statement::new(
        StatementNode::Expr(node(
            ExpressionNode::Assign {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            line,
        )),
        loc(line),
    )
}

fn module(declarations: Vec<Declaration>) -> Module {
    Module {
        files: vec!["test.dm".to_string()],
        declarations,
    }
}

fn type_decl(path: &str, line: u32) -> Declaration {
    Declaration::Type(TypeDecl {
        path: TypePath::from(path),
        location: loc(line),
    })
}

fn var(owner: &str, name: &str, value: Option<Expression>, line: u32) -> Declaration {
    Declaration::Var(VarDecl {
        owner: TypePath::from(owner),
        name: name.to_string(),
        modifiers: VarModifiers::default(),
        decl_type: None,
        val_type: ValType::ANYTHING,
        value,
        location: loc(line),
    })
}

fn static_var(owner: &str, name: &str, value: Option<Expression>, line: u32) -> Declaration {
    Declaration::Var(VarDecl {
        owner: TypePath::from(owner),
        name: name.to_string(),
        modifiers: VarModifiers {
            is_static: true,
            ..Default::default()
        },
        decl_type: None,
        val_type: ValType::ANYTHING,
        value,
        location: loc(line),
    })
}

fn var_override(owner: &str, name: &str, value: Expression, line: u32) -> Declaration {
    Declaration::VarOverride(VarOverride {
        owner: TypePath::from(owner),
        name: name.to_string(),
        value,
        location: loc(line),
    })
}

fn proc_decl(
    owner: &str,
    name: &str,
    parameters: Vec<Parameter>,
    body: Vec<Statement>,
    line: u32,
) -> Declaration {
    Declaration::Proc(ProcDecl {
        owner: TypePath::from(owner),
        name: name.to_string(),
        is_verb: false,
        is_override: false,
        parameters,
        body,
        location: loc(line),
    })
}

fn param(name: &str, default: Option<Expression>, line: u32) -> Parameter {
    Parameter {
        name: name.to_string(),
        param_type: None,
        val_type: ValType::ANYTHING,
        default,
        location: loc(line),
    }
}

/// Run a full compile but keep the session open for inspection.
fn session(module: &Module) -> Compiler {
    let mut compiler = Compiler::new(CompileOptions::default());
    compiler.finish_std();
    compiler.register(module);
    compiler.resolve();
    compiler.compile_procs().expect("proc compilation failed");
    compiler
}

fn opcodes(instructions: &[Instr]) -> Vec<Opcode> {
    instructions.iter().map(|instr| instr.op).collect()
}

fn assert_clean(compiler: &Compiler) {
    assert_eq!(compiler.diagnostics().emitted(), Vec::<Diagnostic>::new());
}

#[test_case(BinaryOperator::Add, 30.0 ; "add")]
#[test_case(BinaryOperator::Subtract, 10.0 ; "subtract")]
#[test_case(BinaryOperator::Multiply, 200.0 ; "multiply")]
#[test_case(BinaryOperator::Divide, 2.0 ; "divide")]
fn var_initializers_fold(op: BinaryOperator, expected: f32) {
    let module = module(vec![var(
        "/mob",
        "health",
        Some(binary(op, int(20, 1), int(10, 1), 1)),
        1,
    )]);
    let compiler = session(&module);
    assert_clean(&compiler);

    let mob = compiler
        .tree
        .type_by_path(&TypePath::from("/mob"))
        .expect("/mob not created");
    assert_eq!(
        compiler.tree.initial_value(mob, "health"),
        Some(&Constant::Number(expected))
    );
}

#[test]
fn folded_whole_numbers_serialize_as_integers() {
    let module = module(vec![var("/mob", "health", Some(int(100, 1)), 1)]);
    let compilation = compile(&module, CompileOptions::default()).unwrap();
    assert!(compilation.success());

    let types = compilation.artifact.types.unwrap();
    let mob = types.iter().find(|ty| ty.path == "/mob").unwrap();
    let variables = mob.variables.as_ref().unwrap();
    assert_eq!(variables["health"], serde_json::json!(100));
}

#[test]
fn proc_body_lowers_field_access_to_src_references() {
    // health is an instance var, so inside the proc it reads and writes
    // through src.
    let module = module(vec![
        var("/mob", "health", Some(int(100, 1)), 1),
        proc_decl(
            "/mob",
            "Heal",
            vec![param("amount", None, 2)],
            vec![
                assign(AssignOperator::Add, ident("health", 3), ident("amount", 3), 3),
                Statement::new(StatementNode::Return(Some(ident("health", 4))), loc(4)),
            ],
            2,
        ),
    ]);
    let mut compiler = session(&module);
    assert_clean(&compiler);

    let health = compiler.tree.strings.intern("health");
    let mob = compiler.tree.type_by_path(&TypePath::from("/mob")).unwrap();
    let heal = compiler.tree.lookup_proc(mob, "Heal").unwrap();
    let proc = compiler.tree.proc(heal);
    assert_eq!(proc.parameters().len(), 1);
    assert_eq!(proc.parameters()[0].name, "amount");

    assert!(proc.instructions().iter().any(|instr| {
        instr.op == Opcode::Append
            && instr.operands == vec![Operand::Reference(Reference::SrcField(health))]
    }));
    // The explicit return, then the implicit default-value return.
    let ops = opcodes(proc.instructions());
    assert_eq!(
        &ops[ops.len() - 2..],
        &[Opcode::PushReferenceValue, Opcode::Return]
    );
    assert_eq!(ops.iter().filter(|op| **op == Opcode::Return).count(), 2);
    assert_eq!(
        proc.instructions()[proc.instructions().len() - 2].operands,
        vec![Operand::Reference(Reference::SelfProc)]
    );
}

#[test]
fn parameter_defaults_fill_in_null_arguments() {
    let module = module(vec![proc_decl(
        "/mob",
        "Boost",
        vec![param("amount", Some(int(5, 1)), 1)],
        vec![],
        1,
    )]);
    let compiler = session(&module);

    let mob = compiler.tree.type_by_path(&TypePath::from("/mob")).unwrap();
    let boost = compiler.tree.lookup_proc(mob, "Boost").unwrap();
    let ops = opcodes(compiler.tree.proc(boost).instructions());
    assert_eq!(
        &ops[..5],
        &[
            Opcode::PushReferenceValue,
            Opcode::IsNull,
            Opcode::JumpIfFalse,
            Opcode::PushFloat,
            Opcode::PopReference,
        ]
    );
}

#[test]
fn continue_jumps_to_the_step_of_a_standard_for() {
    // for(i = 0; i < 10; i++) continue
    let init = assign(AssignOperator::Assign, ident("i", 3), int(0, 3), 3);
    let module = module(vec![proc_decl(
        "/mob",
        "Tick",
        vec![],
        vec![
            Statement::new(
                StatementNode::VarDeclare {
                    name: "i".to_string(),
                    var_type: None,
                    val_type: ValType::ANYTHING,
                    value: None,
                    is_static: false,
                    is_const: false,
                },
                loc(2),
            ),
            Statement::new(
                StatementNode::ForStandard {
                    init: Some(Box::new(init)),
                    condition: Some(binary(BinaryOperator::Less, ident("i", 3), int(10, 3), 3)),
                    step: Some(node(
                        ExpressionNode::Increment {
                            target: Box::new(ident("i", 3)),
                            prefix: false,
                        },
                        3,
                    )),
                    body: vec![Statement::new(StatementNode::Continue(None), loc(4))],
                },
                loc(3),
            ),
        ],
        1,
    )]);
    let compiler = session(&module);
    assert_clean(&compiler);

    let mob = compiler.tree.type_by_path(&TypePath::from("/mob")).unwrap();
    let tick = compiler.tree.lookup_proc(mob, "Tick").unwrap();
    let proc = compiler.tree.proc(tick);

    // The continue jump lands on the label placed just before the step.
    let continue_jump = proc.instructions().iter().position(|instr| {
        instr.op == Opcode::Jump
            && matches!(
                instr.operands.first(),
                Some(Operand::Label(label)) if label.ends_with("_continue")
            )
    });
    let step = proc
        .instructions()
        .iter()
        .position(|instr| instr.op == Opcode::Increment);
    assert!(continue_jump.is_some());
    assert!(step.is_some());
    assert!(continue_jump.unwrap() < step.unwrap());

    // Every symbolic label resolves when the body serializes.
    assert!(proc.to_json().is_ok());
}

#[test]
fn parent_type_cycle_terminates_with_diagnostics() {
    let module = module(vec![
        type_decl("/a", 1),
        type_decl("/b", 2),
        var_override(
            "/a",
            "parent_type",
            node(ExpressionNode::ConstPath(TypePath::from("/b")), 3),
            3,
        ),
        var_override(
            "/b",
            "parent_type",
            node(ExpressionNode::ConstPath(TypePath::from("/a")), 4),
            4,
        ),
    ]);
    let compilation = compile(&module, CompileOptions::default()).unwrap();
    assert!(!compilation.success());
    let stuck = compilation
        .diagnostics
        .iter()
        .filter(|diagnostic| diagnostic.code == WarningCode::ItemDoesntExist)
        .count();
    assert_eq!(stuck, 2);
}

#[test]
fn self_parenting_is_rejected_outright() {
    let module = module(vec![var_override(
        "/a",
        "parent_type",
        node(ExpressionNode::ConstPath(TypePath::from("/a")), 1),
        1,
    )]);
    let compilation = compile(&module, CompileOptions::default()).unwrap();
    assert!(!compilation.success());
    assert!(
        compilation
            .diagnostics
            .iter()
            .any(|diagnostic| diagnostic.code == WarningCode::InvalidOverride)
    );
}

#[test]
fn var_overrides_win_over_the_inherited_initial() {
    let module = module(vec![
        var("/mob", "health", Some(int(100, 1)), 1),
        var_override("/mob/combat", "health", int(50, 2), 2),
    ]);
    let compiler = session(&module);
    assert_clean(&compiler);

    let mob = compiler.tree.type_by_path(&TypePath::from("/mob")).unwrap();
    let combat = compiler
        .tree
        .type_by_path(&TypePath::from("/mob/combat"))
        .unwrap();
    assert_eq!(
        compiler.tree.initial_value(mob, "health"),
        Some(&Constant::Number(100.0))
    );
    assert_eq!(
        compiler.tree.initial_value(combat, "health"),
        Some(&Constant::Number(50.0))
    );
}

#[test]
fn duplicate_instance_vars_warn() {
    let module = module(vec![
        var("/mob", "health", Some(int(100, 1)), 1),
        var("/mob", "health", Some(int(50, 2)), 2),
    ]);
    let compilation = compile(&module, CompileOptions::default()).unwrap();
    assert!(
        compilation
            .diagnostics
            .iter()
            .any(|diagnostic| diagnostic.code == WarningCode::DuplicateVariable)
    );
}

#[test]
fn globals_resolve_out_of_declaration_order() {
    // b references a before a is declared; the fixpoint sorts it out, and
    // the non-constant initializer lands in the world initializer.
    let module = Module {
        files: vec!["test.dm".to_string()],
        declarations: vec![
            Declaration::Var(VarDecl {
                owner: TypePath::root(),
                name: "b".to_string(),
                modifiers: VarModifiers::default(),
                decl_type: None,
                val_type: ValType::ANYTHING,
                value: Some(binary(BinaryOperator::Add, ident("a", 1), int(1, 1), 1)),
                location: loc(1),
            }),
            Declaration::Var(VarDecl {
                owner: TypePath::root(),
                name: "a".to_string(),
                modifiers: VarModifiers::default(),
                decl_type: None,
                val_type: ValType::ANYTHING,
                value: Some(int(2, 2)),
                location: loc(2),
            }),
        ],
    };
    let compilation = compile(&module, CompileOptions::default()).unwrap();
    assert!(compilation.success());
    assert_eq!(compilation.diagnostics, Vec::<Diagnostic>::new());

    // Slots go out in first-attempt order, so b keeps slot 0.
    let globals = compilation.artifact.globals.unwrap();
    assert_eq!(globals.names, vec!["b".to_string(), "a".to_string()]);
    assert_eq!(globals.globals.get(&1), Some(&serde_json::json!(2)));
    assert_eq!(globals.globals.get(&0), None);
    assert!(compilation.artifact.global_init_proc.is_some());
}

#[test]
fn scope_operator_reads_folded_initials() {
    let module = module(vec![
        var("/mob", "max_health", Some(int(100, 1)), 1),
        Declaration::Var(VarDecl {
            owner: TypePath::root(),
            name: "cap".to_string(),
            modifiers: VarModifiers::default(),
            decl_type: None,
            val_type: ValType::ANYTHING,
            value: Some(node(
                ExpressionNode::ScopeIdentifier {
                    base: Some(Box::new(node(
                        ExpressionNode::ConstPath(TypePath::from("/mob")),
                        2,
                    ))),
                    name: "max_health".to_string(),
                },
                2,
            )),
            location: loc(2),
        }),
    ]);
    let compiler = session(&module);
    assert_clean(&compiler);

    let root = crate::objtree::ObjectTree::ROOT;
    let slot = compiler.tree.global_slot(root, "cap").unwrap();
    assert_eq!(
        compiler.tree.global(slot).value,
        Some(Constant::Number(100.0))
    );
}

#[test]
fn unknown_names_report_after_the_fixpoint() {
    let module = module(vec![var("/mob", "health", Some(ident("missing", 1)), 1)]);
    let compilation = compile(&module, CompileOptions::default()).unwrap();
    assert!(!compilation.success());
    assert!(compilation.diagnostics.iter().any(|diagnostic| {
        diagnostic.code == WarningCode::ItemDoesntExist && diagnostic.message.contains("missing")
    }));
}

#[test]
fn proc_statics_live_in_qualified_global_slots() {
    let body = vec![
        Statement::new(
            StatementNode::VarDeclare {
                name: "count".to_string(),
                var_type: None,
                val_type: ValType::ANYTHING,
                value: Some(int(0, 2)),
                is_static: true,
                is_const: false,
            },
            loc(2),
        ),
        Statement::new(
            StatementNode::Expr(node(
                ExpressionNode::Increment {
                    target: Box::new(ident("count", 3)),
                    prefix: false,
                },
                3,
            )),
            loc(3),
        ),
    ];
    let module = module(vec![proc_decl("/mob", "Bump", vec![], body, 1)]);
    let compiler = session(&module);
    assert_clean(&compiler);

    let global = compiler
        .tree
        .globals()
        .find(|global| global.name == "/mob/Bump.count")
        .expect("no qualified slot for the static");
    assert_eq!(global.value, Some(Constant::Number(0.0)));

    let mob = compiler.tree.type_by_path(&TypePath::from("/mob")).unwrap();
    let bump = compiler.tree.lookup_proc(mob, "Bump").unwrap();
    assert!(compiler.tree.proc(bump).instructions().iter().any(|instr| {
        instr.op == Opcode::Increment
            && matches!(
                instr.operands.first(),
                Some(Operand::Reference(Reference::Global(_)))
            )
    }));
}

#[test]
fn same_named_statics_in_same_named_procs_stay_distinct() {
    let body = |line| {
        vec![Statement::new(
            StatementNode::VarDeclare {
                name: "count".to_string(),
                var_type: None,
                val_type: ValType::ANYTHING,
                value: Some(int(0, line)),
                is_static: true,
                is_const: false,
            },
            loc(line),
        )]
    };
    let module = module(vec![
        proc_decl("/mob", "Bump", vec![], body(2), 1),
        proc_decl("/obj", "Bump", vec![], body(4), 3),
    ]);
    let compiler = session(&module);
    assert_clean(&compiler);

    let names: Vec<&str> = compiler
        .tree
        .globals()
        .map(|global| global.name.as_str())
        .collect();
    assert!(names.contains(&"/mob/Bump.count"));
    assert!(names.contains(&"/obj/Bump.count"));
}

#[test]
fn static_slots_are_deterministic_across_sessions() {
    let build = || {
        module(vec![
            static_var("/obj/a", "counter", Some(int(0, 1)), 1),
            static_var("/obj/b", "counter", Some(int(0, 2)), 2),
        ])
    };
    let first = session(&build());
    let second = session(&build());

    let slots = |compiler: &Compiler| {
        let a = compiler
            .tree
            .type_by_path(&TypePath::from("/obj/a"))
            .unwrap();
        let b = compiler
            .tree
            .type_by_path(&TypePath::from("/obj/b"))
            .unwrap();
        (
            compiler.tree.global_slot(a, "counter").unwrap(),
            compiler.tree.global_slot(b, "counter").unwrap(),
        )
    };
    let (a1, b1) = slots(&first);
    let (a2, b2) = slots(&second);
    assert_ne!(a1, b1);
    assert_eq!((a1, b1), (a2, b2));
}

#[test]
fn background_loops_need_a_global_sleep_proc() {
    let body = vec![
        Statement::new(
            StatementNode::Set {
                attribute: "background".to_string(),
                value: int(1, 2),
                was_in: false,
            },
            loc(2),
        ),
        Statement::new(
            StatementNode::While {
                condition: int(1, 3),
                body: vec![assign(
                    AssignOperator::Assign,
                    ident("x", 4),
                    int(1, 4),
                    4,
                )],
            },
            loc(3),
        ),
    ];
    let module = module(vec![
        var("/mob", "x", None, 1),
        proc_decl("/mob", "Tick", vec![], body, 1),
    ]);
    // No standard module, so no global sleep proc to yield through.
    let compilation = compile(&module, CompileOptions::default()).unwrap();
    assert!(!compilation.success());
    assert!(compilation.diagnostics.iter().any(|diagnostic| {
        diagnostic.code == WarningCode::ItemDoesntExist && diagnostic.message.contains("sleep")
    }));
}

#[test]
fn verb_set_statements_configure_the_artifact_entry() {
    let body = vec![
        Statement::new(
            StatementNode::Set {
                attribute: "name".to_string(),
                value: node(ExpressionNode::String("wave hello".to_string()), 2),
                was_in: false,
            },
            loc(2),
        ),
        Statement::new(
            StatementNode::Set {
                attribute: "desc".to_string(),
                value: node(ExpressionNode::String("Waves.".to_string()), 3),
                was_in: false,
            },
            loc(3),
        ),
    ];
    let module = module(vec![Declaration::Proc(ProcDecl {
        owner: TypePath::from("/mob"),
        name: "wave".to_string(),
        is_verb: true,
        is_override: false,
        parameters: vec![],
        body,
        location: loc(1),
    })]);
    let compiler = session(&module);
    assert_clean(&compiler);

    let mob = compiler.tree.type_by_path(&TypePath::from("/mob")).unwrap();
    let wave = compiler.tree.lookup_proc(mob, "wave").unwrap();
    let proc = compiler.tree.proc(wave);
    assert!(proc.is_verb);
    assert_eq!(proc.verb_name.as_deref(), Some("wave hello"));
    assert_eq!(proc.verb_desc.as_deref(), Some("Waves."));
    assert!(compiler.tree.get(mob).verbs.contains(&wave));
}

#[test]
fn non_constant_field_initializers_become_an_init_proc() {
    // strength depends on a global, so the assignment cannot fold and moves
    // to the type's synthesized init proc.
    let module = module(vec![
        Declaration::Var(VarDecl {
            owner: TypePath::root(),
            name: "spawn_count".to_string(),
            modifiers: VarModifiers::default(),
            decl_type: None,
            val_type: ValType::ANYTHING,
            value: Some(int(3, 1)),
            location: loc(1),
        }),
        var(
            "/mob",
            "strength",
            Some(binary(
                BinaryOperator::Multiply,
                ident("spawn_count", 2),
                int(2, 2),
                2,
            )),
            2,
        ),
    ]);
    let compilation = compile(&module, CompileOptions::default()).unwrap();
    assert!(compilation.success());

    let types = compilation.artifact.types.unwrap();
    let mob = types.iter().find(|ty| ty.path == "/mob").unwrap();
    assert!(mob.init_proc.is_some());
}
