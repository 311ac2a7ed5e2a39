//! End-to-end lowering of protected regions.
//!
//! Verifies the emitted shapes for:
//! - begin/ensure as a value expression (clone on the normal path, verbatim
//!   replay behind the dummy handler)
//! - rescue clause chains, including the bare-clause default filter and
//!   source-order type tests
//! - returns that drain active cleanups, innermost first, exactly once
//! - retry targeting the innermost rescue and restoring its saved `$!`
//! - backtrace elision for modifier rescues
//! - determinism of the whole pipeline

use lapis_ir::{
    CallType, ExecutableUnit, Instr, Label, LowerOptions, Manager, Operand, ScopeId, Variable,
};
use lapis_lower::{lower_script, Classic};
use lapis_syntax::classic::{
    CallNode, ConstNode, DefNode, EnsureNode, GlobalWriteNode, IntNode, LocalWriteNode, Node,
    RescueClause, RescueNode, RetryNode, ReturnNode, Target,
};
use lapis_syntax::{Span, Symbol};

fn mgr() -> Manager {
    Manager::new("test.lp", LowerOptions::default())
}

fn unit(m: &Manager, id: ScopeId) -> &ExecutableUnit {
    m.scope(id).unit.as_ref().expect("scope not frozen")
}

fn t(id: u32) -> Variable {
    Variable::Temp { id }
}

fn local(name: Symbol) -> Variable {
    Variable::Local { name, depth: 0 }
}

fn int(value: i64) -> Node {
    Node::Int(IntNode {
        value,
        span: Span::dummy(),
        newline: false,
    })
}

fn constant(name: Symbol) -> Node {
    Node::Const(ConstNode {
        name,
        span: Span::dummy(),
        newline: false,
    })
}

fn local_write(name: Symbol, value: Node) -> Node {
    Node::LocalWrite(LocalWriteNode {
        name,
        depth: 0,
        value: Box::new(value),
        span: Span::dummy(),
        newline: false,
    })
}

fn global_write(name: Symbol, value: Node) -> Node {
    Node::GlobalWrite(GlobalWriteNode {
        name,
        value: Box::new(value),
        span: Span::dummy(),
        newline: false,
    })
}

fn ret(value: Option<Node>) -> Node {
    Node::Return(ReturnNode {
        value: value.map(Box::new),
        span: Span::dummy(),
        newline: false,
    })
}

fn ensure(body: Node, cleanup: Node) -> Node {
    Node::Ensure(EnsureNode {
        body: Some(Box::new(body)),
        ensure_body: Some(Box::new(cleanup)),
        span: Span::dummy(),
        newline: false,
    })
}

fn clause(
    exceptions: Vec<Node>,
    reference: Option<Target>,
    body: Node,
    subsequent: Option<RescueClause>,
) -> RescueClause {
    RescueClause {
        exceptions,
        reference,
        body: Some(Box::new(body)),
        subsequent: subsequent.map(Box::new),
        span: Span::dummy(),
    }
}

fn rescue(body: Node, clause: RescueClause, modifier: bool) -> Node {
    Node::Rescue(RescueNode {
        body: Some(Box::new(body)),
        clause,
        else_body: None,
        modifier,
        span: Span::dummy(),
        newline: false,
    })
}

fn method(name: Symbol, body: Node) -> Node {
    Node::Def(DefNode {
        name,
        params: vec![],
        body: Some(Box::new(body)),
        span: Span::dummy(),
        newline: false,
    })
}

/// Pull the method body scope out of a `[DefineMethod, Return]` root.
fn defined_method(root: &ExecutableUnit) -> ScopeId {
    match root.instrs.as_slice() {
        [Instr::DefineMethod { body, .. }, Instr::Return { .. }] => *body,
        other => panic!("unexpected root shape: {other:?}"),
    }
}

// begin; x = 1; ensure; y = 2; end
//
//     t0 = $!
//     region_start:                 ; protected by the dummy handler
//         x = 1
//     t1 = 1                        ; the expression's value, pinned
//     <clone of cleanup>            ; fresh labels, host's rescuer
//     jump end
//     dummy:
//         t2 = receive_unwind
//     start:
//         <cleanup, verbatim>
//         throw t2
//     end:
#[test]
fn test_ensure_clones_on_the_normal_path_and_replays_on_the_exceptional() {
    let mut m = mgr();
    let x = m.intern("x");
    let y = m.intern("y");
    let err_info = m.names.error_info;
    let tree = ensure(local_write(x, int(1)), local_write(y, int(2)));

    let root = lower_script::<Classic>(&mut m, Some(&tree)).unwrap();
    let u = unit(&m, root);

    assert_eq!(
        u.instrs,
        vec![
            Instr::GetGlobal {
                result: t(0),
                name: err_info,
            },
            Instr::Label { label: Label(1) },
            Instr::ExcRegionStart { handler: Label(4) },
            Instr::Copy {
                dst: local(x),
                src: Operand::Int(1),
            },
            Instr::ExcRegionEnd,
            Instr::Copy {
                dst: t(1),
                src: Operand::Int(1),
            },
            // normal path: cloned cleanup under a fresh entry label,
            // protected by whatever protects the construct (nothing here)
            Instr::Label { label: Label(5) },
            Instr::ExcRegionStart {
                handler: Label::UNRESCUED,
            },
            Instr::Copy {
                dst: local(y),
                src: Operand::Int(2),
            },
            Instr::ExcRegionEnd,
            Instr::Jump { target: Label(3) },
            // exceptional path: verbatim replay, then rethrow
            Instr::Label { label: Label(4) },
            Instr::ReceiveUnwind { result: t(2) },
            Instr::Label { label: Label(2) },
            Instr::Copy {
                dst: local(y),
                src: Operand::Int(2),
            },
            Instr::Throw {
                value: Operand::Var(t(2)),
            },
            Instr::Label { label: Label(3) },
            Instr::Return {
                value: Operand::Var(t(1)),
            },
        ]
    );
    assert_eq!(u.temp_count, 3);
}

// begin; raise; rescue TypeError; 1; rescue; 2; end
#[test]
fn test_rescue_chain_tests_types_in_source_order() {
    let mut m = mgr();
    let raise = m.intern("raise");
    let type_error = m.intern("TypeError");
    let err_info = m.names.error_info;
    let standard_error = m.standard_error();

    let body = Node::Call(CallNode {
        receiver: None,
        name: raise,
        args: vec![],
        block: None,
        span: Span::dummy(),
        newline: false,
    });
    let chain = clause(
        vec![constant(type_error)],
        None,
        int(1),
        Some(clause(vec![], None, int(2), None)),
    );
    let tree = rescue(body, chain, false);

    let root = lower_script::<Classic>(&mut m, Some(&tree)).unwrap();
    let u = unit(&m, root);

    assert_eq!(
        u.instrs,
        vec![
            Instr::GetGlobal {
                result: t(0),
                name: err_info,
            },
            Instr::Label { label: Label(1) },
            Instr::ExcRegionStart { handler: Label(4) },
            Instr::Label { label: Label(5) },
            Instr::ExcRegionStart { handler: Label(6) },
            // two clauses: no elision
            Instr::ToggleBacktrace { required: true },
            Instr::Call {
                result: t(3),
                call_type: CallType::Functional,
                name: raise,
                receiver: Operand::SelfRef,
                args: vec![],
                block: None,
            },
            Instr::ExcRegionEnd,
            Instr::Copy {
                dst: t(2),
                src: Operand::Var(t(3)),
            },
            Instr::PutGlobal {
                name: err_info,
                value: Operand::Var(t(0)),
            },
            Instr::Jump { target: Label(3) },
            // handler: clause types tested in source order
            Instr::Label { label: Label(6) },
            Instr::ReceiveException { result: t(4) },
            Instr::RescueEqq {
                result: t(5),
                test: Operand::Const(type_error),
                value: Operand::Var(t(4)),
            },
            Instr::BranchTrue {
                value: Operand::Var(t(5)),
                target: Label(8),
            },
            Instr::Label { label: Label(7) },
            Instr::RescueEqq {
                result: t(6),
                test: standard_error.clone(),
                value: Operand::Var(t(4)),
            },
            Instr::BranchTrue {
                value: Operand::Var(t(6)),
                target: Label(10),
            },
            // no clause matched: rethrow
            Instr::Label { label: Label(9) },
            Instr::Throw {
                value: Operand::Var(t(4)),
            },
            // bare clause
            Instr::Label { label: Label(10) },
            Instr::Copy {
                dst: t(2),
                src: Operand::Int(2),
            },
            Instr::PutGlobal {
                name: err_info,
                value: Operand::Var(t(0)),
            },
            Instr::Jump { target: Label(3) },
            // typed clause
            Instr::Label { label: Label(8) },
            Instr::Copy {
                dst: t(2),
                src: Operand::Int(1),
            },
            Instr::PutGlobal {
                name: err_info,
                value: Operand::Var(t(0)),
            },
            Instr::Jump { target: Label(3) },
            Instr::ExcRegionEnd,
            Instr::Label { label: Label(4) },
            Instr::ReceiveUnwind { result: t(7) },
            Instr::Throw {
                value: Operand::Var(t(7)),
            },
            Instr::Label { label: Label(3) },
            Instr::Return {
                value: Operand::Var(t(2)),
            },
        ]
    );
    assert_eq!(u.temp_count, 8);
}

// def m; begin; return 5; ensure; c = 1; end; end
#[test]
fn test_method_return_clones_cleanup_exactly_once_before_returning() {
    let mut m = mgr();
    let name = m.intern("close_all");
    let c = m.intern("c");
    let err_info = m.names.error_info;
    let tree = method(name, ensure(ret(Some(int(5))), local_write(c, int(1))));

    let root = lower_script::<Classic>(&mut m, Some(&tree)).unwrap();
    assert_eq!(
        unit(&m, root).instrs[1],
        Instr::Return {
            value: Operand::Sym(name),
        }
    );

    let body = defined_method(unit(&m, root));
    let u = unit(&m, body);
    assert_eq!(
        u.instrs,
        vec![
            Instr::GetGlobal {
                result: t(0),
                name: err_info,
            },
            Instr::Label { label: Label(1) },
            Instr::ExcRegionStart { handler: Label(4) },
            // return value pinned before the cleanup can clobber anything
            Instr::Copy {
                dst: t(2),
                src: Operand::Int(5),
            },
            Instr::Label { label: Label(5) },
            Instr::ExcRegionStart {
                handler: Label::UNRESCUED,
            },
            Instr::Copy {
                dst: local(c),
                src: Operand::Int(1),
            },
            Instr::ExcRegionEnd,
            Instr::Return {
                value: Operand::Var(t(2)),
            },
            Instr::ExcRegionEnd,
            Instr::Label { label: Label(4) },
            Instr::ReceiveUnwind { result: t(3) },
            Instr::Label { label: Label(2) },
            Instr::Copy {
                dst: local(c),
                src: Operand::Int(1),
            },
            Instr::Throw {
                value: Operand::Var(t(3)),
            },
            Instr::Label { label: Label(3) },
            // the explicit return never falls through; the implicit one
            // still closes the scope with nil
            Instr::Return {
                value: Operand::Nil,
            },
        ]
    );
    assert_eq!(u.temp_count, 4);
}

// def m
//   begin; begin; begin; return 7; ensure; $c = 3; end
//   ensure; $b = 2; end
//   ensure; $a = 1; end
// end
#[test]
fn test_nested_cleanups_drain_innermost_first_at_return() {
    let mut m = mgr();
    let name = m.intern("deep");
    let a = m.intern("$a");
    let b = m.intern("$b");
    let c = m.intern("$c");

    let tree = method(
        name,
        ensure(
            ensure(
                ensure(ret(Some(int(7))), global_write(c, int(3))),
                global_write(b, int(2)),
            ),
            global_write(a, int(1)),
        ),
    );
    let root = lower_script::<Classic>(&mut m, Some(&tree)).unwrap();
    let u = unit(&m, defined_method(unit(&m, root)));

    let ret_at = u
        .instrs
        .iter()
        .position(|i| matches!(i, Instr::Return { .. }))
        .expect("no return emitted");

    // drained clones ahead of the return, then one verbatim replay per
    // dummy handler, unwinding in the same innermost-first order
    let writes: Vec<Symbol> = u
        .instrs
        .iter()
        .filter_map(|i| match i {
            Instr::PutGlobal { name, .. } => Some(*name),
            _ => None,
        })
        .collect();
    assert_eq!(writes, vec![c, b, a, c, b, a]);

    // each pre-return clone sits in its own handler region
    for (idx, i) in u.instrs[..ret_at].iter().enumerate() {
        if matches!(i, Instr::PutGlobal { .. }) {
            assert!(matches!(u.instrs[idx - 1], Instr::ExcRegionStart { .. }));
            assert!(matches!(u.instrs[idx + 1], Instr::ExcRegionEnd));
        }
    }
}

// begin; $b = 1; rescue; begin; $c = 2; rescue; retry; end; end
#[test]
fn test_retry_restarts_only_the_innermost_rescue() {
    let mut m = mgr();
    let b = m.intern("$b");
    let c = m.intern("$c");
    let err_info = m.names.error_info;

    let inner = rescue(
        global_write(c, int(2)),
        clause(
            vec![],
            None,
            Node::Retry(RetryNode {
                span: Span::dummy(),
                newline: false,
            }),
            None,
        ),
        false,
    );
    let tree = rescue(global_write(b, int(1)), clause(vec![], None, inner, None), false);

    let root = lower_script::<Classic>(&mut m, Some(&tree)).unwrap();
    let u = unit(&m, root);

    // the inner protected body opens at label 13; retry lands there after
    // restoring the exception state the inner region saved (t5), not the
    // outer one (t0)
    assert_eq!(u.instrs[21], Instr::Label { label: Label(13) });
    assert_eq!(
        u.instrs[22],
        Instr::ExcRegionStart { handler: Label(14) }
    );
    assert_eq!(
        u.instrs[36..39],
        [
            Instr::ThreadPoll,
            Instr::PutGlobal {
                name: err_info,
                value: Operand::Var(t(5)),
            },
            Instr::Jump { target: Label(13) },
        ]
    );
    assert_eq!(
        u.instrs[9],
        Instr::PutGlobal {
            name: err_info,
            value: Operand::Var(t(0)),
        }
    );
    // a backward jump makes the scope loop-bearing
    assert!(u.flags.has_loops);
    assert_eq!(u.temp_count, 12);
}

// 1 rescue 2
#[test]
fn test_modifier_rescue_suppresses_backtrace_capture() {
    let mut m = mgr();
    let err_info = m.names.error_info;
    let standard_error = m.standard_error();
    let tree = rescue(int(1), clause(vec![], None, int(2), None), true);

    let root = lower_script::<Classic>(&mut m, Some(&tree)).unwrap();
    let u = unit(&m, root);

    assert_eq!(
        u.instrs,
        vec![
            Instr::GetGlobal {
                result: t(0),
                name: err_info,
            },
            Instr::Label { label: Label(1) },
            Instr::ExcRegionStart { handler: Label(4) },
            Instr::Label { label: Label(5) },
            Instr::ExcRegionStart { handler: Label(6) },
            // the fallback provably never looks at the exception
            Instr::ToggleBacktrace { required: false },
            Instr::ExcRegionEnd,
            Instr::Copy {
                dst: t(2),
                src: Operand::Int(1),
            },
            Instr::ToggleBacktrace { required: true },
            Instr::PutGlobal {
                name: err_info,
                value: Operand::Var(t(0)),
            },
            Instr::Jump { target: Label(3) },
            // capture comes back on before any handler code runs
            Instr::Label { label: Label(6) },
            Instr::ToggleBacktrace { required: true },
            Instr::ReceiveException { result: t(3) },
            Instr::RescueEqq {
                result: t(4),
                test: standard_error,
                value: Operand::Var(t(3)),
            },
            Instr::BranchTrue {
                value: Operand::Var(t(4)),
                target: Label(8),
            },
            Instr::Label { label: Label(7) },
            Instr::Throw {
                value: Operand::Var(t(3)),
            },
            Instr::Label { label: Label(8) },
            Instr::Copy {
                dst: t(2),
                src: Operand::Int(2),
            },
            Instr::ToggleBacktrace { required: true },
            Instr::PutGlobal {
                name: err_info,
                value: Operand::Var(t(0)),
            },
            Instr::Jump { target: Label(3) },
            Instr::ExcRegionEnd,
            Instr::Label { label: Label(4) },
            Instr::ReceiveUnwind { result: t(5) },
            Instr::Throw {
                value: Operand::Var(t(5)),
            },
            Instr::Label { label: Label(3) },
            Instr::Return {
                value: Operand::Var(t(2)),
            },
        ]
    );
    assert_eq!(u.temp_count, 6);
}

// begin; $b = 1; rescue => e; 9; end
#[test]
fn test_rescue_reference_binds_the_current_exception() {
    let mut m = mgr();
    let b = m.intern("$b");
    let e = m.intern("e");
    let err_info = m.names.error_info;

    let tree = rescue(
        global_write(b, int(1)),
        clause(
            vec![],
            Some(Target::Local { name: e, depth: 0 }),
            int(9),
            None,
        ),
        false,
    );
    let root = lower_script::<Classic>(&mut m, Some(&tree)).unwrap();
    let u = unit(&m, root);

    // binding disqualifies elision even for a bare clause
    assert_eq!(u.instrs[5], Instr::ToggleBacktrace { required: true });
    // on the caught path the reference reads `$!`, which the runtime set
    // on handler entry
    assert_eq!(
        u.instrs[17..20],
        [
            Instr::Label { label: Label(8) },
            Instr::GetGlobal {
                result: t(5),
                name: err_info,
            },
            Instr::Copy {
                dst: local(e),
                src: Operand::Var(t(5)),
            },
        ]
    );
}

#[test]
fn test_lowering_is_deterministic() {
    let run = || {
        let mut m = mgr();
        let raise = m.intern("raise");
        let type_error = m.intern("TypeError");
        let body = Node::Call(CallNode {
            receiver: None,
            name: raise,
            args: vec![],
            block: None,
            span: Span::dummy(),
            newline: false,
        });
        let chain = clause(
            vec![constant(type_error)],
            None,
            int(1),
            Some(clause(vec![], None, int(2), None)),
        );
        let tree = ensure(rescue(body, chain, false), global_write(m.intern("$log"), int(0)));
        let root = lower_script::<Classic>(&mut m, Some(&tree)).unwrap();
        (m, root)
    };

    let (m1, r1) = run();
    let (m2, r2) = run();
    assert_eq!(unit(&m1, r1).instrs, unit(&m2, r2).instrs);
    assert_eq!(unit(&m1, r1).temp_count, unit(&m2, r2).temp_count);
    assert_eq!(unit(&m1, r1).flags, unit(&m2, r2).flags);
}
