//! The two grammar adapters feed the same driver, so equivalent trees must
//! lower to identical instruction streams, scope for scope: same kinds,
//! same closure registrations, same bodies, same temp counts.
//!
//! Each test builds the equivalent tree in both taxonomies with the same
//! names interned in the same order, so symbols agree numerically across
//! the two managers.

use lapis_ir::{LowerOptions, Manager, ScopeId};
use lapis_lower::{lower_script, Classic, Grammar, Mica};
use lapis_syntax::{classic, mica, Span, Symbol};

fn lowered<G: Grammar>(build: impl FnOnce(&mut Manager) -> G::Node) -> (Manager, ScopeId) {
    let mut m = Manager::new("parity.lp", LowerOptions::default());
    let tree = build(&mut m);
    let root = lower_script::<G>(&mut m, Some(&tree)).expect("lowering failed");
    (m, root)
}

fn assert_same_ir(classic_run: (Manager, ScopeId), mica_run: (Manager, ScopeId)) {
    let (cm, cr) = classic_run;
    let (mm, mr) = mica_run;
    assert_eq!(cr, mr);
    assert_eq!(cm.scope_count(), mm.scope_count());
    for i in 0..cm.scope_count() {
        let id = ScopeId(i as u32);
        let a = cm.scope(id);
        let b = mm.scope(id);
        assert_eq!(a.kind, b.kind, "scope {id} kind diverged");
        assert_eq!(a.closures, b.closures, "scope {id} closures diverged");
        assert_eq!(a.unit, b.unit, "scope {id} body diverged");
    }
}

fn c_int(value: i64) -> classic::Node {
    classic::Node::Int(classic::IntNode {
        value,
        span: Span::dummy(),
        newline: false,
    })
}

fn c_local_write(name: Symbol, value: classic::Node) -> classic::Node {
    classic::Node::LocalWrite(classic::LocalWriteNode {
        name,
        depth: 0,
        value: Box::new(value),
        span: Span::dummy(),
        newline: false,
    })
}

fn c_global_write(name: Symbol, value: classic::Node) -> classic::Node {
    classic::Node::GlobalWrite(classic::GlobalWriteNode {
        name,
        value: Box::new(value),
        span: Span::dummy(),
        newline: false,
    })
}

fn m_int(value: i64) -> mica::Node {
    mica::Node::Int(mica::IntNode {
        value,
        span: Span::dummy(),
        flags: 0,
    })
}

fn m_local_write(name: Symbol, value: mica::Node) -> mica::Node {
    mica::Node::LocalWrite(mica::LocalWriteNode {
        name,
        depth: 0,
        value: Box::new(value),
        span: Span::dummy(),
        flags: 0,
    })
}

fn m_global_write(name: Symbol, value: mica::Node) -> mica::Node {
    mica::Node::GlobalWrite(mica::GlobalWriteNode {
        name,
        value: Box::new(value),
        span: Span::dummy(),
        flags: 0,
    })
}

// begin; x = 1; ensure; y = 2; end
#[test]
fn test_ensure_expression_parity() {
    let c = lowered::<Classic>(|m| {
        let x = m.intern("x");
        let y = m.intern("y");
        classic::Node::Ensure(classic::EnsureNode {
            body: Some(Box::new(c_local_write(x, c_int(1)))),
            ensure_body: Some(Box::new(c_local_write(y, c_int(2)))),
            span: Span::dummy(),
            newline: false,
        })
    });
    let mi = lowered::<Mica>(|m| {
        let x = m.intern("x");
        let y = m.intern("y");
        mica::Node::Begin(mica::BeginNode {
            statements: Some(Box::new(m_local_write(x, m_int(1)))),
            rescue_clause: None,
            else_clause: None,
            ensure_clause: Some(Box::new(m_local_write(y, m_int(2)))),
            span: Span::dummy(),
            flags: 0,
        })
    });
    assert_same_ir(c, mi);
}

// 1 rescue 2
#[test]
fn test_modifier_rescue_parity() {
    let c = lowered::<Classic>(|_| {
        classic::Node::Rescue(classic::RescueNode {
            body: Some(Box::new(c_int(1))),
            clause: classic::RescueClause {
                exceptions: vec![],
                reference: None,
                body: Some(Box::new(c_int(2))),
                subsequent: None,
                span: Span::dummy(),
            },
            else_body: None,
            modifier: true,
            span: Span::dummy(),
            newline: false,
        })
    });
    let mi = lowered::<Mica>(|_| {
        mica::Node::RescueModifier(mica::RescueModifierNode {
            expression: Box::new(m_int(1)),
            rescue_expression: Box::new(m_int(2)),
            span: Span::dummy(),
            flags: 0,
        })
    });
    assert_same_ir(c, mi);
}

// begin; $b = 1; rescue TypeError; 1; rescue => e; 2; else; 3; end
#[test]
fn test_rescue_chain_with_reference_and_else_parity() {
    let c = lowered::<Classic>(|m| {
        let b = m.intern("$b");
        let te = m.intern("TypeError");
        let e = m.intern("e");
        classic::Node::Rescue(classic::RescueNode {
            body: Some(Box::new(c_global_write(b, c_int(1)))),
            clause: classic::RescueClause {
                exceptions: vec![classic::Node::Const(classic::ConstNode {
                    name: te,
                    span: Span::dummy(),
                    newline: false,
                })],
                reference: None,
                body: Some(Box::new(c_int(1))),
                subsequent: Some(Box::new(classic::RescueClause {
                    exceptions: vec![],
                    reference: Some(classic::Target::Local { name: e, depth: 0 }),
                    body: Some(Box::new(c_int(2))),
                    subsequent: None,
                    span: Span::dummy(),
                })),
                span: Span::dummy(),
            },
            else_body: Some(Box::new(c_int(3))),
            modifier: false,
            span: Span::dummy(),
            newline: false,
        })
    });
    let mi = lowered::<Mica>(|m| {
        let b = m.intern("$b");
        let te = m.intern("TypeError");
        let e = m.intern("e");
        mica::Node::Begin(mica::BeginNode {
            statements: Some(Box::new(m_global_write(b, m_int(1)))),
            rescue_clause: Some(Box::new(mica::RescueClauseNode {
                exceptions: vec![mica::Node::Const(mica::ConstNode {
                    name: te,
                    span: Span::dummy(),
                    flags: 0,
                })],
                reference: None,
                statements: Some(Box::new(m_int(1))),
                subsequent: Some(Box::new(mica::RescueClauseNode {
                    exceptions: vec![],
                    reference: Some(mica::Target::Local { name: e, depth: 0 }),
                    statements: Some(Box::new(m_int(2))),
                    subsequent: None,
                    span: Span::dummy(),
                })),
                span: Span::dummy(),
            })),
            else_clause: Some(Box::new(m_int(3))),
            ensure_clause: None,
            span: Span::dummy(),
            flags: 0,
        })
    });
    assert_same_ir(c, mi);
}

// while c; begin; break 5; ensure; $l = 1; end; end
#[test]
fn test_loop_break_with_cleanup_parity() {
    let c = lowered::<Classic>(|m| {
        let cnd = m.intern("c");
        let l = m.intern("$l");
        classic::Node::While(classic::WhileNode {
            condition: Box::new(classic::Node::LocalRead(classic::LocalReadNode {
                name: cnd,
                depth: 0,
                span: Span::dummy(),
                newline: false,
            })),
            body: Some(Box::new(classic::Node::Ensure(classic::EnsureNode {
                body: Some(Box::new(classic::Node::Break(classic::BreakNode {
                    value: Some(Box::new(c_int(5))),
                    span: Span::dummy(),
                    newline: false,
                }))),
                ensure_body: Some(Box::new(c_global_write(l, c_int(1)))),
                span: Span::dummy(),
                newline: false,
            }))),
            eval_at_start: true,
            span: Span::dummy(),
            newline: false,
        })
    });
    let mi = lowered::<Mica>(|m| {
        let cnd = m.intern("c");
        let l = m.intern("$l");
        mica::Node::While(mica::WhileNode {
            condition: Box::new(mica::Node::LocalRead(mica::LocalReadNode {
                name: cnd,
                depth: 0,
                span: Span::dummy(),
                flags: 0,
            })),
            body: Some(Box::new(mica::Node::Begin(mica::BeginNode {
                statements: Some(Box::new(mica::Node::Break(mica::BreakNode {
                    value: Some(Box::new(m_int(5))),
                    span: Span::dummy(),
                    flags: 0,
                }))),
                rescue_clause: None,
                else_clause: None,
                ensure_clause: Some(Box::new(m_global_write(l, m_int(1)))),
                span: Span::dummy(),
                flags: 0,
            }))),
            eval_at_start: true,
            span: Span::dummy(),
            flags: 0,
        })
    });
    assert_same_ir(c, mi);
}

// a clause-free begin is pure grouping; an else without rescue still runs
// after the body and supplies the value
#[test]
fn test_grouping_begin_parity() {
    let c = lowered::<Classic>(|m| {
        let a = m.intern("$a");
        let b = m.intern("$b");
        classic::Node::Block(classic::BlockNode {
            statements: vec![c_global_write(a, c_int(1)), c_global_write(b, c_int(2))],
            span: Span::dummy(),
            newline: false,
        })
    });
    let mi = lowered::<Mica>(|m| {
        let a = m.intern("$a");
        let b = m.intern("$b");
        mica::Node::Begin(mica::BeginNode {
            statements: Some(Box::new(mica::Node::Statements(mica::StatementsNode {
                body: vec![m_global_write(a, m_int(1))],
                span: Span::dummy(),
                flags: 0,
            }))),
            rescue_clause: None,
            else_clause: Some(Box::new(m_global_write(b, m_int(2)))),
            ensure_clause: None,
            span: Span::dummy(),
            flags: 0,
        })
    });
    assert_same_ir(c, mi);
}

// each { |p| next 3 }
#[test]
fn test_block_call_parity() {
    let c = lowered::<Classic>(|m| {
        let p = m.intern("p");
        classic::Node::Call(classic::CallNode {
            receiver: None,
            name: m.names.each,
            args: vec![],
            block: Some(Box::new(classic::IterNode {
                params: vec![p],
                body: Some(Box::new(classic::Node::Next(classic::NextNode {
                    value: Some(Box::new(c_int(3))),
                    span: Span::dummy(),
                    newline: false,
                }))),
                span: Span::dummy(),
            })),
            span: Span::dummy(),
            newline: false,
        })
    });
    let mi = lowered::<Mica>(|m| {
        let p = m.intern("p");
        mica::Node::Call(mica::CallNode {
            receiver: None,
            name: m.names.each,
            arguments: vec![],
            block: Some(Box::new(mica::BlockNode {
                parameters: vec![p],
                body: Some(Box::new(mica::Node::Next(mica::NextNode {
                    value: Some(Box::new(m_int(3))),
                    span: Span::dummy(),
                    flags: 0,
                }))),
                span: Span::dummy(),
            })),
            span: Span::dummy(),
            flags: 0,
        })
    });
    assert_same_ir(c, mi);
}
