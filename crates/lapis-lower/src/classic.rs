//! Tree adapter for the classic taxonomy.
//!
//! The classic tree nests: rescue chains hang off a `Rescue` node, an
//! `Ensure` node wraps its protected body, and a rescue-with-ensure parses
//! as `Ensure(Rescue(..))`. The adapter flattens that wrapping into one
//! protected-region view per construct, so the lowering engine sees the
//! same shape from both taxonomies.

use crate::error::LowerResult;
use crate::grammar::{
    BindTarget, BlockParts, CallParts, CaseArmView, Grammar, ProtectedParts, RescueClauseView,
};
use lapis_ir::{Operand, Variable};
use lapis_syntax::classic::{CallNode, EnsureNode, IterNode, Node, RescueClause, RescueNode, Target};
use lapis_syntax::Interner;

use crate::lowerer::Lowerer;

/// The hand-written parser's nested tree.
pub struct Classic;

impl Grammar for Classic {
    type Node = Node;

    fn lower_node(lw: &mut Lowerer<'_, Self>, node: &Node) -> LowerResult<Operand> {
        match node {
            Node::Nil(_) => Ok(Operand::Nil),
            Node::True(_) => Ok(Operand::True),
            Node::False(_) => Ok(Operand::False),
            Node::SelfRef(_) => Ok(Operand::SelfRef),
            Node::Int(n) => Ok(Operand::Int(n.value)),
            Node::Str(n) => Ok(lw.lower_str_literal(n.value)),
            Node::Sym(n) => Ok(Operand::Sym(n.name)),
            Node::Const(n) => Ok(Operand::Const(n.name)),
            Node::LocalRead(n) => Ok(Operand::Var(Variable::Local {
                name: n.name,
                depth: n.depth,
            })),
            Node::LocalWrite(n) => lw.lower_local_write(n.name, n.depth, &n.value),
            Node::GlobalRead(n) => Ok(lw.lower_global_read(n.name)),
            Node::GlobalWrite(n) => lw.lower_global_write(n.name, &n.value),
            Node::Block(n) => {
                let stmts: Vec<&Node> = n.statements.iter().collect();
                lw.lower_statements(&stmts)
            }
            Node::If(n) => {
                lw.lower_if(&n.condition, n.then_body.as_deref(), n.else_body.as_deref())
            }
            Node::And(n) => lw.lower_and(&n.left, &n.right),
            Node::Or(n) => lw.lower_or(&n.left, &n.right),
            Node::Case(n) => {
                let arms: Vec<CaseArmView<'_, Self>> = n
                    .arms
                    .iter()
                    .map(|arm| CaseArmView {
                        values: arm.values.iter().collect(),
                        body: arm.body.as_deref(),
                    })
                    .collect();
                lw.lower_case(n.subject.as_deref(), &arms, n.else_body.as_deref())
            }
            Node::While(n) => {
                lw.lower_conditional_loop(&n.condition, n.body.as_deref(), true, n.eval_at_start)
            }
            Node::Until(n) => {
                lw.lower_conditional_loop(&n.condition, n.body.as_deref(), false, n.eval_at_start)
            }
            Node::For(n) => {
                let target = bind_target(n.variable);
                lw.lower_for(&n.iterable, &target, n.body.as_deref(), n.span.line)
            }
            Node::Break(n) => lw.lower_break(n.value.as_deref(), n.span.line),
            Node::Next(n) => lw.lower_next(n.value.as_deref(), n.span.line),
            Node::Redo(n) => lw.lower_redo(n.span.line),
            Node::Retry(n) => lw.lower_retry(n.span.line),
            Node::Return(n) => lw.lower_return(n.value.as_deref()),
            Node::Rescue(n) => lw.lower_protected(&rescue_parts(n)),
            Node::Ensure(n) => lw.lower_protected(&ensure_parts(n)),
            Node::Call(n) => lw.lower_call(&call_parts(n)),
            Node::Def(n) => lw.lower_method_def(n.name, &n.params, n.body.as_deref(), n.span.line),
            Node::Module(n) => lw.lower_module(n.name, n.body.as_deref(), n.span.line),
            Node::PreExe(n) => lw.lower_pre_exe(n.body.as_deref()),
            Node::PostExe(n) => lw.lower_post_exe(n.body.as_deref(), n.span.line),
        }
    }

    fn is_newline(node: &Node) -> bool {
        node.is_newline()
    }

    fn line(node: &Node) -> u32 {
        node.line()
    }

    fn is_method_def(node: &Node) -> bool {
        matches!(node, Node::Def(_))
    }

    fn always_true(node: &Node) -> bool {
        matches!(
            node,
            Node::True(_) | Node::Int(_) | Node::Str(_) | Node::Sym(_)
        )
    }

    fn always_false(node: &Node) -> bool {
        matches!(node, Node::False(_) | Node::Nil(_))
    }

    fn is_side_effect_free(node: &Node) -> bool {
        matches!(
            node,
            Node::Nil(_)
                | Node::True(_)
                | Node::False(_)
                | Node::SelfRef(_)
                | Node::Int(_)
                | Node::Str(_)
                | Node::Sym(_)
                | Node::LocalRead(_)
                | Node::GlobalRead(_)
        )
    }

    fn is_error_info_read(node: &Node, interner: &Interner) -> bool {
        match node {
            Node::GlobalRead(n) => matches!(
                interner.resolve(n.name),
                "$!" | "$ERROR_INFO" | "$@" | "$ERROR_POSITION"
            ),
            _ => false,
        }
    }

    fn contains_assignment(node: &Node) -> bool {
        has_assignment(node)
    }
}

fn bind_target(target: Target) -> BindTarget {
    match target {
        Target::Local { name, depth } => BindTarget::Local { name, depth },
        Target::Global { name } => BindTarget::Global { name },
    }
}

fn clause_views(clause: &RescueClause) -> Vec<RescueClauseView<'_, Classic>> {
    clause
        .chain()
        .into_iter()
        .map(|c| RescueClauseView {
            exceptions: c.exceptions.iter().collect(),
            reference: c.reference.map(bind_target),
            body: c.body.as_deref(),
        })
        .collect()
}

fn rescue_parts(node: &RescueNode) -> ProtectedParts<'_, Classic> {
    ProtectedParts {
        body: node.body.as_deref(),
        clauses: clause_views(&node.clause),
        else_body: node.else_body.as_deref(),
        ensure_body: None,
        is_modifier: node.modifier,
    }
}

/// `begin x rescue y ensure z end` parses as the rescue nested inside the
/// ensure; both levels collapse into one region here.
fn ensure_parts(node: &EnsureNode) -> ProtectedParts<'_, Classic> {
    match node.body.as_deref() {
        Some(Node::Rescue(r)) => ProtectedParts {
            body: r.body.as_deref(),
            clauses: clause_views(&r.clause),
            else_body: r.else_body.as_deref(),
            ensure_body: node.ensure_body.as_deref(),
            is_modifier: r.modifier,
        },
        body => ProtectedParts {
            body,
            clauses: Vec::new(),
            else_body: None,
            ensure_body: node.ensure_body.as_deref(),
            is_modifier: false,
        },
    }
}

fn call_parts(node: &CallNode) -> CallParts<'_, Classic> {
    CallParts {
        receiver: node.receiver.as_deref(),
        name: node.name,
        args: node.args.iter().collect(),
        block: node.block.as_deref().map(block_parts),
        line: node.span.line,
        newline: node.newline,
        contains_assignment: node.receiver.as_deref().is_some_and(has_assignment)
            || node.args.iter().any(has_assignment)
            || node
                .block
                .as_ref()
                .is_some_and(|b| b.body.as_deref().is_some_and(has_assignment)),
    }
}

fn block_parts(iter: &IterNode) -> BlockParts<'_, Classic> {
    BlockParts {
        params: iter.params.clone(),
        body: iter.body.as_deref(),
        line: iter.span.line,
    }
}

/// Whether evaluating `node` can write any variable binding, including
/// bindings made by rescue references and loop variables. Conservative
/// across scope boundaries: assignments inside nested defs count too.
fn has_assignment(node: &Node) -> bool {
    match node {
        Node::LocalWrite(_) | Node::GlobalWrite(_) | Node::For(_) => true,
        Node::Nil(_)
        | Node::True(_)
        | Node::False(_)
        | Node::SelfRef(_)
        | Node::Int(_)
        | Node::Str(_)
        | Node::Sym(_)
        | Node::Const(_)
        | Node::LocalRead(_)
        | Node::GlobalRead(_)
        | Node::Redo(_)
        | Node::Retry(_) => false,
        Node::Block(n) => n.statements.iter().any(has_assignment),
        Node::If(n) => {
            has_assignment(&n.condition)
                || opt_has_assignment(&n.then_body)
                || opt_has_assignment(&n.else_body)
        }
        Node::And(n) => has_assignment(&n.left) || has_assignment(&n.right),
        Node::Or(n) => has_assignment(&n.left) || has_assignment(&n.right),
        Node::Case(n) => {
            n.subject.as_deref().is_some_and(has_assignment)
                || n.arms.iter().any(|arm| {
                    arm.values.iter().any(has_assignment) || opt_has_assignment(&arm.body)
                })
                || opt_has_assignment(&n.else_body)
        }
        Node::While(n) => has_assignment(&n.condition) || opt_has_assignment(&n.body),
        Node::Until(n) => has_assignment(&n.condition) || opt_has_assignment(&n.body),
        Node::Break(n) => opt_has_assignment(&n.value),
        Node::Next(n) => opt_has_assignment(&n.value),
        Node::Return(n) => opt_has_assignment(&n.value),
        Node::Rescue(n) => {
            opt_has_assignment(&n.body)
                || opt_has_assignment(&n.else_body)
                || n.clause.chain().iter().any(|c| {
                    c.reference.is_some()
                        || c.exceptions.iter().any(has_assignment)
                        || c.body.as_deref().is_some_and(has_assignment)
                })
        }
        Node::Ensure(n) => opt_has_assignment(&n.body) || opt_has_assignment(&n.ensure_body),
        Node::Call(n) => {
            n.receiver.as_deref().is_some_and(has_assignment)
                || n.args.iter().any(has_assignment)
                || n
                    .block
                    .as_ref()
                    .is_some_and(|b| b.body.as_deref().is_some_and(has_assignment))
        }
        Node::Def(n) => opt_has_assignment(&n.body),
        Node::Module(n) => opt_has_assignment(&n.body),
        Node::PreExe(n) => opt_has_assignment(&n.body),
        Node::PostExe(n) => opt_has_assignment(&n.body),
    }
}

fn opt_has_assignment(node: &Option<Box<Node>>) -> bool {
    node.as_deref().is_some_and(has_assignment)
}
