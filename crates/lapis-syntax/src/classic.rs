//! The classic syntax tree taxonomy.
//!
//! This is the shape produced by the original hand-written parser: deeply
//! nested, with one node kind per construct. Protected regions come out as
//! an `Ensure` node whose body may itself be a `Rescue` node, and rescue
//! clauses chain through their `subsequent` field.
//!
//! Every node carries a span and a `newline` flag; the flag marks nodes that
//! begin a statement and drives line-marker emission during lowering.

use crate::interner::Symbol;
use crate::span::Span;

/// An assignable location, used for rescue reference bindings (`rescue => e`)
/// and `for` loop variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A local variable at a lexical depth relative to the current scope.
    Local { name: Symbol, depth: u32 },
    /// A global variable.
    Global { name: Symbol },
}

/// A syntax tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// `nil`
    Nil(NilNode),
    /// `true`
    True(TrueNode),
    /// `false`
    False(FalseNode),
    /// `self`
    SelfRef(SelfNode),
    /// Integer literal: `42`
    Int(IntNode),
    /// String literal: `"hello"`
    Str(StrNode),
    /// Symbol literal: `:name`
    Sym(SymNode),
    /// Constant reference: `StandardError`
    Const(ConstNode),
    /// Local variable read: `x`
    LocalRead(LocalReadNode),
    /// Local variable write: `x = expr`
    LocalWrite(LocalWriteNode),
    /// Global variable read: `$x`
    GlobalRead(GlobalReadNode),
    /// Global variable write: `$x = expr`
    GlobalWrite(GlobalWriteNode),
    /// A sequence of statements.
    Block(BlockNode),
    /// `if` / `unless` expression (unless is parsed with swapped arms).
    If(IfNode),
    /// `left && right`
    And(AndNode),
    /// `left || right`
    Or(OrNode),
    /// `case` expression.
    Case(CaseNode),
    /// `while` loop.
    While(WhileNode),
    /// `until` loop.
    Until(UntilNode),
    /// `for x in collection; ...; end`
    For(ForNode),
    /// `break [value]`
    Break(BreakNode),
    /// `next [value]`
    Next(NextNode),
    /// `redo`
    Redo(RedoNode),
    /// `retry`
    Retry(RetryNode),
    /// `return [value]`
    Return(ReturnNode),
    /// `begin ... rescue ... [else ...] end`, or a modifier rescue.
    Rescue(RescueNode),
    /// `begin ... ensure ... end`; the body may be a `Rescue` node.
    Ensure(EnsureNode),
    /// Method call, with or without an explicit receiver.
    Call(CallNode),
    /// `def name(params) ... end`
    Def(DefNode),
    /// `module Name ... end`
    Module(ModuleNode),
    /// `BEGIN { ... }`
    PreExe(PreExeNode),
    /// `END { ... }`
    PostExe(PostExeNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NilNode {
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrueNode {
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FalseNode {
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelfNode {
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntNode {
    pub value: i64,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrNode {
    pub value: Symbol,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymNode {
    pub name: Symbol,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstNode {
    pub name: Symbol,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalReadNode {
    pub name: Symbol,
    pub depth: u32,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalWriteNode {
    pub name: Symbol,
    pub depth: u32,
    pub value: Box<Node>,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalReadNode {
    pub name: Symbol,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalWriteNode {
    pub name: Symbol,
    pub value: Box<Node>,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    pub statements: Vec<Node>,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfNode {
    pub condition: Box<Node>,
    pub then_body: Option<Box<Node>>,
    pub else_body: Option<Box<Node>>,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AndNode {
    pub left: Box<Node>,
    pub right: Box<Node>,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrNode {
    pub left: Box<Node>,
    pub right: Box<Node>,
    pub span: Span,
    pub newline: bool,
}

/// One `when` arm of a `case` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct WhenArm {
    pub values: Vec<Node>,
    pub body: Option<Box<Node>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseNode {
    /// `None` for the subjectless form, where each arm value is a condition.
    pub subject: Option<Box<Node>>,
    pub arms: Vec<WhenArm>,
    pub else_body: Option<Box<Node>>,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileNode {
    pub condition: Box<Node>,
    pub body: Option<Box<Node>>,
    /// False for the `begin ... end while cond` form, which tests after the
    /// first iteration.
    pub eval_at_start: bool,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UntilNode {
    pub condition: Box<Node>,
    pub body: Option<Box<Node>>,
    pub eval_at_start: bool,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForNode {
    pub iterable: Box<Node>,
    pub variable: Target,
    pub body: Option<Box<Node>>,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakNode {
    pub value: Option<Box<Node>>,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NextNode {
    pub value: Option<Box<Node>>,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedoNode {
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryNode {
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnNode {
    pub value: Option<Box<Node>>,
    pub span: Span,
    pub newline: bool,
}

/// One rescue clause: `rescue TypeA, TypeB => e; handler`.
///
/// A clause with no exception types matches the standard error class.
/// Further clauses of the same `begin` chain through `subsequent`.
#[derive(Debug, Clone, PartialEq)]
pub struct RescueClause {
    pub exceptions: Vec<Node>,
    pub reference: Option<Target>,
    pub body: Option<Box<Node>>,
    pub subsequent: Option<Box<RescueClause>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RescueNode {
    pub body: Option<Box<Node>>,
    pub clause: RescueClause,
    pub else_body: Option<Box<Node>>,
    /// True for the one-line `expr rescue fallback` form.
    pub modifier: bool,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsureNode {
    pub body: Option<Box<Node>>,
    pub ensure_body: Option<Box<Node>>,
    pub span: Span,
    pub newline: bool,
}

/// A block argument attached to a call: `{ |params| body }`.
#[derive(Debug, Clone, PartialEq)]
pub struct IterNode {
    pub params: Vec<Symbol>,
    pub body: Option<Box<Node>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallNode {
    /// `None` for receiverless calls, which dispatch against `self`.
    pub receiver: Option<Box<Node>>,
    pub name: Symbol,
    pub args: Vec<Node>,
    pub block: Option<Box<IterNode>>,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefNode {
    pub name: Symbol,
    pub params: Vec<Symbol>,
    pub body: Option<Box<Node>>,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleNode {
    pub name: Symbol,
    pub body: Option<Box<Node>>,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreExeNode {
    pub body: Option<Box<Node>>,
    pub span: Span,
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostExeNode {
    pub body: Option<Box<Node>>,
    pub span: Span,
    pub newline: bool,
}

impl Node {
    /// Get the span of this node.
    pub fn span(&self) -> &Span {
        match self {
            Node::Nil(n) => &n.span,
            Node::True(n) => &n.span,
            Node::False(n) => &n.span,
            Node::SelfRef(n) => &n.span,
            Node::Int(n) => &n.span,
            Node::Str(n) => &n.span,
            Node::Sym(n) => &n.span,
            Node::Const(n) => &n.span,
            Node::LocalRead(n) => &n.span,
            Node::LocalWrite(n) => &n.span,
            Node::GlobalRead(n) => &n.span,
            Node::GlobalWrite(n) => &n.span,
            Node::Block(n) => &n.span,
            Node::If(n) => &n.span,
            Node::And(n) => &n.span,
            Node::Or(n) => &n.span,
            Node::Case(n) => &n.span,
            Node::While(n) => &n.span,
            Node::Until(n) => &n.span,
            Node::For(n) => &n.span,
            Node::Break(n) => &n.span,
            Node::Next(n) => &n.span,
            Node::Redo(n) => &n.span,
            Node::Retry(n) => &n.span,
            Node::Return(n) => &n.span,
            Node::Rescue(n) => &n.span,
            Node::Ensure(n) => &n.span,
            Node::Call(n) => &n.span,
            Node::Def(n) => &n.span,
            Node::Module(n) => &n.span,
            Node::PreExe(n) => &n.span,
            Node::PostExe(n) => &n.span,
        }
    }

    /// The line this node starts on.
    pub fn line(&self) -> u32 {
        self.span().line
    }

    /// Whether this node begins a statement.
    pub fn is_newline(&self) -> bool {
        match self {
            Node::Nil(n) => n.newline,
            Node::True(n) => n.newline,
            Node::False(n) => n.newline,
            Node::SelfRef(n) => n.newline,
            Node::Int(n) => n.newline,
            Node::Str(n) => n.newline,
            Node::Sym(n) => n.newline,
            Node::Const(n) => n.newline,
            Node::LocalRead(n) => n.newline,
            Node::LocalWrite(n) => n.newline,
            Node::GlobalRead(n) => n.newline,
            Node::GlobalWrite(n) => n.newline,
            Node::Block(n) => n.newline,
            Node::If(n) => n.newline,
            Node::And(n) => n.newline,
            Node::Or(n) => n.newline,
            Node::Case(n) => n.newline,
            Node::While(n) => n.newline,
            Node::Until(n) => n.newline,
            Node::For(n) => n.newline,
            Node::Break(n) => n.newline,
            Node::Next(n) => n.newline,
            Node::Redo(n) => n.newline,
            Node::Retry(n) => n.newline,
            Node::Return(n) => n.newline,
            Node::Rescue(n) => n.newline,
            Node::Ensure(n) => n.newline,
            Node::Call(n) => n.newline,
            Node::Def(n) => n.newline,
            Node::Module(n) => n.newline,
            Node::PreExe(n) => n.newline,
            Node::PostExe(n) => n.newline,
        }
    }

    /// Mark this node as beginning a statement. The parser calls this on
    /// every node that starts a new line within a statement sequence.
    pub fn with_newline(mut self) -> Self {
        match &mut self {
            Node::Nil(n) => n.newline = true,
            Node::True(n) => n.newline = true,
            Node::False(n) => n.newline = true,
            Node::SelfRef(n) => n.newline = true,
            Node::Int(n) => n.newline = true,
            Node::Str(n) => n.newline = true,
            Node::Sym(n) => n.newline = true,
            Node::Const(n) => n.newline = true,
            Node::LocalRead(n) => n.newline = true,
            Node::LocalWrite(n) => n.newline = true,
            Node::GlobalRead(n) => n.newline = true,
            Node::GlobalWrite(n) => n.newline = true,
            Node::Block(n) => n.newline = true,
            Node::If(n) => n.newline = true,
            Node::And(n) => n.newline = true,
            Node::Or(n) => n.newline = true,
            Node::Case(n) => n.newline = true,
            Node::While(n) => n.newline = true,
            Node::Until(n) => n.newline = true,
            Node::For(n) => n.newline = true,
            Node::Break(n) => n.newline = true,
            Node::Next(n) => n.newline = true,
            Node::Redo(n) => n.newline = true,
            Node::Retry(n) => n.newline = true,
            Node::Return(n) => n.newline = true,
            Node::Rescue(n) => n.newline = true,
            Node::Ensure(n) => n.newline = true,
            Node::Call(n) => n.newline = true,
            Node::Def(n) => n.newline = true,
            Node::Module(n) => n.newline = true,
            Node::PreExe(n) => n.newline = true,
            Node::PostExe(n) => n.newline = true,
        }
        self
    }
}

impl RescueClause {
    /// Flatten the `subsequent` chain into source order.
    pub fn chain(&self) -> Vec<&RescueClause> {
        let mut out = Vec::new();
        let mut cur = Some(self);
        while let Some(clause) = cur {
            out.push(clause);
            cur = clause.subsequent.as_deref();
        }
        out
    }
}
