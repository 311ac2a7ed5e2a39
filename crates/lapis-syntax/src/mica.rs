//! The mica syntax tree taxonomy.
//!
//! This is the shape produced by the mica parser: flat where the classic
//! tree nests. A single `Begin` node owns the protected body, the rescue
//! clause chain, the else clause, and the ensure clause; statement
//! sequences are explicit `Statements` nodes; per-node boolean properties
//! live in a packed `flags` byte.

use crate::interner::Symbol;
use crate::span::Span;

/// Node flag bits.
pub mod flags {
    /// The node begins a statement.
    pub const NEWLINE: u8 = 1 << 0;
}

/// An assignable location, used for rescue reference bindings and `for`
/// loop variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Local { name: Symbol, depth: u32 },
    Global { name: Symbol },
}

/// A syntax tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Nil(NilNode),
    True(TrueNode),
    False(FalseNode),
    SelfRef(SelfNode),
    Int(IntNode),
    Str(StrNode),
    Sym(SymNode),
    Const(ConstNode),
    LocalRead(LocalReadNode),
    LocalWrite(LocalWriteNode),
    GlobalRead(GlobalReadNode),
    GlobalWrite(GlobalWriteNode),
    /// Statement sequence; the general-purpose body node.
    Statements(StatementsNode),
    If(IfNode),
    And(AndNode),
    Or(OrNode),
    Case(CaseNode),
    While(WhileNode),
    Until(UntilNode),
    For(ForNode),
    Break(BreakNode),
    Next(NextNode),
    Redo(RedoNode),
    Retry(RetryNode),
    Return(ReturnNode),
    /// `begin ... [rescue ...] [else ...] [ensure ...] end`.
    Begin(BeginNode),
    /// One-line `expr rescue fallback`.
    RescueModifier(RescueModifierNode),
    Call(CallNode),
    Def(DefNode),
    Module(ModuleNode),
    PreExe(PreExeNode),
    PostExe(PostExeNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NilNode {
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrueNode {
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FalseNode {
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelfNode {
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntNode {
    pub value: i64,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrNode {
    pub value: Symbol,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymNode {
    pub name: Symbol,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstNode {
    pub name: Symbol,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalReadNode {
    pub name: Symbol,
    pub depth: u32,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalWriteNode {
    pub name: Symbol,
    pub depth: u32,
    pub value: Box<Node>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalReadNode {
    pub name: Symbol,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalWriteNode {
    pub name: Symbol,
    pub value: Box<Node>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementsNode {
    pub body: Vec<Node>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfNode {
    pub condition: Box<Node>,
    pub then_body: Option<Box<Node>>,
    pub else_body: Option<Box<Node>>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AndNode {
    pub left: Box<Node>,
    pub right: Box<Node>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrNode {
    pub left: Box<Node>,
    pub right: Box<Node>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhenArm {
    pub values: Vec<Node>,
    pub body: Option<Box<Node>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseNode {
    pub subject: Option<Box<Node>>,
    pub arms: Vec<WhenArm>,
    pub else_body: Option<Box<Node>>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileNode {
    pub condition: Box<Node>,
    pub body: Option<Box<Node>>,
    pub eval_at_start: bool,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UntilNode {
    pub condition: Box<Node>,
    pub body: Option<Box<Node>>,
    pub eval_at_start: bool,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForNode {
    pub iterable: Box<Node>,
    pub variable: Target,
    pub body: Option<Box<Node>>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakNode {
    pub value: Option<Box<Node>>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NextNode {
    pub value: Option<Box<Node>>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedoNode {
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryNode {
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnNode {
    pub value: Option<Box<Node>>,
    pub span: Span,
    pub flags: u8,
}

/// One rescue clause; later clauses of the same `begin` chain through
/// `subsequent`. Empty `exceptions` matches the standard error class.
#[derive(Debug, Clone, PartialEq)]
pub struct RescueClauseNode {
    pub exceptions: Vec<Node>,
    pub reference: Option<Target>,
    pub statements: Option<Box<Node>>,
    pub subsequent: Option<Box<RescueClauseNode>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeginNode {
    pub statements: Option<Box<Node>>,
    pub rescue_clause: Option<Box<RescueClauseNode>>,
    pub else_clause: Option<Box<Node>>,
    pub ensure_clause: Option<Box<Node>>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RescueModifierNode {
    pub expression: Box<Node>,
    pub rescue_expression: Box<Node>,
    pub span: Span,
    pub flags: u8,
}

/// A block argument attached to a call.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    pub parameters: Vec<Symbol>,
    pub body: Option<Box<Node>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallNode {
    pub receiver: Option<Box<Node>>,
    pub name: Symbol,
    pub arguments: Vec<Node>,
    pub block: Option<Box<BlockNode>>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefNode {
    pub name: Symbol,
    pub params: Vec<Symbol>,
    pub body: Option<Box<Node>>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleNode {
    pub name: Symbol,
    pub body: Option<Box<Node>>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreExeNode {
    pub body: Option<Box<Node>>,
    pub span: Span,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostExeNode {
    pub body: Option<Box<Node>>,
    pub span: Span,
    pub flags: u8,
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
            Node::Statements(n) => &n.span,
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
            Node::Begin(n) => &n.span,
            Node::RescueModifier(n) => &n.span,
            Node::Call(n) => &n.span,
            Node::Def(n) => &n.span,
            Node::Module(n) => &n.span,
            Node::PreExe(n) => &n.span,
            Node::PostExe(n) => &n.span,
        }
    }

    /// The packed flag byte.
    pub fn flags(&self) -> u8 {
        match self {
            Node::Nil(n) => n.flags,
            Node::True(n) => n.flags,
            Node::False(n) => n.flags,
            Node::SelfRef(n) => n.flags,
            Node::Int(n) => n.flags,
            Node::Str(n) => n.flags,
            Node::Sym(n) => n.flags,
            Node::Const(n) => n.flags,
            Node::LocalRead(n) => n.flags,
            Node::LocalWrite(n) => n.flags,
            Node::GlobalRead(n) => n.flags,
            Node::GlobalWrite(n) => n.flags,
            Node::Statements(n) => n.flags,
            Node::If(n) => n.flags,
            Node::And(n) => n.flags,
            Node::Or(n) => n.flags,
            Node::Case(n) => n.flags,
            Node::While(n) => n.flags,
            Node::Until(n) => n.flags,
            Node::For(n) => n.flags,
            Node::Break(n) => n.flags,
            Node::Next(n) => n.flags,
            Node::Redo(n) => n.flags,
            Node::Retry(n) => n.flags,
            Node::Return(n) => n.flags,
            Node::Begin(n) => n.flags,
            Node::RescueModifier(n) => n.flags,
            Node::Call(n) => n.flags,
            Node::Def(n) => n.flags,
            Node::Module(n) => n.flags,
            Node::PreExe(n) => n.flags,
            Node::PostExe(n) => n.flags,
        }
    }

    fn flags_mut(&mut self) -> &mut u8 {
        match self {
            Node::Nil(n) => &mut n.flags,
            Node::True(n) => &mut n.flags,
            Node::False(n) => &mut n.flags,
            Node::SelfRef(n) => &mut n.flags,
            Node::Int(n) => &mut n.flags,
            Node::Str(n) => &mut n.flags,
            Node::Sym(n) => &mut n.flags,
            Node::Const(n) => &mut n.flags,
            Node::LocalRead(n) => &mut n.flags,
            Node::LocalWrite(n) => &mut n.flags,
            Node::GlobalRead(n) => &mut n.flags,
            Node::GlobalWrite(n) => &mut n.flags,
            Node::Statements(n) => &mut n.flags,
            Node::If(n) => &mut n.flags,
            Node::And(n) => &mut n.flags,
            Node::Or(n) => &mut n.flags,
            Node::Case(n) => &mut n.flags,
            Node::While(n) => &mut n.flags,
            Node::Until(n) => &mut n.flags,
            Node::For(n) => &mut n.flags,
            Node::Break(n) => &mut n.flags,
            Node::Next(n) => &mut n.flags,
            Node::Redo(n) => &mut n.flags,
            Node::Retry(n) => &mut n.flags,
            Node::Return(n) => &mut n.flags,
            Node::Begin(n) => &mut n.flags,
            Node::RescueModifier(n) => &mut n.flags,
            Node::Call(n) => &mut n.flags,
            Node::Def(n) => &mut n.flags,
            Node::Module(n) => &mut n.flags,
            Node::PreExe(n) => &mut n.flags,
            Node::PostExe(n) => &mut n.flags,
        }
    }

    /// The line this node starts on.
    pub fn line(&self) -> u32 {
        self.span().line
    }

    /// Whether this node begins a statement.
    pub fn is_newline(&self) -> bool {
        self.flags() & flags::NEWLINE != 0
    }

    /// Set the newline flag.
    pub fn with_newline(mut self) -> Self {
        *self.flags_mut() |= flags::NEWLINE;
        self
    }
}

impl RescueClauseNode {
    /// Flatten the `subsequent` chain into source order.
    pub fn chain(&self) -> Vec<&RescueClauseNode> {
        let mut out = Vec::new();
        let mut cur = Some(self);
        while let Some(clause) = cur {
            out.push(clause);
            cur = clause.subsequent.as_deref();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_roundtrip() {
        let node = Node::Retry(RetryNode {
            span: Span::at_line(3),
            flags: 0,
        });
        assert!(!node.is_newline());
        let node = node.with_newline();
        assert!(node.is_newline());
        assert_eq!(node.flags(), flags::NEWLINE);
    }

    #[test]
    fn test_begin_owns_all_clauses() {
        let begin = BeginNode {
            statements: None,
            rescue_clause: Some(Box::new(RescueClauseNode {
                exceptions: vec![],
                reference: None,
                statements: None,
                subsequent: None,
                span: Span::dummy(),
            })),
            else_clause: None,
            ensure_clause: None,
            span: Span::dummy(),
            flags: 0,
        };
        assert_eq!(begin.rescue_clause.as_ref().map(|r| r.chain().len()), Some(1));
    }
}
