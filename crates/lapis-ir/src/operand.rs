//! Values referenced by instructions.

use crate::scope::ScopeId;
use lapis_syntax::Symbol;

/// A mutable storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variable {
    /// Compiler-allocated temporary, numbered per scope.
    Temp { id: u32 },
    /// Named local variable; `depth` counts lexical scopes outward.
    Local { name: Symbol, depth: u32 },
}

/// The flavor of local jump error a lowered construct raises at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Break,
    Next,
    Redo,
    Retry,
    Return,
}

/// Three-valued truth classification of an operand, used for static branch
/// folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

/// A value in operand position.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Nil,
    True,
    False,
    /// The receiver of the current scope.
    SelfRef,
    /// Result of an expression control flow cannot fall out of. Suppresses
    /// result copies and implicit returns; never materialized at runtime.
    Unreachable,
    Int(i64),
    /// String literal contents. Strings are mutable at runtime, so a literal
    /// is copied into a fresh variable at each evaluation.
    Str(Symbol),
    Sym(Symbol),
    /// Constant reference, resolved by the runtime.
    Const(Symbol),
    Var(Variable),
    /// A lowered closure, referenced by its scope.
    Closure(ScopeId),
    /// A local jump error value of the given kind, raised via `Throw`.
    JumpError(JumpKind),
}

impl Operand {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Operand::Unreachable)
    }

    /// Statically known truthiness, if any. Constants stay unknown: their
    /// resolution can run arbitrary code.
    pub fn static_truth(&self) -> Truth {
        match self {
            Operand::Nil | Operand::False => Truth::False,
            Operand::True | Operand::Int(_) | Operand::Str(_) | Operand::Sym(_) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    /// Literals whose value cannot change between evaluations. Excludes
    /// string literals, which are mutable at runtime.
    pub fn is_immutable_literal(&self) -> bool {
        matches!(
            self,
            Operand::Nil | Operand::True | Operand::False | Operand::Int(_) | Operand::Sym(_)
        )
    }
}

impl From<Variable> for Operand {
    fn from(v: Variable) -> Self {
        Operand::Var(v)
    }
}
