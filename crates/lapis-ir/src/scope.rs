//! Scope records and frozen executable units.

use crate::instr::Instr;
use lapis_syntax::Symbol;
use std::fmt;

/// Identifies a scope within one [`crate::Manager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// What kind of body a scope holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Top-level script body.
    Script,
    /// An `eval` entry; closure-like, but escape constructs are rejected.
    Eval,
    /// `def` body.
    Method,
    /// An ordinary block.
    Closure,
    /// A `for` loop body; shares the enclosing variable set and gets no
    /// lambda wrapper.
    For,
    /// An `END { ... }` body.
    EndBlock,
    /// `module` body.
    Module,
}

impl ScopeKind {
    /// Closure-like scopes: those executed against a captured environment.
    pub fn is_closure(&self) -> bool {
        matches!(
            self,
            ScopeKind::Closure | ScopeKind::For | ScopeKind::EndBlock | ScopeKind::Eval
        )
    }
}

/// Facts about a scope's body, accumulated during lowering and frozen with
/// the unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeFlags {
    /// The body contains a loop (or a retry jump, which acts like one).
    pub has_loops: bool,
    /// The body itself contains structured break instructions.
    pub has_break_instructions: bool,
    /// The body itself contains non-local returns.
    pub has_nonlocal_returns: bool,
    /// Some nested closure can send a break through this scope.
    pub can_receive_breaks: bool,
    /// Some nested closure can send a non-local return to this scope.
    pub can_receive_nonlocal_returns: bool,
}

/// The frozen result of lowering one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableUnit {
    pub instrs: Vec<Instr>,
    /// Number of temporary slots the interpreter must allocate.
    pub temp_count: u32,
    pub flags: ScopeFlags,
}

/// One lexical scope: a script, eval, method, module, or closure body.
#[derive(Debug, Clone)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub name: Symbol,
    /// Line the scope's construct starts on.
    pub line: u32,
    pub parent: Option<ScopeId>,
    /// Closures lexically nested in this scope, in registration order.
    /// Cleanup cloning may re-register a closure with a new host.
    pub closures: Vec<ScopeId>,
    pub flags: ScopeFlags,
    /// Present once lowering of this scope has finished.
    pub unit: Option<ExecutableUnit>,
}

impl Scope {
    pub fn new(id: ScopeId, kind: ScopeKind, name: Symbol, line: u32, parent: Option<ScopeId>) -> Self {
        Self {
            id,
            kind,
            name,
            line,
            parent,
            closures: Vec::new(),
            flags: ScopeFlags::default(),
            unit: None,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.unit.is_some()
    }
}
