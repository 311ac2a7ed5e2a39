//! Shared state for one lowering run.

use crate::instr::Instr;
use crate::listener::InstrListener;
use crate::operand::Operand;
use crate::scope::{ExecutableUnit, Scope, ScopeId, ScopeKind};
use lapis_syntax::{Interner, Symbol};

/// Knobs affecting emitted IR.
#[derive(Debug, Clone, Copy)]
pub struct LowerOptions {
    /// Annotate line markers for the coverage collector, and emit them even
    /// for method definition lines.
    pub coverage: bool,
    /// Allow suppressing backtrace construction for rescue clauses that
    /// provably never observe it.
    pub elide_backtraces: bool,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            coverage: false,
            elide_backtraces: true,
        }
    }
}

/// Names the lowering engine needs constantly, interned once up front.
#[derive(Debug, Clone, Copy)]
pub struct WellKnown {
    /// `$!`, the in-flight exception global.
    pub error_info: Symbol,
    /// The default rescue filter class.
    pub standard_error: Symbol,
    /// Case/when dispatch method.
    pub case_eq: Symbol,
    /// The iteration method `for` desugars to.
    pub each: Symbol,
    pub script: Symbol,
    pub eval: Symbol,
    pub block: Symbol,
    pub for_block: Symbol,
    pub end_block: Symbol,
}

/// Owns everything shared across scopes while lowering one source unit:
/// the scope arena, the interner, options, and the optional listener.
pub struct Manager {
    file: String,
    scopes: Vec<Scope>,
    pub interner: Interner,
    pub options: LowerOptions,
    pub names: WellKnown,
    listener: Option<Box<dyn InstrListener>>,
}

impl Manager {
    pub fn new(file: impl Into<String>, options: LowerOptions) -> Self {
        let mut interner = Interner::with_capacity(32);
        let names = WellKnown {
            error_info: interner.intern("$!"),
            standard_error: interner.intern("StandardError"),
            case_eq: interner.intern("==="),
            each: interner.intern("each"),
            script: interner.intern("<main>"),
            eval: interner.intern("<eval>"),
            block: interner.intern("<block>"),
            for_block: interner.intern("<for>"),
            end_block: interner.intern("<end>"),
        };
        Self {
            file: file.into(),
            scopes: Vec::new(),
            interner,
            options,
            names,
            listener: None,
        }
    }

    /// Install an instrumentation listener.
    pub fn set_listener(&mut self, listener: Box<dyn InstrListener>) {
        self.listener = Some(listener);
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        self.interner.intern(s)
    }

    /// Allocate a scope. Closure-like scopes are registered with their
    /// lexical parent's closure list immediately.
    pub fn new_scope(
        &mut self,
        kind: ScopeKind,
        name: Symbol,
        line: u32,
        parent: Option<ScopeId>,
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope::new(id, kind, name, line, parent));
        if kind.is_closure() {
            if let Some(p) = parent {
                self.scopes[p.0 as usize].closures.push(id);
            }
        }
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Register `closure` with `host`'s closure list, for cleanup code
    /// cloned into a scope other than the one that built it.
    pub fn add_closure(&mut self, host: ScopeId, closure: ScopeId) {
        let scope = &mut self.scopes[host.0 as usize];
        if !scope.closures.contains(&closure) {
            scope.closures.push(closure);
        }
    }

    /// Nearest enclosing method scope, starting from `from` itself.
    pub fn nearest_method(&self, from: ScopeId) -> Option<ScopeId> {
        let mut cur = Some(from);
        while let Some(id) = cur {
            let scope = self.scope(id);
            if scope.kind == ScopeKind::Method {
                return Some(id);
            }
            cur = scope.parent;
        }
        None
    }

    /// Whether `from` sits lexically inside an END block, looking only
    /// through closure-like scopes.
    pub fn is_within_end(&self, from: ScopeId) -> bool {
        let mut cur = Some(from);
        while let Some(id) = cur {
            let scope = self.scope(id);
            if !scope.kind.is_closure() {
                return false;
            }
            if scope.kind == ScopeKind::EndBlock {
                return true;
            }
            cur = scope.parent;
        }
        false
    }

    /// The default rescue filter as an operand.
    pub fn standard_error(&self) -> Operand {
        Operand::Const(self.names.standard_error)
    }

    /// Freeze a finished scope body. The caller has already folded nested
    /// closure flags into `unit.flags`.
    pub fn freeze(&mut self, id: ScopeId, unit: ExecutableUnit) {
        let scope = &mut self.scopes[id.0 as usize];
        scope.flags = unit.flags;
        scope.unit = Some(unit);
    }

    pub fn notify_instr(&mut self, scope: ScopeId, instr: &Instr, index: usize) {
        if let Some(listener) = self.listener.as_mut() {
            listener.added_instr(scope, instr, index);
        }
    }

    pub fn notify_begin(&mut self, scope: ScopeId) {
        if let Some(listener) = self.listener.as_mut() {
            listener.begin_scope(scope);
        }
    }

    pub fn notify_end(&mut self, scope: ScopeId) {
        if let Some(listener) = self.listener.as_mut() {
            listener.end_scope(scope);
        }
    }
}
