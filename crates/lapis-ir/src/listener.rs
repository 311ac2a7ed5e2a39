//! Instrumentation hooks for IR construction.

use crate::instr::Instr;
use crate::scope::ScopeId;

/// Observer notified as the lowering engine emits instructions.
///
/// Purely additive: the engine behaves identically with or without a
/// listener installed. Buffered cleanup instructions are reported when they
/// reach a scope's instruction list, not while they sit in a buffer.
pub trait InstrListener {
    /// `instr` was appended to `scope`'s instruction list at `index`.
    fn added_instr(&mut self, scope: ScopeId, instr: &Instr, index: usize);

    /// Lowering of `scope`'s body started.
    fn begin_scope(&mut self, _scope: ScopeId) {}

    /// Lowering of `scope`'s body finished and its unit was frozen.
    fn end_scope(&mut self, _scope: ScopeId) {}
}
