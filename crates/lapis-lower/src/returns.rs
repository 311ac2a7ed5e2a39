//! Return lowering.
//!
//! What a return becomes depends on the scope holding it. Methods and
//! scripts return directly, draining any active cleanups first. Closures
//! emit a nonlocal return aimed at the nearest lexically enclosing method,
//! checked at runtime since a block may outlive its frame. Module bodies
//! and END blocks cannot return at all and throw the jump error instead.

use crate::error::LowerResult;
use crate::grammar::Grammar;
use lapis_ir::{Instr, JumpKind, Operand, ScopeKind};

use crate::lowerer::Lowerer;

impl<'a, G: Grammar> Lowerer<'a, G> {
    pub(crate) fn lower_return(&mut self, value: Option<&G::Node>) -> LowerResult<Operand> {
        let rv = self.build_or_nil(value)?;
        // a value expression that cannot complete contributes nil
        let rv = if rv.is_unreachable() { Operand::Nil } else { rv };

        if self.kind.is_closure() {
            if self.mgr.is_within_end(self.scope) {
                // END blocks run after the frame to return from is gone
                self.add_instr(Instr::Throw {
                    value: Operand::JumpError(JumpKind::Return),
                });
            } else {
                let method = self.mgr.nearest_method(self.scope);
                // eval and for bodies share their caller's frame, so the
                // jump target is statically known to exist for them
                if self.kind != ScopeKind::Eval && self.kind != ScopeKind::For {
                    self.add_instr(Instr::CheckForLje {
                        defined_in_method: method.is_some(),
                    });
                }
                // a return out of a rescue handler must not leak the
                // in-flight exception into the destination frame
                let restore = self.rescue_stack.last().map(|r| r.saved_exception);
                if let Some(saved) = restore {
                    let name = self.mgr.names.error_info;
                    self.add_instr(Instr::PutGlobal {
                        name,
                        value: Operand::Var(saved),
                    });
                }
                self.add_instr(Instr::NonlocalReturn { value: rv, method });
            }
        } else if self.kind == ScopeKind::Module {
            match self.mgr.nearest_method(self.scope) {
                None => self.add_instr(Instr::Throw {
                    value: Operand::JumpError(JumpKind::Return),
                }),
                Some(method) => self.add_instr(Instr::NonlocalReturn {
                    value: rv,
                    method: Some(method),
                }),
            }
        } else {
            let rv = self.drain_for_return(rv);
            self.add_instr(Instr::Return { value: rv });
        }

        Ok(Operand::Unreachable)
    }

    /// Running cleanups may clobber whatever holds the return value, so it
    /// is pinned into a fresh temporary first. Every active cleanup runs,
    /// innermost first.
    fn drain_for_return(&mut self, rv: Operand) -> Operand {
        if self.ensure_stack.is_empty() {
            return rv;
        }
        let pinned = self.snapshot(rv);
        self.emit_ensure_blocks(None);
        pinned
    }
}
