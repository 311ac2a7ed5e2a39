//! Scope roots and child-scope creation.
//!
//! Every scope gets its own `Lowerer`, so jump contexts never leak across
//! scope boundaries: a loop in the parent is invisible to a break inside a
//! block, which takes the closure path instead. The one exception is a
//! BEGIN body, which executes in the host scope and is lowered on the host
//! lowerer with its emission state swapped out.
//!
//! Finalizing a scope folds the frozen flags of its child closures into its
//! own (a closure that breaks makes its host a break receiver), applies the
//! unwind wrappers those flags call for, and freezes the instruction list
//! into the scope record.

use crate::error::LowerResult;
use crate::grammar::{BindTarget, BlockParts, Grammar};
use lapis_ir::{
    ExecutableUnit, HelperMethod, Instr, Label, Manager, Operand, ScopeId, ScopeKind, Variable,
};
use lapis_syntax::Symbol;

use crate::lowerer::Lowerer;

/// Lower a whole script into `mgr`, returning the frozen root scope.
pub fn lower_script<G: Grammar>(
    mgr: &mut Manager,
    body: Option<&G::Node>,
) -> LowerResult<ScopeId> {
    let name = mgr.names.script;
    let id = mgr.new_scope(ScopeKind::Script, name, 0, None);
    mgr.notify_begin(id);
    let mut lw = Lowerer::<G>::new(mgr, id);
    lw.lower_root_inner(body)?;
    Ok(id)
}

/// Lower an eval unit. `parent` is the live scope the eval string runs
/// within, when known.
pub fn lower_eval<G: Grammar>(
    mgr: &mut Manager,
    body: Option<&G::Node>,
    line: u32,
    parent: Option<ScopeId>,
) -> LowerResult<ScopeId> {
    let name = mgr.names.eval;
    let id = mgr.new_scope(ScopeKind::Eval, name, line, parent);
    mgr.notify_begin(id);
    let mut lw = Lowerer::<G>::new(mgr, id);
    lw.lower_eval_root(body)?;
    Ok(id)
}

/// Argument prologue shape for a block-like scope.
pub(crate) enum IterArgs<'n> {
    /// Ordinary block parameters, received into scope-local slots.
    Params(&'n [Symbol]),
    /// A for-loop variable, which lives in the enclosing scope.
    ForTarget(&'n BindTarget),
}

impl<'a, G: Grammar> Lowerer<'a, G> {
    // ---- roots ------------------------------------------------------------

    pub(crate) fn lower_root_inner(&mut self, body: Option<&G::Node>) -> LowerResult<()> {
        let rv = self.build_or_nil(body)?;
        self.emit_scope_return(rv);
        self.fold_closure_flags();
        if self.flags.can_receive_nonlocal_returns {
            self.wrap_nonlocal_return();
        }
        self.freeze_unit(0);
        Ok(())
    }

    pub(crate) fn lower_eval_root(&mut self, body: Option<&G::Node>) -> LowerResult<()> {
        // eval bodies always report their position, even before any
        // line-starting node is reached
        let line = self.mgr.scope(self.scope).line;
        self.add_instr(Instr::LineNum {
            line,
            coverage: false,
        });
        self.after_prologue = self.instrs.len() - 1;
        let rv = self.build_or_nil(body)?;
        self.emit_scope_return(rv);
        self.fold_closure_flags();
        // one spare slot for the eval result handoff
        self.freeze_unit(1);
        Ok(())
    }

    fn lower_method_body(&mut self, params: &[Symbol], body: Option<&G::Node>) -> LowerResult<()> {
        for (i, name) in params.iter().enumerate() {
            self.add_instr(Instr::ReceiveArg {
                result: Variable::Local {
                    name: *name,
                    depth: 0,
                },
                index: i as u32,
            });
        }
        let rv = self.build_or_nil(body)?;
        self.emit_scope_return(rv);
        self.fold_closure_flags();
        if self.flags.can_receive_nonlocal_returns {
            self.wrap_nonlocal_return();
        }
        self.freeze_unit(0);
        Ok(())
    }

    fn lower_module_root(&mut self, body: Option<&G::Node>) -> LowerResult<()> {
        let rv = self.build_or_nil(body)?;
        self.emit_scope_return(rv);
        self.fold_closure_flags();
        self.freeze_unit(0);
        Ok(())
    }

    /// The implicit scope return. A body ending in a definite exit still
    /// gets one, contributing nil.
    fn emit_scope_return(&mut self, rv: Operand) {
        let value = if rv.is_unreachable() {
            Operand::Nil
        } else {
            rv
        };
        self.add_instr(Instr::Return { value });
    }

    fn lower_iter_body(&mut self, args: IterArgs<'_>, body: Option<&G::Node>) -> LowerResult<()> {
        match args {
            IterArgs::Params(params) => {
                for (i, name) in params.iter().enumerate() {
                    self.add_instr(Instr::ReceiveArg {
                        result: Variable::Local {
                            name: *name,
                            depth: 0,
                        },
                        index: i as u32,
                    });
                }
            }
            IterArgs::ForTarget(target) => {
                let t = self.temp();
                self.add_instr(Instr::ReceiveArg {
                    result: t,
                    index: 0,
                });
                self.store_target_shifted(target, Operand::Var(t));
            }
        }
        // redo's re-entry point; a spliced BEGIN body would land here too
        self.after_prologue = self.instrs.len();

        let rv = self.build_or_nil(body)?;
        // a body that cannot complete (say, returns on all paths) gets no
        // implicit block return
        if !rv.is_unreachable() {
            self.add_instr(Instr::Return { value: rv });
        }
        // Whether a block becomes a lambda is a runtime property, so every
        // plain block carries the lambda unwind epilogue.
        if self.kind == ScopeKind::Closure {
            self.wrap_lambda_handlers();
        }
        self.fold_closure_flags();
        self.freeze_unit(0);
        Ok(())
    }

    fn lower_end_body(&mut self, body: Option<&G::Node>) -> LowerResult<()> {
        self.build_or_nil(body)?;
        // END blocks have no return value of their own
        self.add_instr(Instr::Return {
            value: Operand::Nil,
        });
        self.fold_closure_flags();
        self.freeze_unit(0);
        Ok(())
    }

    // ---- child scope constructors -----------------------------------------

    pub(crate) fn lower_block(&mut self, parts: &BlockParts<'_, G>) -> LowerResult<ScopeId> {
        let name = self.mgr.names.block;
        let id = self
            .mgr
            .new_scope(ScopeKind::Closure, name, parts.line, Some(self.scope));
        self.mgr.notify_begin(id);
        let mut child = Lowerer::<G>::new(&mut *self.mgr, id);
        child.lower_iter_body(IterArgs::Params(&parts.params), parts.body)?;
        Ok(id)
    }

    pub(crate) fn lower_for_body(
        &mut self,
        variable: &BindTarget,
        body: Option<&G::Node>,
        line: u32,
    ) -> LowerResult<ScopeId> {
        let name = self.mgr.names.for_block;
        let id = self
            .mgr
            .new_scope(ScopeKind::For, name, line, Some(self.scope));
        self.mgr.notify_begin(id);
        let mut child = Lowerer::<G>::new(&mut *self.mgr, id);
        child.lower_iter_body(IterArgs::ForTarget(variable), body)?;
        Ok(id)
    }

    pub(crate) fn lower_method_def(
        &mut self,
        name: Symbol,
        params: &[Symbol],
        body: Option<&G::Node>,
        line: u32,
    ) -> LowerResult<Operand> {
        let id = self
            .mgr
            .new_scope(ScopeKind::Method, name, line, Some(self.scope));
        self.mgr.notify_begin(id);
        let mut child = Lowerer::<G>::new(&mut *self.mgr, id);
        child.lower_method_body(params, body)?;
        self.add_instr(Instr::DefineMethod { name, body: id });
        Ok(Operand::Sym(name))
    }

    pub(crate) fn lower_module(
        &mut self,
        name: Symbol,
        body: Option<&G::Node>,
        line: u32,
    ) -> LowerResult<Operand> {
        let result = self.temp();
        let id = self
            .mgr
            .new_scope(ScopeKind::Module, name, line, Some(self.scope));
        self.add_instr(Instr::DefineModule {
            result,
            name,
            body: id,
        });
        self.mgr.notify_begin(id);
        let mut child = Lowerer::<G>::new(&mut *self.mgr, id);
        child.lower_module_root(body)?;
        Ok(Operand::Var(result))
    }

    /// END: the body becomes a closure registered for shutdown, producing
    /// nothing at its definition site.
    pub(crate) fn lower_post_exe(
        &mut self,
        body: Option<&G::Node>,
        line: u32,
    ) -> LowerResult<Operand> {
        let name = self.mgr.names.end_block;
        let id = self
            .mgr
            .new_scope(ScopeKind::EndBlock, name, line, Some(self.scope));
        self.mgr.notify_begin(id);
        let mut child = Lowerer::<G>::new(&mut *self.mgr, id);
        child.lower_end_body(body)?;
        self.add_instr(Instr::RecordEndBlock { closure: id });
        Ok(Operand::Nil)
    }

    /// BEGIN: the body runs in this scope, hoisted to the front. It is
    /// lowered here with fresh emission state so no jump context and no
    /// pending line marker bleeds in either direction, then spliced in at
    /// the prologue boundary.
    pub(crate) fn lower_pre_exe(&mut self, body: Option<&G::Node>) -> LowerResult<Operand> {
        let host_instrs = std::mem::take(&mut self.instrs);
        let host_loops = std::mem::take(&mut self.loop_stack);
        let host_ensures = std::mem::take(&mut self.ensure_stack);
        let host_rescues = std::mem::take(&mut self.rescue_stack);
        let host_buffers = std::mem::take(&mut self.buffer_stack);
        let host_rescuers =
            std::mem::replace(&mut self.rescuer_stack, vec![Label::UNRESCUED]);
        let host_marker = self.needs_line_marker;
        let host_line = self.last_line;
        let host_prologue = self.after_prologue;
        self.needs_line_marker = false;
        self.last_line = None;
        self.after_prologue = 0;

        let result = self.build_or_nil(body);

        let hoisted = std::mem::replace(&mut self.instrs, host_instrs);
        self.loop_stack = host_loops;
        self.ensure_stack = host_ensures;
        self.rescue_stack = host_rescues;
        self.buffer_stack = host_buffers;
        self.rescuer_stack = host_rescuers;
        self.needs_line_marker = host_marker;
        self.last_line = host_line;
        self.after_prologue = host_prologue;
        result?;

        let at = self.after_prologue;
        let count = hoisted.len();
        self.instrs.splice(at..at, hoisted);
        self.after_prologue += count;
        Ok(Operand::Nil)
    }

    // ---- finalization -----------------------------------------------------

    /// Derived flags from already-frozen child closures.
    fn fold_closure_flags(&mut self) {
        let children = self.mgr.scope(self.scope).closures.clone();
        for child in children {
            let cf = self.mgr.scope(child).flags;
            if cf.has_break_instructions || cf.can_receive_breaks {
                self.flags.can_receive_breaks = true;
            }
            if cf.has_nonlocal_returns || cf.can_receive_nonlocal_returns {
                self.flags.can_receive_nonlocal_returns = true;
            }
        }
    }

    /// Wrap the entire body so a break or return raised out of a lambda
    /// invocation of this block is resolved here instead of unwinding
    /// further.
    fn wrap_lambda_handlers(&mut self) {
        let r_end = self.new_label();
        let rescue = self.new_label();

        self.instrs.insert(0, Instr::ExcRegionStart { handler: rescue });
        self.add_instr(Instr::ExcRegionEnd);
        self.add_instr(Instr::Label { label: rescue });
        let exc = self.temp();
        self.add_instr(Instr::ReceiveUnwind { result: exc });
        let ret = self.temp();
        self.add_instr(Instr::RuntimeHelper {
            result: ret,
            helper: HelperMethod::HandleBreakAndReturnsInLambda,
            args: vec![Operand::Var(exc)],
        });
        self.add_instr(Instr::ReturnOrRethrowSavedExc {
            value: Operand::Var(ret),
        });
        self.add_instr(Instr::Label { label: r_end });
    }

    /// Wrap the entire body so a non-local return aimed at this method is
    /// caught and turned into an ordinary return.
    fn wrap_nonlocal_return(&mut self) {
        let r_begin = self.new_label();
        let r_end = self.new_label();
        let geb = self.new_label();

        self.instrs.insert(0, Instr::ExcRegionStart { handler: geb });
        self.instrs.insert(0, Instr::Label { label: r_begin });
        self.add_instr(Instr::ExcRegionEnd);
        self.add_instr(Instr::Label { label: geb });
        let exc = self.temp();
        self.add_instr(Instr::ReceiveUnwind { result: exc });
        let ret = self.temp();
        self.add_instr(Instr::RuntimeHelper {
            result: ret,
            helper: HelperMethod::HandleNonlocalReturn,
            args: vec![Operand::Var(exc)],
        });
        self.add_instr(Instr::Return {
            value: Operand::Var(ret),
        });
        self.add_instr(Instr::Label { label: r_end });
    }

    fn freeze_unit(&mut self, spare_temps: u32) {
        let unit = ExecutableUnit {
            instrs: std::mem::take(&mut self.instrs),
            temp_count: self.next_temp + spare_temps,
            flags: self.flags,
        };
        self.mgr.freeze(self.scope, unit);
        self.mgr.notify_end(self.scope);
    }
}
