//! Loop lowering and the in-loop jumps.
//!
//! A conditional loop emits five labels:
//!
//! ```text
//! L_loop_start:                  ; tail-tested loops fall straight through
//!     branch !cond L_setup_result
//! L_iter_start:                  ; redo target
//!     thread_poll
//!     <body>
//! L_iter_end:                    ; next target, emitted only when used
//!     jump L_loop_start          ; or the tail test, branching to iter_start
//! L_setup_result:
//!     result = nil
//! L_loop_end:                    ; break target, emitted only when used
//! ```
//!
//! `for` is not a loop here at all: it lowers to an `each` call carrying the
//! body as a child scope, so its jumps take the closure paths.

use crate::context::{LoopContext, LoopId};
use crate::error::{LowerError, LowerResult};
use crate::grammar::{BindTarget, Grammar};
use lapis_ir::{CallType, Instr, Operand, ScopeKind};

use crate::lowerer::Lowerer;

impl<'a, G: Grammar> Lowerer<'a, G> {
    pub(crate) fn lower_conditional_loop(
        &mut self,
        condition: &G::Node,
        body: Option<&G::Node>,
        is_while: bool,
        eval_at_start: bool,
    ) -> LowerResult<Operand> {
        // A head-tested loop that statically never runs is dropped whole.
        // The condition is still lowered for its effects.
        if eval_at_start
            && (is_while && G::always_false(condition) || !is_while && G::always_true(condition))
        {
            self.build(condition)?;
            return Ok(Operand::Nil);
        }

        self.flags.has_loops = true;

        let result = self.temp();
        let id = LoopId(self.next_loop_id);
        self.next_loop_id += 1;
        let loop_start = self.new_label();
        let loop_end = self.new_label();
        let iter_start = self.new_label();
        let iter_end = self.new_label();
        let setup_result = self.new_label();

        self.loop_stack.push(LoopContext {
            id,
            loop_start,
            loop_end,
            iter_start,
            iter_end,
            result,
            has_break: false,
            has_next: false,
        });

        self.add_instr(Instr::Label { label: loop_start });
        if eval_at_start {
            let cv = self.build(condition)?;
            self.create_branch(cv, !is_while, setup_result);
        }

        // redo re-enters here, past the condition
        self.add_instr(Instr::Label { label: iter_start });
        self.add_instr(Instr::ThreadPoll);
        if let Some(body) = body {
            self.build(body)?;
        }

        // Emitted only when some next targeted this loop; the flag is read
        // before the tail condition, which stays inside the loop body range.
        if self.loop_stack.last().is_some_and(|l| l.has_next) {
            self.add_instr(Instr::Label { label: iter_end });
        }
        if eval_at_start {
            self.add_instr(Instr::Jump { target: loop_start });
        } else {
            let cv = self.build(condition)?;
            self.create_branch(cv, is_while, iter_start);
        }

        // Normal exit always produces nil. Breaks land past this copy with
        // the result already written.
        self.add_instr(Instr::Label {
            label: setup_result,
        });
        self.add_instr(Instr::Copy {
            dst: result,
            src: Operand::Nil,
        });
        if self.loop_stack.last().is_some_and(|l| l.has_break) {
            self.add_instr(Instr::Label { label: loop_end });
        }
        self.loop_stack.pop();

        Ok(Operand::Var(result))
    }

    /// `for` desugars to an `each` call whose block is the body in its own
    /// scope. The loop variable lives in this scope and is assigned from
    /// inside the child.
    pub(crate) fn lower_for(
        &mut self,
        iterable: &G::Node,
        variable: &BindTarget,
        body: Option<&G::Node>,
        line: u32,
    ) -> LowerResult<Operand> {
        let result = self.temp();
        let receiver = self.build(iterable)?;
        let closure = self.lower_for_body(variable, body, line)?;
        let name = self.mgr.names.each;
        let call = Instr::Call {
            result,
            call_type: CallType::Normal,
            name,
            receiver,
            args: vec![],
            block: Some(Operand::Closure(closure)),
        };
        self.finish_call(result, Some(closure), call);
        Ok(Operand::Var(result))
    }

    pub(crate) fn lower_break(
        &mut self,
        value: Option<&G::Node>,
        line: u32,
    ) -> LowerResult<Operand> {
        let target = self
            .loop_stack
            .last()
            .map(|l| (l.id, l.result, l.loop_end));

        if let Some((id, result, loop_end)) = target {
            // Cleanups belonging to this loop run before the jump out.
            if !self.ensure_stack.is_empty() {
                self.emit_ensure_blocks(Some(id));
            }
            if let Some(top) = self.loop_stack.last_mut() {
                top.has_break = true;
            }
            let rv = self.build_or_nil(value)?;
            self.add_instr(Instr::Copy {
                dst: result,
                src: rv,
            });
            self.add_instr(Instr::Jump { target: loop_end });
        } else if self.kind.is_closure() {
            if self.kind == ScopeKind::Eval {
                return Err(LowerError::EscapeFromEval {
                    keyword: "break",
                    file: self.mgr.file().to_string(),
                    line,
                });
            }
            match self.parent {
                Some(scope) => {
                    let rv = self.build_or_nil(value)?;
                    self.add_instr(Instr::BreakJump { value: rv, scope });
                }
                None => {
                    return Err(LowerError::InvalidBreak {
                        file: self.mgr.file().to_string(),
                        line,
                    })
                }
            }
        } else {
            return Err(LowerError::InvalidBreak {
                file: self.mgr.file().to_string(),
                line,
            });
        }

        Ok(Operand::Unreachable)
    }

    pub(crate) fn lower_next(
        &mut self,
        value: Option<&G::Node>,
        line: u32,
    ) -> LowerResult<Operand> {
        let rv = self.build_or_nil(value)?;

        // Inside a loop only that loop's cleanups run; a closure-level next
        // leaves the whole scope and drains everything.
        if !self.ensure_stack.is_empty() {
            let target = self.loop_stack.last().map(|l| l.id);
            self.emit_ensure_blocks(target);
        }

        let iter_end = match self.loop_stack.last_mut() {
            Some(top) => {
                top.has_next = true;
                Some(top.iter_end)
            }
            None => None,
        };
        if let Some(iter_end) = iter_end {
            self.add_instr(Instr::Jump { target: iter_end });
        } else {
            self.add_instr(Instr::ThreadPoll);
            if self.kind == ScopeKind::Eval {
                return Err(LowerError::EscapeFromEval {
                    keyword: "next",
                    file: self.mgr.file().to_string(),
                    line,
                });
            } else if self.kind.is_closure() {
                // next in a block is a return from the block call
                self.add_instr(Instr::Return { value: rv });
            } else {
                return Err(LowerError::InvalidNext {
                    file: self.mgr.file().to_string(),
                    line,
                });
            }
        }

        Ok(Operand::Unreachable)
    }

    pub(crate) fn lower_redo(&mut self, line: u32) -> LowerResult<Operand> {
        if !self.ensure_stack.is_empty() {
            let target = self.loop_stack.last().map(|l| l.id);
            self.emit_ensure_blocks(target);
        }

        let iter_start = self.loop_stack.last().map(|l| l.iter_start);
        if let Some(iter_start) = iter_start {
            self.add_instr(Instr::Jump { target: iter_start });
        } else if self.kind == ScopeKind::Eval {
            return Err(LowerError::EscapeFromEval {
                keyword: "redo",
                file: self.mgr.file().to_string(),
                line,
            });
        } else if self.kind.is_closure() {
            // Restart the scope body. The re-entry label is spliced in just
            // past the argument prologue, directly into the scope list so a
            // redo inside a cleanup buffer still patches the real body.
            self.add_instr(Instr::ThreadPoll);
            let start = self.new_label();
            self.instrs
                .insert(self.after_prologue, Instr::Label { label: start });
            self.add_instr(Instr::Jump { target: start });
        } else {
            return Err(LowerError::InvalidRedo {
                file: self.mgr.file().to_string(),
                line,
            });
        }

        Ok(Operand::Nil)
    }
}
