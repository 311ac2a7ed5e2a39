//! Protected-region lowering: begin/rescue/ensure, rescue clause chains,
//! and retry.
//!
//! The emitted shape for a protected construct is:
//!
//! ```text
//! L_region_start:
//!     <protected body>
//!     <clone of cleanup>          ; normal completion only
//!     jump L_end
//! L_dummy_rescue:
//!     e = receive_unwind
//! L_start:
//!     <cleanup, verbatim>
//!     throw e
//! L_end:
//! ```
//!
//! The cleanup body is lowered first, into a buffer, so that exits inside
//! the protected body can clone a fully built cleanup. The dummy rescue
//! catches everything solely to run the cleanup before rethrowing.

use crate::context::{EnsureContext, RescueContext};
use crate::error::{LowerError, LowerResult};
use crate::grammar::{Grammar, ProtectedParts, RescueClauseView};
use lapis_ir::{Instr, Label, Operand, Variable};

use crate::lowerer::Lowerer;

impl<'a, G: Grammar> Lowerer<'a, G> {
    pub(crate) fn lower_protected(&mut self, parts: &ProtectedParts<'_, G>) -> LowerResult<Operand> {
        let has_rescue = parts.has_rescue();

        // Exception state as of entry. Cleanup clones restore it when the
        // construct has rescue clauses, and rescue completion restores it
        // through the same clone path.
        let saved = self.temp();
        let err_info = self.mgr.names.error_info;
        self.add_instr(Instr::GetGlobal {
            result: saved,
            name: err_info,
        });

        let region_start = self.new_label();
        let start = self.new_label();
        let end = self.new_label();
        let dummy_rescue = self.new_label();

        // Cleanup first, captured into a buffer. The pop must happen even
        // when the cleanup body fails to lower.
        self.buffer_stack.push(Vec::new());
        let ensure_ret = self.build_or_nil(parts.ensure_body);
        let captured = self.buffer_stack.pop().unwrap_or_default();
        let ensure_ret = ensure_ret?;

        let ctx = EnsureContext {
            region_start,
            start,
            end,
            dummy_rescue,
            body_rescuer: self.current_rescuer(),
            saved_exception: if has_rescue { Some(saved) } else { None },
            needs_backtrace: true,
            innermost_loop: self.loop_stack.last().map(|l| l.id),
            instrs: captured,
        };
        self.ensure_stack.push(ctx.clone());

        self.add_instr(Instr::Label {
            label: region_start,
        });
        self.add_instr(Instr::ExcRegionStart {
            handler: dummy_rescue,
        });
        self.rescuer_stack.push(dummy_rescue);

        let ensure_expr_value = self.temp();

        let rv = if has_rescue {
            self.lower_rescue_region(parts, end, saved)?
        } else {
            self.build_or_nil(parts.body)?
        };

        self.add_instr(Instr::ExcRegionEnd);
        self.rescuer_stack.pop();

        // A value-producing begin..ensure..end without rescue clauses
        // clones the cleanup on the normal path and jumps past the dummy
        // handler. With rescue clauses, the rescue lowering has already
        // placed those clones on its own completion paths.
        let is_ensure_expr = parts.ensure_body.is_some() && !rv.is_unreachable() && !has_rescue;
        if is_ensure_expr {
            self.add_instr(Instr::Copy {
                dst: ensure_expr_value,
                src: rv.clone(),
            });
            self.clone_ensure_into_host(&ctx);
            self.add_instr(Instr::Jump { target: end });
        }

        // Exits lowered after this point no longer run this cleanup.
        self.ensure_stack.pop();

        // Exceptional path: catch anything, run the cleanup once,
        // verbatim, and rethrow.
        self.add_instr(Instr::Label {
            label: dummy_rescue,
        });
        let exc = self.temp();
        self.add_instr(Instr::ReceiveUnwind { result: exc });
        if parts.ensure_body.is_some() {
            self.replay_ensure_body(&ctx);
        }
        self.add_instr(Instr::Throw {
            value: Operand::Var(exc),
        });

        self.add_instr(Instr::Label { label: end });

        // A cleanup that exits non-locally means control never reaches
        // past this construct, whatever the protected body computed.
        if ensure_ret.is_unreachable() {
            Ok(Operand::Unreachable)
        } else if is_ensure_expr {
            Ok(Operand::Var(ensure_expr_value))
        } else {
            Ok(rv)
        }
    }

    /// The rescue-bearing interior of a protected region. The enclosing
    /// region's end label doubles as the rescue end label.
    fn lower_rescue_region(
        &mut self,
        parts: &ProtectedParts<'_, G>,
        end_label: Label,
        saved: Variable,
    ) -> LowerResult<Operand> {
        let needs_backtrace = !self.can_elide_backtrace(parts);

        let r_begin = self.new_label();
        let rescue_label = self.new_label();
        if let Some(top) = self.ensure_stack.last_mut() {
            top.needs_backtrace = needs_backtrace;
        }

        self.add_instr(Instr::Label { label: r_begin });
        self.add_instr(Instr::ExcRegionStart {
            handler: rescue_label,
        });
        self.rescuer_stack.push(rescue_label);
        self.add_instr(Instr::ToggleBacktrace {
            required: needs_backtrace,
        });

        let mut tmp = Operand::Nil;
        let rv = self.temp();
        if let Some(body) = parts.body {
            tmp = self.build(body)?;
        }

        self.add_instr(Instr::ExcRegionEnd);
        self.rescuer_stack.pop();

        // No exception raised: fall through into the else body.
        if let Some(else_body) = parts.else_body {
            let else_label = self.new_label();
            self.add_instr(Instr::Label { label: else_label });
            tmp = self.build(else_body)?;
        }

        // The retry target is recorded only after the protected body (and
        // else) have been lowered. A retry inside a nested begin/rescue in
        // this body must target that nested region, not this one.
        self.rescue_stack.push(RescueContext {
            entry: r_begin,
            saved_exception: saved,
        });

        if !tmp.is_unreachable() {
            self.add_instr(Instr::Copy { dst: rv, src: tmp });
            if let Some(top) = self.ensure_stack.last().cloned() {
                self.clone_ensure_into_host(&top);
            }
            self.add_instr(Instr::Jump { target: end_label });
        }

        self.add_instr(Instr::Label {
            label: rescue_label,
        });
        // Leaving the suppressed region: capture must be back on before
        // any handler runs.
        if !needs_backtrace {
            self.add_instr(Instr::ToggleBacktrace { required: true });
        }
        let exc = self.temp();
        self.add_instr(Instr::ReceiveException { result: exc });

        let result = self.lower_rescue_clause(&parts.clauses, 0, rv, exc, end_label);
        self.rescue_stack.pop();
        result?;

        Ok(Operand::Var(rv))
    }

    /// One clause of the rescue chain, recursively followed by the rest.
    /// Falling off the last clause's type tests rethrows.
    fn lower_rescue_clause(
        &mut self,
        clauses: &[RescueClauseView<'_, G>],
        idx: usize,
        rv: Variable,
        exc: Variable,
        end_label: Label,
    ) -> LowerResult<()> {
        let Some(clause) = clauses.get(idx) else {
            return Ok(());
        };

        let uncaught = self.new_label();
        let caught = self.new_label();

        if clause.exceptions.is_empty() {
            // A bare rescue matches the default error class.
            let standard = self.mgr.standard_error();
            self.exception_check(standard, exc, caught);
        } else {
            for type_node in &clause.exceptions {
                let test = self.build(type_node)?;
                self.exception_check(test, exc, caught);
            }
        }

        self.add_instr(Instr::Label { label: uncaught });
        if idx + 1 < clauses.len() {
            self.lower_rescue_clause(clauses, idx + 1, rv, exc, end_label)?;
        } else {
            self.add_instr(Instr::Throw {
                value: Operand::Var(exc),
            });
        }

        self.add_instr(Instr::Label { label: caught });
        if let Some(target) = &clause.reference {
            let t = self.temp();
            let err_info = self.mgr.names.error_info;
            self.add_instr(Instr::GetGlobal {
                result: t,
                name: err_info,
            });
            self.store_target(target, Operand::Var(t));
        }

        let x = self.build_or_nil(clause.body)?;
        if !x.is_unreachable() {
            self.add_instr(Instr::Copy { dst: rv, src: x });
            // The enclosing cleanup wraps the whole rescue construct, so
            // each handler's normal completion clones it independently.
            if let Some(top) = self.ensure_stack.last().cloned() {
                self.clone_ensure_into_host(&top);
            }
            self.add_instr(Instr::Jump { target: end_label });
        }
        Ok(())
    }

    fn exception_check(&mut self, test: Operand, exc: Variable, caught: Label) {
        let eqq = self.temp();
        self.add_instr(Instr::RescueEqq {
            result: eqq,
            test,
            value: Operand::Var(exc),
        });
        self.create_branch(Operand::Var(eqq), true, caught);
    }

    /// Whether backtrace capture can be suppressed for this construct's
    /// protected body. Only the simplest shape qualifies: a single bare
    /// clause that binds nothing and whose handler neither reads the
    /// in-flight exception nor has side effects. Decided statically; the
    /// toggle it controls is baked into the emitted instructions.
    fn can_elide_backtrace(&self, parts: &ProtectedParts<'_, G>) -> bool {
        if !self.mgr.options.elide_backtraces {
            return false;
        }
        if !parts.is_modifier && parts.else_body.is_some() {
            return false;
        }
        match parts.clauses.as_slice() {
            [clause] if clause.exceptions.is_empty() && clause.reference.is_none() => {
                match clause.body {
                    None => true,
                    Some(body) => {
                        !G::is_error_info_read(body, &self.mgr.interner)
                            && G::is_side_effect_free(body)
                    }
                }
            }
            _ => false,
        }
    }

    /// retry: jump back to the start of the innermost protected body,
    /// restoring the exception state saved when that region was entered.
    pub(crate) fn lower_retry(&mut self, line: u32) -> LowerResult<Operand> {
        let (entry, saved) = match self.rescue_stack.last() {
            Some(ctx) => (ctx.entry, ctx.saved_exception),
            None => {
                return Err(LowerError::InvalidRetry {
                    file: self.mgr.file().to_string(),
                    line,
                })
            }
        };
        self.add_instr(Instr::ThreadPoll);
        let err_info = self.mgr.names.error_info;
        self.add_instr(Instr::PutGlobal {
            name: err_info,
            value: Operand::Var(saved),
        });
        self.add_instr(Instr::Jump { target: entry });
        // A backward jump: downstream analyses treat this scope as
        // loop-bearing.
        self.flags.has_loops = true;
        Ok(Operand::Nil)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classic::Classic;
    use crate::grammar::BindTarget;
    use lapis_ir::{LowerOptions, Manager, ScopeKind};
    use lapis_syntax::classic::{CallNode, GlobalReadNode, IntNode, Node};
    use lapis_syntax::Span;

    fn setup() -> Manager {
        Manager::new("test.lp", LowerOptions::default())
    }

    fn int(value: i64) -> Node {
        Node::Int(IntNode {
            value,
            span: Span::dummy(),
            newline: false,
        })
    }

    fn parts<'n>(
        body: Option<&'n Node>,
        is_modifier: bool,
        else_body: Option<&'n Node>,
        exceptions: Vec<&'n Node>,
        handler: Option<&'n Node>,
    ) -> ProtectedParts<'n, Classic> {
        ProtectedParts {
            body,
            clauses: vec![RescueClauseView {
                exceptions,
                reference: None,
                body: handler,
            }],
            else_body,
            ensure_body: None,
            is_modifier,
        }
    }

    #[test]
    fn test_elision_requires_simple_handler() {
        let mut mgr = setup();
        let name = mgr.names.script;
        let id = mgr.new_scope(ScopeKind::Script, name, 0, None);
        let lw = Lowerer::<Classic>::new(&mut mgr, id);

        let body = int(1);
        let handler = int(2);
        assert!(lw.can_elide_backtrace(&parts(Some(&body), false, None, vec![], Some(&handler))));
        assert!(lw.can_elide_backtrace(&parts(Some(&body), false, None, vec![], None)));

        // A handler with observable effects keeps the backtrace.
        let call = Node::Call(CallNode {
            receiver: None,
            name: lw.mgr.names.each,
            args: vec![],
            block: None,
            span: Span::dummy(),
            newline: false,
        });
        assert!(!lw.can_elide_backtrace(&parts(Some(&body), false, None, vec![], Some(&call))));
    }

    #[test]
    fn test_elision_blocked_by_else_types_and_error_info() {
        let mut mgr = setup();
        let err_info = mgr.names.error_info;
        let name = mgr.names.script;
        let id = mgr.new_scope(ScopeKind::Script, name, 0, None);
        let lw = Lowerer::<Classic>::new(&mut mgr, id);

        let body = int(1);
        let handler = int(2);
        let else_body = int(3);
        assert!(!lw.can_elide_backtrace(&parts(
            Some(&body),
            false,
            Some(&else_body),
            vec![],
            Some(&handler)
        )));
        // Modifier rescues have no else and stay eligible.
        assert!(lw.can_elide_backtrace(&parts(Some(&body), true, None, vec![], Some(&handler))));

        // An explicit type filter cannot be proven builtin statically.
        let ty = int(0);
        assert!(!lw.can_elide_backtrace(&parts(
            Some(&body),
            false,
            None,
            vec![&ty],
            Some(&handler)
        )));

        // Reading the exception global needs its backtrace.
        let reads = Node::GlobalRead(GlobalReadNode {
            name: err_info,
            span: Span::dummy(),
            newline: false,
        });
        assert!(!lw.can_elide_backtrace(&parts(Some(&body), false, None, vec![], Some(&reads))));

        // Binding the exception hands it out with whatever backtrace it has.
        let bound = ProtectedParts::<'_, Classic> {
            body: Some(&body),
            clauses: vec![RescueClauseView {
                exceptions: vec![],
                reference: Some(BindTarget::Local {
                    name: err_info,
                    depth: 0,
                }),
                body: Some(&handler),
            }],
            else_body: None,
            ensure_body: None,
            is_modifier: false,
        };
        assert!(!lw.can_elide_backtrace(&bound));
    }

    #[test]
    fn test_elision_disabled_by_options() {
        let mut mgr = Manager::new(
            "test.lp",
            LowerOptions {
                coverage: false,
                elide_backtraces: false,
            },
        );
        let name = mgr.names.script;
        let id = mgr.new_scope(ScopeKind::Script, name, 0, None);
        let lw = Lowerer::<Classic>::new(&mut mgr, id);

        let body = int(1);
        assert!(!lw.can_elide_backtrace(&parts(Some(&body), false, None, vec![], None)));
    }
}
