//! Call lowering.
//!
//! Evaluation order is receiver, then arguments, then the block closure.
//! When the whole call expression contains an assignment anywhere, receiver
//! and argument values are pinned into temporaries as they are produced, so
//! a later assignment cannot retroactively change an earlier operand.
//!
//! A call whose block lowered to a scope containing break instructions is
//! wrapped in a handler region: a break unwinds to the call that pushed the
//! block, and the wrapper turns that unwind back into the call's result.

use crate::error::LowerResult;
use crate::grammar::{CallParts, Grammar};
use lapis_ir::{CallType, HelperMethod, Instr, Operand, ScopeId, Variable};

use crate::lowerer::Lowerer;

impl<'a, G: Grammar> Lowerer<'a, G> {
    pub(crate) fn lower_call(&mut self, parts: &CallParts<'_, G>) -> LowerResult<Operand> {
        let preserve = parts.contains_assignment;
        let receiver = match parts.receiver {
            Some(node) => self.build_with_order(node, preserve)?,
            None => Operand::SelfRef,
        };
        let result = self.temp();

        let mut args = Vec::with_capacity(parts.args.len());
        for arg in &parts.args {
            args.push(self.build_with_order(arg, preserve)?);
        }

        let block = match &parts.block {
            Some(block) => Some(self.lower_block(block)?),
            None => None,
        };

        // Arguments and block may have moved line tracking past the call
        // itself; an exception raised by the call reports the call's line.
        self.note_line(parts.line, parts.newline, false);

        let call_type = if parts.receiver.is_some() {
            CallType::Normal
        } else {
            CallType::Functional
        };
        let call = Instr::Call {
            result,
            call_type,
            name: parts.name,
            receiver,
            args,
            block: block.map(Operand::Closure),
        };
        self.finish_call(result, block, call);

        Ok(Operand::Var(result))
    }

    /// Emit `call`, wrapped in a break handler when its block can break.
    /// The block scope is already frozen at this point, so the flag is
    /// final.
    pub(crate) fn finish_call(&mut self, result: Variable, block: Option<ScopeId>, call: Instr) {
        let can_break = block.is_some_and(|id| self.mgr.scope(id).flags.has_break_instructions);
        if !can_break {
            self.add_instr(call);
            return;
        }

        let r_begin = self.new_label();
        let r_end = self.new_label();
        let rescue = self.new_label();

        self.add_instr(Instr::Label { label: r_begin });
        self.add_instr(Instr::ExcRegionStart { handler: rescue });
        self.add_instr(call);
        self.add_instr(Instr::Jump { target: r_end });
        self.add_instr(Instr::ExcRegionEnd);

        // Anything can land here; the helper re-raises whatever is not a
        // break aimed at this call.
        self.add_instr(Instr::Label { label: rescue });
        let exc = self.temp();
        self.add_instr(Instr::ReceiveUnwind { result: exc });
        self.add_instr(Instr::RuntimeHelper {
            result,
            helper: HelperMethod::HandlePropagatedBreak,
            args: vec![Operand::Var(exc)],
        });
        self.add_instr(Instr::Label { label: r_end });
    }
}
