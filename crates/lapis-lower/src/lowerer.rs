//! The lowering driver.
//!
//! One `Lowerer` builds one scope's instruction list. It owns:
//! - the instruction sink (`add_instr`), which redirects into a cleanup
//!   buffer while an ensure body is being captured, defers line markers,
//!   and notifies the manager's listener
//! - the context stacks: loops, protected regions, rescue entries, and the
//!   active-rescuer stack seeded with the unrescued sentinel
//! - the exit policy (`emit_ensure_blocks`): which cleanups to clone at a
//!   given early exit, innermost first
//! - cleanup cloning itself, with fresh-label substitution
//!
//! Node-shape lowering lives in the sibling modules (`protect`, `loops`,
//! `returns`, `calls`, `scopes`); value-expression shapes (sequences,
//! conditionals, case) are here because they are pure driver exercises.

use crate::context::{EnsureContext, LoopContext, LoopId, RescueContext};
use crate::error::LowerResult;
use crate::grammar::{BindTarget, CaseArmView, Grammar};
use lapis_ir::{
    CallType, Instr, Label, Manager, Operand, ScopeFlags, ScopeId, ScopeKind, Truth, Variable,
};
use rustc_hash::FxHashMap;
use std::marker::PhantomData;

/// Lowers one scope of one tree into IR.
pub struct Lowerer<'a, G: Grammar> {
    pub(crate) mgr: &'a mut Manager,
    pub(crate) scope: ScopeId,
    pub(crate) kind: ScopeKind,
    pub(crate) parent: Option<ScopeId>,
    pub(crate) instrs: Vec<Instr>,
    pub(crate) next_temp: u32,
    pub(crate) next_label: u32,
    pub(crate) flags: ScopeFlags,
    pub(crate) loop_stack: Vec<LoopContext>,
    pub(crate) ensure_stack: Vec<EnsureContext>,
    pub(crate) rescue_stack: Vec<RescueContext>,
    /// While non-empty, emitted instructions land in the top buffer.
    pub(crate) buffer_stack: Vec<Vec<Instr>>,
    /// Which label currently catches raises at the emission point.
    pub(crate) rescuer_stack: Vec<Label>,
    pub(crate) needs_line_marker: bool,
    pub(crate) last_line: Option<u32>,
    /// Instruction index just past the argument-receiving prologue.
    pub(crate) after_prologue: usize,
    pub(crate) next_loop_id: u32,
    pub(crate) _grammar: PhantomData<G>,
}

impl<'a, G: Grammar> Lowerer<'a, G> {
    pub fn new(mgr: &'a mut Manager, scope: ScopeId) -> Self {
        let record = mgr.scope(scope);
        let kind = record.kind;
        let parent = record.parent;
        Self {
            mgr,
            scope,
            kind,
            parent,
            instrs: Vec::new(),
            next_temp: 0,
            next_label: 0,
            flags: ScopeFlags::default(),
            loop_stack: Vec::new(),
            ensure_stack: Vec::new(),
            rescue_stack: Vec::new(),
            buffer_stack: Vec::new(),
            rescuer_stack: vec![Label::UNRESCUED],
            needs_line_marker: false,
            last_line: None,
            after_prologue: 0,
            next_loop_id: 0,
            _grammar: PhantomData,
        }
    }

    // ---- instruction sink -------------------------------------------------

    /// Append an instruction: into the active cleanup buffer if one is
    /// open, otherwise into the scope's list. A pending line marker is
    /// flushed first, through the same sink.
    pub fn add_instr(&mut self, instr: Instr) {
        if self.needs_line_marker {
            self.needs_line_marker = false;
            if let Some(line) = self.last_line {
                let coverage = self.mgr.options.coverage;
                self.add_instr(Instr::LineNum { line, coverage });
            }
        }
        if let Some(buffer) = self.buffer_stack.last_mut() {
            buffer.push(instr);
        } else {
            match &instr {
                Instr::BreakJump { .. } => self.flags.has_break_instructions = true,
                Instr::NonlocalReturn { .. } => self.flags.has_nonlocal_returns = true,
                _ => {}
            }
            let index = self.instrs.len();
            self.mgr.notify_instr(self.scope, &instr, index);
            self.instrs.push(instr);
        }
    }

    /// Record that lowering reached `line`. Schedules one marker per line
    /// group; a later operation on the same line schedules nothing.
    pub(crate) fn note_line(&mut self, line: u32, is_newline: bool, is_def: bool) {
        if self.last_line != Some(line) {
            if is_newline && (!is_def || self.mgr.options.coverage) {
                self.needs_line_marker = true;
            }
            self.last_line = Some(line);
        }
    }

    // ---- dispatch ---------------------------------------------------------

    /// Lower one node. Line tracking is updated for every node; only
    /// line-starting nodes schedule a marker.
    pub fn build(&mut self, node: &G::Node) -> LowerResult<Operand> {
        self.note_line(G::line(node), G::is_newline(node), G::is_method_def(node));
        G::lower_node(self, node)
    }

    /// Lower an optional node; absence is nil.
    pub fn build_or_nil(&mut self, node: Option<&G::Node>) -> LowerResult<Operand> {
        match node {
            Some(n) => self.build(n),
            None => Ok(Operand::Nil),
        }
    }

    // ---- allocation helpers -----------------------------------------------

    pub(crate) fn temp(&mut self) -> Variable {
        let id = self.next_temp;
        self.next_temp += 1;
        Variable::Temp { id }
    }

    pub(crate) fn new_label(&mut self) -> Label {
        // label 0 is the unrescued sentinel
        self.next_label += 1;
        Label(self.next_label)
    }

    pub(crate) fn current_rescuer(&self) -> Label {
        *self.rescuer_stack.last().unwrap_or(&Label::UNRESCUED)
    }

    /// Copy `value` into a fresh temporary unconditionally. Used to
    /// snapshot values whose source may be mutated by later evaluation.
    pub(crate) fn snapshot(&mut self, value: Operand) -> Operand {
        let t = self.temp();
        self.add_instr(Instr::Copy { dst: t, src: value });
        Operand::Var(t)
    }

    /// Lower a node whose value must keep its position in evaluation
    /// order. Immutable literals can never change, so only other values
    /// are pinned with a copy.
    pub(crate) fn build_with_order(
        &mut self,
        node: &G::Node,
        preserve: bool,
    ) -> LowerResult<Operand> {
        let value = self.build(node)?;
        if preserve && !value.is_immutable_literal() {
            Ok(self.snapshot(value))
        } else {
            Ok(value)
        }
    }

    /// Place `value` in a temporary, reusing it when it already is one.
    pub(crate) fn value_in_temp(&mut self, value: Operand) -> Variable {
        match value {
            Operand::Var(v @ Variable::Temp { .. }) => v,
            other => {
                let t = self.temp();
                self.add_instr(Instr::Copy { dst: t, src: other });
                t
            }
        }
    }

    // ---- branches ---------------------------------------------------------

    /// Emit a conditional transfer to `target` taken when `value`'s
    /// truthiness equals `test`, folding statically known operands into a
    /// jump or a nop.
    pub(crate) fn create_branch(&mut self, value: Operand, test: bool, target: Label) {
        match value.static_truth() {
            Truth::Unknown => {
                if test {
                    self.add_instr(Instr::BranchTrue { value, target });
                } else {
                    self.add_instr(Instr::BranchFalse { value, target });
                }
            }
            truth => {
                let taken = (truth == Truth::True) == test;
                if taken {
                    self.add_instr(Instr::Jump { target });
                } else {
                    self.add_instr(Instr::Nop);
                }
            }
        }
    }

    // ---- cleanup cloning --------------------------------------------------

    /// The exit policy. `None` drains every active protected region (a
    /// return or normal completion); `Some(loop)` drains only regions
    /// nested within that loop, stopping at the first that is not.
    /// Cleanups are cloned innermost first.
    pub(crate) fn emit_ensure_blocks(&mut self, target_loop: Option<LoopId>) {
        let snapshot = self.ensure_stack.clone();
        for ctx in snapshot.iter().rev() {
            if let Some(target) = target_loop {
                if ctx.innermost_loop != Some(target) {
                    break;
                }
            }
            self.clone_ensure_into_host(ctx);
        }
    }

    /// Clone one region's buffered cleanup at the current emission point.
    ///
    /// The exception-state restore runs even for an empty cleanup body; an
    /// empty body otherwise contributes nothing, not even region markers.
    /// Every label the buffer defines is renamed through a fresh-label map
    /// populated before any instruction is copied, and block closures on
    /// cloned calls are re-registered with this scope.
    pub(crate) fn clone_ensure_into_host(&mut self, ctx: &EnsureContext) {
        if let Some(saved) = ctx.saved_exception {
            if !ctx.needs_backtrace {
                self.add_instr(Instr::ToggleBacktrace { required: true });
            }
            let name = self.mgr.names.error_info;
            self.add_instr(Instr::PutGlobal {
                name,
                value: Operand::Var(saved),
            });
        }
        if ctx.instrs.is_empty() {
            return;
        }

        let mut renames: FxHashMap<Label, Label> = FxHashMap::default();
        let entry = self.new_label();
        renames.insert(ctx.start, entry);
        for instr in &ctx.instrs {
            if let Some(label) = instr.defined_label() {
                if !renames.contains_key(&label) {
                    let fresh = self.new_label();
                    renames.insert(label, fresh);
                }
            }
        }

        self.add_instr(Instr::Label { label: entry });
        self.add_instr(Instr::ExcRegionStart {
            handler: ctx.body_rescuer,
        });
        for instr in &ctx.instrs {
            let cloned = instr.with_renamed_labels(&renames);
            if let Some(closure) = cloned.closure_operand() {
                let host = self.scope;
                self.mgr.add_closure(host, closure);
            }
            self.add_instr(cloned);
        }
        self.add_instr(Instr::ExcRegionEnd);
    }

    /// Replay the buffered cleanup verbatim, prefixed by its entry label.
    /// This literal copy backs the exceptional path and runs at most once
    /// per construct execution, so no relabeling is needed.
    pub(crate) fn replay_ensure_body(&mut self, ctx: &EnsureContext) {
        self.add_instr(Instr::Label { label: ctx.start });
        for instr in &ctx.instrs {
            self.add_instr(instr.clone());
        }
    }

    // ---- value-expression shapes ------------------------------------------

    /// A statement sequence: every statement is lowered (dead code after a
    /// definite exit included), the last value is the sequence's value.
    pub(crate) fn lower_statements(&mut self, stmts: &[&G::Node]) -> LowerResult<Operand> {
        let mut rv = Operand::Nil;
        for stmt in stmts {
            rv = self.build(stmt)?;
        }
        Ok(rv)
    }

    pub(crate) fn lower_if(
        &mut self,
        condition: &G::Node,
        then_body: Option<&G::Node>,
        else_body: Option<&G::Node>,
    ) -> LowerResult<Operand> {
        let false_label = self.new_label();
        let done_label = self.new_label();
        let cv = self.build(condition)?;
        self.create_branch(cv, false, false_label);

        let mut result: Option<Variable> = None;
        let then_val = self.build_or_nil(then_body)?;
        let then_unreachable = then_val.is_unreachable();
        if !then_unreachable {
            let r = self.value_in_temp(then_val);
            result = Some(r);
            self.add_instr(Instr::Jump { target: done_label });
        }

        self.add_instr(Instr::Label { label: false_label });
        let else_val = self.build_or_nil(else_body)?;
        let else_unreachable = else_val.is_unreachable();
        if !else_unreachable {
            match result {
                Some(r) => self.add_instr(Instr::Copy {
                    dst: r,
                    src: else_val,
                }),
                None => result = Some(self.value_in_temp(else_val)),
            }
        }
        self.add_instr(Instr::Label { label: done_label });

        match result {
            Some(r) if !(then_unreachable && else_unreachable) => Ok(Operand::Var(r)),
            _ => Ok(Operand::Unreachable),
        }
    }

    pub(crate) fn lower_and(&mut self, left: &G::Node, right: &G::Node) -> LowerResult<Operand> {
        let lv = self.build(left)?;
        if G::always_true(left) {
            return self.build(right);
        }
        if G::always_false(left) {
            return Ok(lv);
        }
        let done = self.new_label();
        let result = self.value_in_temp(lv.clone());
        self.create_branch(lv, false, done);
        let rv = self.build(right)?;
        self.add_instr(Instr::Copy {
            dst: result,
            src: rv,
        });
        self.add_instr(Instr::Label { label: done });
        Ok(Operand::Var(result))
    }

    pub(crate) fn lower_or(&mut self, left: &G::Node, right: &G::Node) -> LowerResult<Operand> {
        let lv = self.build(left)?;
        if G::always_true(left) {
            return Ok(lv);
        }
        if G::always_false(left) {
            return self.build(right);
        }
        let done = self.new_label();
        let result = self.value_in_temp(lv.clone());
        self.create_branch(lv, true, done);
        let rv = self.build(right)?;
        self.add_instr(Instr::Copy {
            dst: result,
            src: rv,
        });
        self.add_instr(Instr::Label { label: done });
        Ok(Operand::Var(result))
    }

    /// Case lowering: the subject is built once, then every arm's tests in
    /// source order branching to per-arm body labels, then the bodies in
    /// the same order. The subjectless form treats each arm value as a
    /// plain condition.
    pub(crate) fn lower_case(
        &mut self,
        subject: Option<&G::Node>,
        arms: &[CaseArmView<'_, G>],
        else_body: Option<&G::Node>,
    ) -> LowerResult<Operand> {
        let subject_val = match subject {
            Some(s) => Some(self.build(s)?),
            None => None,
        };
        let end_label = self.new_label();
        let else_label = self.new_label();
        let result = self.temp();

        let mut body_labels = Vec::with_capacity(arms.len());
        for arm in arms {
            let body_label = self.new_label();
            body_labels.push(body_label);
            for value in &arm.values {
                let v = self.build(value)?;
                match &subject_val {
                    Some(subj) => {
                        let eqq = self.temp();
                        let name = self.mgr.names.case_eq;
                        self.add_instr(Instr::Call {
                            result: eqq,
                            call_type: CallType::Normal,
                            name,
                            receiver: v,
                            args: vec![subj.clone()],
                            block: None,
                        });
                        self.create_branch(Operand::Var(eqq), true, body_label);
                    }
                    None => self.create_branch(v, true, body_label),
                }
            }
        }
        self.add_instr(Instr::Jump { target: else_label });

        for (arm, body_label) in arms.iter().zip(body_labels) {
            self.add_instr(Instr::Label { label: body_label });
            let rv = self.build_or_nil(arm.body)?;
            if !rv.is_unreachable() {
                self.add_instr(Instr::Copy {
                    dst: result,
                    src: rv,
                });
                self.add_instr(Instr::Jump { target: end_label });
            }
        }

        self.add_instr(Instr::Label { label: else_label });
        let rv = self.build_or_nil(else_body)?;
        if !rv.is_unreachable() {
            self.add_instr(Instr::Copy {
                dst: result,
                src: rv,
            });
            self.add_instr(Instr::Jump { target: end_label });
        }
        self.add_instr(Instr::Label { label: end_label });
        Ok(Operand::Var(result))
    }

    // ---- variables and literals -------------------------------------------

    /// String literals are mutable at runtime; each evaluation yields a
    /// fresh copy.
    pub(crate) fn lower_str_literal(&mut self, value: lapis_syntax::Symbol) -> Operand {
        self.snapshot(Operand::Str(value))
    }

    pub(crate) fn lower_global_read(&mut self, name: lapis_syntax::Symbol) -> Operand {
        let t = self.temp();
        self.add_instr(Instr::GetGlobal { result: t, name });
        Operand::Var(t)
    }

    /// Assignments evaluate to the assigned value, not the storage cell, so
    /// later mutation of the cell cannot change an already-computed value.
    pub(crate) fn lower_local_write(
        &mut self,
        name: lapis_syntax::Symbol,
        depth: u32,
        value: &G::Node,
    ) -> LowerResult<Operand> {
        let rv = self.build(value)?;
        self.add_instr(Instr::Copy {
            dst: Variable::Local { name, depth },
            src: rv.clone(),
        });
        Ok(rv)
    }

    pub(crate) fn lower_global_write(
        &mut self,
        name: lapis_syntax::Symbol,
        value: &G::Node,
    ) -> LowerResult<Operand> {
        let rv = self.build(value)?;
        self.add_instr(Instr::PutGlobal {
            name,
            value: rv.clone(),
        });
        Ok(rv)
    }

    /// Store into an assignable location.
    pub(crate) fn store_target(&mut self, target: &BindTarget, value: Operand) {
        match target {
            BindTarget::Local { name, depth } => self.add_instr(Instr::Copy {
                dst: Variable::Local {
                    name: *name,
                    depth: *depth,
                },
                src: value,
            }),
            BindTarget::Global { name } => self.add_instr(Instr::PutGlobal {
                name: *name,
                value,
            }),
        }
    }

    /// Store into a location captured from the enclosing scope, as seen
    /// from one scope further in.
    pub(crate) fn store_target_shifted(&mut self, target: &BindTarget, value: Operand) {
        match target {
            BindTarget::Local { name, depth } => self.add_instr(Instr::Copy {
                dst: Variable::Local {
                    name: *name,
                    depth: *depth + 1,
                },
                src: value,
            }),
            BindTarget::Global { name } => self.add_instr(Instr::PutGlobal {
                name: *name,
                value,
            }),
        }
    }
}
