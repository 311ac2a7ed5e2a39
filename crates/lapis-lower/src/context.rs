//! Compile-time context records for active control-flow constructs.
//!
//! Three parallel stacks of these mirror the lexical nesting of the source:
//! loops, protected (ensure) regions, and rescue entries. The records exist
//! only during lowering; the labels they hand out persist into the IR.

use lapis_ir::{Instr, Label, Variable};

/// Identity of one lexical loop, for matching ensure regions to the loop
/// they are nested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopId(pub u32);

/// One active loop.
#[derive(Debug, Clone)]
pub struct LoopContext {
    pub id: LoopId,
    /// Head-condition re-test entry.
    pub loop_start: Label,
    /// Break target. Only emitted when a break targets this loop.
    pub loop_end: Label,
    /// Redo target, after the head test.
    pub iter_start: Label,
    /// Next target. Only emitted when a next targets this loop.
    pub iter_end: Label,
    /// The loop expression's value slot.
    pub result: Variable,
    pub has_break: bool,
    pub has_next: bool,
}

/// One active protected region (an `ensure` construct, fused with its
/// rescue when the protected body has one).
///
/// The cleanup body is lowered into `instrs` before the protected body is
/// lowered, so any early exit inside the protected body can clone a
/// fully-built cleanup.
#[derive(Debug, Clone)]
pub struct EnsureContext {
    /// Label opening the whole protected region.
    pub region_start: Label,
    /// Entry label of the verbatim cleanup copy on the exceptional path.
    pub start: Label,
    /// Label following the whole construct; shared with the rescue clauses.
    pub end: Label,
    /// Handler that catches everything escaping the protected body, runs
    /// the cleanup, and re-raises.
    pub dummy_rescue: Label,
    /// The rescuer that was active when this region was created. Cleanup
    /// clones are wrapped in a region naming it, so cloned cleanup keeps
    /// its original handler wherever it lands.
    pub body_rescuer: Label,
    /// Where the in-flight exception was saved at region entry; recorded
    /// only when the protected construct contains a rescue, and restored
    /// before each cleanup clone.
    pub saved_exception: Option<Variable>,
    /// Verdict of the rescue clause's backtrace analysis. True until a
    /// rescue proves it can skip backtrace construction.
    pub needs_backtrace: bool,
    /// The loop this region is nested in, if any. Break/next drain only
    /// regions whose innermost loop is the one being exited.
    pub innermost_loop: Option<LoopId>,
    /// The buffered cleanup body.
    pub instrs: Vec<Instr>,
}

/// One active rescue entry: where `retry` goes back to, and the slot
/// holding the exception state to restore first.
#[derive(Debug, Clone)]
pub struct RescueContext {
    pub entry: Label,
    pub saved_exception: Variable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_ids_compare_by_value() {
        assert_eq!(LoopId(1), LoopId(1));
        assert_ne!(LoopId(1), LoopId(2));
    }

    #[test]
    fn test_ensure_context_clones_buffer() {
        let ctx = EnsureContext {
            region_start: Label(1),
            start: Label(2),
            end: Label(3),
            dummy_rescue: Label(4),
            body_rescuer: Label::UNRESCUED,
            saved_exception: None,
            needs_backtrace: true,
            innermost_loop: None,
            instrs: vec![Instr::ThreadPoll],
        };
        let copy = ctx.clone();
        assert_eq!(copy.instrs, vec![Instr::ThreadPoll]);
        assert!(copy.body_rescuer.is_unrescued());
    }
}
