//! The instruction vocabulary.
//!
//! Instructions fall into five groups the lowering engine cares about:
//! label markers, branches/jumps, exception region markers, calls (whose
//! results can carry non-local exit signals), and everything else. Cleanup
//! cloning needs two hooks beyond that grouping: consistent renaming of
//! label references ([`Instr::with_renamed_labels`]) and detection of a
//! closure operand on a cloned call ([`Instr::closure_operand`]).

use crate::label::Label;
use crate::operand::{Operand, Variable};
use crate::scope::ScopeId;
use lapis_syntax::Symbol;
use rustc_hash::FxHashMap;

/// How a call resolves its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    /// Explicit receiver: `recv.name(...)`.
    Normal,
    /// Receiverless call against `self`: `name(...)`.
    Functional,
}

/// Runtime helper routines the lowered program dispatches into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperMethod {
    /// Turn a break that escaped through a frame into the call's result,
    /// or re-raise it if it belongs further out.
    HandlePropagatedBreak,
    /// Unwrap a non-local return targeting this method, or re-raise.
    HandleNonlocalReturn,
    /// Lambda semantics for break/return raised out of a block body.
    HandleBreakAndReturnsInLambda,
}

/// One IR instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// No operation; left behind by statically folded branches.
    Nop,
    /// Position marker for jumps.
    Label { label: Label },
    Jump { target: Label },
    /// Transfer to `target` when `value` is truthy.
    BranchTrue { value: Operand, target: Label },
    /// Transfer to `target` when `value` is falsy.
    BranchFalse { value: Operand, target: Label },
    Copy { dst: Variable, src: Operand },
    /// Source line marker; `coverage` marks lines the coverage collector
    /// should count.
    LineNum { line: u32, coverage: bool },
    /// Cooperative scheduling checkpoint.
    ThreadPoll,
    Call {
        result: Variable,
        call_type: CallType,
        name: Symbol,
        receiver: Operand,
        args: Vec<Operand>,
        block: Option<Operand>,
    },
    RuntimeHelper {
        result: Variable,
        helper: HelperMethod,
        args: Vec<Operand>,
    },
    /// Ordinary return from the current scope.
    Return { value: Operand },
    /// Return targeting the lexically enclosing method, unwinding through
    /// intervening frames. `method` is absent when no enclosing method was
    /// found statically.
    NonlocalReturn {
        value: Operand,
        method: Option<ScopeId>,
    },
    /// Structured break out of a block, returning from `scope` (the scope
    /// the block was defined in).
    BreakJump { value: Operand, scope: ScopeId },
    /// Runtime guard preceding a non-local return: raises a local jump
    /// error when the defining frame is gone.
    CheckForLje { defined_in_method: bool },
    /// Open an exception region; raises inside it transfer to `handler`.
    ExcRegionStart { handler: Label },
    /// Close the innermost open exception region.
    ExcRegionEnd,
    /// Receive the language-level exception at a rescue handler.
    ReceiveException { result: Variable },
    /// Receive the raw in-flight unwind value (exception or jump signal)
    /// at a cleanup or wrapper handler.
    ReceiveUnwind { result: Variable },
    /// (Re-)raise a value.
    Throw { value: Operand },
    /// Exception-type test: `result = test === value` with exception
    /// matching semantics.
    RescueEqq {
        result: Variable,
        test: Operand,
        value: Operand,
    },
    /// Enable or suppress backtrace generation for raises that follow.
    ToggleBacktrace { required: bool },
    GetGlobal { result: Variable, name: Symbol },
    PutGlobal { name: Symbol, value: Operand },
    /// Prologue: receive the argument at `index` into `result`.
    ReceiveArg { result: Variable, index: u32 },
    /// Define a method whose body is the given scope.
    DefineMethod { name: Symbol, body: ScopeId },
    /// Define (or reopen) a module; yields the module body's value.
    DefineModule {
        result: Variable,
        name: Symbol,
        body: ScopeId,
    },
    /// Register an END block closure to run at interpreter shutdown.
    RecordEndBlock { closure: ScopeId },
    /// Lambda wrapper epilogue: return `value`, unless a saved exception is
    /// pending, in which case re-raise it.
    ReturnOrRethrowSavedExc { value: Operand },
}

impl Instr {
    /// Clone this instruction with every label reference substituted through
    /// `renames`. Labels absent from the map are kept, so references out of
    /// a cloned region still target the host's labels.
    pub fn with_renamed_labels(&self, renames: &FxHashMap<Label, Label>) -> Instr {
        let rename = |l: &Label| *renames.get(l).unwrap_or(l);
        match self {
            Instr::Label { label } => Instr::Label {
                label: rename(label),
            },
            Instr::Jump { target } => Instr::Jump {
                target: rename(target),
            },
            Instr::BranchTrue { value, target } => Instr::BranchTrue {
                value: value.clone(),
                target: rename(target),
            },
            Instr::BranchFalse { value, target } => Instr::BranchFalse {
                value: value.clone(),
                target: rename(target),
            },
            Instr::ExcRegionStart { handler } => Instr::ExcRegionStart {
                handler: rename(handler),
            },
            other => other.clone(),
        }
    }

    /// The closure operand of a call, if any. Cloning uses this to
    /// re-register block closures with the scope receiving the clone.
    pub fn closure_operand(&self) -> Option<ScopeId> {
        match self {
            Instr::Call {
                block: Some(Operand::Closure(id)),
                ..
            } => Some(*id),
            _ => None,
        }
    }

    /// Whether this instruction defines a label position.
    pub fn defined_label(&self) -> Option<Label> {
        match self {
            Instr::Label { label } => Some(*label),
            _ => None,
        }
    }
}
