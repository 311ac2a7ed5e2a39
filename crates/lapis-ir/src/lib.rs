//! Lapis IR
//!
//! The linear intermediate representation the tree lowering engine targets:
//! - [`Label`] jump targets and the [`Instr`] vocabulary
//! - [`Operand`] / [`Variable`] value references
//! - Scope records ([`Scope`], [`ScopeKind`], [`ScopeFlags`]) and their
//!   frozen [`ExecutableUnit`] bodies
//! - The [`Manager`], which owns the scope arena, interner, options, and
//!   the optional instrumentation [`InstrListener`]
//!
//! The IR is label-and-branch structured: exception handling appears as
//! region start/end markers naming a handler label, and the later CFG
//! construction turns those regions into protected basic block ranges.

pub mod instr;
pub mod label;
pub mod listener;
pub mod manager;
pub mod operand;
pub mod printer;
pub mod scope;

pub use instr::{CallType, HelperMethod, Instr};
pub use label::Label;
pub use listener::InstrListener;
pub use manager::{LowerOptions, Manager, WellKnown};
pub use operand::{JumpKind, Operand, Truth, Variable};
pub use printer::{format_instr, format_unit};
pub use scope::{ExecutableUnit, Scope, ScopeFlags, ScopeId, ScopeKind};
