//! Lapis Lowering
//!
//! Walks a syntax tree scope by scope and emits the linear IR defined by
//! `lapis-ir`, one frozen executable unit per scope:
//! - [`Grammar`] abstracts over tree taxonomies; [`Classic`] and [`Mica`]
//!   are the two shipped adapters
//! - [`Lowerer`] is the per-scope driver holding the emission state and
//!   the jump context stacks
//! - [`lower_script`] / [`lower_eval`] are the entry points
//! - [`LowerError`] covers the static jump errors; [`diagnostic`] renders
//!   them for terminals and tooling
//!
//! Lowering is single pass. Structured control flow (loops, protected
//! regions, non-local jumps) becomes labels, branches, and exception
//! region markers as it is walked, and cleanup bodies are re-emitted at
//! every exit that crosses them.

mod calls;
pub mod classic;
mod context;
pub mod diagnostic;
pub mod error;
pub mod grammar;
mod loops;
mod lowerer;
pub mod mica;
mod protect;
mod returns;
pub mod scopes;

pub use classic::Classic;
pub use diagnostic::Diagnostic;
pub use error::{LowerError, LowerResult};
pub use grammar::{
    BindTarget, BlockParts, CallParts, CaseArmView, Grammar, ProtectedParts, RescueClauseView,
};
pub use lowerer::Lowerer;
pub use mica::Mica;
pub use scopes::{lower_eval, lower_script};
