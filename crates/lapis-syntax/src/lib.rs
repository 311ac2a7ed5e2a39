//! Lapis Syntax
//!
//! Shared front-end data for the Lapis compiler pipeline:
//! - Source spans ([`Span`])
//! - String interning ([`Symbol`], [`Interner`])
//! - The two syntax tree taxonomies: [`classic`] (the hand-written parser's
//!   nested tree) and [`mica`] (the flat tree produced by the mica parser)
//!
//! Both taxonomies describe the same language; the IR lowering layer accepts
//! either through a common trait.

pub mod classic;
pub mod interner;
pub mod mica;
pub mod span;

pub use interner::{Interner, Symbol};
pub use span::Span;
