//! The grammar seam.
//!
//! Two tree grammars feed the lowerer. Rather than converting one into the
//! other, each grammar implements [`Grammar`]: a dispatch hook plus the
//! static node predicates the driver consults. Construct shapes that need
//! more than dispatch (protected regions, blocks, calls, case arms) are
//! normalized into small borrowed view structs so the shared lowering
//! routines stay grammar-agnostic.

use crate::error::LowerResult;
use crate::lowerer::Lowerer;
use lapis_ir::Operand;
use lapis_syntax::{Interner, Symbol};

/// One tree grammar, as the lowerer sees it.
///
/// Implementations are stateless type tags; every method takes the node
/// explicitly. `lower_node` is the dispatch entry: it matches the node and
/// hands the pieces to the shared routines on [`Lowerer`].
pub trait Grammar: Sized {
    type Node;

    /// Dispatch one node to its lowering routine.
    fn lower_node(lw: &mut Lowerer<'_, Self>, node: &Self::Node) -> LowerResult<Operand>;

    /// Whether this node starts a new source line.
    fn is_newline(node: &Self::Node) -> bool;

    fn line(node: &Self::Node) -> u32;

    /// Method definitions get line markers only under coverage.
    fn is_method_def(node: &Self::Node) -> bool;

    /// Statically truthy literal.
    fn always_true(node: &Self::Node) -> bool;

    /// Statically falsy literal.
    fn always_false(node: &Self::Node) -> bool;

    /// Evaluation has no observable effect. Conservative: false when
    /// unknown.
    fn is_side_effect_free(node: &Self::Node) -> bool;

    /// The node reads the current-exception global or one of its aliases.
    fn is_error_info_read(node: &Self::Node, interner: &Interner) -> bool;

    /// The subtree performs a variable assignment anywhere, closure bodies
    /// included. Conservative: true when unknown.
    fn contains_assignment(node: &Self::Node) -> bool;
}

/// An assignable location named by a rescue reference or a for-loop
/// variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindTarget {
    Local { name: Symbol, depth: u32 },
    Global { name: Symbol },
}

/// One rescue clause, flattened out of the grammar's clause chain.
pub struct RescueClauseView<'n, G: Grammar> {
    /// Exception class expressions; empty means the default class.
    pub exceptions: Vec<&'n G::Node>,
    /// Where to bind the caught exception, if anywhere.
    pub reference: Option<BindTarget>,
    pub body: Option<&'n G::Node>,
}

/// A protected region in normal form: at most one body, a flat clause
/// list, an optional else body, an optional cleanup body. Both grammars
/// normalize into this, including the fused cleanup-over-rescue shape.
pub struct ProtectedParts<'n, G: Grammar> {
    pub body: Option<&'n G::Node>,
    pub clauses: Vec<RescueClauseView<'n, G>>,
    pub else_body: Option<&'n G::Node>,
    pub ensure_body: Option<&'n G::Node>,
    /// Modifier-position rescue; affects backtrace elision only.
    pub is_modifier: bool,
}

impl<'n, G: Grammar> ProtectedParts<'n, G> {
    pub fn has_rescue(&self) -> bool {
        !self.clauses.is_empty()
    }
}

/// One arm of a case expression.
pub struct CaseArmView<'n, G: Grammar> {
    pub values: Vec<&'n G::Node>,
    pub body: Option<&'n G::Node>,
}

/// A block literal attached to a call.
pub struct BlockParts<'n, G: Grammar> {
    pub params: Vec<Symbol>,
    pub body: Option<&'n G::Node>,
    pub line: u32,
}

/// A call site, normalized across grammars.
pub struct CallParts<'n, G: Grammar> {
    pub receiver: Option<&'n G::Node>,
    pub name: Symbol,
    pub args: Vec<&'n G::Node>,
    pub block: Option<BlockParts<'n, G>>,
    pub line: u32,
    pub newline: bool,
    /// Whether any argument subtree assigns a variable; forces operand
    /// snapshotting so argument evaluation order stays observable.
    pub contains_assignment: bool,
}
