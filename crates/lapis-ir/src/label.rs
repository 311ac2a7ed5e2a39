//! Jump target labels.

use std::fmt;

/// A jump target, unique within one scope's instruction list.
///
/// Labels are allocated by the lowering driver and compared by identity.
/// Label 0 is reserved as the unrescued-region sentinel: an exception
/// region naming it as handler has no rescuer of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

impl Label {
    /// The reserved "no rescuer" sentinel.
    pub const UNRESCUED: Label = Label(0);

    pub fn is_unrescued(&self) -> bool {
        *self == Label::UNRESCUED
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unrescued() {
            write!(f, "L_unrescued")
        } else {
            write!(f, "L{}", self.0)
        }
    }
}
