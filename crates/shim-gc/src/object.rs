//! Cell addressing and mark state

use std::fmt;

/// Generational reference to a heap cell.
///
/// A `GcRef` is a plain index; holding one does not keep the cell alive.
/// After the cell is reclaimed its slot generation moves on, so the old
/// reference resolves to nothing instead of aliasing a newer cell.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcRef {
    index: u32,
    generation: u32,
}

impl GcRef {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the heap
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation this reference was issued for
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcRef({}#{})", self.index, self.generation)
    }
}

/// Mark color for the mark phase
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Not yet visited
    White = 0,
    /// In worklist
    Gray = 1,
    /// Fully scanned
    Black = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_identity_includes_generation() {
        let a = GcRef::new(3, 0);
        let b = GcRef::new(3, 1);
        assert_ne!(a, b);
        assert_eq!(a.index(), b.index());
        assert_eq!(format!("{a:?}"), "GcRef(3#0)");
    }
}
