//! Structured diagnostics for the heap: per-block usage counters and
//! the contents of every class free list, with a human-readable
//! rendering for the C entry point.
use std::fmt;

use crate::block::CLASS_COUNT;

/// Diagnostic snapshot of one heap block.
#[derive(Clone, Debug, Default)]
pub struct BlockStats {
    /// Start address of the block.
    pub start: usize,
    /// Pages acquired from the page source.
    pub pages: usize,
    /// Block size in bytes.
    pub size: usize,
    /// Bytes charged to the block header and allocated regions.
    pub used_size: usize,
    /// Number of free regions across all class lists.
    pub free_regions: usize,
    /// Smallest free region size, or 0 when the block is fully used.
    pub min_free: usize,
    /// Largest free region size, or 0 when the block is fully used.
    pub max_free: usize,
    /// Sum of all free region sizes.
    pub total_free: usize,
    /// `(address, size)` of every free region, per class, in list
    /// order.
    pub classes: [Vec<(usize, usize)>; CLASS_COUNT],
}

/// Diagnostic snapshot of the whole heap, one entry per live block in
/// block-list (ascending address) order.
#[derive(Clone, Debug, Default)]
pub struct HeapReport {
    pub blocks: Vec<BlockStats>,
}

impl HeapReport {
    /// True when the heap holds no block at all.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl fmt::Display for BlockStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "block {:#x}: {} page(s), {} bytes, {} used, {} free region(s) (min {}, max {}, total {})",
            self.start,
            self.pages,
            self.size,
            self.used_size,
            self.free_regions,
            self.min_free,
            self.max_free,
            self.total_free
        )?;

        for (class, members) in self.classes.iter().enumerate() {
            if members.is_empty() {
                continue;
            }

            write!(f, "  class {}:", class)?;
            for (address, size) in members {
                write!(f, " {:#x}/{}", address, size)?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

impl fmt::Display for HeapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.blocks.is_empty() {
            return writeln!(f, "heap: no live blocks");
        }

        writeln!(f, "heap: {} live block(s)", self.blocks.len())?;
        for block in &self.blocks {
            write!(f, "{}", block)?;
        }

        Ok(())
    }
}
