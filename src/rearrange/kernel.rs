//! Redistribution kernel: pure copy loops between the rank-concatenated
//! and canonical buffer orders.
//!
//! The canonical (fully-assembled) order is (level, global cell, point).
//! The rank-concatenated order is the `gatherv`/`scatterv` wire layout:
//! rank `m`'s slice starts at `displs[m]` and holds its levels
//! back-to-back, each level holding that rank's local cells in local
//! order. The kernels are pure memory movement, generic over element
//! width only; a null-mapped local slot is skipped in both directions and
//! its destination is never written.

use crate::data::decomp::Decomposition;
use crate::data::element::Element;
use crate::redist_error::RedistError;
use itertools::izip;
use serde::{Deserialize, Serialize};

/// Counts, displacements, and the flat local-to-global index map for one
/// decomposition, shared by every plan over it.
///
/// # Invariants
/// - `counts[m] == num_levels * local_cells(m) * points_per_cell`
/// - `displs[m]` is the exact prefix sum of `counts[0..m]`
/// - `indexes.len()` equals the total local cell count over all ranks
/// - every mapped index lies in `[0, total_cells)`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RearrangeLayout {
    counts: Vec<usize>,
    displs: Vec<usize>,
    /// Flat per-rank local-to-global maps; `None` is the null sentinel.
    indexes: Vec<Option<u32>>,
    num_levels: usize,
    points_per_cell: usize,
    total_cells: usize,
}

impl RearrangeLayout {
    /// Derive the layout from a registered decomposition. Every rank
    /// computes this independently and identically from the shared
    /// decomposition metadata.
    pub fn from_decomp(decomp: &Decomposition) -> Self {
        let levels = decomp.num_levels();
        let ppc = decomp.points_per_cell();
        let mut counts = Vec::with_capacity(decomp.num_ranks());
        let mut displs = Vec::with_capacity(decomp.num_ranks());
        let mut indexes = Vec::with_capacity(decomp.total_local_cells());
        let mut offset = 0usize;
        for rank in 0..decomp.num_ranks() {
            let count = levels * decomp.local_cells(rank) * ppc;
            counts.push(count);
            displs.push(offset);
            offset += count;
            indexes.extend_from_slice(decomp.global_index(rank));
        }
        let layout = RearrangeLayout {
            counts,
            displs,
            indexes,
            num_levels: levels,
            points_per_cell: ppc,
            total_cells: decomp.total_cells(),
        };
        #[cfg(debug_assertions)]
        layout.debug_assert_invariants(decomp);
        layout
    }

    #[inline]
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    #[inline]
    pub fn displs(&self) -> &[usize] {
        &self.displs
    }

    #[inline]
    pub fn indexes(&self) -> &[Option<u32>] {
        &self.indexes
    }

    #[inline]
    pub fn num_ranks(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    #[inline]
    pub fn points_per_cell(&self) -> usize {
        self.points_per_cell
    }

    #[inline]
    pub fn total_cells(&self) -> usize {
        self.total_cells
    }

    /// Element count of the rank-concatenated wire buffer.
    pub fn wire_elems(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Element count of the canonical fully-assembled buffer.
    pub fn canonical_elems(&self) -> usize {
        self.num_levels * self.total_cells * self.points_per_cell
    }

    /// Check every layout invariant against the source decomposition.
    pub fn validate_invariants(&self, decomp: &Decomposition) -> Result<(), RedistError> {
        let mut expected_displ = 0usize;
        for (rank, (&count, &displ)) in izip!(&self.counts, &self.displs).enumerate() {
            let expected = self.num_levels * decomp.local_cells(rank) * self.points_per_cell;
            if count != expected {
                return Err(RedistError::CountInvariant {
                    rank,
                    expected,
                    found: count,
                });
            }
            if displ != expected_displ {
                return Err(RedistError::DisplInvariant {
                    rank,
                    expected: expected_displ,
                    found: displ,
                });
            }
            expected_displ += count;
        }
        if self.indexes.len() != decomp.total_local_cells() {
            return Err(RedistError::IndexLenMismatch {
                expected: decomp.total_local_cells(),
                found: self.indexes.len(),
            });
        }
        for (slot, &entry) in self.indexes.iter().enumerate() {
            if let Some(g) = entry {
                if g as usize >= self.total_cells {
                    return Err(RedistError::CellIndexOutOfRange {
                        slot,
                        index: g,
                        total_cells: self.total_cells,
                    });
                }
            }
        }
        Ok(())
    }

    /// Panic in debug builds if the layout is inconsistent.
    pub fn debug_assert_invariants(&self, decomp: &Decomposition) {
        if let Err(e) = self.validate_invariants(decomp) {
            panic!("rearrange layout invalid: {e}");
        }
    }

    fn check_len(role: &str, expected: usize, found: usize) -> Result<(), RedistError> {
        if expected != found {
            return Err(RedistError::SizeMismatch {
                field: role.to_string(),
                expected,
                found,
            });
        }
        Ok(())
    }
}

/// Copy from rank-concatenated order (`src`) into canonical order (`dst`).
///
/// The result is independent of inter-rank ordering on the wire: each
/// contributing cell lands at its global position. Null-mapped slots leave
/// their canonical destination untouched.
pub fn rearrange_for_gather<T: Element>(
    layout: &RearrangeLayout,
    src: &[T],
    dst: &mut [T],
) -> Result<(), RedistError> {
    RearrangeLayout::check_len("gather wire buffer", layout.wire_elems(), src.len())?;
    RearrangeLayout::check_len("gather canonical buffer", layout.canonical_elems(), dst.len())?;
    let ppc = layout.points_per_cell;
    for m in 0..layout.num_ranks() {
        if layout.counts[m] == 0 {
            continue;
        }
        let data_per_level = layout.counts[m] / layout.num_levels;
        let local_cells = data_per_level / ppc;
        let idx_start = layout.displs[m] / layout.num_levels / ppc;
        for k in 0..layout.num_levels {
            for i in 0..local_cells {
                let Some(g) = layout.indexes[idx_start + i] else {
                    continue;
                };
                let src_off = layout.displs[m] + k * data_per_level + i * ppc;
                let dst_off = g as usize * ppc + k * layout.total_cells * ppc;
                dst[dst_off..dst_off + ppc].copy_from_slice(&src[src_off..src_off + ppc]);
            }
        }
    }
    Ok(())
}

/// Copy from canonical order (`src`) into rank-concatenated order (`dst`).
///
/// Structural inverse of [`rearrange_for_gather`]; null-mapped slots leave
/// their per-rank destination untouched.
pub fn rearrange_for_scatter<T: Element>(
    layout: &RearrangeLayout,
    src: &[T],
    dst: &mut [T],
) -> Result<(), RedistError> {
    RearrangeLayout::check_len("scatter canonical buffer", layout.canonical_elems(), src.len())?;
    RearrangeLayout::check_len("scatter wire buffer", layout.wire_elems(), dst.len())?;
    let ppc = layout.points_per_cell;
    for m in 0..layout.num_ranks() {
        if layout.counts[m] == 0 {
            continue;
        }
        let data_per_level = layout.counts[m] / layout.num_levels;
        let local_cells = data_per_level / ppc;
        let idx_start = layout.displs[m] / layout.num_levels / ppc;
        for k in 0..layout.num_levels {
            for i in 0..local_cells {
                let Some(g) = layout.indexes[idx_start + i] else {
                    continue;
                };
                let src_off = g as usize * ppc + k * layout.total_cells * ppc;
                let dst_off = layout.displs[m] + k * data_per_level + i * ppc;
                dst[dst_off..dst_off + ppc].copy_from_slice(&src[src_off..src_off + ppc]);
            }
        }
    }
    Ok(())
}
