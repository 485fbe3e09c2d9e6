//! Decomposition registry: how a grid's global cells are assigned to ranks.
//!
//! A [`Decomposition`] records, for every rank of a component's
//! communicator, which global cells that rank owns and in which local
//! order. Entries are `Option<u32>`: `None` is the null sentinel for a
//! local slot that participates in no redistribution (masked/unused cell).
//!
//! Decompositions are registered once and never mutated; every rank holds
//! an identical copy, which is what lets each rank derive redistribution
//! layouts independently without a leader broadcast.

use crate::redist_error::RedistError;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Immutable cell-to-rank assignment for one (decomposition, grid) pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decomposition {
    decomp_id: u32,
    grid_id: u32,
    total_cells: usize,
    num_levels: usize,
    points_per_cell: usize,
    /// Per-rank local-to-global index maps.
    local_cell_global_index: Vec<Vec<Option<u32>>>,
}

impl Decomposition {
    /// Build and validate a decomposition.
    ///
    /// # Errors
    /// `CellIndexOutOfRange` if any mapped index falls outside
    /// `[0, total_cells)`.
    pub fn new(
        decomp_id: u32,
        grid_id: u32,
        total_cells: usize,
        num_levels: usize,
        points_per_cell: usize,
        local_cell_global_index: Vec<Vec<Option<u32>>>,
    ) -> Result<Self, RedistError> {
        let mut slot = 0usize;
        for rank_map in &local_cell_global_index {
            for &entry in rank_map {
                if let Some(g) = entry {
                    if g as usize >= total_cells {
                        return Err(RedistError::CellIndexOutOfRange {
                            slot,
                            index: g,
                            total_cells,
                        });
                    }
                }
                slot += 1;
            }
        }
        Ok(Decomposition {
            decomp_id,
            grid_id,
            total_cells,
            num_levels,
            points_per_cell,
            local_cell_global_index,
        })
    }

    #[inline]
    pub fn decomp_id(&self) -> u32 {
        self.decomp_id
    }

    #[inline]
    pub fn grid_id(&self) -> u32 {
        self.grid_id
    }

    /// Number of global cells on the fully-assembled grid.
    #[inline]
    pub fn total_cells(&self) -> usize {
        self.total_cells
    }

    #[inline]
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    #[inline]
    pub fn points_per_cell(&self) -> usize {
        self.points_per_cell
    }

    /// Number of ranks this decomposition spans.
    #[inline]
    pub fn num_ranks(&self) -> usize {
        self.local_cell_global_index.len()
    }

    /// Number of local cells owned by `rank` (null slots included).
    #[inline]
    pub fn local_cells(&self, rank: usize) -> usize {
        self.local_cell_global_index[rank].len()
    }

    /// Local-to-global index map for `rank`.
    #[inline]
    pub fn global_index(&self, rank: usize) -> &[Option<u32>] {
        &self.local_cell_global_index[rank]
    }

    /// Sum of local cell counts over all ranks.
    pub fn total_local_cells(&self) -> usize {
        self.local_cell_global_index.iter().map(Vec::len).sum()
    }
}

/// Registry of decompositions keyed by (decomp id, grid id).
#[derive(Debug, Default)]
pub struct DecompRegistry {
    decomps: HashMap<(u32, u32), Decomposition>,
}

impl DecompRegistry {
    pub fn new() -> Self {
        DecompRegistry::default()
    }

    /// Register a decomposition.
    ///
    /// # Errors
    /// `DuplicateDecomp` if the (decomp, grid) key is already taken.
    pub fn register(&mut self, decomp: Decomposition) -> Result<(), RedistError> {
        let key = (decomp.decomp_id, decomp.grid_id);
        if self.decomps.contains_key(&key) {
            return Err(RedistError::DuplicateDecomp {
                decomp_id: key.0,
                grid_id: key.1,
            });
        }
        self.decomps.insert(key, decomp);
        Ok(())
    }

    /// Resolve the decomposition for a (decomp, grid) pair.
    pub fn get(&self, decomp_id: u32, grid_id: u32) -> Result<&Decomposition, RedistError> {
        self.decomps
            .get(&(decomp_id, grid_id))
            .ok_or(RedistError::UnknownDecomp { decomp_id, grid_id })
    }
}
