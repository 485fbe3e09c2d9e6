//! RedistError: unified error type for field-redist public APIs.
//!
//! Every failure surfaced by this crate is a configuration or invariant
//! violation: redistribution is a one-shot deterministic operation, so a
//! failure here indicates a defect in the caller's setup, never a transient
//! condition worth retrying. Variants carry enough context (field name,
//! expected vs. actual) to make the abort diagnosable.

use crate::data::element::ElemType;
use thiserror::Error;

/// Unified error type for field-redist operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RedistError {
    /// An element width outside the supported set {1, 2, 4, 8}.
    #[error("unsupported element width: {0} bytes (supported: 1, 2, 4, 8)")]
    UnsupportedElemWidth(usize),
    /// Two fields that must share an element type do not.
    #[error("element type mismatch for field `{field}`: expected {expected:?}, found {found:?}")]
    ElemMismatch {
        field: String,
        expected: ElemType,
        found: ElemType,
    },
    /// A supplied companion I/O field disagrees with the plan's configured
    /// io element type.
    #[error(
        "companion I/O field element type mismatch for field `{field}`: plan configured {expected:?}, companion resolved {found:?}"
    )]
    IoElemMismatch {
        field: String,
        expected: ElemType,
        found: ElemType,
    },
    /// A buffer's element count disagrees with the plan layout.
    #[error("buffer size mismatch for field `{field}`: expected {expected} elements, found {found}")]
    SizeMismatch {
        field: String,
        expected: usize,
        found: usize,
    },
    /// No decomposition registered under (decomp_id, grid_id).
    #[error("no decomposition registered for decomp {decomp_id} on grid {grid_id}")]
    UnknownDecomp { decomp_id: u32, grid_id: u32 },
    /// A decomposition was registered twice under the same key.
    #[error("decomposition {decomp_id} on grid {grid_id} is already registered")]
    DuplicateDecomp { decomp_id: u32, grid_id: u32 },
    /// A companion I/O field was supplied for a local field that carries no
    /// decomposition (identity/pass-through configuration).
    #[error("field `{field}` has no decomposition but a companion I/O field was supplied")]
    MissingDecomp { field: String },
    /// A `FieldId` that does not resolve in the field registry.
    #[error("field id {0} is not registered")]
    UnknownField(usize),
    /// A gather/scatter entry point needs a companion I/O field that this
    /// plan does not have.
    #[error("plan for field `{field}` has no companion I/O field")]
    MissingCompanion { field: String },
    /// Raw buffer access on a field currently in chunked representation.
    #[error("field `{field}` is in chunked representation; transform to array form first")]
    ChunkedForm { field: String },
    /// Chunk sizes that do not sum to the field's element count.
    #[error("chunk layout for field `{field}` covers {found} elements, field holds {expected}")]
    BadChunkLayout {
        field: String,
        expected: usize,
        found: usize,
    },
    /// A rearrange index outside `[0, total_cells)`.
    #[error("rearrange index {index} at slot {slot} is out of range (total cells: {total_cells})")]
    CellIndexOutOfRange {
        slot: usize,
        index: u32,
        total_cells: usize,
    },
    /// `counts[rank]` disagrees with `num_levels * local_cells * points_per_cell`.
    #[error("layout count invariant violated at rank {rank}: expected {expected}, found {found}")]
    CountInvariant {
        rank: usize,
        expected: usize,
        found: usize,
    },
    /// `displs[rank]` is not the prefix sum of `counts[0..rank]`.
    #[error("layout displacement invariant violated at rank {rank}: expected {expected}, found {found}")]
    DisplInvariant {
        rank: usize,
        expected: usize,
        found: usize,
    },
    /// The flat rearrange index map has the wrong length.
    #[error("rearrange index map length mismatch: expected {expected}, found {found}")]
    IndexLenMismatch { expected: usize, found: usize },
    /// A plan built over one communicator size used with another.
    #[error("communicator rank count mismatch: plan covers {expected} ranks, communicator has {found}")]
    RankCountMismatch { expected: usize, found: usize },
    /// A field missing from an input file when the caller did not opt into
    /// lenient existence checking.
    #[error("field `{field}` not present in input file")]
    FieldNotInFile { field: String },
    /// A time position past the end of a variable's record dimension.
    #[error("time position {time_pos} out of range for field `{field}` ({len} records)")]
    TimeRecordOutOfRange {
        field: String,
        time_pos: usize,
        len: usize,
    },
}
