//! # field-redist
//!
//! field-redist is the parallel field redistribution engine of a
//! model-coupling runtime. It moves field data between a simulation's
//! domain-decomposed, multi-rank in-memory layout and a single
//! fully-assembled layout used for file I/O, and back, using precomputed
//! counts/displacements/index maps and the standard MPI collectives
//! (`Gatherv`, `Scatterv`, `Bcast`).
//!
//! ## Features
//! - Type-generic gather/scatter copy kernels over a closed set of element
//!   widths (1/2/4/8 bytes)
//! - Cached rearrange plans: at most one plan per (component,
//!   decomposition, grid, datatype, I/O counterpart, direction) key
//! - Pluggable communicator backends (serial, in-process threads, MPI via
//!   the `mpi-support` feature)
//! - Narrow traits for the external file collaborator plus an in-memory
//!   implementation for tests
//!
//! ## Determinism
//!
//! Every rank derives redistribution layouts independently from the shared
//! decomposition metadata, so no leader broadcast is needed and results
//! are identical across ranks by construction. Collectives must be issued
//! in the same order on every rank of a communicator.
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! field-redist = "0.3"
//! # Optional: mpi-support
//! ```

pub mod comm;
pub mod data;
pub mod io;
pub mod rearrange;
pub mod redist_error;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comm::Communicator;
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::comm::{SelfComm, ThreadComm};
    pub use crate::data::buffer::AlignedBuf;
    pub use crate::data::decomp::{DecompRegistry, Decomposition};
    pub use crate::data::element::{ElemType, Element};
    pub use crate::data::field::{FieldId, FieldMem, FieldMeta, FieldRegistry};
    pub use crate::io::{InputFile, MemFile, OutputFile, TimeStamp};
    pub use crate::rearrange::cache::PlanCache;
    pub use crate::rearrange::kernel::{
        RearrangeLayout, rearrange_for_gather, rearrange_for_scatter,
    };
    pub use crate::rearrange::plan::{Direction, PlanKey, RearrangePlan};
    pub use crate::redist_error::RedistError;
}
