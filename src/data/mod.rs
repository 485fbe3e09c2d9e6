//! Field buffers, element types, and decomposition metadata.

pub mod buffer;
pub mod decomp;
pub mod element;
pub mod field;

pub use buffer::AlignedBuf;
pub use decomp::{DecompRegistry, Decomposition};
pub use element::{ElemType, Element};
pub use field::{FieldId, FieldMem, FieldMeta, FieldRegistry};
