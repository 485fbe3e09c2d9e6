//! Enumerated element types and the closed-set width dispatch.
//!
//! Field buffers are moved, never interpreted: a 4-byte float and a 4-byte
//! integer redistribute identically. All the engine needs from a datatype is
//! its width, so datatypes are an enumerated tag selected once per field,
//! and transport/kernel code is instantiated over a closed set of four
//! unsigned carrier types.

use crate::redist_error::RedistError;
use serde::{Deserialize, Serialize};

/// Element type tag: one variant per supported byte width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElemType {
    /// 1-byte elements (char/byte data).
    Byte1,
    /// 2-byte elements (short integers).
    Byte2,
    /// 4-byte elements (int/float).
    Byte4,
    /// 8-byte elements (long/double).
    Byte8,
}

impl ElemType {
    /// Width of one element in bytes.
    #[inline]
    pub fn size_bytes(self) -> usize {
        match self {
            ElemType::Byte1 => 1,
            ElemType::Byte2 => 2,
            ElemType::Byte4 => 4,
            ElemType::Byte8 => 8,
        }
    }

    /// Tag for a given byte width.
    ///
    /// # Errors
    /// Returns `Err(UnsupportedElemWidth)` for widths outside {1, 2, 4, 8}.
    pub fn from_size_bytes(width: usize) -> Result<Self, RedistError> {
        match width {
            1 => Ok(ElemType::Byte1),
            2 => Ok(ElemType::Byte2),
            4 => Ok(ElemType::Byte4),
            8 => Ok(ElemType::Byte8),
            other => Err(RedistError::UnsupportedElemWidth(other)),
        }
    }
}

/// One of the four carrier types an `ElemType` maps onto.
pub trait Element: bytemuck::Pod + Send + Sync + 'static {
    /// The tag this carrier type implements.
    const ELEM: ElemType;
}

impl Element for u8 {
    const ELEM: ElemType = ElemType::Byte1;
}
impl Element for u16 {
    const ELEM: ElemType = ElemType::Byte2;
}
impl Element for u32 {
    const ELEM: ElemType = ElemType::Byte4;
}
impl Element for u64 {
    const ELEM: ElemType = ElemType::Byte8;
}

/// Visitor over the closed set of carrier types.
///
/// Implementors get called back with the concrete `T` matching a runtime
/// `ElemType`, replacing the original four-way `void*` branch with a single
/// monomorphized instantiation per width.
pub trait ElemVisitor {
    type Out;
    fn visit<T: Element>(self) -> Self::Out;
}

/// Select the carrier type for `elem` and run `v` over it.
#[inline]
pub fn dispatch_elem<V: ElemVisitor>(elem: ElemType, v: V) -> V::Out {
    match elem {
        ElemType::Byte1 => v.visit::<u8>(),
        ElemType::Byte2 => v.visit::<u16>(),
        ElemType::Byte4 => v.visit::<u32>(),
        ElemType::Byte8 => v.visit::<u64>(),
    }
}
