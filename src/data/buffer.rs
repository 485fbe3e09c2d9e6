//! Word-aligned byte buffer underlying every transport payload.
//!
//! Typed views over a plain `Vec<u8>` are unsound to take with
//! `bytemuck::cast_slice`: the allocation carries no alignment guarantee
//! beyond 1, and an empty `Vec<u8>`'s dangling pointer is aligned to 1 by
//! definition, so casting to any wider carrier type panics. Backing the
//! bytes with `u64` words keeps every view aligned for the whole supported
//! width set, zero-length buffers included (a rank owning no cells still
//! participates in every collective with an empty payload).

use serde::{Deserialize, Serialize};

/// Byte buffer stored in 8-byte words.
///
/// `len` is the logical byte length; the final word may carry padding that
/// is never exposed through the byte views.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignedBuf {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBuf {
    /// A zero-filled buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        AlignedBuf {
            words: vec![0u64; len.div_ceil(8)],
            len,
        }
    }

    /// Logical length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Grow or shrink to `len` bytes; newly exposed space is zero-filled.
    pub fn resize(&mut self, len: usize) {
        self.words.resize(len.div_ceil(8), 0);
        if len > self.len {
            let start = self.len;
            bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[start..len].fill(0);
        }
        self.len = len;
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.len]
    }
}
