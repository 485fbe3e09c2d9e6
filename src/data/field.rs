//! Field memory management: buffers, metadata, and the runtime-scoped
//! field registry.
//!
//! A [`FieldMem`] is a flat byte buffer tagged with an element type plus the
//! identifiers the plan cache keys on (host component, decomposition, grid).
//! Fields live in a [`FieldRegistry`] owned by the runtime instance and are
//! addressed by [`FieldId`]; nothing in this crate reaches for process-wide
//! singletons.
//!
//! A field has two representations: the contiguous *array form* used for
//! redistribution and I/O, and a *chunked form* in which the application
//! model sees the same cells grouped per chunk. Transport entry points
//! normalize to array form and restore the previous form afterwards.

use crate::data::buffer::AlignedBuf;
use crate::data::element::{ElemType, Element};
use crate::redist_error::RedistError;
use serde::{Deserialize, Serialize};

/// Descriptive metadata carried by a field and synchronized onto a cached
/// plan's companion I/O field on every reuse.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    /// Field name inside the model.
    pub name: String,
    /// Variable name used in I/O files (defaults to `name`).
    pub io_name: String,
    /// Physical unit string.
    pub unit: String,
    /// Human-readable description.
    pub long_name: String,
}

impl FieldMeta {
    /// Metadata with `io_name` defaulted to the model name.
    pub fn named(name: &str) -> Self {
        FieldMeta {
            name: name.to_string(),
            io_name: name.to_string(),
            ..FieldMeta::default()
        }
    }
}

/// Handle to a field inside a [`FieldRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldId(pub(crate) usize);

/// One field instance: identity, element tag, and the raw buffer.
#[derive(Clone, Debug)]
pub struct FieldMem {
    meta: FieldMeta,
    comp_id: u32,
    decomp_id: Option<u32>,
    grid_id: u32,
    elem: ElemType,
    data: AlignedBuf,
    /// Per-chunk element counts; empty means the field is unchunked.
    chunk_sizes: Vec<usize>,
    in_chunk_form: bool,
}

impl FieldMem {
    /// A zero-initialized field of `num_elems` elements in array form.
    pub fn new(
        meta: FieldMeta,
        comp_id: u32,
        decomp_id: Option<u32>,
        grid_id: u32,
        elem: ElemType,
        num_elems: usize,
    ) -> Self {
        FieldMem {
            meta,
            comp_id,
            decomp_id,
            grid_id,
            elem,
            data: AlignedBuf::zeroed(num_elems * elem.size_bytes()),
            chunk_sizes: Vec::new(),
            in_chunk_form: false,
        }
    }

    #[inline]
    pub fn meta(&self) -> &FieldMeta {
        &self.meta
    }

    #[inline]
    pub fn meta_mut(&mut self) -> &mut FieldMeta {
        &mut self.meta
    }

    /// Overwrite the descriptive metadata from another field, keeping the
    /// structural identity (ids, element tag, buffer) untouched.
    pub fn copy_attributes_from(&mut self, other: &FieldMem) {
        self.meta = other.meta.clone();
    }

    #[inline]
    pub fn comp_id(&self) -> u32 {
        self.comp_id
    }

    #[inline]
    pub fn decomp_id(&self) -> Option<u32> {
        self.decomp_id
    }

    #[inline]
    pub fn grid_id(&self) -> u32 {
        self.grid_id
    }

    #[inline]
    pub fn elem(&self) -> ElemType {
        self.elem
    }

    /// Number of elements in the buffer.
    #[inline]
    pub fn num_elems(&self) -> usize {
        self.data.len() / self.elem.size_bytes()
    }

    /// Raw bytes of the buffer. Requires array form.
    pub fn bytes(&self) -> Result<&[u8], RedistError> {
        self.require_array_form()?;
        Ok(self.data.as_bytes())
    }

    /// Mutable raw bytes of the buffer. Requires array form.
    pub fn bytes_mut(&mut self) -> Result<&mut [u8], RedistError> {
        self.require_array_form()?;
        Ok(self.data.as_bytes_mut())
    }

    /// Typed view of the buffer.
    ///
    /// # Errors
    /// `ElemMismatch` if `T` does not match the field's tag, `ChunkedForm`
    /// if the field is not in array form.
    pub fn as_slice<T: Element>(&self) -> Result<&[T], RedistError> {
        self.require_elem(T::ELEM)?;
        Ok(bytemuck::cast_slice(self.bytes()?))
    }

    /// Typed mutable view of the buffer.
    pub fn as_slice_mut<T: Element>(&mut self) -> Result<&mut [T], RedistError> {
        self.require_elem(T::ELEM)?;
        self.require_array_form()?;
        Ok(bytemuck::cast_slice_mut(self.data.as_bytes_mut()))
    }

    /// Replace the buffer contents with `values`.
    ///
    /// # Errors
    /// `SizeMismatch` if `values` does not cover the whole field.
    pub fn set_values<T: Element>(&mut self, values: &[T]) -> Result<(), RedistError> {
        if values.len() != self.num_elems() {
            return Err(RedistError::SizeMismatch {
                field: self.meta.name.clone(),
                expected: self.num_elems(),
                found: values.len(),
            });
        }
        self.as_slice_mut::<T>()?.copy_from_slice(values);
        Ok(())
    }

    /// Declare the per-chunk element counts for this field.
    ///
    /// # Errors
    /// `BadChunkLayout` if the sizes do not sum to the element count.
    pub fn set_chunk_layout(&mut self, chunk_sizes: Vec<usize>) -> Result<(), RedistError> {
        let covered: usize = chunk_sizes.iter().sum();
        if covered != self.num_elems() {
            return Err(RedistError::BadChunkLayout {
                field: self.meta.name.clone(),
                expected: self.num_elems(),
                found: covered,
            });
        }
        self.chunk_sizes = chunk_sizes;
        Ok(())
    }

    /// Per-chunk element counts (empty when unchunked).
    #[inline]
    pub fn chunk_sizes(&self) -> &[usize] {
        &self.chunk_sizes
    }

    /// Whether the field currently presents its chunked representation.
    #[inline]
    pub fn in_chunk_form(&self) -> bool {
        self.in_chunk_form
    }

    /// Switch between chunked and array representation.
    ///
    /// Chunks are stored back-to-back in chunk order, so the switch changes
    /// which representation accessors expose without moving bytes. A field
    /// without a chunk layout stays in array form.
    pub fn transform_chunks(&mut self, to_array: bool) {
        if self.chunk_sizes.is_empty() {
            return;
        }
        self.in_chunk_form = !to_array;
    }

    /// Copy values from a type- and size-consistent field.
    pub fn copy_values_from(&mut self, other: &FieldMem) -> Result<(), RedistError> {
        if other.elem != self.elem {
            return Err(RedistError::ElemMismatch {
                field: self.meta.name.clone(),
                expected: self.elem,
                found: other.elem,
            });
        }
        if other.num_elems() != self.num_elems() {
            return Err(RedistError::SizeMismatch {
                field: self.meta.name.clone(),
                expected: self.num_elems(),
                found: other.num_elems(),
            });
        }
        let src = other.bytes()?;
        self.bytes_mut()?.copy_from_slice(src);
        Ok(())
    }

    /// A zeroed field with the same identity, shape, and chunk layout.
    pub fn clone_shape(&self) -> FieldMem {
        FieldMem {
            meta: self.meta.clone(),
            comp_id: self.comp_id,
            decomp_id: self.decomp_id,
            grid_id: self.grid_id,
            elem: self.elem,
            data: AlignedBuf::zeroed(self.data.len()),
            chunk_sizes: self.chunk_sizes.clone(),
            in_chunk_form: false,
        }
    }

    fn require_array_form(&self) -> Result<(), RedistError> {
        if self.in_chunk_form {
            return Err(RedistError::ChunkedForm {
                field: self.meta.name.clone(),
            });
        }
        Ok(())
    }

    fn require_elem(&self, elem: ElemType) -> Result<(), RedistError> {
        if self.elem != elem {
            return Err(RedistError::ElemMismatch {
                field: self.meta.name.clone(),
                expected: self.elem,
                found: elem,
            });
        }
        Ok(())
    }
}

/// Runtime-scoped arena of field instances.
#[derive(Debug, Default)]
pub struct FieldRegistry {
    fields: Vec<FieldMem>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        FieldRegistry::default()
    }

    /// Register an existing field instance.
    pub fn register(&mut self, field: FieldMem) -> FieldId {
        let id = FieldId(self.fields.len());
        self.fields.push(field);
        id
    }

    /// Allocate a zeroed field and return its handle.
    pub fn alloc(
        &mut self,
        meta: FieldMeta,
        comp_id: u32,
        decomp_id: Option<u32>,
        grid_id: u32,
        elem: ElemType,
        num_elems: usize,
    ) -> FieldId {
        self.register(FieldMem::new(
            meta, comp_id, decomp_id, grid_id, elem, num_elems,
        ))
    }

    pub fn get(&self, id: FieldId) -> Result<&FieldMem, RedistError> {
        self.fields
            .get(id.0)
            .ok_or(RedistError::UnknownField(id.0))
    }

    pub fn get_mut(&mut self, id: FieldId) -> Result<&mut FieldMem, RedistError> {
        self.fields
            .get_mut(id.0)
            .ok_or(RedistError::UnknownField(id.0))
    }

    /// Copy values between two registered, type-consistent fields.
    pub fn copy_values(&mut self, dst: FieldId, src: FieldId) -> Result<(), RedistError> {
        if dst == src {
            return Ok(());
        }
        if dst.0 >= self.fields.len() {
            return Err(RedistError::UnknownField(dst.0));
        }
        if src.0 >= self.fields.len() {
            return Err(RedistError::UnknownField(src.0));
        }
        let (a, b) = if dst.0 < src.0 {
            let (lo, hi) = self.fields.split_at_mut(src.0);
            (&mut lo[dst.0], &hi[0])
        } else {
            let (lo, hi) = self.fields.split_at_mut(dst.0);
            (&mut hi[0], &lo[src.0])
        };
        a.copy_values_from(b)
    }

    /// Number of registered fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, elem: ElemType, n: usize) -> FieldMem {
        FieldMem::new(FieldMeta::named(name), 1, Some(2), 3, elem, n)
    }

    #[test]
    fn typed_views_check_elem_tag() {
        let mut f = field("sst", ElemType::Byte4, 4);
        f.set_values::<u32>(&[1, 2, 3, 4]).unwrap();
        assert_eq!(f.as_slice::<u32>().unwrap(), &[1, 2, 3, 4]);
        assert!(matches!(
            f.as_slice::<u64>().unwrap_err(),
            RedistError::ElemMismatch { .. }
        ));
    }

    #[test]
    fn zero_length_field_has_empty_typed_views() {
        // A rank owning no cells still registers its (empty) local field.
        for elem in [
            ElemType::Byte1,
            ElemType::Byte2,
            ElemType::Byte4,
            ElemType::Byte8,
        ] {
            let mut f = field("empty", elem, 0);
            assert_eq!(f.num_elems(), 0);
            assert!(f.bytes().unwrap().is_empty());
            assert!(f.bytes_mut().unwrap().is_empty());
        }
        let mut f = field("empty", ElemType::Byte8, 0);
        assert!(f.as_slice::<u64>().unwrap().is_empty());
        assert!(f.as_slice_mut::<u64>().unwrap().is_empty());
        f.set_values::<u64>(&[]).unwrap();
    }

    #[test]
    fn chunk_form_guards_raw_access() {
        let mut f = field("psl", ElemType::Byte8, 6);
        f.set_chunk_layout(vec![4, 2]).unwrap();
        f.transform_chunks(false);
        assert!(f.in_chunk_form());
        assert!(matches!(
            f.bytes().unwrap_err(),
            RedistError::ChunkedForm { .. }
        ));
        f.transform_chunks(true);
        assert!(f.bytes().is_ok());
    }

    #[test]
    fn chunk_layout_must_cover_field() {
        let mut f = field("psl", ElemType::Byte8, 6);
        let err = f.set_chunk_layout(vec![4, 4]).unwrap_err();
        assert_eq!(
            err,
            RedistError::BadChunkLayout {
                field: "psl".into(),
                expected: 6,
                found: 8
            }
        );
    }

    #[test]
    fn unchunked_transform_is_noop() {
        let mut f = field("ts", ElemType::Byte1, 3);
        f.transform_chunks(false);
        assert!(!f.in_chunk_form());
    }

    #[test]
    fn copy_values_requires_consistent_type_and_size() {
        let mut reg = FieldRegistry::new();
        let a = reg.register(field("a", ElemType::Byte4, 4));
        let b = reg.register(field("b", ElemType::Byte4, 4));
        let c = reg.register(field("c", ElemType::Byte8, 4));
        let d = reg.register(field("d", ElemType::Byte4, 5));

        reg.get_mut(a)
            .unwrap()
            .set_values::<u32>(&[9, 8, 7, 6])
            .unwrap();
        reg.copy_values(b, a).unwrap();
        assert_eq!(reg.get(b).unwrap().as_slice::<u32>().unwrap(), &[9, 8, 7, 6]);

        assert!(matches!(
            reg.copy_values(c, a).unwrap_err(),
            RedistError::ElemMismatch { .. }
        ));
        assert!(matches!(
            reg.copy_values(d, a).unwrap_err(),
            RedistError::SizeMismatch { .. }
        ));
    }

    #[test]
    fn clone_shape_zeroes_data() {
        let mut f = field("u", ElemType::Byte2, 3);
        f.set_values::<u16>(&[5, 6, 7]).unwrap();
        let m = f.clone_shape();
        assert_eq!(m.num_elems(), 3);
        assert_eq!(m.as_slice::<u16>().unwrap(), &[0, 0, 0]);
        assert_eq!(m.meta().name, "u");
    }

    #[test]
    fn registry_rejects_unknown_ids() {
        let reg = FieldRegistry::new();
        assert_eq!(
            reg.get(FieldId(0)).unwrap_err(),
            RedistError::UnknownField(0)
        );
    }
}
