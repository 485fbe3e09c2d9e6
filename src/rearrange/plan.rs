//! Rearrange plans: the cached association between a field configuration
//! and the layout, mirror buffer, and companion I/O field needed to
//! redistribute it.
//!
//! A plan is built lazily on first use and then reused for every field
//! sharing its key. The mirror field decouples application field identity
//! from the cached plan: local data is staged through the plan-owned
//! mirror, so the same plan serves many model variables. The companion
//! I/O field (the fully-assembled buffer) lives in the field registry; the
//! plan holds a non-owning handle.

use crate::comm::Communicator;
use crate::data::buffer::AlignedBuf;
use crate::data::decomp::DecompRegistry;
use crate::data::element::{ElemType, ElemVisitor, Element, dispatch_elem};
use crate::data::field::{FieldId, FieldMem, FieldRegistry};
use crate::io::InputFile;
use crate::rearrange::kernel::{
    RearrangeLayout, rearrange_for_gather, rearrange_for_scatter,
};
use crate::redist_error::RedistError;

/// Which way a plan moves data relative to the I/O rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local per-rank slices assemble onto the I/O rank (write path).
    Gather,
    /// The I/O rank's assembled buffer splits into per-rank slices (read path).
    Scatter,
}

/// Structural identity of a plan. At most one live plan per key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanKey {
    pub comp_id: u32,
    pub decomp_id: Option<u32>,
    pub grid_id: u32,
    pub elem: ElemType,
    /// Grid of the supplied companion field; `None` when the companion is
    /// plan-allocated.
    pub io_grid_id: Option<u32>,
    pub io_elem: ElemType,
    pub direction: Direction,
}

impl PlanKey {
    /// Derive the key a (local, companion, direction) request resolves to.
    pub fn from_fields(
        fields: &FieldRegistry,
        local: FieldId,
        io: Option<FieldId>,
        direction: Direction,
    ) -> Result<PlanKey, RedistError> {
        let local_f = fields.get(local)?;
        let (io_grid_id, io_elem) = match io {
            Some(id) => {
                let io_f = fields.get(id)?;
                (Some(io_f.grid_id()), io_f.elem())
            }
            None => (None, local_f.elem()),
        };
        Ok(PlanKey {
            comp_id: local_f.comp_id(),
            decomp_id: local_f.decomp_id(),
            grid_id: local_f.grid_id(),
            elem: local_f.elem(),
            io_grid_id,
            io_elem,
            direction,
        })
    }
}

/// Everything a decomposed plan needs beyond its key. Absent for identity
/// (pass-through) plans over undecomposed fields.
#[derive(Debug)]
struct DecompPath {
    layout: RearrangeLayout,
    /// Plan-owned shadow of the local field's shape and type.
    mirror: FieldMem,
    /// Companion fully-assembled field; owned by the registry.
    io_field: FieldId,
    /// Rank-concatenated staging buffer, populated on the I/O rank only.
    wire: AlignedBuf,
}

/// One cached redistribution plan.
#[derive(Debug)]
pub struct RearrangePlan {
    key: PlanKey,
    path: Option<DecompPath>,
    io_root: usize,
}

impl RearrangePlan {
    /// Build a plan for `local` (and optional companion `io`).
    ///
    /// Layout arrays are derived from the decomposition registry,
    /// deterministically and identically on every rank. A local field
    /// without a decomposition yields an identity plan with no companion.
    ///
    /// # Errors
    /// `IoElemMismatch` if the companion's element type disagrees with the
    /// plan's configured io type, `SizeMismatch` if a supplied companion
    /// does not cover the canonical buffer, `MissingDecomp` if a companion
    /// is supplied for an undecomposed field.
    pub fn new(
        fields: &mut FieldRegistry,
        decomps: &DecompRegistry,
        local: FieldId,
        io: Option<FieldId>,
        direction: Direction,
        io_root: usize,
    ) -> Result<Self, RedistError> {
        let key = PlanKey::from_fields(fields, local, io, direction)?;
        let local_f = fields.get(local)?;
        let name = local_f.meta().name.clone();

        let Some(decomp_id) = key.decomp_id else {
            if io.is_some() {
                return Err(RedistError::MissingDecomp { field: name });
            }
            return Ok(RearrangePlan {
                key,
                path: None,
                io_root,
            });
        };

        // Datatype conversion belongs to the upstream transformer; the
        // redistribution transport requires matching element types.
        if key.io_elem != key.elem {
            return Err(RedistError::IoElemMismatch {
                field: name,
                expected: key.elem,
                found: key.io_elem,
            });
        }

        let decomp = decomps.get(decomp_id, key.grid_id)?;
        let layout = RearrangeLayout::from_decomp(decomp);
        layout.validate_invariants(decomp)?;

        let mirror = local_f.clone_shape();
        let meta = local_f.meta().clone();
        let comp_id = local_f.comp_id();
        let grid_id = local_f.grid_id();

        let io_field = match io {
            Some(id) => {
                let io_f = fields.get(id)?;
                if io_f.num_elems() != layout.canonical_elems() {
                    return Err(RedistError::SizeMismatch {
                        field: io_f.meta().name.clone(),
                        expected: layout.canonical_elems(),
                        found: io_f.num_elems(),
                    });
                }
                id
            }
            None => fields.alloc(
                meta,
                comp_id,
                None,
                grid_id,
                key.io_elem,
                layout.canonical_elems(),
            ),
        };

        Ok(RearrangePlan {
            key,
            path: Some(DecompPath {
                layout,
                mirror,
                io_field,
                wire: AlignedBuf::default(),
            }),
            io_root,
        })
    }

    /// Structural equality against a lookup key. Never fails.
    #[inline]
    pub fn matches(&self, key: &PlanKey) -> bool {
        self.key == *key
    }

    #[inline]
    pub fn key(&self) -> &PlanKey {
        &self.key
    }

    #[inline]
    pub fn io_root(&self) -> usize {
        self.io_root
    }

    /// The companion fully-assembled field, or `local` unchanged for
    /// identity plans.
    #[inline]
    pub fn io_field_mem(&self, local: FieldId) -> FieldId {
        match &self.path {
            Some(path) => path.io_field,
            None => local,
        }
    }

    /// Whether this plan carries a companion I/O field.
    #[inline]
    pub fn has_io_field(&self) -> bool {
        self.path.is_some()
    }

    /// The plan-owned mirror of the local field, if any.
    pub fn mirror_field(&self) -> Option<&FieldMem> {
        self.path.as_ref().map(|p| &p.mirror)
    }

    /// Assemble `local` onto the I/O rank's companion field.
    ///
    /// Copies the local field into the mirror, gathers the mirror's
    /// rank slices onto the I/O rank, and rearranges them into canonical
    /// (level, global cell, point) order. Synchronous collective: every
    /// rank must call this.
    pub fn gather_field<C: Communicator>(
        &mut self,
        comm: &C,
        fields: &mut FieldRegistry,
        local: FieldId,
        field_name: &str,
    ) -> Result<FieldId, RedistError> {
        let path = self.path.as_mut().ok_or_else(|| RedistError::MissingCompanion {
            field: field_name.to_string(),
        })?;
        check_ranks(&path.layout, comm)?;
        let elem = self.key.elem;

        fields.get_mut(local)?.transform_chunks(true);
        path.mirror.transform_chunks(true);
        path.mirror.copy_values_from(fields.get(local)?)?;
        check_local_count(&path.layout, comm.rank(), &path.mirror)?;

        let counts = path.layout.counts();
        let displs = path.layout.displs();
        if comm.rank() == self.io_root {
            path.wire.resize(path.layout.wire_elems() * elem.size_bytes());
            comm.gatherv(
                elem,
                path.mirror.bytes()?,
                Some(path.wire.as_bytes_mut()),
                counts,
                displs,
                self.io_root,
            );
            let io_f = fields.get_mut(path.io_field)?;
            dispatch_elem(
                elem,
                GatherKernel {
                    layout: &path.layout,
                    src: path.wire.as_bytes(),
                    dst: io_f.bytes_mut()?,
                },
            )?;
        } else {
            comm.gatherv(elem, path.mirror.bytes()?, None, counts, displs, self.io_root);
        }
        log::trace!("gathered field `{field_name}` onto rank {}", self.io_root);
        Ok(path.io_field)
    }

    /// Populate `local` from the companion field on the I/O rank.
    ///
    /// When a `file` is given, the I/O rank first reads the companion's
    /// record at `time_pos` (strict: a missing field is an error — use
    /// [`scatter_present`](Self::scatter_present) for lenient reads). The
    /// companion is then rearranged into rank slices, scattered into the
    /// mirror, and copied into `local`.
    pub fn scatter_field<C: Communicator>(
        &mut self,
        comm: &C,
        fields: &mut FieldRegistry,
        file: Option<&mut dyn InputFile>,
        time_pos: usize,
        local: FieldId,
        field_name: &str,
    ) -> Result<FieldId, RedistError> {
        let path = self.path.as_mut().ok_or_else(|| RedistError::MissingCompanion {
            field: field_name.to_string(),
        })?;
        check_ranks(&path.layout, comm)?;
        let elem = self.key.elem;

        path.mirror.transform_chunks(true);
        check_local_count(&path.layout, comm.rank(), &path.mirror)?;

        let counts = path.layout.counts();
        let displs = path.layout.displs();
        if comm.rank() == self.io_root {
            if let Some(file) = file {
                file.read_data(fields.get_mut(path.io_field)?, time_pos, false)?;
            }
            path.wire.resize(path.layout.wire_elems() * elem.size_bytes());
            dispatch_elem(
                elem,
                ScatterKernel {
                    layout: &path.layout,
                    src: fields.get(path.io_field)?.bytes()?,
                    dst: path.wire.as_bytes_mut(),
                },
            )?;
            comm.scatterv(
                elem,
                Some(path.wire.as_bytes()),
                path.mirror.bytes_mut()?,
                counts,
                displs,
                self.io_root,
            );
        } else {
            comm.scatterv(
                elem,
                None,
                path.mirror.bytes_mut()?,
                counts,
                displs,
                self.io_root,
            );
        }

        let local_f = fields.get_mut(local)?;
        local_f.transform_chunks(true);
        local_f.copy_values_from(&path.mirror)?;
        log::trace!("scattered field `{field_name}` from rank {}", self.io_root);
        Ok(path.io_field)
    }

    /// Presence-aware scatter directly into the local field's buffer.
    ///
    /// The I/O rank's `has_field_in_file` is broadcast first; when false no
    /// further data moves. Identity plans broadcast the raw local buffer.
    /// Otherwise the companion is rearranged and scattered into `local`,
    /// and the local field's chunked representation is restored.
    pub fn scatter_present<C: Communicator>(
        &mut self,
        comm: &C,
        fields: &mut FieldRegistry,
        local: FieldId,
        has_field_in_file: &mut bool,
    ) -> Result<(), RedistError> {
        comm.bcast_flag(has_field_in_file, self.io_root);
        if !*has_field_in_file {
            return Ok(());
        }

        let Some(path) = self.path.as_mut() else {
            let local_f = fields.get_mut(local)?;
            local_f.transform_chunks(true);
            let elem = local_f.elem();
            comm.bcast(elem, local_f.bytes_mut()?, self.io_root);
            local_f.transform_chunks(false);
            return Ok(());
        };
        check_ranks(&path.layout, comm)?;
        let elem = self.key.elem;

        {
            let local_f = fields.get_mut(local)?;
            local_f.transform_chunks(true);
            check_local_count(&path.layout, comm.rank(), local_f)?;
            if local_f.elem() != elem {
                return Err(RedistError::ElemMismatch {
                    field: local_f.meta().name.clone(),
                    expected: elem,
                    found: local_f.elem(),
                });
            }
        }

        let counts = path.layout.counts();
        let displs = path.layout.displs();
        if comm.rank() == self.io_root {
            path.wire.resize(path.layout.wire_elems() * elem.size_bytes());
            dispatch_elem(
                elem,
                ScatterKernel {
                    layout: &path.layout,
                    src: fields.get(path.io_field)?.bytes()?,
                    dst: path.wire.as_bytes_mut(),
                },
            )?;
            comm.scatterv(
                elem,
                Some(path.wire.as_bytes()),
                fields.get_mut(local)?.bytes_mut()?,
                counts,
                displs,
                self.io_root,
            );
        } else {
            comm.scatterv(
                elem,
                None,
                fields.get_mut(local)?.bytes_mut()?,
                counts,
                displs,
                self.io_root,
            );
        }

        fields.get_mut(local)?.transform_chunks(false);
        Ok(())
    }
}

fn check_ranks<C: Communicator>(
    layout: &RearrangeLayout,
    comm: &C,
) -> Result<(), RedistError> {
    if layout.num_ranks() != comm.size() {
        return Err(RedistError::RankCountMismatch {
            expected: layout.num_ranks(),
            found: comm.size(),
        });
    }
    Ok(())
}

fn check_local_count(
    layout: &RearrangeLayout,
    rank: usize,
    field: &FieldMem,
) -> Result<(), RedistError> {
    let expected = layout.counts()[rank];
    if field.num_elems() != expected {
        return Err(RedistError::SizeMismatch {
            field: field.meta().name.clone(),
            expected,
            found: field.num_elems(),
        });
    }
    Ok(())
}

struct GatherKernel<'a> {
    layout: &'a RearrangeLayout,
    src: &'a [u8],
    dst: &'a mut [u8],
}

impl ElemVisitor for GatherKernel<'_> {
    type Out = Result<(), RedistError>;
    fn visit<T: Element>(self) -> Self::Out {
        rearrange_for_gather::<T>(
            self.layout,
            bytemuck::cast_slice(self.src),
            bytemuck::cast_slice_mut(self.dst),
        )
    }
}

struct ScatterKernel<'a> {
    layout: &'a RearrangeLayout,
    src: &'a [u8],
    dst: &'a mut [u8],
}

impl ElemVisitor for ScatterKernel<'_> {
    type Out = Result<(), RedistError>;
    fn visit<T: Element>(self) -> Self::Out {
        rearrange_for_scatter::<T>(
            self.layout,
            bytemuck::cast_slice(self.src),
            bytemuck::cast_slice_mut(self.dst),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SelfComm;
    use crate::data::decomp::Decomposition;
    use crate::data::field::{FieldMem, FieldMeta};

    fn single_rank_setup(
        elem: ElemType,
        cells: usize,
    ) -> (FieldRegistry, DecompRegistry, FieldId) {
        let mut decomps = DecompRegistry::new();
        decomps
            .register(
                Decomposition::new(
                    1,
                    1,
                    cells,
                    1,
                    1,
                    vec![(0..cells as u32).map(Some).collect()],
                )
                .unwrap(),
            )
            .unwrap();
        let mut fields = FieldRegistry::new();
        let local = fields.register(FieldMem::new(
            FieldMeta::named("sst"),
            0,
            Some(1),
            1,
            elem,
            cells,
        ));
        (fields, decomps, local)
    }

    #[test]
    fn construction_allocates_companion_and_mirror() {
        let (mut fields, decomps, local) = single_rank_setup(ElemType::Byte8, 4);
        let plan =
            RearrangePlan::new(&mut fields, &decomps, local, None, Direction::Gather, 0).unwrap();
        let io = plan.io_field_mem(local);
        assert_ne!(io, local);
        assert_eq!(fields.get(io).unwrap().num_elems(), 4);
        assert_eq!(fields.get(io).unwrap().elem(), ElemType::Byte8);
        assert_eq!(plan.mirror_field().unwrap().num_elems(), 4);
    }

    #[test]
    fn identity_plan_passes_local_through() {
        let mut fields = FieldRegistry::new();
        let decomps = DecompRegistry::new();
        let local = fields.register(FieldMem::new(
            FieldMeta::named("scalar"),
            0,
            None,
            1,
            ElemType::Byte4,
            1,
        ));
        let plan =
            RearrangePlan::new(&mut fields, &decomps, local, None, Direction::Scatter, 0).unwrap();
        assert!(!plan.has_io_field());
        assert_eq!(plan.io_field_mem(local), local);
    }

    #[test]
    fn companion_elem_mismatch_is_fatal() {
        let (mut fields, decomps, local) = single_rank_setup(ElemType::Byte8, 4);
        let io = fields.register(FieldMem::new(
            FieldMeta::named("sst_io"),
            0,
            None,
            9,
            ElemType::Byte4,
            4,
        ));
        let err = RearrangePlan::new(&mut fields, &decomps, local, Some(io), Direction::Gather, 0)
            .unwrap_err();
        assert!(matches!(err, RedistError::IoElemMismatch { .. }));
    }

    #[test]
    fn companion_size_mismatch_is_fatal() {
        let (mut fields, decomps, local) = single_rank_setup(ElemType::Byte8, 4);
        let io = fields.register(FieldMem::new(
            FieldMeta::named("sst_io"),
            0,
            None,
            9,
            ElemType::Byte8,
            5,
        ));
        let err = RearrangePlan::new(&mut fields, &decomps, local, Some(io), Direction::Gather, 0)
            .unwrap_err();
        assert!(matches!(err, RedistError::SizeMismatch { .. }));
    }

    #[test]
    fn companion_for_undecomposed_field_is_fatal() {
        let mut fields = FieldRegistry::new();
        let decomps = DecompRegistry::new();
        let local = fields.register(FieldMem::new(
            FieldMeta::named("scalar"),
            0,
            None,
            1,
            ElemType::Byte4,
            1,
        ));
        let io = fields.register(FieldMem::new(
            FieldMeta::named("scalar_io"),
            0,
            None,
            1,
            ElemType::Byte4,
            1,
        ));
        let err = RearrangePlan::new(&mut fields, &decomps, local, Some(io), Direction::Gather, 0)
            .unwrap_err();
        assert!(matches!(err, RedistError::MissingDecomp { .. }));
    }

    #[test]
    fn single_rank_gather_then_scatter_restores_field() {
        let (mut fields, decomps, local) = single_rank_setup(ElemType::Byte4, 5);
        fields
            .get_mut(local)
            .unwrap()
            .set_values::<u32>(&[3, 1, 4, 1, 5])
            .unwrap();
        let comm = SelfComm;
        let mut plan =
            RearrangePlan::new(&mut fields, &decomps, local, None, Direction::Gather, 0).unwrap();
        let io = plan.gather_field(&comm, &mut fields, local, "sst").unwrap();
        assert_eq!(
            fields.get(io).unwrap().as_slice::<u32>().unwrap(),
            &[3, 1, 4, 1, 5]
        );

        fields
            .get_mut(local)
            .unwrap()
            .set_values::<u32>(&[0; 5])
            .unwrap();
        plan.scatter_field(&comm, &mut fields, None, 0, local, "sst")
            .unwrap();
        assert_eq!(
            fields.get(local).unwrap().as_slice::<u32>().unwrap(),
            &[3, 1, 4, 1, 5]
        );
    }

    #[test]
    fn zero_cell_rank_moves_empty_buffers() {
        let mut decomps = DecompRegistry::new();
        decomps
            .register(Decomposition::new(1, 1, 0, 1, 1, vec![vec![]]).unwrap())
            .unwrap();
        let mut fields = FieldRegistry::new();
        let local = fields.register(FieldMem::new(
            FieldMeta::named("sst"),
            0,
            Some(1),
            1,
            ElemType::Byte8,
            0,
        ));
        let mut plan =
            RearrangePlan::new(&mut fields, &decomps, local, None, Direction::Gather, 0).unwrap();
        let io = plan.gather_field(&SelfComm, &mut fields, local, "sst").unwrap();
        assert_eq!(fields.get(io).unwrap().num_elems(), 0);

        let mut plan =
            RearrangePlan::new(&mut fields, &decomps, local, None, Direction::Scatter, 0).unwrap();
        plan.scatter_field(&SelfComm, &mut fields, None, 0, local, "sst")
            .unwrap();
        assert!(fields.get(local).unwrap().as_slice::<u64>().unwrap().is_empty());
    }

    #[test]
    fn chunked_identity_field_broadcast_restores_form() {
        let mut fields = FieldRegistry::new();
        let decomps = DecompRegistry::new();
        let local = fields.register(FieldMem::new(
            FieldMeta::named("orbital_params"),
            0,
            None,
            1,
            ElemType::Byte4,
            4,
        ));
        fields
            .get_mut(local)
            .unwrap()
            .set_values::<u32>(&[1, 2, 3, 4])
            .unwrap();
        fields.get_mut(local).unwrap().set_chunk_layout(vec![2, 2]).unwrap();
        fields.get_mut(local).unwrap().transform_chunks(false);

        let mut plan =
            RearrangePlan::new(&mut fields, &decomps, local, None, Direction::Scatter, 0).unwrap();
        let mut present = true;
        plan.scatter_present(&SelfComm, &mut fields, local, &mut present)
            .unwrap();
        assert!(present);
        assert!(fields.get(local).unwrap().in_chunk_form());
        fields.get_mut(local).unwrap().transform_chunks(true);
        assert_eq!(
            fields.get(local).unwrap().as_slice::<u32>().unwrap(),
            &[1, 2, 3, 4]
        );
    }

    #[test]
    fn gather_on_identity_plan_is_rejected() {
        let mut fields = FieldRegistry::new();
        let decomps = DecompRegistry::new();
        let local = fields.register(FieldMem::new(
            FieldMeta::named("scalar"),
            0,
            None,
            1,
            ElemType::Byte4,
            1,
        ));
        let mut plan =
            RearrangePlan::new(&mut fields, &decomps, local, None, Direction::Gather, 0).unwrap();
        let err = plan
            .gather_field(&SelfComm, &mut fields, local, "scalar")
            .unwrap_err();
        assert!(matches!(err, RedistError::MissingCompanion { .. }));
    }

    #[test]
    fn key_distinguishes_datatype_and_grid() {
        let (fields, _decomps, local) = {
            let (mut f, d, l) = single_rank_setup(ElemType::Byte4, 2);
            f.register(FieldMem::new(
                FieldMeta::named("other"),
                0,
                Some(1),
                1,
                ElemType::Byte8,
                2,
            ));
            (f, d, l)
        };
        let k1 = PlanKey::from_fields(&fields, local, None, Direction::Gather).unwrap();
        let k2 = PlanKey::from_fields(&fields, FieldId(1), None, Direction::Gather).unwrap();
        assert_ne!(k1, k2);
        let k3 = PlanKey {
            direction: Direction::Scatter,
            ..k1.clone()
        };
        assert_ne!(k1, k3);
    }
}
