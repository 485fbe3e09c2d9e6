//! Plan cache: at-most-one redistribution plan per field configuration.
//!
//! Lookups scan the plan list linearly; the cardinality is the number of
//! distinct (component, decomposition, grid, datatype, companion,
//! direction) combinations a model uses, which stays small. After every
//! resolution the companion field's descriptive metadata is refreshed from
//! the authoritative side, so a plan reused across many model variables
//! always reports the current call's metadata.

use crate::comm::Communicator;
use crate::data::decomp::DecompRegistry;
use crate::data::field::{FieldId, FieldRegistry};
use crate::io::{InputFile, OutputFile, TimeStamp};
use crate::rearrange::plan::{Direction, PlanKey, RearrangePlan};
use crate::redist_error::RedistError;

/// Registry of rearrange plans for one runtime instance.
#[derive(Debug)]
pub struct PlanCache {
    plans: Vec<RearrangePlan>,
    io_root: usize,
}

impl Default for PlanCache {
    fn default() -> Self {
        PlanCache::new(0)
    }
}

impl PlanCache {
    /// A cache whose plans assemble onto `io_root`.
    pub fn new(io_root: usize) -> Self {
        PlanCache {
            plans: Vec::new(),
            io_root,
        }
    }

    /// Number of live plans.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Resolve or create the plan for a field configuration, then refresh
    /// the companion field's metadata from `io` when supplied, else from
    /// `local`.
    ///
    /// Returns the plan's index; indices are stable because the cache is
    /// append-only.
    pub fn apply_plan(
        &mut self,
        fields: &mut FieldRegistry,
        decomps: &DecompRegistry,
        local: FieldId,
        io: Option<FieldId>,
        direction: Direction,
    ) -> Result<usize, RedistError> {
        let key = PlanKey::from_fields(fields, local, io, direction)?;
        let idx = match self.plans.iter().position(|p| p.matches(&key)) {
            Some(idx) => idx,
            None => {
                let plan =
                    RearrangePlan::new(fields, decomps, local, io, direction, self.io_root)?;
                log::trace!(
                    "new rearrange plan #{} for field `{}`",
                    self.plans.len(),
                    fields.get(local)?.meta().name
                );
                self.plans.push(plan);
                self.plans.len() - 1
            }
        };

        let io_resolved = self.plans[idx].io_field_mem(local);
        if io_resolved != local {
            let source = io.unwrap_or(local);
            let attrs = fields.get(source)?.meta().clone();
            *fields.get_mut(io_resolved)?.meta_mut() = attrs;
        }
        Ok(idx)
    }

    /// Look up a plan by index (as returned by [`apply_plan`](Self::apply_plan)).
    pub fn plan(&self, idx: usize) -> Option<&RearrangePlan> {
        self.plans.get(idx)
    }

    /// Gather `local` onto the I/O rank; returns the assembled field.
    pub fn gather_field<C: Communicator>(
        &mut self,
        comm: &C,
        fields: &mut FieldRegistry,
        decomps: &DecompRegistry,
        local: FieldId,
        io: Option<FieldId>,
        field_name: &str,
    ) -> Result<FieldId, RedistError> {
        let idx = self.apply_plan(fields, decomps, local, io, Direction::Gather)?;
        self.plans[idx].gather_field(comm, fields, local, field_name)
    }

    /// Scatter the assembled field (optionally read from `file` at
    /// `time_pos` first) into `local`.
    pub fn scatter_field<C: Communicator>(
        &mut self,
        comm: &C,
        fields: &mut FieldRegistry,
        decomps: &DecompRegistry,
        file: Option<&mut dyn InputFile>,
        time_pos: usize,
        local: FieldId,
        io: Option<FieldId>,
        field_name: &str,
    ) -> Result<FieldId, RedistError> {
        let idx = self.apply_plan(fields, decomps, local, io, Direction::Scatter)?;
        self.plans[idx].scatter_field(comm, fields, file, time_pos, local, field_name)
    }

    /// Gather `local` and, on the I/O rank only, write the assembled field
    /// into `file`.
    pub fn gather_write_field<C: Communicator>(
        &mut self,
        comm: &C,
        fields: &mut FieldRegistry,
        decomps: &DecompRegistry,
        file: &mut dyn OutputFile,
        local: FieldId,
        time: &TimeStamp,
    ) -> Result<(), RedistError> {
        let name = fields.get(local)?.meta().name.clone();
        let io = self.gather_field(comm, fields, decomps, local, None, &name)?;
        if comm.rank() == self.io_root {
            file.write_grided_data(fields.get(io)?, time)?;
        }
        Ok(())
    }

    /// Read the companion field from `file` on the I/O rank (optionally
    /// under a temporary name override for this call only), broadcast its
    /// presence, and scatter it into `local`.
    ///
    /// Returns the presence flag, identical on every rank. With
    /// `check_existence` an absent field is a normal `Ok(false)`; without
    /// it, absence is an error on the I/O rank.
    pub fn read_scatter_field<C: Communicator>(
        &mut self,
        comm: &C,
        fields: &mut FieldRegistry,
        decomps: &DecompRegistry,
        file: &mut dyn InputFile,
        local: FieldId,
        io_name_override: Option<&str>,
        time_pos: usize,
        check_existence: bool,
    ) -> Result<bool, RedistError> {
        let idx = self.apply_plan(fields, decomps, local, None, Direction::Scatter)?;
        let mut present = false;
        let mut read_err = None;
        if comm.rank() == self.io_root {
            let io_id = self.plans[idx].io_field_mem(local);
            let restore_name = fields.get(local)?.meta().io_name.clone();
            if let Some(name) = io_name_override {
                fields.get_mut(io_id)?.meta_mut().io_name = name.to_string();
            }
            let read = file.read_data(fields.get_mut(io_id)?, time_pos, check_existence);
            fields.get_mut(io_id)?.meta_mut().io_name = restore_name;
            match read {
                Ok(p) => {
                    present = p;
                    if !p {
                        log::warn!(
                            "field `{}` absent from input file",
                            fields.get(local)?.meta().name
                        );
                    }
                }
                // The presence broadcast below still runs ("absent"), so
                // the other ranks of the collective return instead of
                // waiting on a root that already bailed out.
                Err(e) => read_err = Some(e),
            }
        }
        self.plans[idx].scatter_present(comm, fields, local, &mut present)?;
        if let Some(e) = read_err {
            return Err(e);
        }
        Ok(present)
    }
}
