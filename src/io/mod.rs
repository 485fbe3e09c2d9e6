//! Narrow seams to the external file collaborator.
//!
//! The real on-disk format (NetCDF/PnetCDF) is owned entirely by the I/O
//! collaborator; this engine only needs two calls from it: write an
//! assembled field and read one back with a presence answer. [`MemFile`]
//! is an in-memory implementation of both seams used by tests and serial
//! demos.

use crate::data::element::ElemType;
use crate::data::field::FieldMem;
use crate::redist_error::RedistError;
use hashbrown::HashMap;

/// Model timestamp attached to a written record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeStamp {
    /// Date as YYYYMMDD.
    pub date: i32,
    /// Second of day.
    pub datesec: i32,
}

/// Write side of an open output file.
pub trait OutputFile {
    /// Append the assembled field's current buffer as one record under its
    /// I/O variable name.
    fn write_grided_data(&mut self, field: &FieldMem, time: &TimeStamp)
    -> Result<(), RedistError>;
}

/// Read side of an open input file.
pub trait InputFile {
    /// Read the record at `time_pos` into the field's buffer, resolving
    /// the variable by the field's I/O name.
    ///
    /// Returns whether the variable exists. With `check_existence` the
    /// caller opted into leniency and absence is `Ok(false)`; without it,
    /// absence is an error.
    fn read_data(
        &mut self,
        field: &mut FieldMem,
        time_pos: usize,
        check_existence: bool,
    ) -> Result<bool, RedistError>;
}

#[derive(Debug)]
struct MemVar {
    elem: ElemType,
    records: Vec<(TimeStamp, Vec<u8>)>,
}

/// In-memory variable store implementing both file seams.
#[derive(Debug, Default)]
pub struct MemFile {
    vars: HashMap<String, MemVar>,
}

impl MemFile {
    pub fn new() -> Self {
        MemFile::default()
    }

    /// Number of records stored under `name`.
    pub fn num_records(&self, name: &str) -> usize {
        self.vars.get(name).map_or(0, |v| v.records.len())
    }

    /// Timestamp of a stored record.
    pub fn record_time(&self, name: &str, time_pos: usize) -> Option<TimeStamp> {
        self.vars
            .get(name)
            .and_then(|v| v.records.get(time_pos))
            .map(|(t, _)| *t)
    }
}

impl OutputFile for MemFile {
    fn write_grided_data(
        &mut self,
        field: &FieldMem,
        time: &TimeStamp,
    ) -> Result<(), RedistError> {
        let bytes = field.bytes()?.to_vec();
        let var = self
            .vars
            .entry(field.meta().io_name.clone())
            .or_insert_with(|| MemVar {
                elem: field.elem(),
                records: Vec::new(),
            });
        if var.elem != field.elem() {
            return Err(RedistError::ElemMismatch {
                field: field.meta().name.clone(),
                expected: var.elem,
                found: field.elem(),
            });
        }
        var.records.push((*time, bytes));
        Ok(())
    }
}

impl InputFile for MemFile {
    fn read_data(
        &mut self,
        field: &mut FieldMem,
        time_pos: usize,
        check_existence: bool,
    ) -> Result<bool, RedistError> {
        let name = field.meta().io_name.clone();
        let Some(var) = self.vars.get(&name) else {
            if check_existence {
                return Ok(false);
            }
            return Err(RedistError::FieldNotInFile { field: name });
        };
        if var.elem != field.elem() {
            return Err(RedistError::ElemMismatch {
                field: field.meta().name.clone(),
                expected: field.elem(),
                found: var.elem,
            });
        }
        let Some((_, bytes)) = var.records.get(time_pos) else {
            return Err(RedistError::TimeRecordOutOfRange {
                field: name,
                time_pos,
                len: var.records.len(),
            });
        };
        if bytes.len() != field.bytes()?.len() {
            return Err(RedistError::SizeMismatch {
                field: name,
                expected: field.num_elems(),
                found: bytes.len() / field.elem().size_bytes(),
            });
        }
        field.bytes_mut()?.copy_from_slice(bytes);
        Ok(true)
    }
}
