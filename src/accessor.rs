//! Typed per-element view over a [`crate::file::GvrsFile`] (`spec.md`
//! §4.9): translates `(row, col)` into `(tileIndex, indexInTile)` and
//! dispatches to the file's tile-resident read/write path.
//!
//! The original C/Java design tracks a generation counter on its tile
//! arena so a stale reference left over from an evicted tile can be
//! detected; Rust's borrow checker already rules that out; every accessor
//! borrows the file exclusively for the call it makes, so no tile
//! reference can outlive an eviction that might invalidate it.

use crate::error::{GvrsError, GvrsResult};
use crate::file::GvrsFile;

/// A handle bound to one named element, offering `f64`-typed cell access.
/// Short-lived by design: borrow the file, do the access, let it drop.
pub struct ElementAccessor<'a> {
    file: &'a mut GvrsFile,
    element_index: usize,
}

impl<'a> ElementAccessor<'a> {
    pub(crate) fn new(file: &'a mut GvrsFile, element_index: usize) -> Self {
        Self { file, element_index }
    }

    /// Reads the cell at `(row, col)`, synthesizing the element's fill
    /// value if that tile has never been written.
    pub fn get(&mut self, row: u32, col: u32) -> GvrsResult<f64> {
        self.file.read_value(self.element_index, row, col)
    }

    /// Writes `value` to `(row, col)`. Requires the file to be open for
    /// writing and not poisoned.
    pub fn set(&mut self, row: u32, col: u32, value: f64) -> GvrsResult<()> {
        self.file.write_value(self.element_index, row, col, value)
    }

    /// Convenience wrapper returning an `i32`, truncating the stored
    /// floating value.
    pub fn get_int(&mut self, row: u32, col: u32) -> GvrsResult<i32> {
        let v = self.get(row, col)?;
        i32_from_checked(v)
    }

    /// Convenience wrapper accepting an `i32`.
    pub fn set_int(&mut self, row: u32, col: u32, value: i32) -> GvrsResult<()> {
        self.set(row, col, f64::from(value))
    }

    /// Convenience wrapper returning an `f32`.
    pub fn get_float(&mut self, row: u32, col: u32) -> GvrsResult<f32> {
        Ok(self.get(row, col)? as f32)
    }

    /// Convenience wrapper accepting an `f32`.
    pub fn set_float(&mut self, row: u32, col: u32, value: f32) -> GvrsResult<()> {
        self.set(row, col, f64::from(value))
    }
}

fn i32_from_checked(v: f64) -> GvrsResult<i32> {
    if v.is_finite() && v >= f64::from(i32::MIN) && v <= f64::from(i32::MAX) {
        Ok(v as i32)
    } else {
        Err(GvrsError::InvalidSpec(format!(
            "value {v} does not fit in i32"
        )))
    }
}
