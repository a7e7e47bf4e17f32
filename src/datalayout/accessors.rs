//! Typed piece accessors.
//!
//! `DataLayoutBuilder` hands out one handle per declared piece; the handle
//! reads and writes that piece in any layout built from the same builder.
//! Reads go through byte-copy decoding only — no reference into the layout
//! buffer ever escapes — and fall back to the piece default (then the type
//! default) when the piece is unavailable, e.g. after a partial mapping.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use super::layout::DataLayout;
use super::types::{PieceElement, VarElement};
use crate::error::{Result, VrsError};

// ── value<T> ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct DataPieceValue<T: PieceElement> {
    index: usize,
    _marker: PhantomData<T>,
}

impl<T: PieceElement> DataPieceValue<T> {
    pub(super) fn new(index: usize) -> Self {
        Self { index, _marker: PhantomData }
    }

    pub fn get(&self, layout: &DataLayout) -> T {
        match layout.fixed_bytes(self.index) {
            Some(bytes) if bytes.len() >= T::SIZE => T::read_le(bytes),
            _ => self.default(layout),
        }
    }

    /// The declared default, or `T::default()` without one.
    pub fn default(&self, layout: &DataLayout) -> T {
        layout
            .piece(self.index)
            .and_then(|p| {
                p.default_bytes
                    .as_ref()
                    .filter(|b| b.len() >= T::SIZE)
                    .map(|b| T::read_le(b))
                    .or_else(|| p.default.as_ref().and_then(T::from_json))
            })
            .unwrap_or_default()
    }

    pub fn set(&self, layout: &mut DataLayout, value: T) -> Result<()> {
        let mut bytes = vec![0u8; T::SIZE];
        value.write_le(&mut bytes);
        layout.write_fixed(self.index, &bytes)
    }

    pub fn is_available(&self, layout: &DataLayout) -> bool {
        layout.is_piece_available(self.index)
    }
}

// ── array<T> ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct DataPieceArray<T: PieceElement> {
    index: usize,
    count: usize,
    _marker: PhantomData<T>,
}

impl<T: PieceElement> DataPieceArray<T> {
    pub(super) fn new(index: usize, count: usize) -> Self {
        Self { index, count, _marker: PhantomData }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn get(&self, layout: &DataLayout) -> Vec<T> {
        match layout.fixed_bytes(self.index) {
            Some(bytes) if bytes.len() >= self.count * T::SIZE => (0..self.count)
                .map(|i| T::read_le(&bytes[i * T::SIZE..]))
                .collect(),
            _ => vec![T::default(); self.count],
        }
    }

    /// `values` must have exactly the declared element count.
    pub fn set(&self, layout: &mut DataLayout, values: &[T]) -> Result<()> {
        if values.len() != self.count {
            return Err(VrsError::InvalidParameter(format!(
                "array piece holds {} elements, got {}",
                self.count,
                values.len()
            )));
        }
        let mut bytes = vec![0u8; self.count * T::SIZE];
        for (i, v) in values.iter().enumerate() {
            v.write_le(&mut bytes[i * T::SIZE..]);
        }
        layout.write_fixed(self.index, &bytes)
    }

    pub fn is_available(&self, layout: &DataLayout) -> bool {
        layout.is_piece_available(self.index)
    }
}

// ── string ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct DataPieceString {
    index: usize,
}

impl DataPieceString {
    pub(super) fn new(index: usize) -> Self {
        Self { index }
    }

    pub fn get(&self, layout: &DataLayout) -> String {
        match layout.var_bytes(self.index) {
            Some(blob) => String::from_utf8_lossy(blob).into_owned(),
            None => layout
                .piece(self.index)
                .and_then(|p| p.default.as_ref())
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Stage a value for the next serialization.
    pub fn stage(&self, layout: &mut DataLayout, value: &str) -> Result<()> {
        layout.stage_var(self.index, value.as_bytes().to_vec())
    }

    /// Copy the currently readable value into the stage.
    pub fn stage_current_value(&self, layout: &mut DataLayout) -> Result<()> {
        layout.stage_current_value(self.index)
    }

    pub fn is_available(&self, layout: &DataLayout) -> bool {
        layout.is_piece_available(self.index)
    }
}

// ── vector<T> ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct DataPieceVector<T: VarElement> {
    index: usize,
    _marker: PhantomData<T>,
}

impl<T: VarElement> DataPieceVector<T> {
    pub(super) fn new(index: usize) -> Self {
        Self { index, _marker: PhantomData }
    }

    pub fn get(&self, layout: &DataLayout) -> Vec<T> {
        let blob = match layout.var_bytes(self.index) {
            Some(b) => b,
            None => return Vec::new(),
        };
        let mut pos = 0usize;
        let mut out = Vec::new();
        while pos < blob.len() {
            match T::read_wire(blob, &mut pos) {
                Some(v) => out.push(v),
                None => break,
            }
        }
        out
    }

    pub fn stage(&self, layout: &mut DataLayout, values: &[T]) -> Result<()> {
        let mut wire = Vec::new();
        for v in values {
            v.append_wire(&mut wire);
        }
        layout.stage_var(self.index, wire)
    }

    pub fn stage_current_value(&self, layout: &mut DataLayout) -> Result<()> {
        layout.stage_current_value(self.index)
    }

    pub fn is_available(&self, layout: &DataLayout) -> bool {
        layout.is_piece_available(self.index)
    }
}

// ── string_map<T> ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct DataPieceStringMap<T: VarElement> {
    index: usize,
    _marker: PhantomData<T>,
}

impl<T: VarElement> DataPieceStringMap<T> {
    pub(super) fn new(index: usize) -> Self {
        Self { index, _marker: PhantomData }
    }

    pub fn get(&self, layout: &DataLayout) -> BTreeMap<String, T> {
        let blob = match layout.var_bytes(self.index) {
            Some(b) => b,
            None => return BTreeMap::new(),
        };
        let mut pos = 0usize;
        let mut out = BTreeMap::new();
        while pos < blob.len() {
            let key = match String::read_wire(blob, &mut pos) {
                Some(k) => k,
                None => break,
            };
            match T::read_wire(blob, &mut pos) {
                Some(v) => out.insert(key, v),
                None => break,
            };
        }
        out
    }

    /// Entries are emitted in key order, so serialization is deterministic.
    pub fn stage(&self, layout: &mut DataLayout, values: &BTreeMap<String, T>) -> Result<()> {
        let mut wire = Vec::new();
        for (key, value) in values {
            key.append_wire(&mut wire);
            value.append_wire(&mut wire);
        }
        layout.stage_var(self.index, wire)
    }

    pub fn stage_current_value(&self, layout: &mut DataLayout) -> Result<()> {
        layout.stage_current_value(self.index)
    }

    pub fn is_available(&self, layout: &DataLayout) -> bool {
        layout.is_piece_available(self.index)
    }
}
