//! DataLayout — an ordered, frozen collection of pieces plus its packed
//! byte buffer.
//!
//! # Serialized form
//!
//! ```text
//! [ fixed region | var index | var region ]
//!   fixed region: concatenated POD fields, declaration order
//!   var index:    var_count × (offset:u32le, len:u32le) into the var region
//!   var region:   length-delimited blobs, one per variable-size piece
//! ```
//!
//! # Mapping
//!
//! A layout built in code (the *destination*) can be mapped onto a layout
//! read from disk (the *source*).  Each destination piece looks up its
//! counterpart by (label, container kind, element type, fixed count); a
//! match binds the destination piece to the source's offset/index, a miss
//! makes it unavailable (`get` returns the default).  Mapping copies no
//! payload bytes — destination reads index straight into the source buffer,
//! which is refilled per record via [`DataLayout::set_mapped_data`].
//!
//! # Staging
//!
//! Variable-size pieces are written through a stage: `stage` records the
//! value to emit, [`DataLayout::collect_variable_data_and_update_index`]
//! packs every staged value into the var region and rebuilds the index.
//! `get` always reads the packed buffer (or the mapped source), never the
//! stage.

use serde_json::{Map, Value as Json};

use super::piece::{DataPiece, PieceKind, PieceLocation, PieceMetadata};
use super::types::{ElementType, PieceElement};
use crate::error::{Result, VrsError};

/// Bytes per var-region index entry (offset + length).
const VAR_INDEX_ENTRY_SIZE: usize = 8;

// ── DataLayout ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DataLayout {
    pieces: Vec<DataPiece>,
    fixed_size: usize,
    var_count: usize,

    // Own buffer (unmapped reads and the write side).
    fixed_data: Vec<u8>,
    var_index: Vec<(u32, u32)>,
    var_data: Vec<u8>,

    // Write-side stage, one slot per variable-size piece.
    staged: Vec<Option<Vec<u8>>>,

    // Present once `map_onto` ran.
    mapping: Option<Box<LayoutMapping>>,
}

#[derive(Debug, Clone)]
struct LayoutMapping {
    source: DataLayout,
    /// Per destination piece: its location in the source, or None.
    locations: Vec<Option<PieceLocation>>,
}

impl DataLayout {
    /// Freeze a piece list into a layout.  Fixed offsets and var indexes are
    /// assigned in declaration order; the fixed region is initialized with
    /// piece defaults.
    pub(super) fn from_pieces(mut pieces: Vec<DataPiece>) -> Self {
        let mut fixed_size = 0usize;
        let mut var_count = 0usize;
        for piece in pieces.iter_mut() {
            match piece.fixed_size() {
                Some(size) => {
                    piece.location = PieceLocation::Fixed { offset: fixed_size, size };
                    fixed_size += size;
                }
                None => {
                    piece.location = PieceLocation::Var { index: var_count };
                    var_count += 1;
                }
            }
        }

        let mut fixed_data = vec![0u8; fixed_size];
        for piece in &pieces {
            if let (PieceLocation::Fixed { offset, size }, Some(bytes)) =
                (piece.location, piece.default_bytes.as_ref())
            {
                if bytes.len() == size {
                    fixed_data[offset..offset + size].copy_from_slice(bytes);
                }
            }
        }

        Self {
            pieces,
            fixed_size,
            var_count,
            fixed_data,
            var_index: Vec::new(),
            var_data: Vec::new(),
            staged: vec![None; var_count],
            mapping: None,
        }
    }

    pub fn pieces(&self) -> &[DataPiece] {
        &self.pieces
    }

    pub fn fixed_size(&self) -> usize {
        self.fixed_size
    }

    pub fn var_piece_count(&self) -> usize {
        self.var_count
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Find a piece index by label.
    pub fn find(&self, label: &str) -> Option<usize> {
        self.pieces.iter().position(|p| p.label == label)
    }

    // ── JSON schema ──────────────────────────────────────────────────────────

    pub fn to_json(&self) -> Json {
        let mut map = Map::new();
        map.insert(
            "data_layout".into(),
            Json::Array(self.pieces.iter().map(|p| p.to_json()).collect()),
        );
        Json::Object(map)
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    /// Parse a schema read from a stream's `DL:` tag.  The resulting layout
    /// is a *source*: its geometry comes from the stored offsets/indexes, and
    /// its buffer is filled from record bytes via [`DataLayout::set_data`].
    pub fn from_json_string(json: &str) -> Result<Self> {
        let root: Json = serde_json::from_str(json)?;
        let list = root
            .get("data_layout")
            .and_then(Json::as_array)
            .ok_or_else(|| {
                VrsError::DataLayoutSchemaMismatch("schema JSON has no data_layout array".into())
            })?;

        let mut pieces = Vec::with_capacity(list.len());
        for item in list {
            pieces.push(DataPiece::from_json(item)?);
        }

        let mut fixed_size = 0usize;
        let mut var_count = 0usize;
        for piece in &pieces {
            match piece.location {
                PieceLocation::Fixed { offset, size } => fixed_size = fixed_size.max(offset + size),
                PieceLocation::Var { index } => var_count = var_count.max(index + 1),
            }
        }

        Ok(Self {
            fixed_data: vec![0u8; fixed_size],
            staged: vec![None; var_count],
            pieces,
            fixed_size,
            var_count,
            var_index: Vec::new(),
            var_data: Vec::new(),
            mapping: None,
        })
    }

    // ── Own-buffer serialization ─────────────────────────────────────────────

    /// Pack every staged variable-size value into the var region and rebuild
    /// the index.  Unstaged pieces get empty blobs.
    pub fn collect_variable_data_and_update_index(&mut self) {
        self.var_index.clear();
        self.var_data.clear();
        for slot in &self.staged {
            let blob: &[u8] = slot.as_deref().unwrap_or(&[]);
            let offset = self.var_data.len() as u32;
            self.var_index.push((offset, blob.len() as u32));
            self.var_data.extend_from_slice(blob);
        }
    }

    /// Total serialized size with the current var region.
    pub fn serialized_size(&self) -> usize {
        self.fixed_size + self.var_count * VAR_INDEX_ENTRY_SIZE + self.var_data.len()
    }

    /// Serialize: collect staged values, then emit
    /// `fixed region + var index + var region`.
    pub fn serialize(&mut self) -> Vec<u8> {
        self.collect_variable_data_and_update_index();
        let mut out = Vec::with_capacity(self.serialized_size());
        out.extend_from_slice(&self.fixed_data);
        for &(offset, len) in &self.var_index {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
        }
        out.extend_from_slice(&self.var_data);
        out
    }

    /// Load serialized bytes into this layout's own buffer (source side).
    pub fn set_data(&mut self, bytes: &[u8]) -> Result<()> {
        let index_end = self.fixed_size + self.var_count * VAR_INDEX_ENTRY_SIZE;
        if bytes.len() < index_end {
            return Err(VrsError::DataLayoutSchemaMismatch(format!(
                "layout data {} bytes, schema needs at least {index_end}",
                bytes.len()
            )));
        }
        self.fixed_data.clear();
        self.fixed_data.extend_from_slice(&bytes[..self.fixed_size]);

        self.var_index.clear();
        let var_data = &bytes[index_end..];
        for i in 0..self.var_count {
            let at = self.fixed_size + i * VAR_INDEX_ENTRY_SIZE;
            let offset = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
            let len = u32::from_le_bytes(bytes[at + 4..at + 8].try_into().unwrap());
            if (offset as usize + len as usize) > var_data.len() {
                return Err(VrsError::DataLayoutSchemaMismatch(format!(
                    "var piece {i} range {offset}+{len} exceeds region of {} bytes",
                    var_data.len()
                )));
            }
            self.var_index.push((offset, len));
        }
        self.var_data.clear();
        self.var_data.extend_from_slice(var_data);
        Ok(())
    }

    // ── Mapping ──────────────────────────────────────────────────────────────

    /// Bind this layout's pieces to `source` (a schema read from disk).
    ///
    /// Returns `Ok(true)` when every piece bound, `Ok(false)` when some
    /// optional pieces missed, and `RequiredPieceUnavailable` when a piece
    /// marked required has no structural match — the whole mapping fails.
    pub fn map_onto(&mut self, source: DataLayout) -> Result<bool> {
        let mut locations = Vec::with_capacity(self.pieces.len());
        let mut all_found = true;
        for piece in &self.pieces {
            let found = source
                .pieces
                .iter()
                .find(|src| piece.matches(src))
                .map(|src| src.location);
            if found.is_none() {
                if piece.required {
                    self.mapping = None;
                    return Err(VrsError::RequiredPieceUnavailable(piece.label.clone()));
                }
                all_found = false;
            }
            locations.push(found);
        }
        self.mapping = Some(Box::new(LayoutMapping { source, locations }));
        Ok(all_found)
    }

    /// Refill the mapped source's buffer with one record's layout bytes.
    pub fn set_mapped_data(&mut self, bytes: &[u8]) -> Result<()> {
        match self.mapping.as_mut() {
            Some(m) => m.source.set_data(bytes),
            None => Err(VrsError::InvalidState(
                "set_mapped_data on an unmapped layout".into(),
            )),
        }
    }

    /// Drop the mapping, returning to own-buffer reads.
    pub fn unmap(&mut self) {
        self.mapping = None;
    }

    /// True when both layouts declare the same pieces at the same locations.
    pub fn same_schema(&self, other: &DataLayout) -> bool {
        self.pieces.len() == other.pieces.len()
            && self
                .pieces
                .iter()
                .zip(&other.pieces)
                .all(|(a, b)| a.matches(b) && a.location == b.location)
    }

    /// The own buffer in serialized form (fixed + var index + var region).
    pub fn own_data_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.fixed_size + self.var_index.len() * VAR_INDEX_ENTRY_SIZE + self.var_data.len(),
        );
        out.extend_from_slice(&self.fixed_data);
        for &(offset, len) in &self.var_index {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
        }
        out.extend_from_slice(&self.var_data);
        out
    }

    /// One-call read path for stream players: (re)map onto `source` if its
    /// schema changed since the last call, then load its current bytes.
    /// Returns whether every piece of this layout is bound.
    pub fn read_from(&mut self, source: &DataLayout) -> Result<bool> {
        let needs_mapping = match &self.mapping {
            None => true,
            Some(m) => !m.source.same_schema(source),
        };
        let fully_mapped = if needs_mapping {
            self.map_onto(source.clone())?
        } else {
            self.mapping
                .as_ref()
                .map(|m| m.locations.iter().all(Option::is_some))
                .unwrap_or(false)
        };
        self.set_mapped_data(&source.own_data_bytes())?;
        Ok(fully_mapped)
    }

    // ── Raw piece access (used by the typed accessors) ───────────────────────

    /// Bytes of a fixed-size piece, if available.
    pub(super) fn fixed_bytes(&self, piece_index: usize) -> Option<&[u8]> {
        match &self.mapping {
            Some(m) => match m.locations.get(piece_index).copied().flatten() {
                Some(PieceLocation::Fixed { offset, size }) => {
                    m.source.fixed_data.get(offset..offset + size)
                }
                _ => None,
            },
            None => match self.pieces.get(piece_index)?.location {
                PieceLocation::Fixed { offset, size } => {
                    self.fixed_data.get(offset..offset + size)
                }
                PieceLocation::Var { .. } => None,
            },
        }
    }

    /// Blob of a variable-size piece, if available.
    pub(super) fn var_bytes(&self, piece_index: usize) -> Option<&[u8]> {
        match &self.mapping {
            Some(m) => match m.locations.get(piece_index).copied().flatten() {
                Some(PieceLocation::Var { index }) => m.source.own_var_blob(index),
                _ => None,
            },
            None => match self.pieces.get(piece_index)?.location {
                PieceLocation::Var { index } => self.own_var_blob(index),
                PieceLocation::Fixed { .. } => None,
            },
        }
    }

    fn own_var_blob(&self, var_index: usize) -> Option<&[u8]> {
        let &(offset, len) = self.var_index.get(var_index)?;
        self.var_data.get(offset as usize..offset as usize + len as usize)
    }

    pub(super) fn is_piece_available(&self, piece_index: usize) -> bool {
        match self.pieces.get(piece_index).map(|p| p.kind.is_fixed_size()) {
            Some(true) => self.fixed_bytes(piece_index).is_some(),
            Some(false) => self.var_bytes(piece_index).is_some(),
            None => false,
        }
    }

    /// Overwrite a fixed-size piece in the own buffer.  Rejected on mapped
    /// layouts: the source buffer belongs to the file.
    pub(super) fn write_fixed(&mut self, piece_index: usize, bytes: &[u8]) -> Result<()> {
        if self.mapping.is_some() {
            return Err(VrsError::InvalidState(
                "cannot write through a mapped layout".into(),
            ));
        }
        match self.pieces.get(piece_index).map(|p| p.location) {
            Some(PieceLocation::Fixed { offset, size }) if bytes.len() == size => {
                self.fixed_data[offset..offset + size].copy_from_slice(bytes);
                Ok(())
            }
            Some(PieceLocation::Fixed { size, .. }) => Err(VrsError::InvalidParameter(format!(
                "piece expects {size} bytes, got {}",
                bytes.len()
            ))),
            _ => Err(VrsError::InvalidParameter(format!(
                "piece {piece_index} is not fixed-size"
            ))),
        }
    }

    /// Stage a variable-size piece's wire bytes for the next serialization.
    pub(super) fn stage_var(&mut self, piece_index: usize, wire: Vec<u8>) -> Result<()> {
        match self.pieces.get(piece_index).map(|p| p.location) {
            Some(PieceLocation::Var { index }) => {
                self.staged[index] = Some(wire);
                Ok(())
            }
            _ => Err(VrsError::InvalidParameter(format!(
                "piece {piece_index} is not variable-size"
            ))),
        }
    }

    /// Copy the currently readable value of a variable-size piece into the
    /// stage, so a mapped or deserialized value can be re-emitted.
    pub fn stage_current_value(&mut self, piece_index: usize) -> Result<()> {
        let wire = self
            .var_bytes(piece_index)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        self.stage_var(piece_index, wire)
    }

    pub(super) fn piece(&self, piece_index: usize) -> Option<&DataPiece> {
        self.pieces.get(piece_index)
    }

    // ── Value dump (CLI / diagnostics) ───────────────────────────────────────

    /// Decode every piece to JSON: `{"label": value, ...}`.  Unavailable
    /// pieces render as their default or `null`.
    pub fn values_json(&self) -> Json {
        let mut map = Map::new();
        for index in 0..self.pieces.len() {
            let value = self.piece_value_json(index);
            map.insert(self.pieces[index].label.clone(), value);
        }
        Json::Object(map)
    }

    /// Decode one piece to JSON.
    pub fn piece_value_json(&self, piece_index: usize) -> Json {
        let piece = match self.pieces.get(piece_index) {
            Some(p) => p,
            None => return Json::Null,
        };
        let decoded = match piece.kind {
            PieceKind::Value => self
                .fixed_bytes(piece_index)
                .map(|bytes| decode_scalar_json(piece.element, bytes)),
            PieceKind::Array { count } => self.fixed_bytes(piece_index).map(|bytes| {
                let size = piece.element.byte_size().unwrap_or(1);
                Json::Array(
                    (0..count)
                        .map(|i| decode_scalar_json(piece.element, &bytes[i * size..]))
                        .collect(),
                )
            }),
            PieceKind::String => self
                .var_bytes(piece_index)
                .map(|b| Json::String(String::from_utf8_lossy(b).into_owned())),
            PieceKind::Vector => self
                .var_bytes(piece_index)
                .map(|b| decode_vector_json(piece.element, b)),
            PieceKind::StringMap => self
                .var_bytes(piece_index)
                .map(|b| decode_string_map_json(piece.element, b)),
        };
        match decoded {
            Some(v) => v,
            None => piece.default.clone().unwrap_or(Json::Null),
        }
    }
}

// ── Element-dispatched JSON decoding ────────────────────────────────────────

macro_rules! with_element_type {
    ($elem:expr, $t:ident => $body:expr, $string_body:expr) => {
        match $elem {
            ElementType::Int8 => {
                type $t = i8;
                $body
            }
            ElementType::UInt8 => {
                type $t = u8;
                $body
            }
            ElementType::Int16 => {
                type $t = i16;
                $body
            }
            ElementType::UInt16 => {
                type $t = u16;
                $body
            }
            ElementType::Int32 => {
                type $t = i32;
                $body
            }
            ElementType::UInt32 => {
                type $t = u32;
                $body
            }
            ElementType::Int64 => {
                type $t = i64;
                $body
            }
            ElementType::UInt64 => {
                type $t = u64;
                $body
            }
            ElementType::Float => {
                type $t = f32;
                $body
            }
            ElementType::Double => {
                type $t = f64;
                $body
            }
            ElementType::Bool => {
                type $t = super::types::Bool;
                $body
            }
            ElementType::Point2Di => {
                type $t = super::types::Point2Di;
                $body
            }
            ElementType::Point2Df => {
                type $t = super::types::Point2Df;
                $body
            }
            ElementType::Point2Dd => {
                type $t = super::types::Point2Dd;
                $body
            }
            ElementType::Point3Di => {
                type $t = super::types::Point3Di;
                $body
            }
            ElementType::Point3Df => {
                type $t = super::types::Point3Df;
                $body
            }
            ElementType::Point3Dd => {
                type $t = super::types::Point3Dd;
                $body
            }
            ElementType::Point4Di => {
                type $t = super::types::Point4Di;
                $body
            }
            ElementType::Point4Df => {
                type $t = super::types::Point4Df;
                $body
            }
            ElementType::Point4Dd => {
                type $t = super::types::Point4Dd;
                $body
            }
            ElementType::Matrix2Di => {
                type $t = super::types::Matrix2Di;
                $body
            }
            ElementType::Matrix2Df => {
                type $t = super::types::Matrix2Df;
                $body
            }
            ElementType::Matrix2Dd => {
                type $t = super::types::Matrix2Dd;
                $body
            }
            ElementType::Matrix3Di => {
                type $t = super::types::Matrix3Di;
                $body
            }
            ElementType::Matrix3Df => {
                type $t = super::types::Matrix3Df;
                $body
            }
            ElementType::Matrix3Dd => {
                type $t = super::types::Matrix3Dd;
                $body
            }
            ElementType::Matrix4Di => {
                type $t = super::types::Matrix4Di;
                $body
            }
            ElementType::Matrix4Df => {
                type $t = super::types::Matrix4Df;
                $body
            }
            ElementType::Matrix4Dd => {
                type $t = super::types::Matrix4Dd;
                $body
            }
            ElementType::String => $string_body,
        }
    };
}

fn decode_scalar_json(element: ElementType, bytes: &[u8]) -> Json {
    with_element_type!(element, T => {
        if bytes.len() >= <T as PieceElement>::SIZE {
            PieceElement::to_json(&<T as PieceElement>::read_le(bytes))
        } else {
            Json::Null
        }
    }, Json::Null)
}

fn decode_vector_json(element: ElementType, blob: &[u8]) -> Json {
    use super::types::VarElement;
    with_element_type!(element, T => {
        let mut pos = 0usize;
        let mut items = Vec::new();
        while pos < blob.len() {
            match <T as VarElement>::read_wire(blob, &mut pos) {
                Some(v) => items.push(v.to_json_value()),
                None => break,
            }
        }
        Json::Array(items)
    }, {
        let mut pos = 0usize;
        let mut items = Vec::new();
        while pos < blob.len() {
            match <String as super::types::VarElement>::read_wire(blob, &mut pos) {
                Some(v) => items.push(Json::String(v)),
                None => break,
            }
        }
        Json::Array(items)
    })
}

fn decode_string_map_json(element: ElementType, blob: &[u8]) -> Json {
    use super::types::VarElement;
    with_element_type!(element, T => {
        let mut pos = 0usize;
        let mut map = Map::new();
        while pos < blob.len() {
            let key = match <String as VarElement>::read_wire(blob, &mut pos) {
                Some(k) => k,
                None => break,
            };
            match <T as VarElement>::read_wire(blob, &mut pos) {
                Some(v) => map.insert(key, v.to_json_value()),
                None => break,
            };
        }
        Json::Object(map)
    }, {
        let mut pos = 0usize;
        let mut map = Map::new();
        while pos < blob.len() {
            let key = match <String as VarElement>::read_wire(blob, &mut pos) {
                Some(k) => k,
                None => break,
            };
            match <String as VarElement>::read_wire(blob, &mut pos) {
                Some(v) => map.insert(key, Json::String(v)),
                None => break,
            };
        }
        Json::Object(map)
    })
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Declares pieces in order; `build` freezes them into a [`DataLayout`].
/// The handle returned by each `add_*` reads and writes that piece in any
/// layout built from this builder.
#[derive(Debug, Default)]
pub struct DataLayoutBuilder {
    pieces: Vec<DataPiece>,
}

impl DataLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: PieceKind, element: ElementType, label: &str) -> usize {
        self.pieces.push(DataPiece {
            label: label.to_string(),
            kind,
            element,
            // Placeholder; real locations are assigned by from_pieces.
            location: PieceLocation::Var { index: 0 },
            default: None,
            default_bytes: None,
            metadata: PieceMetadata::default(),
            required: false,
        });
        self.pieces.len() - 1
    }

    pub fn value<T: PieceElement>(&mut self, label: &str) -> super::accessors::DataPieceValue<T> {
        let index = self.push(PieceKind::Value, T::ELEMENT, label);
        super::accessors::DataPieceValue::new(index)
    }

    pub fn value_with_default<T: PieceElement>(
        &mut self,
        label: &str,
        default: T,
    ) -> super::accessors::DataPieceValue<T> {
        let handle = self.value::<T>(label);
        let piece = self.pieces.last_mut().unwrap();
        let mut bytes = vec![0u8; T::SIZE];
        default.write_le(&mut bytes);
        piece.default_bytes = Some(bytes);
        piece.default = Some(PieceElement::to_json(&default));
        handle
    }

    pub fn array<T: PieceElement>(
        &mut self,
        label: &str,
        count: usize,
    ) -> super::accessors::DataPieceArray<T> {
        let index = self.push(PieceKind::Array { count }, T::ELEMENT, label);
        super::accessors::DataPieceArray::new(index, count)
    }

    pub fn string(&mut self, label: &str) -> super::accessors::DataPieceString {
        let index = self.push(PieceKind::String, ElementType::String, label);
        super::accessors::DataPieceString::new(index)
    }

    pub fn vector<T: super::types::VarElement>(
        &mut self,
        label: &str,
    ) -> super::accessors::DataPieceVector<T> {
        let index = self.push(PieceKind::Vector, T::ELEMENT, label);
        super::accessors::DataPieceVector::new(index)
    }

    pub fn string_map<T: super::types::VarElement>(
        &mut self,
        label: &str,
    ) -> super::accessors::DataPieceStringMap<T> {
        let index = self.push(PieceKind::StringMap, T::ELEMENT, label);
        super::accessors::DataPieceStringMap::new(index)
    }

    /// Mark the most recently added piece as required-on-mapping.
    pub fn require_last(&mut self) -> &mut Self {
        if let Some(piece) = self.pieces.last_mut() {
            piece.required = true;
        }
        self
    }

    /// Attach a unit to the most recently added piece.
    pub fn unit_last(&mut self, unit: &str) -> &mut Self {
        if let Some(piece) = self.pieces.last_mut() {
            piece.metadata.unit = Some(unit.to_string());
        }
        self
    }

    /// Attach a description to the most recently added piece.
    pub fn describe_last(&mut self, description: &str) -> &mut Self {
        if let Some(piece) = self.pieces.last_mut() {
            piece.metadata.description = Some(description.to_string());
        }
        self
    }

    /// Attach a min/max/increment range to the most recently added piece.
    pub fn range_last(&mut self, min: Json, max: Json, increment: Option<Json>) -> &mut Self {
        if let Some(piece) = self.pieces.last_mut() {
            piece.metadata.min = Some(min);
            piece.metadata.max = Some(max);
            piece.metadata.increment = increment;
        }
        self
    }

    pub fn build(self) -> DataLayout {
        DataLayout::from_pieces(self.pieces)
    }
}
