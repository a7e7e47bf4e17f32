//! Piece descriptors — one named, typed field of a data layout.
//!
//! A piece is fully described by (label, kind, element type, fixed count).
//! That triple-plus-shape is also the mapping key: a reader's piece binds to
//! a file's piece only when all of them agree.
//!
//! # JSON descriptor
//!
//! ```json
//! {"name":"camera_calibration","type":"array<float>","size":20,"offset":24,
//!  "default":[...],"required":true,
//!  "properties":{"unit":"mm","description":"...","min":0}}
//! ```
//!
//! Fixed-size pieces carry `offset` (into the fixed region); variable-size
//! pieces carry `index` (into the var-region index table).  The JSON form
//! round-trips losslessly.

use serde_json::{json, Map, Value as Json};

use super::types::ElementType;
use crate::error::{Result, VrsError};

// ── Kind & location ──────────────────────────────────────────────────────────

/// The five piece containers.  Fixed-size kinds live in the fixed region;
/// the rest are indexed blobs in the variable region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceKind {
    Value,
    Array { count: usize },
    String,
    Vector,
    StringMap,
}

impl PieceKind {
    pub fn is_fixed_size(self) -> bool {
        matches!(self, PieceKind::Value | PieceKind::Array { .. })
    }
}

/// Where a piece's bytes live within its layout's serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceLocation {
    Fixed { offset: usize, size: usize },
    Var { index: usize },
}

// ── Metadata ─────────────────────────────────────────────────────────────────

/// Optional presentation metadata.  `min`/`max`/`increment` keep the JSON
/// typing of the piece's element so round-trips are lossless.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PieceMetadata {
    pub unit: Option<String>,
    pub description: Option<String>,
    pub min: Option<Json>,
    pub max: Option<Json>,
    pub increment: Option<Json>,
}

impl PieceMetadata {
    pub fn is_empty(&self) -> bool {
        self.unit.is_none()
            && self.description.is_none()
            && self.min.is_none()
            && self.max.is_none()
            && self.increment.is_none()
    }

    fn to_json(&self) -> Json {
        let mut map = Map::new();
        if let Some(v) = &self.unit {
            map.insert("unit".into(), json!(v));
        }
        if let Some(v) = &self.description {
            map.insert("description".into(), json!(v));
        }
        if let Some(v) = &self.min {
            map.insert("min".into(), v.clone());
        }
        if let Some(v) = &self.max {
            map.insert("max".into(), v.clone());
        }
        if let Some(v) = &self.increment {
            map.insert("increment".into(), v.clone());
        }
        Json::Object(map)
    }

    fn from_json(j: &Json) -> Self {
        Self {
            unit: j.get("unit").and_then(Json::as_str).map(String::from),
            description: j.get("description").and_then(Json::as_str).map(String::from),
            min: j.get("min").cloned(),
            max: j.get("max").cloned(),
            increment: j.get("increment").cloned(),
        }
    }
}

// ── DataPiece ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct DataPiece {
    pub label: String,
    pub kind: PieceKind,
    pub element: ElementType,
    pub location: PieceLocation,
    /// Default in JSON typing; fixed-size pieces also cache the wire bytes.
    pub default: Option<Json>,
    pub default_bytes: Option<Vec<u8>>,
    pub metadata: PieceMetadata,
    /// Mapping this layout onto a file fails unless this piece binds.
    pub required: bool,
}

impl DataPiece {
    /// Byte size inside the fixed region; `None` for variable-size pieces.
    pub fn fixed_size(&self) -> Option<usize> {
        match self.kind {
            PieceKind::Value => self.element.byte_size(),
            PieceKind::Array { count } => self.element.byte_size().map(|s| s * count),
            _ => None,
        }
    }

    /// Schema type name: `value<uint32_t>`, `array<float>`, `string`,
    /// `vector<string>`, `string_map<point3df>`.
    pub fn type_name(&self) -> String {
        match self.kind {
            PieceKind::Value => format!("value<{}>", self.element.name()),
            PieceKind::Array { .. } => format!("array<{}>", self.element.name()),
            PieceKind::String => "string".to_string(),
            PieceKind::Vector => format!("vector<{}>", self.element.name()),
            PieceKind::StringMap => format!("string_map<{}>", self.element.name()),
        }
    }

    /// Mapping compatibility: same label, container kind, element type, and
    /// fixed count where applicable.
    pub fn matches(&self, other: &DataPiece) -> bool {
        self.label == other.label && self.kind == other.kind && self.element == other.element
    }

    // ── JSON descriptor ──────────────────────────────────────────────────────

    pub fn to_json(&self) -> Json {
        let mut map = Map::new();
        map.insert("name".into(), json!(self.label));
        map.insert("type".into(), json!(self.type_name()));
        if let PieceKind::Array { count } = self.kind {
            map.insert("size".into(), json!(count));
        }
        match self.location {
            PieceLocation::Fixed { offset, .. } => {
                map.insert("offset".into(), json!(offset));
            }
            PieceLocation::Var { index } => {
                map.insert("index".into(), json!(index));
            }
        }
        if let Some(default) = &self.default {
            map.insert("default".into(), default.clone());
        }
        if self.required {
            map.insert("required".into(), json!(true));
        }
        if !self.metadata.is_empty() {
            map.insert("properties".into(), self.metadata.to_json());
        }
        Json::Object(map)
    }

    /// Parse a JSON descriptor.  Errors name the offending piece so schema
    /// problems are actionable.
    pub fn from_json(j: &Json) -> Result<Self> {
        let label = j
            .get("name")
            .and_then(Json::as_str)
            .ok_or_else(|| schema_err(j, "missing piece name"))?
            .to_string();
        let type_name = j
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| schema_err(j, &format!("piece '{label}' has no type")))?;

        let (kind, element) = parse_type_name(type_name, j.get("size").and_then(Json::as_u64))
            .ok_or_else(|| schema_err(j, &format!("piece '{label}' has bad type '{type_name}'")))?;

        let location = if kind.is_fixed_size() {
            let offset = j
                .get("offset")
                .and_then(Json::as_u64)
                .ok_or_else(|| schema_err(j, &format!("fixed piece '{label}' has no offset")))?
                as usize;
            let size = match kind {
                PieceKind::Value => element.byte_size(),
                PieceKind::Array { count } => element.byte_size().map(|s| s * count),
                _ => None,
            }
            .ok_or_else(|| schema_err(j, &format!("piece '{label}' has unsized element")))?;
            PieceLocation::Fixed { offset, size }
        } else {
            let index = j
                .get("index")
                .and_then(Json::as_u64)
                .ok_or_else(|| schema_err(j, &format!("variable piece '{label}' has no index")))?
                as usize;
            PieceLocation::Var { index }
        };

        Ok(Self {
            label,
            kind,
            element,
            location,
            default: j.get("default").cloned(),
            default_bytes: None,
            metadata: j.get("properties").map(PieceMetadata::from_json).unwrap_or_default(),
            required: j.get("required").and_then(Json::as_bool).unwrap_or(false),
        })
    }
}

/// Parse `value<T>` / `array<T>` / `string` / `vector<T>` / `string_map<T>`.
/// Array count comes from the sibling `size` field.
fn parse_type_name(s: &str, size: Option<u64>) -> Option<(PieceKind, ElementType)> {
    if s == "string" {
        return Some((PieceKind::String, ElementType::String));
    }
    let (container, elem) = s.strip_suffix('>')?.split_once('<')?;
    let element = ElementType::from_name(elem)?;
    match container {
        "value" if element != ElementType::String => Some((PieceKind::Value, element)),
        "array" if element != ElementType::String => {
            Some((PieceKind::Array { count: size? as usize }, element))
        }
        "vector" => Some((PieceKind::Vector, element)),
        "string_map" => Some((PieceKind::StringMap, element)),
        _ => None,
    }
}

fn schema_err(piece: &Json, msg: &str) -> VrsError {
    VrsError::DataLayoutSchemaMismatch(format!("{msg} (in {piece})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piece(kind: PieceKind, element: ElementType, location: PieceLocation) -> DataPiece {
        DataPiece {
            label: "p".into(),
            kind,
            element,
            location,
            default: None,
            default_bytes: None,
            metadata: PieceMetadata::default(),
            required: false,
        }
    }

    #[test]
    fn type_names() {
        let p = piece(
            PieceKind::Value,
            ElementType::UInt32,
            PieceLocation::Fixed { offset: 0, size: 4 },
        );
        assert_eq!(p.type_name(), "value<uint32_t>");

        let p = piece(
            PieceKind::StringMap,
            ElementType::Point3Df,
            PieceLocation::Var { index: 0 },
        );
        assert_eq!(p.type_name(), "string_map<point3df>");
    }

    #[test]
    fn json_round_trip() {
        let mut p = piece(
            PieceKind::Array { count: 20 },
            ElementType::Float,
            PieceLocation::Fixed { offset: 24, size: 80 },
        );
        p.label = "camera_calibration".into();
        p.required = true;
        p.metadata.unit = Some("mm".into());
        p.default = Some(json!(vec![0.0f32; 20]));

        let j = p.to_json();
        let back = DataPiece::from_json(&j).unwrap();
        assert_eq!(back.label, p.label);
        assert_eq!(back.kind, p.kind);
        assert_eq!(back.element, p.element);
        assert_eq!(back.location, p.location);
        assert_eq!(back.required, p.required);
        assert_eq!(back.metadata, p.metadata);
        assert_eq!(back.to_json(), j);
    }

    #[test]
    fn bad_type_names_are_schema_errors() {
        let j = json!({"name":"x","type":"value<string>","offset":0});
        assert!(matches!(
            DataPiece::from_json(&j),
            Err(VrsError::DataLayoutSchemaMismatch(_))
        ));
        let j = json!({"name":"x","type":"list<float>","index":0});
        assert!(DataPiece::from_json(&j).is_err());
    }

    #[test]
    fn matching_requires_same_shape() {
        let a = piece(
            PieceKind::Array { count: 20 },
            ElementType::Float,
            PieceLocation::Fixed { offset: 0, size: 80 },
        );
        let mut b = a.clone();
        assert!(a.matches(&b));
        b.kind = PieceKind::Array { count: 25 };
        assert!(!a.matches(&b));
        let mut c = a.clone();
        c.element = ElementType::Double;
        assert!(!a.matches(&c));
    }
}
