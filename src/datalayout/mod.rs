//! The typed data-layout subsystem — self-describing, schema-aware field
//! containers that survive schema evolution via structural mapping.
//!
//! A [`DataLayout`] is an ordered, frozen set of named typed pieces backed by
//! a packed buffer: a fixed region of POD fields and an indexed variable
//! region for strings, vectors and string maps.  Layouts serialize to a JSON
//! schema (stored as stream tags) plus binary data (stored in records), and
//! a layout declared in code can be *mapped* onto a layout read from disk:
//! each piece binds by (label, container, element type, shape), unbound
//! pieces fall back to their defaults, and a mapping missing a `required`
//! piece fails outright.
//!
//! See `layout.rs` for the buffer and mapping machinery, `types.rs` for the
//! sealed element set, `accessors.rs` for the typed handles, and
//! `conventions.rs` for the well-known image/audio piece names.

pub mod accessors;
pub mod conventions;
pub mod layout;
pub mod piece;
pub mod types;

pub use accessors::{
    DataPieceArray, DataPieceString, DataPieceStringMap, DataPieceValue, DataPieceVector,
};
pub use layout::{DataLayout, DataLayoutBuilder};
pub use piece::{DataPiece, PieceKind, PieceLocation, PieceMetadata};
pub use types::{
    Bool, ElementType, Matrix, Matrix2Dd, Matrix2Df, Matrix2Di, Matrix3Dd, Matrix3Df, Matrix3Di,
    Matrix4Dd, Matrix4Df, Matrix4Di, PieceElement, Point, Point2Dd, Point2Df, Point2Di, Point3Dd,
    Point3Df, Point3Di, Point4Dd, Point4Df, Point4Di, VarElement,
};
