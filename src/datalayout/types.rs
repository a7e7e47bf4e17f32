//! Element types usable in data-layout pieces.
//!
//! The set is sealed: primitive integers and floats, [`Bool`] (a one-byte
//! stand-in, because bit-packed booleans break array semantics), fixed
//! 2/3/4-dimension points and square matrices over `i32`/`f32`/`f64`, and
//! strings (variable-size pieces only).
//!
//! All byte conversion goes through `to_le_bytes`/`from_le_bytes` copies —
//! a piece never hands out a pointer into the layout buffer, so unaligned
//! file data is safe on every architecture.

use serde_json::{json, Value as Json};

// ── ElementType ──────────────────────────────────────────────────────────────

/// Runtime tag for the element type of a piece.  Names follow the schema
/// spelling used in layout JSON (`value<uint32_t>`, `string_map<point3df>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Bool,
    Point2Di,
    Point2Df,
    Point2Dd,
    Point3Di,
    Point3Df,
    Point3Dd,
    Point4Di,
    Point4Df,
    Point4Dd,
    Matrix2Di,
    Matrix2Df,
    Matrix2Dd,
    Matrix3Di,
    Matrix3Df,
    Matrix3Dd,
    Matrix4Di,
    Matrix4Df,
    Matrix4Dd,
    String,
}

impl ElementType {
    /// Fixed byte size, or `None` for strings.
    pub fn byte_size(self) -> Option<usize> {
        use ElementType::*;
        Some(match self {
            Int8 | UInt8 | Bool => 1,
            Int16 | UInt16 => 2,
            Int32 | UInt32 | Float => 4,
            Int64 | UInt64 | Double => 8,
            Point2Di | Point2Df => 8,
            Point2Dd => 16,
            Point3Di | Point3Df => 12,
            Point3Dd => 24,
            Point4Di | Point4Df => 16,
            Point4Dd => 32,
            Matrix2Di | Matrix2Df => 16,
            Matrix2Dd => 32,
            Matrix3Di | Matrix3Df => 36,
            Matrix3Dd => 72,
            Matrix4Di | Matrix4Df => 64,
            Matrix4Dd => 128,
            String => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use ElementType::*;
        match self {
            Int8 => "int8_t",
            UInt8 => "uint8_t",
            Int16 => "int16_t",
            UInt16 => "uint16_t",
            Int32 => "int32_t",
            UInt32 => "uint32_t",
            Int64 => "int64_t",
            UInt64 => "uint64_t",
            Float => "float",
            Double => "double",
            Bool => "bool",
            Point2Di => "point2di",
            Point2Df => "point2df",
            Point2Dd => "point2dd",
            Point3Di => "point3di",
            Point3Df => "point3df",
            Point3Dd => "point3dd",
            Point4Di => "point4di",
            Point4Df => "point4df",
            Point4Dd => "point4dd",
            Matrix2Di => "matrix2di",
            Matrix2Df => "matrix2df",
            Matrix2Dd => "matrix2dd",
            Matrix3Di => "matrix3di",
            Matrix3Df => "matrix3df",
            Matrix3Dd => "matrix3dd",
            Matrix4Di => "matrix4di",
            Matrix4Df => "matrix4df",
            Matrix4Dd => "matrix4dd",
            String => "string",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        use ElementType::*;
        Some(match s {
            "int8_t" => Int8,
            "uint8_t" => UInt8,
            "int16_t" => Int16,
            "uint16_t" => UInt16,
            "int32_t" => Int32,
            "uint32_t" => UInt32,
            "int64_t" => Int64,
            "uint64_t" => UInt64,
            "float" => Float,
            "double" => Double,
            "bool" => Bool,
            "point2di" => Point2Di,
            "point2df" => Point2Df,
            "point2dd" => Point2Dd,
            "point3di" => Point3Di,
            "point3df" => Point3Df,
            "point3dd" => Point3Dd,
            "point4di" => Point4Di,
            "point4df" => Point4Df,
            "point4dd" => Point4Dd,
            "matrix2di" => Matrix2Di,
            "matrix2df" => Matrix2Df,
            "matrix2dd" => Matrix2Dd,
            "matrix3di" => Matrix3Di,
            "matrix3df" => Matrix3Df,
            "matrix3dd" => Matrix3Dd,
            "matrix4di" => Matrix4Di,
            "matrix4df" => Matrix4Df,
            "matrix4dd" => Matrix4Dd,
            "string" => String,
            _ => return None,
        })
    }
}

// ── Bool ─────────────────────────────────────────────────────────────────────

/// One-byte boolean.  `Vec<bool>` and `[bool; N]` have no stable byte layout
/// guarantees across the serialization helpers, so layouts store this
/// explicit single-byte type instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Bool(pub bool);

impl From<bool> for Bool {
    fn from(v: bool) -> Self {
        Bool(v)
    }
}

impl From<Bool> for bool {
    fn from(v: Bool) -> Self {
        v.0
    }
}

// ── Points & matrices ────────────────────────────────────────────────────────

/// Fixed-dimension point, 2 ≤ N ≤ 4, over `i32`/`f32`/`f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point<T, const N: usize>(pub [T; N]);

impl<T: Copy + Default, const N: usize> Default for Point<T, N> {
    fn default() -> Self {
        Point([T::default(); N])
    }
}

/// Fixed-dimension square matrix (row-major), 2 ≤ N ≤ 4.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix<T, const N: usize>(pub [[T; N]; N]);

impl<T: Copy + Default, const N: usize> Default for Matrix<T, N> {
    fn default() -> Self {
        Matrix([[T::default(); N]; N])
    }
}

pub type Point2Di = Point<i32, 2>;
pub type Point2Df = Point<f32, 2>;
pub type Point2Dd = Point<f64, 2>;
pub type Point3Di = Point<i32, 3>;
pub type Point3Df = Point<f32, 3>;
pub type Point3Dd = Point<f64, 3>;
pub type Point4Di = Point<i32, 4>;
pub type Point4Df = Point<f32, 4>;
pub type Point4Dd = Point<f64, 4>;
pub type Matrix2Di = Matrix<i32, 2>;
pub type Matrix2Df = Matrix<f32, 2>;
pub type Matrix2Dd = Matrix<f64, 2>;
pub type Matrix3Di = Matrix<i32, 3>;
pub type Matrix3Df = Matrix<f32, 3>;
pub type Matrix3Dd = Matrix<f64, 3>;
pub type Matrix4Di = Matrix<i32, 4>;
pub type Matrix4Df = Matrix<f32, 4>;
pub type Matrix4Dd = Matrix<f64, 4>;

// ── PieceElement (sealed) ────────────────────────────────────────────────────

mod sealed {
    pub trait Sealed {}
}

/// Fixed-size element usable in `value<T>` and `array<T>` pieces.
///
/// Sealed: the implementations below are the complete set; layouts never
/// see an element type unknown at compile time.
pub trait PieceElement: sealed::Sealed + Copy + Default + PartialEq + 'static {
    const ELEMENT: ElementType;
    const SIZE: usize;

    /// Serialize into `out` (exactly `SIZE` bytes), little-endian.
    fn write_le(&self, out: &mut [u8]);
    /// Deserialize from `bytes` (at least `SIZE` bytes), little-endian.
    fn read_le(bytes: &[u8]) -> Self;

    fn to_json(&self) -> Json;
    fn from_json(v: &Json) -> Option<Self>;
}

macro_rules! scalar_piece_element {
    ($t:ty, $elem:ident, $size:expr, $to_json:expr, $from_json:expr) => {
        impl sealed::Sealed for $t {}
        impl PieceElement for $t {
            const ELEMENT: ElementType = ElementType::$elem;
            const SIZE: usize = $size;

            fn write_le(&self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }
            fn read_le(bytes: &[u8]) -> Self {
                <$t>::from_le_bytes(bytes[..Self::SIZE].try_into().unwrap())
            }
            fn to_json(&self) -> Json {
                let f: fn(&$t) -> Json = $to_json;
                f(self)
            }
            fn from_json(v: &Json) -> Option<Self> {
                let f: fn(&Json) -> Option<$t> = $from_json;
                f(v)
            }
        }
    };
}

scalar_piece_element!(i8, Int8, 1, |v| json!(v), |j| j.as_i64().map(|v| v as i8));
scalar_piece_element!(u8, UInt8, 1, |v| json!(v), |j| j.as_u64().map(|v| v as u8));
scalar_piece_element!(i16, Int16, 2, |v| json!(v), |j| j.as_i64().map(|v| v as i16));
scalar_piece_element!(u16, UInt16, 2, |v| json!(v), |j| j.as_u64().map(|v| v as u16));
scalar_piece_element!(i32, Int32, 4, |v| json!(v), |j| j.as_i64().map(|v| v as i32));
scalar_piece_element!(u32, UInt32, 4, |v| json!(v), |j| j.as_u64().map(|v| v as u32));
scalar_piece_element!(i64, Int64, 8, |v| json!(v), |j| j.as_i64());
scalar_piece_element!(u64, UInt64, 8, |v| json!(v), |j| j.as_u64());
scalar_piece_element!(f32, Float, 4, |v| json!(v), |j| j.as_f64().map(|v| v as f32));
scalar_piece_element!(f64, Double, 8, |v| json!(v), |j| j.as_f64());

impl sealed::Sealed for Bool {}
impl PieceElement for Bool {
    const ELEMENT: ElementType = ElementType::Bool;
    const SIZE: usize = 1;

    fn write_le(&self, out: &mut [u8]) {
        out[0] = self.0 as u8;
    }
    fn read_le(bytes: &[u8]) -> Self {
        Bool(bytes[0] != 0)
    }
    fn to_json(&self) -> Json {
        json!(self.0)
    }
    fn from_json(v: &Json) -> Option<Self> {
        v.as_bool().map(Bool)
    }
}

macro_rules! point_piece_element {
    ($t:ty, $n:literal, $elem:ident) => {
        impl sealed::Sealed for Point<$t, $n> {}
        impl PieceElement for Point<$t, $n> {
            const ELEMENT: ElementType = ElementType::$elem;
            const SIZE: usize = <$t as PieceElement>::SIZE * $n;

            fn write_le(&self, out: &mut [u8]) {
                for (i, v) in self.0.iter().enumerate() {
                    v.write_le(&mut out[i * <$t as PieceElement>::SIZE..]);
                }
            }
            fn read_le(bytes: &[u8]) -> Self {
                let mut values = [<$t>::default(); $n];
                for (i, v) in values.iter_mut().enumerate() {
                    *v = <$t>::read_le(&bytes[i * <$t as PieceElement>::SIZE..]);
                }
                Point(values)
            }
            fn to_json(&self) -> Json {
                Json::Array(self.0.iter().map(|v| v.to_json()).collect())
            }
            fn from_json(j: &Json) -> Option<Self> {
                let arr = j.as_array()?;
                if arr.len() != $n {
                    return None;
                }
                let mut values = [<$t>::default(); $n];
                for (v, item) in values.iter_mut().zip(arr) {
                    *v = <$t>::from_json(item)?;
                }
                Some(Point(values))
            }
        }
    };
}

macro_rules! matrix_piece_element {
    ($t:ty, $n:literal, $elem:ident) => {
        impl sealed::Sealed for Matrix<$t, $n> {}
        impl PieceElement for Matrix<$t, $n> {
            const ELEMENT: ElementType = ElementType::$elem;
            const SIZE: usize = <$t as PieceElement>::SIZE * $n * $n;

            fn write_le(&self, out: &mut [u8]) {
                let mut pos = 0;
                for row in &self.0 {
                    for v in row {
                        v.write_le(&mut out[pos..]);
                        pos += <$t as PieceElement>::SIZE;
                    }
                }
            }
            fn read_le(bytes: &[u8]) -> Self {
                let mut values = [[<$t>::default(); $n]; $n];
                let mut pos = 0;
                for row in values.iter_mut() {
                    for v in row.iter_mut() {
                        *v = <$t>::read_le(&bytes[pos..]);
                        pos += <$t as PieceElement>::SIZE;
                    }
                }
                Matrix(values)
            }
            fn to_json(&self) -> Json {
                Json::Array(
                    self.0
                        .iter()
                        .map(|row| Json::Array(row.iter().map(|v| v.to_json()).collect()))
                        .collect(),
                )
            }
            fn from_json(j: &Json) -> Option<Self> {
                let rows = j.as_array()?;
                if rows.len() != $n {
                    return None;
                }
                let mut values = [[<$t>::default(); $n]; $n];
                for (row, jrow) in values.iter_mut().zip(rows) {
                    let items = jrow.as_array()?;
                    if items.len() != $n {
                        return None;
                    }
                    for (v, item) in row.iter_mut().zip(items) {
                        *v = <$t>::from_json(item)?;
                    }
                }
                Some(Matrix(values))
            }
        }
    };
}

point_piece_element!(i32, 2, Point2Di);
point_piece_element!(f32, 2, Point2Df);
point_piece_element!(f64, 2, Point2Dd);
point_piece_element!(i32, 3, Point3Di);
point_piece_element!(f32, 3, Point3Df);
point_piece_element!(f64, 3, Point3Dd);
point_piece_element!(i32, 4, Point4Di);
point_piece_element!(f32, 4, Point4Df);
point_piece_element!(f64, 4, Point4Dd);
matrix_piece_element!(i32, 2, Matrix2Di);
matrix_piece_element!(f32, 2, Matrix2Df);
matrix_piece_element!(f64, 2, Matrix2Dd);
matrix_piece_element!(i32, 3, Matrix3Di);
matrix_piece_element!(f32, 3, Matrix3Df);
matrix_piece_element!(f64, 3, Matrix3Dd);
matrix_piece_element!(i32, 4, Matrix4Di);
matrix_piece_element!(f32, 4, Matrix4Df);
matrix_piece_element!(f64, 4, Matrix4Dd);

// ── VarElement ───────────────────────────────────────────────────────────────

/// Element usable in variable-size pieces (`vector<T>`, `string_map<T>`).
/// Every [`PieceElement`] qualifies, plus `String`.
pub trait VarElement: Clone + Default + PartialEq + 'static {
    const ELEMENT: ElementType;

    fn append_wire(&self, out: &mut Vec<u8>);
    /// Read one element from `bytes` at `*pos`, advancing it.
    fn read_wire(bytes: &[u8], pos: &mut usize) -> Option<Self>;
    fn to_json_value(&self) -> Json;
}

macro_rules! var_element_from_piece {
    ($($t:ty),* $(,)?) => {$(
        impl VarElement for $t {
            const ELEMENT: ElementType = <$t as PieceElement>::ELEMENT;

            fn append_wire(&self, out: &mut Vec<u8>) {
                let start = out.len();
                out.resize(start + <$t as PieceElement>::SIZE, 0);
                self.write_le(&mut out[start..]);
            }
            fn read_wire(bytes: &[u8], pos: &mut usize) -> Option<Self> {
                let size = <$t as PieceElement>::SIZE;
                if bytes.len().saturating_sub(*pos) < size {
                    return None;
                }
                let v = <$t as PieceElement>::read_le(&bytes[*pos..]);
                *pos += size;
                Some(v)
            }
            fn to_json_value(&self) -> Json {
                PieceElement::to_json(self)
            }
        }
    )*};
}

var_element_from_piece!(
    i8, u8, i16, u16, i32, u32, i64, u64, f32, f64, Bool,
    Point2Di, Point2Df, Point2Dd, Point3Di, Point3Df, Point3Dd,
    Point4Di, Point4Df, Point4Dd,
    Matrix2Di, Matrix2Df, Matrix2Dd, Matrix3Di, Matrix3Df, Matrix3Dd,
    Matrix4Di, Matrix4Df, Matrix4Dd,
);

impl VarElement for String {
    const ELEMENT: ElementType = ElementType::String;

    fn append_wire(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.len() as u32).to_le_bytes());
        out.extend_from_slice(self.as_bytes());
    }
    fn read_wire(bytes: &[u8], pos: &mut usize) -> Option<Self> {
        if bytes.len().saturating_sub(*pos) < 4 {
            return None;
        }
        let len = u32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap()) as usize;
        *pos += 4;
        if bytes.len().saturating_sub(*pos) < len {
            return None;
        }
        let s = String::from_utf8_lossy(&bytes[*pos..*pos + len]).into_owned();
        *pos += len;
        Some(s)
    }
    fn to_json_value(&self) -> Json {
        json!(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_names_round_trip() {
        use ElementType::*;
        for e in [
            Int8, UInt8, Int16, UInt16, Int32, UInt32, Int64, UInt64, Float, Double, Bool,
            Point2Di, Point2Df, Point2Dd, Point3Di, Point3Df, Point3Dd, Point4Di, Point4Df,
            Point4Dd, Matrix2Di, Matrix2Df, Matrix2Dd, Matrix3Di, Matrix3Df, Matrix3Dd,
            Matrix4Di, Matrix4Df, Matrix4Dd, String,
        ] {
            assert_eq!(ElementType::from_name(e.name()), Some(e));
        }
    }

    #[test]
    fn scalar_byte_round_trip() {
        let mut buf = [0u8; 8];
        0x1234_5678u32.write_le(&mut buf);
        assert_eq!(u32::read_le(&buf), 0x1234_5678);
        (-2.5f64).write_le(&mut buf);
        assert_eq!(f64::read_le(&buf), -2.5);
    }

    #[test]
    fn point_and_matrix_round_trip() {
        let p = Point([1.0f32, 2.0, 3.0]);
        let mut buf = [0u8; 12];
        p.write_le(&mut buf);
        assert_eq!(Point::<f32, 3>::read_le(&buf), p);
        assert_eq!(Point::<f32, 3>::SIZE, 12);

        let m = Matrix([[1i32, 2], [3, 4]]);
        let mut buf = [0u8; 16];
        m.write_le(&mut buf);
        assert_eq!(Matrix::<i32, 2>::read_le(&buf), m);
        assert_eq!(
            ElementType::Matrix2Di.byte_size(),
            Some(Matrix::<i32, 2>::SIZE)
        );
    }

    #[test]
    fn string_wire_round_trip() {
        let mut buf = Vec::new();
        "hello".to_string().append_wire(&mut buf);
        "".to_string().append_wire(&mut buf);
        let mut pos = 0;
        assert_eq!(String::read_wire(&buf, &mut pos).unwrap(), "hello");
        assert_eq!(String::read_wire(&buf, &mut pos).unwrap(), "");
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn json_round_trip_for_pods() {
        let p = Point([1i32, -2, 3]);
        assert_eq!(Point::<i32, 3>::from_json(&PieceElement::to_json(&p)), Some(p));
        let b = Bool(true);
        assert_eq!(Bool::from_json(&PieceElement::to_json(&b)), Some(b));
    }
}
