use std::fmt;

use bincode::{Decode, Encode};

/// Reference to a station-side object as it travels on the wire.
///
/// Carries no connection; see [`Item`](crate::Item) for the bound handle.
#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct ItemRef {
    pub id: u64,
    pub kind: i32,
}

impl ItemRef {
    pub const INVALID: ItemRef = ItemRef { id: 0, kind: -1 };

    pub fn new(id: u64, kind: i32) -> Self {
        Self { id, kind }
    }

    pub fn valid(&self) -> bool {
        self.id != 0
    }
}

impl PartialEq for ItemRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ItemRef {}

/// Opaque pointer to a station resource that is not an item (cameras, etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct Ptr(pub u64);

/// 4x4 homogeneous transform, stored row-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    rows: [[f64; 4]; 4],
}

const BOTTOM_ROW_TOLERANCE: f64 = 1e-6;
const ORTHONORMAL_TOLERANCE: f64 = 1e-4;

impl Pose {
    pub fn identity() -> Self {
        let mut rows = [[0.0; 4]; 4];
        for (i, row) in rows.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { rows }
    }

    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut pose = Self::identity();
        pose.rows[0][3] = x;
        pose.rows[1][3] = y;
        pose.rows[2][3] = z;
        pose
    }

    pub fn from_rows(rows: [[f64; 4]; 4]) -> Self {
        Self { rows }
    }

    /// Builds a pose from 16 values in wire (column-major) order.
    pub fn from_column_major(values: [f64; 16]) -> Self {
        let mut rows = [[0.0; 4]; 4];
        for (c, column) in values.chunks_exact(4).enumerate() {
            for (r, v) in column.iter().enumerate() {
                rows[r][c] = *v;
            }
        }
        Self { rows }
    }

    pub fn column_major(&self) -> [f64; 16] {
        let mut out = [0.0; 16];
        for c in 0..4 {
            for r in 0..4 {
                out[c * 4 + r] = self.rows[r][c];
            }
        }
        out
    }

    pub fn rows(&self) -> &[[f64; 4]; 4] {
        &self.rows
    }

    pub fn position(&self) -> [f64; 3] {
        [self.rows[0][3], self.rows[1][3], self.rows[2][3]]
    }

    /// Bottom row is `[0, 0, 0, 1]` and the rotation block is orthonormal.
    pub fn is_homogeneous(&self) -> bool {
        let bottom = [0.0, 0.0, 0.0, 1.0];
        if self.rows[3]
            .iter()
            .zip(bottom)
            .any(|(v, e)| (v - e).abs() > BOTTOM_ROW_TOLERANCE || v.is_nan())
        {
            return false;
        }

        // R^T * R must be the identity.
        for i in 0..3 {
            for j in 0..3 {
                let dot: f64 = (0..3).map(|k| self.rows[k][i] * self.rows[k][j]).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                if !((dot - expected).abs() <= ORTHONORMAL_TOLERANCE) {
                    return false;
                }
            }
        }
        true
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            writeln!(
                f,
                "[{:>10.4} {:>10.4} {:>10.4} {:>10.4}]",
                row[0], row[1], row[2], row[3]
            )?;
        }
        Ok(())
    }
}

/// Dense matrix of doubles in column-major order. Any shape, including 0x0.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Matrix2D {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix2D {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Returns `None` when `data` does not hold exactly `rows * cols` values.
    pub fn from_column_major(rows: usize, cols: usize, data: Vec<f64>) -> Option<Self> {
        (data.len() == rows * cols).then_some(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data.get(col * self.rows + row).copied()
    }

    pub fn column(&self, col: usize) -> Option<&[f64]> {
        if col >= self.cols {
            return None;
        }
        let start = col * self.rows;
        self.data.get(start..start + self.rows)
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }
}

/// A single typed argument or result of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Line(String),
    Array(Vec<f64>),
    Matrix(Matrix2D),
    Pose(Pose),
    Item(ItemRef),
    Ptr(Ptr),
    Xyz([f64; 3]),
}

/// Shape of an expected result, used to drive decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Int,
    Line,
    Array,
    Matrix,
    Pose,
    Item,
    Ptr,
    Xyz,
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Int(_) => Kind::Int,
            Value::Line(_) => Kind::Line,
            Value::Array(_) => Kind::Array,
            Value::Matrix(_) => Kind::Matrix,
            Value::Pose(_) => Kind::Pose,
            Value::Item(_) => Kind::Item,
            Value::Ptr(_) => Kind::Ptr,
            Value::Xyz(_) => Kind::Xyz,
        }
    }
}
