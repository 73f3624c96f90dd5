//! Binary encoding of the primitive wire types.
//!
//! Layouts are fixed and order-dependent; the receiver knows the shape of
//! every value from the command it issued, so nothing is self-describing.
//!
//! | type        | layout                                                   |
//! |-------------|----------------------------------------------------------|
//! | Line        | UTF-8 bytes, single trailing LF, no length prefix        |
//! | Int32       | 4 bytes                                                  |
//! | DoubleArray | Int32 count (0 means null) + count doubles               |
//! | Matrix2D    | Int32 rows + Int32 cols + rows*cols doubles, col-major   |
//! | Pose        | 16 doubles, col-major, no header                         |
//! | ItemRef     | 8-byte id + 4-byte type tag                              |
//! | Ptr         | 8 bytes                                                  |
//! | XYZ         | 3 doubles, no header                                     |
//!
//! All scalars go through a single big-endian, fixed-width bincode
//! configuration, so host byte order never leaks onto the wire.
use std::io::{self, Read, Write};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
    decode_from_slice, encode_into_std_write,
};
use log::{trace, warn};

use crate::error::{LinkError, ProtocolError, Result};

use super::types::{ItemRef, Kind, Matrix2D, Pose, Ptr, Value};

/// Largest single `read` issued while accumulating a bulk payload.
pub(crate) const CHUNK_SIZE: usize = 4096;

const INT_SIZE: usize = 4;
const DOUBLE_SIZE: usize = 8;
const ID_SIZE: usize = 8;

pub(crate) fn wire_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

fn encode<T: Encode, W: Write>(value: T, w: &mut W) -> Result<()> {
    encode_into_std_write(value, w, wire_config()).map_err(ProtocolError::from)?;
    Ok(())
}

fn decode<T: Decode<()>>(bytes: &[u8]) -> Result<T> {
    let (value, _) = decode_from_slice(bytes, wire_config()).map_err(ProtocolError::from)?;
    Ok(value)
}

/// Reads exactly `len` bytes in bounded chunks.
///
/// End of stream before `len` bytes is a fatal framing error; the partial
/// buffer is never padded.
pub(crate) fn read_bytes<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    // Grows with what actually arrives; the declared length is not trusted.
    let mut buf = Vec::with_capacity(len.min(CHUNK_SIZE));
    let mut chunk = [0_u8; CHUNK_SIZE];

    while buf.len() < len {
        let want = (len - buf.len()).min(CHUNK_SIZE);
        match r.read(&mut chunk[..want]) {
            Ok(0) => {
                return Err(ProtocolError::ShortRead {
                    expected: len,
                    received: buf.len(),
                }
                .into());
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(buf)
}

fn length<R: Read>(r: &mut R) -> Result<usize> {
    let n = read_int(r)?;
    usize::try_from(n).map_err(|_| ProtocolError::NegativeLength(n).into())
}

fn checked_len(count: usize, size: usize) -> Result<usize> {
    count
        .checked_mul(size)
        .ok_or_else(|| ProtocolError::LengthOverflow { count, size }.into())
}

fn read_doubles<R: Read>(r: &mut R, count: usize) -> Result<Vec<f64>> {
    let bytes = read_bytes(r, checked_len(count, DOUBLE_SIZE)?)?;
    bytes.chunks_exact(DOUBLE_SIZE).map(decode::<f64>).collect()
}

fn write_doubles<W: Write>(w: &mut W, values: &[f64]) -> Result<()> {
    for v in values {
        encode(*v, w)?;
    }
    Ok(())
}

pub fn write_line<W: Write>(w: &mut W, line: &str) -> Result<()> {
    let line = line.replace(['\n', '\r'], " ");
    trace!("send line {line:?}");
    w.write_all(line.as_bytes())?;
    w.write_all(b"\n")?;
    Ok(())
}

/// Reads one byte at a time up to (and consuming) the terminating LF.
pub fn read_line<R: Read>(r: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    let mut byte = [0_u8; 1];

    loop {
        match r.read(&mut byte) {
            Ok(0) => {
                return Err(ProtocolError::ShortRead {
                    expected: bytes.len() + 1,
                    received: bytes.len(),
                }
                .into());
            }
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => bytes.push(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let line = String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    trace!("recv line {line:?}");
    Ok(line)
}

pub fn write_int<W: Write>(w: &mut W, value: i32) -> Result<()> {
    encode(value, w)
}

pub fn read_int<R: Read>(r: &mut R) -> Result<i32> {
    decode(&read_bytes(r, INT_SIZE)?)
}

/// An empty slice is sent as the null array (count 0).
pub fn write_array<W: Write>(w: &mut W, values: &[f64]) -> Result<()> {
    let count = i32::try_from(values.len())
        .map_err(|_| LinkError::Argument(format!("array of {} values", values.len())))?;
    write_int(w, count)?;
    write_doubles(w, values)
}

pub fn read_array<R: Read>(r: &mut R) -> Result<Vec<f64>> {
    let count = length(r)?;
    read_doubles(r, count)
}

pub fn write_matrix<W: Write>(w: &mut W, matrix: &Matrix2D) -> Result<()> {
    let dim = |n: usize| {
        i32::try_from(n).map_err(|_| LinkError::Argument(format!("matrix dimension {n}")))
    };
    write_int(w, dim(matrix.rows())?)?;
    write_int(w, dim(matrix.cols())?)?;
    write_doubles(w, matrix.data())
}

pub fn read_matrix<R: Read>(r: &mut R) -> Result<Matrix2D> {
    let rows = length(r)?;
    let cols = length(r)?;
    let count = checked_len(rows, cols)?;
    let data = read_doubles(r, count)?;
    Matrix2D::from_column_major(rows, cols, data).ok_or(
        ProtocolError::ShortRead {
            expected: count,
            received: 0,
        }
        .into(),
    )
}

/// Refuses poses that are not homogeneous transforms.
pub fn write_pose<W: Write>(w: &mut W, pose: &Pose) -> Result<()> {
    if !pose.is_homogeneous() {
        return Err(LinkError::Argument("pose is not homogeneous".into()));
    }
    encode(pose.column_major(), w)
}

pub fn read_pose<R: Read>(r: &mut R) -> Result<Pose> {
    let values: [f64; 16] = decode(&read_bytes(r, 16 * DOUBLE_SIZE)?)?;
    Ok(Pose::from_column_major(values))
}

pub fn write_item<W: Write>(w: &mut W, item: &ItemRef) -> Result<()> {
    encode(item, w)
}

/// A truncated id or type tag decodes to [`ItemRef::INVALID`].
pub fn read_item<R: Read>(r: &mut R) -> Result<ItemRef> {
    let id = match read_bytes(r, ID_SIZE) {
        Ok(bytes) => decode::<u64>(&bytes)?,
        Err(LinkError::Protocol(ProtocolError::ShortRead { received, .. })) => {
            warn!("item id truncated after {received} bytes");
            return Ok(ItemRef::INVALID);
        }
        Err(e) => return Err(e),
    };
    let kind = match read_bytes(r, INT_SIZE) {
        Ok(bytes) => decode::<i32>(&bytes)?,
        Err(LinkError::Protocol(ProtocolError::ShortRead { received, .. })) => {
            warn!("item type truncated after {received} bytes");
            return Ok(ItemRef::INVALID);
        }
        Err(e) => return Err(e),
    };
    Ok(ItemRef { id, kind })
}

pub fn write_ptr<W: Write>(w: &mut W, ptr: Ptr) -> Result<()> {
    encode(ptr, w)
}

pub fn read_ptr<R: Read>(r: &mut R) -> Result<Ptr> {
    decode(&read_bytes(r, ID_SIZE)?)
}

pub fn write_xyz<W: Write>(w: &mut W, xyz: &[f64; 3]) -> Result<()> {
    encode(*xyz, w)
}

pub fn read_xyz<R: Read>(r: &mut R) -> Result<[f64; 3]> {
    decode(&read_bytes(r, 3 * DOUBLE_SIZE)?)
}

pub fn write_value<W: Write>(w: &mut W, value: &Value) -> Result<()> {
    match value {
        Value::Int(v) => write_int(w, *v),
        Value::Line(v) => write_line(w, v),
        Value::Array(v) => write_array(w, v),
        Value::Matrix(v) => write_matrix(w, v),
        Value::Pose(v) => write_pose(w, v),
        Value::Item(v) => write_item(w, v),
        Value::Ptr(v) => write_ptr(w, *v),
        Value::Xyz(v) => write_xyz(w, v),
    }
}

pub fn read_value<R: Read>(r: &mut R, kind: Kind) -> Result<Value> {
    Ok(match kind {
        Kind::Int => Value::Int(read_int(r)?),
        Kind::Line => Value::Line(read_line(r)?),
        Kind::Array => Value::Array(read_array(r)?),
        Kind::Matrix => Value::Matrix(read_matrix(r)?),
        Kind::Pose => Value::Pose(read_pose(r)?),
        Kind::Item => Value::Item(read_item(r)?),
        Kind::Ptr => Value::Ptr(read_ptr(r)?),
        Kind::Xyz => Value::Xyz(read_xyz(r)?),
    })
}
